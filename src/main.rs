#[macro_use]
extern crate log;

use std::env::consts::{ARCH, FAMILY, OS};
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger};

use crate::gallery::io::{LOG_NAME, default_settings_directory};
use crate::program::{Cli, Program};

mod gallery;
mod program;

/// Lines written to the log file between flushes.
const FLUSH_EVERY: usize = 50;

/// Buffered log file that flushes every [FLUSH_EVERY] lines.
struct BufferedLogFile {
    inner: BufWriter<File>,
    lines: usize,
}

impl BufferedLogFile {
    fn new(file: File) -> Self {
        Self {
            inner: BufWriter::with_capacity(64 * 1024, file),
            lines: 0,
        }
    }
}

impl Write for BufferedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size = self.inner.write(buf)?;
        let newlines = buf[..size].iter().filter(|&&b| b == b'\n').count();
        if newlines > 0 {
            let before = self.lines / FLUSH_EVERY;
            self.lines += newlines;
            if self.lines / FLUSH_EVERY != before {
                self.inner.flush()?;
            }
        }
        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn main() {
    let cli = Cli::parse();
    initialize_logger(cli.log_level(), log_directory(&cli));
    log_system_information();

    let result = Program::new(cli).run();
    if let Err(e) = &result {
        error!("{e:#}");
    }
    log::logger().flush();
    if result.is_err() {
        exit(1);
    }
}

/// Where the log file goes: the settings directory, created if needed.
fn log_directory(cli: &Cli) -> Option<PathBuf> {
    let dir = cli.config_dir.clone().or_else(default_settings_directory)?;
    match create_dir_all(&dir) {
        Ok(()) => Some(dir),
        Err(e) => {
            eprintln!("Unable to create {}: {e}", dir.display());
            None
        }
    }
}

/// Logs to the terminal at `level` and everything to the buffered log file. Falls
/// back to the terminal alone when the file cannot be opened.
fn initialize_logger(level: LevelFilter, directory: Option<PathBuf>) {
    let mut file_config = ConfigBuilder::new();
    file_config.add_filter_allow_str(env!("CARGO_PKG_NAME"));

    let log_file = directory.and_then(|dir| {
        let path = dir.join(LOG_NAME);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map(BufferedLogFile::new)
            .map_err(|e| eprintln!("Unable to open {}: {e}. Logging to the terminal only.", path.display()))
            .ok()
    });

    let terminal = TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
    let result = match log_file {
        Some(file) => CombinedLogger::init(vec![
            terminal,
            WriteLogger::new(LevelFilter::Trace, file_config.build(), file),
        ]),
        None => CombinedLogger::init(vec![terminal]),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {e}");
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
