use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use console::{Term, style};
use log::LevelFilter;

use crate::gallery::io::cookies::PersistentJar;
use crate::gallery::io::{RunMode, Settings, SiteKind};
use crate::gallery::ledger::Ledger;
use crate::gallery::sender::RequestSender;
use crate::gallery::session::ensure_logged_in;
use crate::gallery::{GalleryDownloader, RunOptions, site};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Downloads the galleries of artists you follow, skipping everything
/// fetched on an earlier run.
#[derive(Parser, Debug)]
#[command(name = NAME, version, author)]
pub(crate) struct Cli {
    /// Artists whose listings are crawled.
    #[arg(required_unless_present = "watchlist", conflicts_with = "watchlist")]
    pub(crate) artists: Vec<String>,

    /// Process the new-submissions feed instead of artist listings.
    #[arg(short, long)]
    pub(crate) watchlist: bool,

    /// Only log warnings and errors to the terminal.
    #[arg(short, long, conflicts_with = "verbose")]
    pub(crate) quiet: bool,

    /// Log debug output to the terminal.
    #[arg(short, long)]
    pub(crate) verbose: bool,

    #[arg(short = 'g', long = "gallery", overrides_with = "no_gallery")]
    gallery: bool,
    #[arg(long = "no-gallery", overrides_with = "gallery")]
    no_gallery: bool,

    #[arg(short = 'f', long = "favourites", alias = "favorites", overrides_with = "no_favourites")]
    favourites: bool,
    #[arg(long = "no-favourites", alias = "no-favorites", overrides_with = "favourites")]
    no_favourites: bool,

    #[arg(short = 's', long = "scraps", overrides_with = "no_scraps")]
    scraps: bool,
    #[arg(long = "no-scraps", overrides_with = "scraps")]
    no_scraps: bool,

    /// Stop crawling a listing at the first page with nothing new.
    #[arg(long = "fast-scan", overrides_with = "no_fast_scan")]
    fast_scan: bool,
    #[arg(long = "no-fast-scan", overrides_with = "fast_scan")]
    no_fast_scan: bool,

    /// Where images are saved.
    #[arg(short, long, value_name = "DIR")]
    pub(crate) download_directory: Option<PathBuf>,

    /// Directory holding the config file, ledger, cookies and log.
    #[arg(short, long, value_name = "DIR")]
    pub(crate) config_dir: Option<PathBuf>,

    /// Which site to download from.
    #[arg(long, value_enum)]
    pub(crate) site: Option<SiteKind>,
}

/// `Some(true)` for `--x`, `Some(false)` for `--no-x`, `None` when neither
/// was given.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    pub(crate) fn gallery(&self) -> Option<bool> {
        switch(self.gallery, self.no_gallery)
    }

    pub(crate) fn favourites(&self) -> Option<bool> {
        switch(self.favourites, self.no_favourites)
    }

    pub(crate) fn scraps(&self) -> Option<bool> {
        switch(self.scraps, self.no_scraps)
    }

    pub(crate) fn fast_scan(&self) -> Option<bool> {
        switch(self.fast_scan, self.no_fast_scan)
    }

    /// Terminal log level picked by `-q` and `-v`.
    pub(crate) fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Warn
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

/// A program class that handles the flow of the downloader and its steps of execution.
pub(crate) struct Program {
    cli: Cli,
}

impl Program {
    pub(crate) fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Runs the downloader program.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("Gallery downloader");
        trace!("Starting gallery downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);

        let settings = Settings::load(&self.cli)?;
        trace!("Settings directory: {}", settings.settings_directory.display());
        trace!("Download directory: {}", settings.download_directory.display());
        trace!("Login Username: {}", settings.credentials.username);
        trace!("Login Password: {}", "*".repeat(settings.credentials.password.len()));

        let ledger_path = settings.ledger_path();
        let ledger = Ledger::open(&ledger_path)
            .with_context(|| format!("Unable to open the ledger at {}", ledger_path.display()))?;
        info!("{} images recorded in {}", ledger.len()?, ledger.path().display());

        let cookie_path = settings.cookie_path();
        let jar = match PersistentJar::load(&cookie_path) {
            Ok(jar) => jar,
            Err(e) => {
                warn!("Unable to read cookies from {}: {e}", cookie_path.display());
                PersistentJar::empty(&cookie_path)
            }
        };
        let sender = RequestSender::new(&settings.network, jar.store()).context("Unable to build the HTTP client")?;
        let site = site::for_kind(settings.site, settings.base_url.clone());

        ensure_logged_in(&sender, site.as_ref(), &settings.credentials)?;
        save_cookies(&jar);

        let mut downloader = GalleryDownloader::new(&sender, site.as_ref(), &ledger, RunOptions::from(&settings));
        let result = match &settings.mode {
            RunMode::Listing(artists) => downloader.run_listing(artists),
            RunMode::Watchlist => downloader.run_watchlist(),
        };
        save_cookies(&jar);

        let summary = result?;
        info!("Finished: {}", style(summary).green());
        Ok(())
    }
}

fn save_cookies(jar: &PersistentJar) {
    match jar.save() {
        Ok(()) => trace!("Saved {} cookies", jar.len()),
        Err(e) => warn!("Unable to save cookies: {e}"),
    }
}
