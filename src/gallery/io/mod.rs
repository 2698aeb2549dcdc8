//! Settings, cookie persistence and local file metadata.

pub(crate) mod cookies;
pub(crate) mod file_metadata;

use std::fs::{create_dir_all, read_to_string, write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::gallery::site::Category;
use crate::program::Cli;

/// Name of the configuration file inside the settings directory.
pub(crate) const CONFIG_NAME: &str = "config.toml";

/// Name of the ledger database inside the settings directory.
pub(crate) const LEDGER_NAME: &str = "downloaded.sqlite";

/// Name of the log file inside the settings directory.
pub(crate) const LOG_NAME: &str = "gallery_downloader.log";

const PLACEHOLDER_USERNAME: &str = "your_username";
const PLACEHOLDER_PASSWORD: &str = "your_password";

const TEMPLATE_HEADER: &str = "\
# gallery_downloader configuration.
# Fill in the [auth] section before running again.
# An empty download directory means ~/Pictures/<site name>.
";

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("A new configuration file was written to {0}, fill in your credentials and run again")]
    TemplateWritten(PathBuf),

    #[error("Username or password in {0} is still empty or a placeholder")]
    MissingCredentials(PathBuf),

    #[error("Invalid base url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Gallery, favourites and scraps are all disabled, nothing to download")]
    NoCategories,

    #[error("Unable to determine a settings directory, pass one with --config-dir")]
    NoSettingsDirectory,
}

pub(crate) type ConfigResult<T> = Result<T, ConfigError>;

/// The supported sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SiteKind {
    #[value(name = "furaffinity")]
    FurAffinity,
    #[value(name = "inkbunny")]
    Inkbunny,
}

impl SiteKind {
    pub(crate) fn default_base_url(self) -> &'static str {
        match self {
            SiteKind::FurAffinity => "https://www.furaffinity.net/",
            SiteKind::Inkbunny => "https://inkbunny.net/",
        }
    }

    /// Folder name used under the pictures directory when none is configured.
    fn default_folder(self) -> &'static str {
        match self {
            SiteKind::FurAffinity => "FADownloader",
            SiteKind::Inkbunny => "IBDownloader",
        }
    }
}

// Layout of config.toml

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ConfigFile {
    pub(crate) auth: AuthSection,
    pub(crate) site: SiteSection,
    pub(crate) download: DownloadSection,
    pub(crate) network: NetworkSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AuthSection {
    pub(crate) username: String,
    pub(crate) password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SiteSection {
    pub(crate) kind: SiteKind,
    /// Empty means the site's public address.
    pub(crate) base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct DownloadSection {
    pub(crate) directory: String,
    pub(crate) gallery: bool,
    pub(crate) favourites: bool,
    pub(crate) scraps: bool,
    pub(crate) fast_scan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct NetworkSection {
    pub(crate) timeout_secs: u64,
    pub(crate) user_agent: String,
    pub(crate) request_delay_ms: u64,
    pub(crate) max_page_retries: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            username: PLACEHOLDER_USERNAME.to_string(),
            password: PLACEHOLDER_PASSWORD.to_string(),
        }
    }
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            kind: SiteKind::FurAffinity,
            base_url: String::new(),
        }
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            directory: String::new(),
            gallery: true,
            favourites: false,
            scraps: false,
            fast_scan: true,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            request_delay_ms: 1000,
            max_page_retries: 3,
        }
    }
}

/// Writes a fresh configuration file with placeholder credentials.
pub(crate) fn write_template(path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(&ConfigFile::default())?;
    write(path, format!("{TEMPLATE_HEADER}\n{body}"))?;
    info!("Configuration template written to {}", path.display());
    Ok(())
}

/// The per-user settings directory, unless overridden on the command line.
pub(crate) fn default_settings_directory() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(env!("CARGO_PKG_NAME")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) username: String,
    pub(crate) password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NetworkSettings {
    pub(crate) timeout: Duration,
    pub(crate) user_agent: String,
    pub(crate) request_delay: Duration,
    pub(crate) max_page_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Crawl the listings of these artists.
    Listing(Vec<String>),
    /// Drain the account's new-submissions feed.
    Watchlist,
}

/// Everything a run needs, merged from the config file and the command line.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) credentials: Credentials,
    pub(crate) site: SiteKind,
    pub(crate) base_url: Url,
    pub(crate) download_directory: PathBuf,
    pub(crate) categories: Vec<Category>,
    pub(crate) fast_scan: bool,
    pub(crate) network: NetworkSettings,
    pub(crate) settings_directory: PathBuf,
    pub(crate) mode: RunMode,
}

impl Settings {
    /// Loads `config.toml` and applies command line overrides.
    ///
    /// A missing file is replaced by a template and reported as
    /// [ConfigError::TemplateWritten] so the caller can stop before any
    /// network activity.
    pub(crate) fn load(cli: &Cli) -> ConfigResult<Self> {
        let settings_directory = match &cli.config_dir {
            Some(dir) => dir.clone(),
            None => default_settings_directory().ok_or(ConfigError::NoSettingsDirectory)?,
        };
        let config_path = settings_directory.join(CONFIG_NAME);
        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            write_template(&config_path)?;
            return Err(ConfigError::TemplateWritten(config_path));
        }

        trace!("Reading {}", config_path.display());
        let file: ConfigFile = toml::from_str(&read_to_string(&config_path)?)?;
        Self::merge(file, cli, settings_directory, &config_path)
    }

    fn merge(file: ConfigFile, cli: &Cli, settings_directory: PathBuf, config_path: &Path) -> ConfigResult<Self> {
        let credentials = Credentials {
            username: file.auth.username.trim().to_string(),
            password: file.auth.password.clone(),
        };
        if credentials.username.is_empty()
            || credentials.password.is_empty()
            || credentials.username == PLACEHOLDER_USERNAME
            || credentials.password == PLACEHOLDER_PASSWORD
        {
            return Err(ConfigError::MissingCredentials(config_path.to_path_buf()));
        }

        let site = cli.site.unwrap_or(file.site.kind);
        let base_url_text = if file.site.base_url.trim().is_empty() || site != file.site.kind {
            site.default_base_url().to_string()
        } else {
            file.site.base_url.trim().to_string()
        };
        let base_url = Url::parse(&base_url_text).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url_text.clone(),
            reason: e.to_string(),
        })?;

        let download_directory = match &cli.download_directory {
            Some(dir) => dir.clone(),
            None if !file.download.directory.trim().is_empty() => PathBuf::from(file.download.directory.trim()),
            None => dirs::picture_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(site.default_folder()),
        };

        let mode = if cli.watchlist {
            RunMode::Watchlist
        } else {
            RunMode::Listing(cli.artists.clone())
        };

        let categories: Vec<Category> = [
            (Category::Gallery, cli.gallery().unwrap_or(file.download.gallery)),
            (Category::Favourites, cli.favourites().unwrap_or(file.download.favourites)),
            (Category::Scraps, cli.scraps().unwrap_or(file.download.scraps)),
        ]
        .into_iter()
        .filter_map(|(category, enabled)| enabled.then_some(category))
        .collect();
        if categories.is_empty() && mode != RunMode::Watchlist {
            return Err(ConfigError::NoCategories);
        }

        Ok(Self {
            credentials,
            site,
            base_url,
            download_directory,
            categories,
            fast_scan: cli.fast_scan().unwrap_or(file.download.fast_scan),
            network: NetworkSettings {
                timeout: Duration::from_secs(file.network.timeout_secs.max(1)),
                user_agent: file.network.user_agent,
                request_delay: Duration::from_millis(file.network.request_delay_ms),
                max_page_retries: file.network.max_page_retries,
            },
            settings_directory,
            mode,
        })
    }

    pub(crate) fn ledger_path(&self) -> PathBuf {
        self.settings_directory.join(LEDGER_NAME)
    }

    pub(crate) fn cookie_path(&self) -> PathBuf {
        self.settings_directory
            .join(format!("cookies.{}.txt", self.credentials.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("gallery_downloader").chain(args.iter().copied()))
    }

    const FILLED: &str = r#"
[auth]
username = "wolfie"
password = "hunter2"

[download]
directory = "/tmp/art"
favourites = false
"#;

    #[test]
    fn missing_config_writes_template_and_stops() {
        let dir = tempdir().unwrap();
        let dir_arg = dir.path().to_str().unwrap();
        let err = Settings::load(&cli(&["-c", dir_arg, "someone"])).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateWritten(_)));

        let template = read_to_string(dir.path().join(CONFIG_NAME)).unwrap();
        let parsed: ConfigFile = toml::from_str(&template).unwrap();
        assert_eq!(parsed.auth.username, PLACEHOLDER_USERNAME);

        let err = Settings::load(&cli(&["-c", dir_arg, "someone"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredentials(_)));
    }

    #[test]
    fn file_values_are_used_and_flags_override_them() {
        let dir = tempdir().unwrap();
        write(dir.path().join(CONFIG_NAME), FILLED).unwrap();
        let dir_arg = dir.path().to_str().unwrap();

        let settings = Settings::load(&cli(&["-c", dir_arg, "b", "a"])).unwrap();
        assert_eq!(settings.credentials.username, "wolfie");
        assert_eq!(settings.site, SiteKind::FurAffinity);
        assert_eq!(settings.base_url.as_str(), "https://www.furaffinity.net/");
        assert_eq!(settings.download_directory, PathBuf::from("/tmp/art"));
        assert_eq!(settings.categories, vec![Category::Gallery]);
        assert!(settings.fast_scan);
        assert_eq!(settings.mode, RunMode::Listing(vec!["b".to_string(), "a".to_string()]));
        assert_eq!(settings.ledger_path(), dir.path().join("downloaded.sqlite"));
        assert_eq!(settings.cookie_path(), dir.path().join("cookies.wolfie.txt"));

        let settings = Settings::load(&cli(&[
            "-c", dir_arg, "-f", "--no-scraps", "--no-fast-scan", "-d", "/tmp/other", "--site", "inkbunny", "x",
        ]))
        .unwrap();
        assert_eq!(settings.categories, vec![Category::Gallery, Category::Favourites]);
        assert!(!settings.fast_scan);
        assert_eq!(settings.download_directory, PathBuf::from("/tmp/other"));
        assert_eq!(settings.site, SiteKind::Inkbunny);
        assert_eq!(settings.base_url.as_str(), "https://inkbunny.net/");
    }

    #[test]
    fn config_with_only_credentials_downloads_the_gallery_alone() {
        let dir = tempdir().unwrap();
        write(
            dir.path().join(CONFIG_NAME),
            "[auth]\nusername = \"wolfie\"\npassword = \"hunter2\"\n",
        )
        .unwrap();
        let settings = Settings::load(&cli(&["-c", dir.path().to_str().unwrap(), "x"])).unwrap();
        assert_eq!(settings.categories, vec![Category::Gallery]);
        assert!(settings.fast_scan);

        let download = DownloadSection::default();
        assert!(download.gallery);
        assert!(!download.favourites);
        assert!(!download.scraps);
    }

    #[test]
    fn disabling_every_category_is_rejected_outside_watchlist_mode() {
        let dir = tempdir().unwrap();
        write(dir.path().join(CONFIG_NAME), FILLED).unwrap();
        let dir_arg = dir.path().to_str().unwrap();

        let err = Settings::load(&cli(&["-c", dir_arg, "--no-gallery", "--no-scraps", "x"])).unwrap_err();
        assert!(matches!(err, ConfigError::NoCategories));

        let settings = Settings::load(&cli(&["-c", dir_arg, "--no-gallery", "--no-scraps", "-w"])).unwrap();
        assert_eq!(settings.mode, RunMode::Watchlist);
    }

    #[test]
    fn bad_base_url_is_reported() {
        let dir = tempdir().unwrap();
        write(
            dir.path().join(CONFIG_NAME),
            format!("{FILLED}\n[site]\nkind = \"furaffinity\"\nbase_url = \"not a url\"\n"),
        )
        .unwrap();
        let err = Settings::load(&cli(&["-c", dir.path().to_str().unwrap(), "x"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
    }
}
