//! Decides per item whether to download, and records the result.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::gallery::browser::Browser;
use crate::gallery::error::ItemError;
use crate::gallery::io::file_metadata::{get_file_metadata, parse_http_date, set_modified_time, system_time_from_unix};
use crate::gallery::ledger::{Ledger, LedgerResult};
use crate::gallery::resolver::DownloadItem;

/// Suffix of the file a download is streamed into before it is renamed.
const PARTIAL_SUFFIX: &str = ".download";

/// 2000-01-01T00:00:00Z.
const EARLIEST_TIMESTAMP: u64 = 946_684_800;

static TEN_DIGITS: Lazy<Regex> = Lazy::new(|| pattern(r"\d{10}"));
static BROKEN_FILENAME: Lazy<Regex> = Lazy::new(|| pattern(r"^\d{10}\.$"));

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("built-in pattern {re:?}: {e}"))
}

/// What happened to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The ledger already had it; nothing was touched.
    AlreadyRecorded { filename: String },
    /// A matching file was on disk; it was recorded without downloading.
    AlreadyPresent { filename: String },
    Downloaded { filename: String, bytes: u64 },
}

pub(crate) struct Executor<'a> {
    browser: &'a dyn Browser,
    ledger: &'a Ledger,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(browser: &'a dyn Browser, ledger: &'a Ledger) -> Self {
        Self { browser, ledger }
    }

    /// File name of an item the ledger already holds, without network access.
    pub(crate) fn recorded(&self, page_id: &str) -> LedgerResult<Option<String>> {
        let entry = self.ledger.lookup(page_id)?;
        Ok(entry.and_then(|e| e.asset_url).map(|asset_url| {
            Url::parse(&asset_url)
                .ok()
                .and_then(|url| derive_filename(&url, None))
                .unwrap_or(asset_url)
        }))
    }

    /// Brings the item onto disk and into the ledger.
    ///
    /// The ledger is only written once the file is complete and in place, so
    /// any error leaves the item to be retried by the next run.
    pub(crate) fn execute(&self, item: &DownloadItem) -> Result<Outcome, ItemError> {
        if let Some(filename) = self.recorded(&item.page_id)? {
            return Ok(Outcome::AlreadyRecorded { filename });
        }

        if let Some(meta) = get_file_metadata(&item.local_path)? {
            let size_matches = item.declared_size.is_none_or(|size| size == meta.size);
            if meta.size > 0 && size_matches {
                info!(" - {} already downloaded", item.local_filename);
                self.apply_timestamp(item, None);
                self.ledger
                    .upsert(&item.page_id, &item.asset_url, item.last_modified.as_deref())?;
                return Ok(Outcome::AlreadyPresent {
                    filename: item.local_filename.clone(),
                });
            }
            debug!(
                "{} is {} bytes on disk but {:?} remotely, downloading again",
                item.local_filename, meta.size, item.declared_size
            );
        }

        if let Some(parent) = item.local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(&item.local_path);
        info!(" - saving {}", item.local_filename);

        let downloaded = match self.browser.download(&item.asset_url, &partial) {
            Ok(downloaded) => downloaded,
            Err(e) => {
                discard(&partial);
                return Err(e.into());
            }
        };
        if let Some(expected) = item.declared_size {
            if downloaded.bytes_written != expected {
                discard(&partial);
                return Err(ItemError::SizeMismatch {
                    url: item.asset_url.clone(),
                    expected,
                    received: downloaded.bytes_written,
                });
            }
        }
        if let Err(e) = fs::rename(&partial, &item.local_path) {
            discard(&partial);
            return Err(e.into());
        }

        self.apply_timestamp(item, downloaded.last_modified.as_deref());
        let last_modified = downloaded.last_modified.as_deref().or(item.last_modified.as_deref());
        self.ledger.upsert(&item.page_id, &item.asset_url, last_modified)?;

        Ok(Outcome::Downloaded {
            filename: item.local_filename.clone(),
            bytes: downloaded.bytes_written,
        })
    }

    /// Sets the file time from the file name, else from `Last-Modified`.
    /// Failing to do so is logged and otherwise ignored.
    fn apply_timestamp(&self, item: &DownloadItem, returned_last_modified: Option<&str>) {
        let time = timestamp_from_filename(&item.local_filename)
            .or_else(|| returned_last_modified.and_then(parse_http_date))
            .or(item.declared_mtime);
        let Some(time) = time else {
            return;
        };
        if let Err(e) = set_modified_time(&item.local_path, time) {
            warn!("Unable to set the time of {}: {e}", item.local_path.display());
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => trace!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Unable to remove partial file {}: {e}", path.display()),
    }
}

/// The local file name for an asset: the decoded last path segment.
///
/// A name that is only a 10 digit timestamp and a dot is completed with the
/// artist name.
pub(crate) fn derive_filename(asset_url: &Url, artist: Option<&str>) -> Option<String> {
    let segment = asset_url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(segment)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let mut filename = decoded.replace(['/', '\\'], "_");
    if filename.is_empty() {
        return None;
    }
    if let Some(artist) = artist.filter(|a| !a.is_empty()) {
        if BROKEN_FILENAME.is_match(&filename) {
            filename = format!("{filename}{artist}.unnamedimage.jpg");
        }
    }
    Some(filename)
}

/// The Unix timestamp in the first run of ten digits in a file name, if it is
/// plausible: not before 2000 and not in the future.
pub(crate) fn timestamp_from_filename(filename: &str) -> Option<SystemTime> {
    let digits = TEN_DIGITS.find(filename)?;
    let seconds: u64 = digits.as_str().parse().ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    (EARLIEST_TIMESTAMP..=now)
        .contains(&seconds)
        .then(|| system_time_from_unix(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::test_support::{FakeBrowser, Request};
    use tempfile::tempdir;

    const ASSET: &str = "https://d.furaffinity.net/art/artie/1500000000/1500000000.artie_pic.png";

    fn item(dir: &Path, declared_size: Option<u64>) -> DownloadItem {
        DownloadItem {
            page_id: "/view/10/".to_string(),
            asset_url: ASSET.to_string(),
            local_filename: "1500000000.artie_pic.png".to_string(),
            local_path: dir.join("1500000000.artie_pic.png"),
            declared_size,
            declared_mtime: None,
            last_modified: None,
        }
    }

    #[test]
    fn downloads_sets_time_from_filename_and_records() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        browser.asset(ASSET, &[1u8; 250], Some("Mon, 01 Jan 2018 00:00:00 GMT"));
        let ledger = Ledger::in_memory().unwrap();
        let item = item(&dir.path().join("nested"), Some(250));

        let outcome = Executor::new(&browser, &ledger).execute(&item).unwrap();
        assert_eq!(
            outcome,
            Outcome::Downloaded {
                filename: item.local_filename.clone(),
                bytes: 250
            }
        );

        let meta = get_file_metadata(&item.local_path).unwrap().unwrap();
        assert_eq!(meta.size, 250);
        assert_eq!(meta.mtime, system_time_from_unix(1_500_000_000));
        assert!(!partial_path(&item.local_path).exists());

        let entry = ledger.lookup("/view/10/").unwrap().unwrap();
        assert_eq!(entry.asset_url.as_deref(), Some(ASSET));
        assert_eq!(entry.last_modified.as_deref(), Some("Mon, 01 Jan 2018 00:00:00 GMT"));
    }

    #[test]
    fn recorded_items_need_no_network() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        let ledger = Ledger::in_memory().unwrap();
        ledger.upsert("/view/10/", ASSET, None).unwrap();

        let executor = Executor::new(&browser, &ledger);
        assert_eq!(
            executor.recorded("/view/10/").unwrap().as_deref(),
            Some("1500000000.artie_pic.png")
        );
        assert_eq!(executor.recorded("/view/11/").unwrap(), None);

        let outcome = executor.execute(&item(dir.path(), None)).unwrap();
        assert!(matches!(outcome, Outcome::AlreadyRecorded { .. }));
        assert!(browser.requests().is_empty());
    }

    #[test]
    fn matching_local_file_is_recorded_without_downloading() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        let ledger = Ledger::in_memory().unwrap();
        let item = item(dir.path(), Some(5));
        fs::write(&item.local_path, b"12345").unwrap();

        let outcome = Executor::new(&browser, &ledger).execute(&item).unwrap();
        assert!(matches!(outcome, Outcome::AlreadyPresent { .. }));
        assert!(browser.requests().is_empty());
        assert!(ledger.is_recorded("/view/10/").unwrap());
        let meta = get_file_metadata(&item.local_path).unwrap().unwrap();
        assert_eq!(meta.mtime, system_time_from_unix(1_500_000_000));
    }

    #[test]
    fn size_mismatch_on_disk_triggers_a_new_download() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        browser.asset(ASSET, &[9u8; 250], None);
        let ledger = Ledger::in_memory().unwrap();
        let item = item(dir.path(), Some(250));
        fs::write(&item.local_path, [0u8; 100]).unwrap();

        let outcome = Executor::new(&browser, &ledger).execute(&item).unwrap();
        assert!(matches!(outcome, Outcome::Downloaded { bytes: 250, .. }));
        assert_eq!(fs::read(&item.local_path).unwrap(), vec![9u8; 250]);
        assert_eq!(browser.requests(), vec![Request::Download(ASSET.to_string())]);
    }

    #[test]
    fn empty_local_file_is_replaced() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        browser.asset(ASSET, b"data", None);
        let ledger = Ledger::in_memory().unwrap();
        let item = item(dir.path(), None);
        fs::write(&item.local_path, b"").unwrap();

        let outcome = Executor::new(&browser, &ledger).execute(&item).unwrap();
        assert!(matches!(outcome, Outcome::Downloaded { bytes: 4, .. }));
    }

    #[test]
    fn short_download_is_discarded_and_not_recorded() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        browser.asset(ASSET, &[1u8; 250], None);
        browser.declare_size(ASSET, Some(300));
        let ledger = Ledger::in_memory().unwrap();
        let item = item(dir.path(), Some(300));

        let err = Executor::new(&browser, &ledger).execute(&item).unwrap_err();
        assert!(matches!(err, ItemError::SizeMismatch { expected: 300, received: 250, .. }));
        assert!(!item.local_path.exists());
        assert!(!partial_path(&item.local_path).exists());
        assert!(!ledger.is_recorded("/view/10/").unwrap());
    }

    #[test]
    fn failed_download_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let browser = FakeBrowser::new();
        browser.asset(ASSET, &[1u8; 250], None);
        browser.break_download(ASSET);
        let ledger = Ledger::in_memory().unwrap();
        let item = item(dir.path(), None);

        let err = Executor::new(&browser, &ledger).execute(&item).unwrap_err();
        assert!(!err.is_fatal());
        assert!(!item.local_path.exists());
        assert!(!partial_path(&item.local_path).exists());
        assert_eq!(ledger.lookup("/view/10/").unwrap(), None);
    }

    #[test]
    fn filenames_are_decoded_and_broken_ones_repaired() {
        let url = Url::parse("https://d.furaffinity.net/art/a/1/1500000000.a_my%20pic.png").unwrap();
        assert_eq!(derive_filename(&url, None).as_deref(), Some("1500000000.a_my pic.png"));

        let broken = Url::parse("https://d.furaffinity.net/art/a/1/1500000000.").unwrap();
        assert_eq!(
            derive_filename(&broken, Some("artie")).as_deref(),
            Some("1500000000.artie.unnamedimage.jpg")
        );
        assert_eq!(derive_filename(&broken, None).as_deref(), Some("1500000000."));

        let directory = Url::parse("https://d.furaffinity.net/art/").unwrap();
        assert_eq!(derive_filename(&directory, None), None);
    }

    #[test]
    fn filename_timestamps_must_be_plausible() {
        assert_eq!(
            timestamp_from_filename("1500000000.artie_pic.png"),
            Some(system_time_from_unix(1_500_000_000))
        );
        assert_eq!(timestamp_from_filename("0900000000.old.png"), None);
        assert_eq!(timestamp_from_filename("9999999999.future.png"), None);
        assert_eq!(
            timestamp_from_filename("artie_1500000000.png"),
            Some(system_time_from_unix(1_500_000_000))
        );
        assert_eq!(timestamp_from_filename("artie_0900000000_1500000000.png"), None);
        assert_eq!(timestamp_from_filename("150000000.short.png"), None);
    }
}
