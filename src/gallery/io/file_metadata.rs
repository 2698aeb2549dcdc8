use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::DateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileMeta {
    pub(crate) size: u64,
    pub(crate) mtime: SystemTime,
}

/// Size and modification time of a regular file, `None` when nothing is there.
pub(crate) fn get_file_metadata(path: &Path) -> io::Result<Option<FileMeta>> {
    match path.metadata() {
        Ok(md) if md.is_file() => Ok(Some(FileMeta {
            size: md.len(),
            mtime: md.modified().unwrap_or(UNIX_EPOCH),
        })),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn set_modified_time(path: &Path, time: SystemTime) -> io::Result<()> {
    let file: File = OpenOptions::new().write(true).open(path)?;
    file.set_modified(time)
}

pub(crate) fn system_time_from_unix(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

/// Parses an HTTP date such as `Tue, 15 Nov 1994 08:12:31 GMT`.
pub(crate) fn parse_http_date(value: &str) -> Option<SystemTime> {
    let parsed = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let seconds = u64::try_from(parsed.timestamp()).ok()?;
    Some(system_time_from_unix(seconds))
}
