//! Persistent record of every item that has been downloaded or confirmed on disk.
//!
//! The ledger is a single SQLite table keyed by the item's page identifier. It is
//! the only thing that makes an interrupted crawl resumable, so it is written
//! exactly once per item and only after the file on disk is known to be good.
//! Other program instances may share the same file; writers wait on the lock
//! instead of failing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// How long a statement waits for another process to release the database.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Error, Debug)]
pub(crate) enum LedgerError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unable to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub(crate) type LedgerResult<T> = Result<T, LedgerError>;

/// A recorded item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LedgerEntry {
    pub(crate) page_id: String,
    pub(crate) asset_url: Option<String>,
    pub(crate) last_modified: Option<String>,
}

impl LedgerEntry {
    /// An entry only counts as processed once it carries an asset URL.
    pub(crate) fn is_recorded(&self) -> bool {
        self.asset_url.is_some()
    }
}

pub(crate) struct Ledger {
    conn: Connection,
    path: PathBuf,
}

impl Ledger {
    /// Opens (or creates) the ledger file and makes sure the schema exists.
    pub(crate) fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| LedgerError::Open {
            path: path.clone(),
            source,
        })?;
        let ledger = Self::with_connection(conn, path)?;
        debug!("Ledger opened at {}", ledger.path.display());
        Ok(ledger)
    }

    /// Scratch ledger for tests.
    #[cfg(test)]
    pub(crate) fn in_memory() -> LedgerResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> LedgerResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS image_urls (
                page_url TEXT PRIMARY KEY UNIQUE,
                image_url TEXT,
                last_modified TEXT
            )",
            [],
        )?;
        Ok(Self { conn, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Point lookup by page identifier.
    pub(crate) fn lookup(&self, page_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT page_url, image_url, last_modified FROM image_urls WHERE page_url = ?1 LIMIT 1",
                params![page_id],
                |row| {
                    Ok(LedgerEntry {
                        page_id: row.get(0)?,
                        asset_url: row.get(1)?,
                        last_modified: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// True when the item has a recorded asset URL.
    pub(crate) fn is_recorded(&self, page_id: &str) -> LedgerResult<bool> {
        Ok(self
            .lookup(page_id)?
            .is_some_and(|entry| entry.is_recorded()))
    }

    /// Insert or replace the entry for `page_id` in a single statement.
    pub(crate) fn upsert(
        &self,
        page_id: &str,
        asset_url: &str,
        last_modified: Option<&str>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO image_urls (page_url, image_url, last_modified) VALUES (?1, ?2, ?3)",
            params![page_id, asset_url, last_modified],
        )?;
        trace!("Ledger: {page_id} -> {asset_url}");
        Ok(())
    }

    /// Number of recorded items.
    pub(crate) fn len(&self) -> LedgerResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM image_urls WHERE image_url IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lookup_of_unknown_page_is_none() {
        let ledger = Ledger::in_memory().unwrap();
        assert_eq!(ledger.lookup("/view/1/").unwrap(), None);
        assert!(!ledger.is_recorded("/view/1/").unwrap());
    }

    #[test]
    fn upsert_replaces_previous_entry() {
        let ledger = Ledger::in_memory().unwrap();
        ledger.upsert("/view/1/", "https://d.example/a.jpg", None).unwrap();
        ledger
            .upsert("/view/1/", "https://d.example/b.jpg", Some("Tue, 01 Jan 2019 00:00:00 GMT"))
            .unwrap();

        let entry = ledger.lookup("/view/1/").unwrap().unwrap();
        assert_eq!(entry.asset_url.as_deref(), Some("https://d.example/b.jpg"));
        assert_eq!(entry.last_modified.as_deref(), Some("Tue, 01 Jan 2019 00:00:00 GMT"));
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn null_asset_url_is_not_recorded() {
        let ledger = Ledger::in_memory().unwrap();
        ledger
            .conn
            .execute("INSERT INTO image_urls (page_url) VALUES ('/view/9/')", [])
            .unwrap();
        assert!(ledger.lookup("/view/9/").unwrap().is_some());
        assert!(!ledger.is_recorded("/view/9/").unwrap());
        assert_eq!(ledger.len().unwrap(), 0);
    }

    #[test]
    fn reopening_keeps_entries_and_schema_creation_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("downloaded.sqlite");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.upsert("/view/7/", "https://d.example/7.png", None).unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_recorded("/view/7/").unwrap());
        assert_eq!(ledger.path(), path.as_path());
    }

    #[test]
    fn two_handles_on_one_file_see_each_others_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.sqlite");
        let listing = Ledger::open(&path).unwrap();
        let watchlist = Ledger::open(&path).unwrap();
        watchlist.upsert("/view/3/", "https://d.example/3.gif", None).unwrap();
        assert!(listing.is_recorded("/view/3/").unwrap());
    }
}
