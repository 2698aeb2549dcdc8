//! A cookie store for the HTTP client that survives between runs.
//!
//! Matching and expiry are handled by `cookie_store`. This module only moves
//! cookies between the store and a Netscape `cookies.txt` file (7 TAB
//! separated fields per line) so that a login from a previous run is reused
//! instead of repeated.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use cookie_store::{CookieDomain, CookieExpiration, CookieStore, RawCookie};
use reqwest_cookie_store::CookieStoreMutex;
use url::Url;

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One line of a Netscape cookie file.
#[derive(Clone, PartialEq, Eq)]
struct CookieLine {
    /// Domain without a leading dot.
    domain: String,
    /// Whether subdomains of `domain` match as well.
    include_subdomains: bool,
    path: String,
    secure: bool,
    http_only: bool,
    /// Unix time of expiry, 0 for a session cookie.
    expires: i64,
    name: String,
    value: String,
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl CookieLine {
    /// Parses one line, or returns `None` for comments and junk.
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 || fields[5].is_empty() {
            return None;
        }
        let domain = fields[0].trim_start_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return None;
        }
        Some(Self {
            domain,
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            http_only,
            expires: fields[4].parse().ok()?,
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        })
    }

    /// Reads a cookie held by the store. Cookies without a usable domain are
    /// not written out.
    fn from_stored(cookie: &cookie_store::Cookie<'_>) -> Option<Self> {
        let (domain, include_subdomains) = match &cookie.domain {
            CookieDomain::HostOnly(domain) => (domain.clone(), false),
            CookieDomain::Suffix(domain) => (domain.clone(), true),
            CookieDomain::NotPresent | CookieDomain::Empty => return None,
        };
        let expires = match &cookie.expires {
            CookieExpiration::AtUtc(at) => at.unix_timestamp(),
            CookieExpiration::SessionEnd => 0,
        };
        Some(Self {
            domain,
            include_subdomains,
            path: cookie.path.as_ref().to_string(),
            secure: cookie.secure().unwrap_or(false),
            http_only: cookie.http_only().unwrap_or(false),
            expires,
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
        })
    }

    fn to_line(&self) -> String {
        let flag = |b: bool| if b { "TRUE" } else { "FALSE" };
        let prefix = if self.http_only { HTTP_ONLY_PREFIX } else { "" };
        let domain = if self.include_subdomains {
            format!(".{}", self.domain)
        } else {
            self.domain.clone()
        };
        format!(
            "{prefix}{domain}\t{}\t{}\t{}\t{}\t{}\t{}",
            flag(self.include_subdomains),
            self.path,
            flag(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }

    /// The `Set-Cookie` header that recreates this cookie. A host-only cookie
    /// carries no `Domain` attribute.
    fn to_set_cookie(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        if self.include_subdomains {
            parts.push(format!("Domain={}", self.domain));
        }
        parts.push(format!("Path={}", self.path));
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        if self.expires > 0 {
            if let Some(at) = DateTime::<Utc>::from_timestamp(self.expires, 0) {
                parts.push(format!("Expires={}", at.format("%a, %d %b %Y %H:%M:%S GMT")));
            }
        }
        parts.join("; ")
    }

    /// The URL the cookie is inserted as if it came from.
    fn origin(&self) -> Option<Url> {
        Url::parse(&format!("https://{}{}", self.domain, self.path)).ok()
    }
}

/// Cookie store shared with the HTTP client and persisted to disk.
pub(crate) struct PersistentJar {
    path: PathBuf,
    store: Arc<CookieStoreMutex>,
}

impl PersistentJar {
    /// Loads the jar at `path`. A missing file gives an empty jar; unreadable
    /// and expired lines are skipped.
    pub(crate) fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let jar = Self::empty(path);
        let file = match File::open(&jar.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("No cookie file at {}", jar.path.display());
                return Ok(jar);
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now().timestamp();
        {
            let mut store = jar.lock();
            for (idx, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                let Some(cookie) = CookieLine::parse(&line) else {
                    if !line.trim().is_empty() && !line.starts_with('#') {
                        warn!("Skipping malformed cookie line {} in {}", idx + 1, jar.path.display());
                    }
                    continue;
                };
                if cookie.expires != 0 && cookie.expires <= now {
                    continue;
                }
                insert(&mut store, &cookie);
            }
        }
        debug!("Loaded {} cookies from {}", jar.len(), jar.path.display());
        Ok(jar)
    }

    /// A jar with no cookies that will be saved to `path`.
    pub(crate) fn empty(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            store: Arc::new(CookieStoreMutex::new(CookieStore::default())),
        }
    }

    /// The store to hand to the HTTP client.
    pub(crate) fn store(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.store)
    }

    /// Writes every live cookie, session cookies included, to the jar file.
    pub(crate) fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lines: Vec<String> = self
            .lock()
            .iter_unexpired()
            .filter_map(CookieLine::from_stored)
            .map(|cookie| cookie.to_line())
            .collect();

        let mut file = io::BufWriter::new(File::create(&self.path)?);
        writeln!(file, "{NETSCAPE_HEADER}")?;
        for line in &lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        trace!("Saved {} cookies to {}", lines.len(), self.path.display());
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().iter_unexpired().count()
    }

    fn lock(&self) -> MutexGuard<'_, CookieStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert(store: &mut CookieStore, cookie: &CookieLine) {
    let Some(origin) = cookie.origin() else {
        warn!("Skipping cookie {} with unusable domain {}", cookie.name, cookie.domain);
        return;
    };
    let inserted = RawCookie::parse(cookie.to_set_cookie())
        .map_err(|e| e.to_string())
        .and_then(|raw| store.insert_raw(&raw, &origin).map_err(|e| e.to_string()));
    if let Err(e) = inserted {
        warn!("Skipping cookie {} for {}: {e}", cookie.name, cookie.domain);
    }
}
