use std::path::{Path, PathBuf};
use std::time::SystemTime;

use url::Url;

use crate::gallery::browser::Browser;
use crate::gallery::error::{BrowseError, ItemError};
use crate::gallery::executor::derive_filename;
use crate::gallery::io::file_metadata::parse_http_date;
use crate::gallery::site::Site;

/// Everything needed to fetch and store one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadItem {
    pub(crate) page_id: String,
    /// Absolute, normalized asset URL. This is what the ledger records.
    pub(crate) asset_url: String,
    pub(crate) local_filename: String,
    pub(crate) local_path: PathBuf,
    pub(crate) declared_size: Option<u64>,
    pub(crate) declared_mtime: Option<SystemTime>,
    /// Raw `Last-Modified` value reported by the probe.
    pub(crate) last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    pub(crate) item: DownloadItem,
    /// Ledger key of the next part of the same submission.
    pub(crate) continuation: Option<String>,
}

/// Turns a page identifier into a [DownloadItem] by reading its detail page.
pub(crate) struct Resolver<'a> {
    browser: &'a dyn Browser,
    site: &'a dyn Site,
    download_directory: &'a Path,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(browser: &'a dyn Browser, site: &'a dyn Site, download_directory: &'a Path) -> Self {
        Self {
            browser,
            site,
            download_directory,
        }
    }

    pub(crate) fn resolve(&self, page_id: &str) -> Result<Resolution, ItemError> {
        let detail_url = self.site.detail_url(page_id)?;
        let page = self.browser.fetch(&detail_url)?;

        let href = self
            .site
            .asset_link(&page)
            .ok_or_else(|| ItemError::MissingAsset {
                page: page_id.to_string(),
            })?;
        let asset_url = normalize_asset_url(&page.url, &href)?;
        let artist = self.site.artist_name(&page).map(|name| name.to_lowercase());
        if let Some(artist) = &artist {
            debug!("{page_id} by {artist}");
        }

        let local_filename = derive_filename(&asset_url, artist.as_deref())
            .ok_or_else(|| BrowseError::Structure(format!("{asset_url} has no file name")))?;
        let local_path = self.download_directory.join(&local_filename);

        let (declared_size, last_modified) = if self.site.probes_asset_size() {
            let probe = self.browser.probe(asset_url.as_str())?;
            trace!("Probe of {asset_url}: {:?}", probe);
            (probe.content_length, probe.last_modified)
        } else {
            (None, None)
        };
        let declared_mtime = last_modified.as_deref().and_then(parse_http_date);

        Ok(Resolution {
            item: DownloadItem {
                page_id: page_id.to_string(),
                asset_url: asset_url.to_string(),
                local_filename,
                local_path,
                declared_size,
                declared_mtime,
                last_modified,
            },
            continuation: self.site.continuation(&page, page_id),
        })
    }
}

/// Resolves `href` against the detail page. Scheme-relative links take the
/// page's scheme.
pub(crate) fn normalize_asset_url(page_url: &Url, href: &str) -> Result<Url, BrowseError> {
    page_url.join(href.trim()).map_err(|e| BrowseError::InvalidUrl {
        url: href.to_string(),
        reason: e.to_string(),
    })
}
