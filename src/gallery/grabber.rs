//! Finds the items that still need downloading.

use std::collections::HashSet;

use console::style;

use crate::gallery::browser::{Browser, Page};
use crate::gallery::error::BrowseError;
use crate::gallery::ledger::{Ledger, LedgerResult};
use crate::gallery::site::{CandidateLink, Category, Site, WatchlistForm};

/// Why a listing crawl stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// A page without item links, or no next page.
    EndOfListing,
    /// Fast scan saw a page with nothing new on it.
    NothingNew,
    /// A page could not be fetched; what was found before it is kept.
    FetchFailed,
}

/// Outcome of crawling one (artist, category) listing.
#[derive(Debug, Clone)]
pub(crate) struct ListingReport {
    /// Unrecorded items, deduplicated, in the order they were found.
    pub(crate) candidates: Vec<CandidateLink>,
    pub(crate) pages_visited: u32,
    pub(crate) stop: StopReason,
}

pub(crate) struct Grabber<'a> {
    browser: &'a dyn Browser,
    site: &'a dyn Site,
    ledger: &'a Ledger,
    fast_scan: bool,
    max_page_retries: u32,
}

impl<'a> Grabber<'a> {
    pub(crate) fn new(
        browser: &'a dyn Browser,
        site: &'a dyn Site,
        ledger: &'a Ledger,
        fast_scan: bool,
        max_page_retries: u32,
    ) -> Self {
        Self {
            browser,
            site,
            ledger,
            fast_scan,
            max_page_retries,
        }
    }

    /// Walks `artist`'s `category` listing page by page and collects every
    /// item the ledger does not know yet.
    ///
    /// Network failures end the crawl early and keep what was collected. Only
    /// a ledger failure is returned as an error.
    pub(crate) fn discover_listing(&self, artist: &str, category: Category) -> LedgerResult<ListingReport> {
        let mut report = ListingReport {
            candidates: Vec::new(),
            pages_visited: 0,
            stop: StopReason::EndOfListing,
        };

        let mut url = match self.site.listing_start(self.browser, artist, category) {
            Ok(url) => url,
            Err(e) => {
                error!("Unable to find {artist}'s {category}: {e}");
                report.stop = StopReason::FetchFailed;
                return Ok(report);
            }
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut page_number: u32 = 1;

        loop {
            info!(
                "Going to {}'s {} page #{}",
                style(artist).cyan(),
                category,
                page_number
            );
            let page = match self.fetch_with_retries(&url) {
                Ok(page) => page,
                Err(e) => {
                    error!("Giving up on {artist}'s {category} at page #{page_number}: {e}");
                    report.stop = StopReason::FetchFailed;
                    break;
                }
            };
            report.pages_visited += 1;

            let links = self.site.item_links(&page);
            if links.is_empty() {
                info!(" - No more valid links found");
                report.stop = StopReason::EndOfListing;
                break;
            }

            let mut new_links = 0;
            for link in &links {
                if !seen.insert(link.page_id.clone()) {
                    continue;
                }
                if self.ledger.is_recorded(&link.page_id)? {
                    trace!("{} is already recorded", link.page_id);
                    continue;
                }
                report.candidates.push(link.clone());
                new_links += 1;
            }

            if new_links == 0 && self.fast_scan {
                info!(" - No more new links found");
                report.stop = StopReason::NothingNew;
                break;
            }
            info!(" - Got {} links and {} new links", links.len(), new_links);

            page_number += 1;
            match self.site.next_listing(&page, artist, category, page_number) {
                Some(next) => url = next,
                None => {
                    report.stop = StopReason::EndOfListing;
                    break;
                }
            }
        }

        debug!(
            "{artist}'s {category}: {} candidates over {} pages ({:?})",
            report.candidates.len(),
            report.pages_visited,
            report.stop
        );
        Ok(report)
    }

    /// Reads one snapshot of the watchlist feed. `None` when the page carries
    /// no feed form.
    pub(crate) fn discover_watchlist(&self, page: &Page) -> Option<WatchlistForm> {
        let watchlist = self.site.watchlist_form(page)?;
        info!("Got {} images on watchlist page", watchlist.entries.len());
        Some(watchlist)
    }

    /// Fetches the first page of the watchlist feed.
    pub(crate) fn fetch_feed(&self, url: &str) -> Result<Page, BrowseError> {
        self.fetch_with_retries(url)
    }

    /// Submits the feed form with the ticked entries and returns the next
    /// snapshot of the feed. Every retry submits the same boxes.
    pub(crate) fn submit_marked(&self, watchlist: &WatchlistForm) -> Result<Page, BrowseError> {
        let button = watchlist.mark_read_button()?;
        self.with_retries(|| self.browser.submit_form(&watchlist.form, Some(&button)))
    }

    fn fetch_with_retries(&self, url: &str) -> Result<Page, BrowseError> {
        self.with_retries(|| self.browser.fetch(url))
    }

    fn with_retries<T>(&self, request: impl Fn() -> Result<T, BrowseError>) -> Result<T, BrowseError> {
        let mut attempt: u32 = 0;
        loop {
            match request() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_page_retries => {
                    attempt += 1;
                    warn!("{e}, retrying ({attempt}/{})", self.max_page_retries);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
