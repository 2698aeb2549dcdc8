use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::gallery::browser::Browser;
use crate::gallery::error::{ItemError, RunError};
use crate::gallery::executor::{Executor, Outcome};
use crate::gallery::grabber::Grabber;
use crate::gallery::io::Settings;
use crate::gallery::ledger::Ledger;
use crate::gallery::natural::{natural_cmp, natural_sort};
use crate::gallery::resolver::Resolver;
use crate::gallery::site::{Category, Site};

pub(crate) mod browser;
pub(crate) mod error;
pub(crate) mod executor;
pub(crate) mod grabber;
pub(crate) mod io;
pub(crate) mod ledger;
pub(crate) mod natural;
pub(crate) mod rate_limiter;
pub(crate) mod resolver;
pub(crate) mod sender;
pub(crate) mod session;
pub(crate) mod site;

#[cfg(test)]
pub(crate) mod test_support;

const PROGRESS_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// The part of [Settings] a run depends on.
#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    pub(crate) categories: Vec<Category>,
    pub(crate) fast_scan: bool,
    pub(crate) max_page_retries: u32,
    pub(crate) download_directory: PathBuf,
}

impl From<&Settings> for RunOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            categories: settings.categories.clone(),
            fast_scan: settings.fast_scan,
            max_page_retries: settings.network.max_page_retries,
            download_directory: settings.download_directory.clone(),
        }
    }
}

/// Tally of a run, logged at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) downloaded: usize,
    pub(crate) already_present: usize,
    pub(crate) recorded: usize,
    /// Items whose page had no download link.
    pub(crate) skipped: usize,
    /// Items that failed and will be retried next run.
    pub(crate) failed: usize,
}

impl RunSummary {
    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::AlreadyRecorded { .. } => self.recorded += 1,
            Outcome::AlreadyPresent { .. } => self.already_present += 1,
            Outcome::Downloaded { .. } => self.downloaded += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} already present, {} recorded earlier, {} skipped, {} failed",
            self.downloaded, self.already_present, self.recorded, self.skipped, self.failed
        )
    }
}

/// Drives discovery and downloading for one run.
pub(crate) struct GalleryDownloader<'a> {
    browser: &'a dyn Browser,
    site: &'a dyn Site,
    ledger: &'a Ledger,
    options: RunOptions,
    /// Progress bar over the current download batch.
    progress_bar: ProgressBar,
    summary: RunSummary,
}

impl<'a> GalleryDownloader<'a> {
    pub(crate) fn new(browser: &'a dyn Browser, site: &'a dyn Site, ledger: &'a Ledger, options: RunOptions) -> Self {
        Self {
            browser,
            site,
            ledger,
            options,
            progress_bar: ProgressBar::hidden(),
            summary: RunSummary::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Crawls every enabled listing of every artist, then downloads whatever
    /// is not recorded yet in natural order.
    pub(crate) fn run_listing(&mut self, artists: &[String]) -> Result<RunSummary, RunError> {
        let mut artists = artists.to_vec();
        natural_sort(&mut artists);

        let mut candidates: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        {
            let grabber = Grabber::new(
                self.browser,
                self.site,
                self.ledger,
                self.options.fast_scan,
                self.options.max_page_retries,
            );
            for artist in &artists {
                info!("Scanning {} for links...", style(artist).cyan().bold());
                for category in &self.options.categories {
                    let report = grabber.discover_listing(artist, *category)?;
                    for candidate in report.candidates {
                        if seen.insert(candidate.page_id.clone()) {
                            candidates.push(candidate.page_id);
                        }
                    }
                }
            }
        }

        if candidates.is_empty() {
            info!("Nothing new to download");
            return Ok(self.summary);
        }
        natural_sort(&mut candidates);
        info!("{} images to fetch", candidates.len());

        self.start_progress(candidates.len());
        let total = candidates.len();
        for (index, page_id) in candidates.iter().enumerate() {
            self.process_item(page_id, index + 1, total)?;
            self.progress_bar.inc(1);
        }
        self.progress_bar.finish_and_clear();

        info!("Run finished: {}", self.summary);
        Ok(self.summary)
    }

    /// Downloads everything on the watchlist feed and marks it read, page
    /// after page, until the feed is empty or nothing on it can be processed.
    pub(crate) fn run_watchlist(&mut self) -> Result<RunSummary, RunError> {
        let feed_url = self
            .site
            .watchlist_url()
            .ok_or(RunError::Unsupported(self.site.name()))?;
        let grabber = Grabber::new(
            self.browser,
            self.site,
            self.ledger,
            self.options.fast_scan,
            self.options.max_page_retries,
        );
        let mut page = grabber.fetch_feed(&feed_url)?;

        loop {
            let Some(mut watchlist) = grabber.discover_watchlist(&page) else {
                info!("No watchlist form on the page, stopping");
                break;
            };
            if watchlist.entries.is_empty() {
                info!("Watchlist is empty");
                break;
            }

            let mut entries = watchlist.entries.clone();
            entries.sort_by(|a, b| natural_cmp(&a.page_id, &b.page_id));
            self.start_progress(entries.len());
            let total = entries.len();
            for (index, entry) in entries.iter().enumerate() {
                if entry.deleted {
                    info!("{} was removed by its author, marking it read", entry.page_id);
                    watchlist.mark_read(entry);
                } else if self.process_item(&entry.page_id, index + 1, total)? {
                    watchlist.mark_read(entry);
                }
                self.progress_bar.inc(1);
            }
            self.progress_bar.finish_and_clear();

            let marked = watchlist.marked();
            if marked == 0 {
                warn!("None of the {total} watchlist entries could be processed, leaving them unread");
                break;
            }
            info!("Marking {marked} images as viewed");
            page = grabber.submit_marked(&watchlist)?;
        }

        info!("Run finished: {}", self.summary);
        Ok(self.summary)
    }

    /// Downloads one item, then any continuation parts it links to.
    ///
    /// Returns whether the item itself is now on disk and recorded. Only a
    /// ledger failure is returned as an error.
    pub(crate) fn process_item(&mut self, page_id: &str, position: usize, total: usize) -> Result<bool, RunError> {
        let executor = Executor::new(self.browser, self.ledger);
        if let Some(filename) = executor.recorded(page_id)? {
            trace!("{page_id} already recorded as {filename}");
            self.summary.recorded += 1;
            return Ok(true);
        }

        let download_directory = self.options.download_directory.clone();
        let resolver = Resolver::new(self.browser, self.site, &download_directory);
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = page_id.to_string();
        let mut primary_done = false;

        loop {
            visited.insert(current.clone());
            let is_primary = current == page_id;
            if is_primary {
                info!("Getting image {} ({position} of {total})", style(&current).yellow());
            } else {
                info!(" - continuing with {current}");
            }
            self.progress_bar.set_message(current.clone());

            let resolution = resolver.resolve(&current).and_then(|resolution| {
                let outcome = executor.execute(&resolution.item)?;
                Ok((resolution, outcome))
            });
            let continuation = match resolution {
                Ok((resolution, outcome)) => {
                    self.summary.count(&outcome);
                    primary_done |= is_primary;
                    resolution.continuation
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    self.record_failure(&current, &e);
                    None
                }
            };

            match continuation {
                Some(next) if !visited.contains(&next) => current = next,
                Some(next) => {
                    debug!("{next} was already visited, not following it again");
                    break;
                }
                None => break,
            }
        }

        Ok(primary_done)
    }

    fn record_failure(&mut self, page_id: &str, error: &ItemError) {
        match error {
            ItemError::MissingAsset { .. } => {
                warn!("Skipping {page_id}: {error}");
                self.summary.skipped += 1;
            }
            _ => {
                error!("Failed to get {page_id}: {error}");
                self.summary.failed += 1;
            }
        }
    }

    fn start_progress(&mut self, len: usize) {
        self.progress_bar = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
        let progress_style = ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        self.progress_bar.set_style(progress_style);
    }
}
