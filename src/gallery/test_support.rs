//! A scripted [Browser] for exercising the pipeline without a network.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use url::Url;

use crate::gallery::browser::{Browser, Downloaded, Form, FormButton, Page, ProbeInfo};
use crate::gallery::error::BrowseError;

/// Every call made against the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Fetch(String),
    Submit { url: String, payload: Vec<(String, String)> },
    Probe(String),
    Download(String),
}

#[derive(Debug, Clone)]
struct Asset {
    bytes: Vec<u8>,
    declared_size: Option<u64>,
    last_modified: Option<String>,
    fail: bool,
}

#[derive(Default)]
pub(crate) struct FakeBrowser {
    pages: RefCell<HashMap<String, String>>,
    submit_responses: RefCell<HashMap<String, VecDeque<String>>>,
    transient_failures: RefCell<HashMap<String, u32>>,
    transient_submit_failures: RefCell<HashMap<String, u32>>,
    assets: RefCell<HashMap<String, Asset>>,
    requests: RefCell<Vec<Request>>,
    downloads: Cell<usize>,
}

impl FakeBrowser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serves `html` for every fetch of `url`.
    pub(crate) fn page(&self, url: &str, html: &str) {
        self.pages.borrow_mut().insert(url.to_string(), html.to_string());
    }

    /// Answers the next submit to `url` with `html`.
    pub(crate) fn on_submit(&self, url: &str, html: &str) {
        self.submit_responses
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(html.to_string());
    }

    /// The next `times` fetches of `url` fail with a transient error.
    pub(crate) fn fail_transiently(&self, url: &str, times: u32) {
        self.transient_failures.borrow_mut().insert(url.to_string(), times);
    }

    /// The next `times` submits to `url` fail with a transient error.
    pub(crate) fn fail_submit_transiently(&self, url: &str, times: u32) {
        self.transient_submit_failures.borrow_mut().insert(url.to_string(), times);
    }

    pub(crate) fn asset(&self, url: &str, bytes: &[u8], last_modified: Option<&str>) {
        self.assets.borrow_mut().insert(
            url.to_string(),
            Asset {
                bytes: bytes.to_vec(),
                declared_size: Some(bytes.len() as u64),
                last_modified: last_modified.map(str::to_string),
                fail: false,
            },
        );
    }

    /// Makes the HEAD probe of `url` report `size` instead of the real length.
    pub(crate) fn declare_size(&self, url: &str, size: Option<u64>) {
        if let Some(asset) = self.assets.borrow_mut().get_mut(url) {
            asset.declared_size = size;
        }
    }

    /// Downloads of `url` write half of the bytes and then fail.
    pub(crate) fn break_download(&self, url: &str) {
        if let Some(asset) = self.assets.borrow_mut().get_mut(url) {
            asset.fail = true;
        }
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|r| match r {
                Request::Fetch(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn download_count(&self) -> usize {
        self.downloads.get()
    }

    pub(crate) fn clear_requests(&self) {
        self.requests.borrow_mut().clear();
        self.downloads.set(0);
    }

    fn parse(url: &str, html: &str) -> Result<Page, BrowseError> {
        let parsed = Url::parse(url).map_err(|e| BrowseError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Page::parse(parsed, html))
    }
}

impl Browser for FakeBrowser {
    fn fetch(&self, url: &str) -> Result<Page, BrowseError> {
        self.requests.borrow_mut().push(Request::Fetch(url.to_string()));
        if let Some(remaining) = self.transient_failures.borrow_mut().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowseError::from_status(url, 503));
            }
        }
        match self.pages.borrow().get(url) {
            Some(html) => Self::parse(url, html),
            None => Err(BrowseError::from_status(url, 404)),
        }
    }

    fn submit_form(&self, form: &Form, button: Option<&FormButton>) -> Result<Page, BrowseError> {
        let url = form.action_url()?.to_string();
        self.requests.borrow_mut().push(Request::Submit {
            url: url.clone(),
            payload: form.payload(button),
        });
        if let Some(remaining) = self.transient_submit_failures.borrow_mut().get_mut(&url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowseError::from_status(&url, 502));
            }
        }
        let scripted = self
            .submit_responses
            .borrow_mut()
            .get_mut(&url)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(html) => Self::parse(&url, &html),
            None => match self.pages.borrow().get(&url) {
                Some(html) => Self::parse(&url, html),
                None => Err(BrowseError::from_status(&url, 404)),
            },
        }
    }

    fn probe(&self, url: &str) -> Result<ProbeInfo, BrowseError> {
        self.requests.borrow_mut().push(Request::Probe(url.to_string()));
        match self.assets.borrow().get(url) {
            Some(asset) => Ok(ProbeInfo {
                content_length: asset.declared_size,
                last_modified: asset.last_modified.clone(),
            }),
            None => Err(BrowseError::from_status(url, 404)),
        }
    }

    fn download(&self, url: &str, target: &Path) -> Result<Downloaded, BrowseError> {
        self.requests.borrow_mut().push(Request::Download(url.to_string()));
        let asset = self
            .assets
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| BrowseError::from_status(url, 404))?;
        self.downloads.set(self.downloads.get() + 1);
        if asset.fail {
            fs::write(target, &asset.bytes[..asset.bytes.len() / 2])?;
            return Err(BrowseError::Transient {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        fs::write(target, &asset.bytes)?;
        Ok(Downloaded {
            bytes_written: asset.bytes.len() as u64,
            last_modified: asset.last_modified,
        })
    }
}
