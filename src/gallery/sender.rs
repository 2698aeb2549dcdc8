use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use reqwest_cookie_store::CookieStoreMutex;
use url::Url;

use crate::gallery::browser::{Browser, Downloaded, Form, FormButton, Page, ProbeInfo};
use crate::gallery::error::BrowseError;
use crate::gallery::io::NetworkSettings;
use crate::gallery::rate_limiter::{PoliteRateLimiter, RateLimiterConfig};

/// The [Browser] used for real runs: a blocking HTTP client with a persistent
/// cookie jar and a rate limiter in front of every request.
pub(crate) struct RequestSender {
    client: Client,
    rate_limiter: PoliteRateLimiter,
}

impl RequestSender {
    pub(crate) fn new(network: &NetworkSettings, cookies: Arc<CookieStoreMutex>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(&network.user_agent)
            .timeout(network.timeout)
            .connect_timeout(network.timeout)
            .cookie_provider(cookies)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            client,
            rate_limiter: PoliteRateLimiter::with_config(RateLimiterConfig::with_base_delay(network.request_delay)),
        })
    }

    fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, BrowseError> {
        self.rate_limiter.wait_for_request();
        let start = Instant::now();
        let result = request.send();
        let elapsed = start.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.rate_limiter.record_failure();
                warn!("Request to {url} failed after {elapsed:?}: {e}");
                return Err(BrowseError::from_reqwest(url, e));
            }
        };
        self.rate_limiter.record_response_time(elapsed);

        let status = response.status();
        trace!("{} {url} in {elapsed:?}", status.as_u16());
        if !status.is_success() {
            let err = BrowseError::from_status(url, status.as_u16());
            if err.is_retryable() {
                self.rate_limiter.record_failure();
            }
            return Err(err);
        }
        Ok(response)
    }

    fn into_page(url: &str, response: Response) -> Result<Page, BrowseError> {
        let final_url = response.url().clone();
        let body = response
            .text()
            .map_err(|e| BrowseError::from_reqwest(url, e))?;
        Ok(Page::parse(final_url, &body))
    }

    fn last_modified(headers: &HeaderMap) -> Option<String> {
        headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

impl Browser for RequestSender {
    fn fetch(&self, url: &str) -> Result<Page, BrowseError> {
        debug!("GET {url}");
        let response = self.send(url, self.client.get(url))?;
        Self::into_page(url, response)
    }

    fn submit_form(&self, form: &Form, button: Option<&FormButton>) -> Result<Page, BrowseError> {
        let mut action: Url = form.action_url()?;
        let payload = form.payload(button);
        let request = if form.is_post() {
            debug!("POST {action} ({} fields)", payload.len());
            self.client.post(action.as_str()).form(&payload)
        } else {
            action.set_query(None);
            action.query_pairs_mut().extend_pairs(payload.iter());
            debug!("GET {action}");
            self.client.get(action.as_str())
        };
        let response = self.send(action.as_str(), request)?;
        Self::into_page(action.as_str(), response)
    }

    fn probe(&self, url: &str) -> Result<ProbeInfo, BrowseError> {
        let response = self.send(url, self.client.head(url))?;
        let headers = response.headers();
        Ok(ProbeInfo {
            content_length: headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok()),
            last_modified: Self::last_modified(headers),
        })
    }

    fn download(&self, url: &str, target: &Path) -> Result<Downloaded, BrowseError> {
        let mut response = self.send(url, self.client.get(url))?;
        let last_modified = Self::last_modified(response.headers());

        let mut file = BufWriter::new(File::create(target)?);
        let bytes_written = response
            .copy_to(&mut file)
            .map_err(|e| BrowseError::from_reqwest(url, e))?;
        file.flush()?;
        trace!("Wrote {bytes_written} bytes from {url} to {}", target.display());

        Ok(Downloaded {
            bytes_written,
            last_modified,
        })
    }
}
