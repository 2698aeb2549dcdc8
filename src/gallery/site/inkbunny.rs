use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::gallery::browser::{Browser, Form, FormButton, Link, Page};
use crate::gallery::error::BrowseError;
use crate::gallery::io::Credentials;
use crate::gallery::site::{CandidateLink, Category, LoginState, Site, fill_login, join_url};

static ASSET_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)max\.? *preview|download").unwrap_or_else(|e| panic!("asset label pattern: {e}"))
});

/// Inkbunny: listings reached through the artist profile and paginated by
/// "Next Page" links, `submissionview.php` detail pages and multi-page
/// submissions.
#[derive(Debug, Clone)]
pub(crate) struct Inkbunny {
    base_url: Url,
}

impl Inkbunny {
    pub(crate) fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// Ledger key of a submission link: path and query relative to the site root.
    fn submission_id(&self, link: &Link) -> Option<String> {
        let url = link.url.as_ref()?;
        if url.host_str() != self.base_url.host_str() {
            return None;
        }
        let path = url.path().trim_start_matches('/');
        if !path.starts_with("submissionview.php") {
            return None;
        }
        Some(match url.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        })
    }

    fn category_label(category: Category) -> &'static str {
        match category {
            Category::Gallery => "Gallery",
            Category::Favourites => "Favorites",
            Category::Scraps => "Scraps",
        }
    }
}

impl Site for Inkbunny {
    fn name(&self) -> &'static str {
        "Inkbunny"
    }

    fn home_url(&self) -> String {
        self.base_url.to_string()
    }

    fn listing_start(&self, browser: &dyn Browser, artist: &str, category: Category) -> Result<String, BrowseError> {
        let profile_url = join_url(&self.base_url, &urlencoding::encode(artist))?;
        let profile = browser.fetch(profile_url.as_str())?;
        let label = Self::category_label(category);
        profile
            .link_with(|l| l.text == label && l.href.contains("_process.php"))
            .and_then(|l| l.url.as_ref())
            .map(Url::to_string)
            .ok_or_else(|| BrowseError::Structure(format!("no {label} link on {artist}'s profile")))
    }

    fn next_listing(&self, page: &Page, _artist: &str, _category: Category, _next_number: u32) -> Option<String> {
        page.link_with(|l| l.href.starts_with("submissionsviewall.php") && l.text.contains("Next Page"))
            .and_then(|l| l.url.as_ref())
            .map(Url::to_string)
    }

    fn item_links(&self, page: &Page) -> Vec<CandidateLink> {
        page.links()
            .iter()
            .filter_map(|link| {
                self.submission_id(link).map(|page_id| CandidateLink { page_id })
            })
            .collect()
    }

    fn detail_url(&self, page_id: &str) -> Result<String, BrowseError> {
        Ok(join_url(&self.base_url, page_id)?.to_string())
    }

    fn asset_link(&self, page: &Page) -> Option<String> {
        page.link_with(|l| l.href.contains("/files/full/") && ASSET_LABEL.is_match(&l.text))
            .map(|l| l.href.clone())
            .or_else(|| {
                page.images()
                    .iter()
                    .find(|img| img.src.contains("/files/screen/"))
                    .map(|img| img.src.clone())
            })
    }

    fn continuation(&self, page: &Page, page_id: &str) -> Option<String> {
        page.links()
            .iter()
            .filter(|l| l.text.to_lowercase().contains("next"))
            .filter_map(|l| self.submission_id(l))
            .find(|id| id.strip_prefix(page_id).is_some_and(|rest| rest.starts_with('&')))
    }

    fn login_state(&self, page: &Page) -> LoginState {
        if page.link_with(|l| l.text == "Logout").is_some() {
            return LoginState::LoggedIn;
        }
        match page.link_with(|l| l.href.ends_with("login.php")) {
            Some(link) => LoginState::LoggedOut(link.clone()),
            None => LoginState::Unknown,
        }
    }

    fn login_form(&self, page: &Page, credentials: &Credentials) -> Result<(Form, Option<FormButton>), BrowseError> {
        let form = page
            .form_with(|f| f.action.contains("login_process.php"))
            .cloned()
            .ok_or_else(|| BrowseError::Structure("no login form on the login page".to_string()))?;
        let button = form.button_with_value("Login").cloned();
        Ok((fill_login(form, "username", "password", credentials)?, button))
    }
}
