//! Everything that differs between the supported sites: URL layout, which
//! links are items, where the download link lives, login and the watchlist.
//!
//! The pipeline in [crate::gallery] only talks to a [Site], never to a
//! concrete adapter.

pub(crate) mod furaffinity;
pub(crate) mod inkbunny;

use std::fmt;

use url::Url;

use crate::gallery::browser::{Browser, Form, FormButton, Link, Page};
use crate::gallery::error::BrowseError;
use crate::gallery::io::{Credentials, SiteKind};

use self::furaffinity::FurAffinity;
use self::inkbunny::Inkbunny;

/// A listing of an artist's submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Category {
    Gallery,
    Favourites,
    Scraps,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Gallery => "gallery",
            Category::Favourites => "favourites",
            Category::Scraps => "scraps",
        })
    }
}

/// An item link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CandidateLink {
    /// Ledger key of the item.
    pub(crate) page_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoginState {
    LoggedIn,
    /// Not logged in; following the link leads to the login form.
    LoggedOut(Link),
    /// Neither marker was found on the page.
    Unknown,
}

/// One notification on the watchlist feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchEntry {
    /// Value of the entry's checkbox.
    pub(crate) value: String,
    pub(crate) page_id: String,
    /// The feed lists the item but no longer links to it.
    pub(crate) deleted: bool,
}

/// The feed's form together with the entries it lists.
#[derive(Debug, Clone)]
pub(crate) struct WatchlistForm {
    pub(crate) form: Form,
    pub(crate) entries: Vec<WatchEntry>,
    /// Name fragment shared by the entry checkboxes.
    pub(crate) checkbox: &'static str,
    /// Value of the button that removes checked entries.
    pub(crate) mark_read_label: &'static str,
}

impl WatchlistForm {
    /// Ticks the entry so it is removed on submit.
    pub(crate) fn mark_read(&mut self, entry: &WatchEntry) -> bool {
        self.form.check(self.checkbox, &entry.value)
    }

    pub(crate) fn marked(&self) -> usize {
        self.form.checked_count(self.checkbox)
    }

    pub(crate) fn mark_read_button(&self) -> Result<FormButton, BrowseError> {
        self.form
            .button_with_value(self.mark_read_label)
            .cloned()
            .ok_or_else(|| BrowseError::Structure(format!("no \"{}\" button on the watchlist form", self.mark_read_label)))
    }
}

pub(crate) trait Site {
    fn name(&self) -> &'static str;

    fn home_url(&self) -> String;

    /// URL of the first listing page of `artist`'s `category`.
    fn listing_start(&self, browser: &dyn Browser, artist: &str, category: Category) -> Result<String, BrowseError>;

    /// URL of the listing page after `page`, `None` at the end of the listing.
    /// `next_number` is the 1-based number the next page would have.
    fn next_listing(&self, page: &Page, artist: &str, category: Category, next_number: u32) -> Option<String>;

    /// Item links on a listing page, in page order.
    fn item_links(&self, page: &Page) -> Vec<CandidateLink>;

    fn detail_url(&self, page_id: &str) -> Result<String, BrowseError>;

    /// The href of the full resolution asset on a detail page.
    fn asset_link(&self, page: &Page) -> Option<String>;

    /// Ledger key of the next part of a multi-page submission.
    fn continuation(&self, _page: &Page, _page_id: &str) -> Option<String> {
        None
    }

    fn artist_name(&self, _page: &Page) -> Option<String> {
        None
    }

    /// Whether assets should be probed for their size before downloading.
    fn probes_asset_size(&self) -> bool {
        false
    }

    fn login_state(&self, page: &Page) -> LoginState;

    /// The filled-in login form found on `page` and the button to press.
    fn login_form(&self, page: &Page, credentials: &Credentials) -> Result<(Form, Option<FormButton>), BrowseError>;

    fn watchlist_url(&self) -> Option<String> {
        None
    }

    fn watchlist_form(&self, _page: &Page) -> Option<WatchlistForm> {
        None
    }
}

/// The adapter for a configured site.
pub(crate) fn for_kind(kind: SiteKind, base_url: Url) -> Box<dyn Site> {
    match kind {
        SiteKind::FurAffinity => Box::new(FurAffinity::new(base_url)),
        SiteKind::Inkbunny => Box::new(Inkbunny::new(base_url)),
    }
}

/// Joins `relative` onto `base`, mapping failures into [BrowseError].
pub(crate) fn join_url(base: &Url, relative: &str) -> Result<Url, BrowseError> {
    base.join(relative).map_err(|e| BrowseError::InvalidUrl {
        url: relative.to_string(),
        reason: e.to_string(),
    })
}

/// Fills the credential fields of a login form.
pub(crate) fn fill_login(
    mut form: Form,
    user_field: &str,
    password_field: &str,
    credentials: &Credentials,
) -> Result<Form, BrowseError> {
    for field in [user_field, password_field] {
        if !form.has_field(field) {
            return Err(BrowseError::Structure(format!("login form has no \"{field}\" field")));
        }
    }
    form.set_field(user_field, &credentials.username);
    form.set_field(password_field, &credentials.password);
    Ok(form)
}
