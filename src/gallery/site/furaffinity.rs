use url::Url;

use crate::gallery::browser::{Browser, Form, FormButton, Link, Page};
use crate::gallery::error::BrowseError;
use crate::gallery::io::Credentials;
use crate::gallery::site::{CandidateLink, Category, LoginState, Site, WatchEntry, WatchlistForm, fill_login, join_url};

const WATCHLIST_FORM: &str = "messages-form";
const WATCHLIST_CHECKBOX: &str = "submissions";
const MARK_READ_LABEL: &str = "Remove checked";
const ARTIST_SELECTOR: &str = "div.submission-id-sub-container a strong";

/// FurAffinity: numbered listings, `/view/<id>/` detail pages and a
/// new-submissions feed.
#[derive(Debug, Clone)]
pub(crate) struct FurAffinity {
    base_url: Url,
}

impl FurAffinity {
    pub(crate) fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn listing_url(&self, artist: &str, category: Category, number: u32) -> String {
        let segment = match category {
            Category::Gallery => "gallery",
            Category::Favourites => "favorites",
            Category::Scraps => "scraps",
        };
        let artist = urlencoding::encode(artist);
        format!("{}{segment}/{artist}/{number}/", self.base_url)
    }

    fn is_own_site(&self, url: &Url) -> bool {
        url.host_str() == self.base_url.host_str()
    }

    fn view_path<'a>(&self, link: &'a Link) -> Option<&'a str> {
        let url = link.url.as_ref()?;
        (self.is_own_site(url) && url.path().starts_with("/view/")).then(|| url.path())
    }
}

impl Site for FurAffinity {
    fn name(&self) -> &'static str {
        "FurAffinity"
    }

    fn home_url(&self) -> String {
        self.base_url.to_string()
    }

    fn listing_start(&self, _browser: &dyn Browser, artist: &str, category: Category) -> Result<String, BrowseError> {
        Ok(self.listing_url(artist, category, 1))
    }

    fn next_listing(&self, _page: &Page, artist: &str, category: Category, next_number: u32) -> Option<String> {
        Some(self.listing_url(artist, category, next_number))
    }

    fn item_links(&self, page: &Page) -> Vec<CandidateLink> {
        page.links()
            .iter()
            .filter_map(|link| {
                self.view_path(link).map(|path| CandidateLink {
                    page_id: path.to_string(),
                })
            })
            .collect()
    }

    fn detail_url(&self, page_id: &str) -> Result<String, BrowseError> {
        Ok(join_url(&self.base_url, page_id)?.to_string())
    }

    fn asset_link(&self, page: &Page) -> Option<String> {
        page.link_with(|link| link.text.contains("Download"))
            .map(|link| link.href.clone())
    }

    fn artist_name(&self, page: &Page) -> Option<String> {
        page.select_text(ARTIST_SELECTOR)
    }

    fn probes_asset_size(&self) -> bool {
        true
    }

    fn login_state(&self, page: &Page) -> LoginState {
        if let Some(link) = page.link_with(|l| l.href.contains("/login") && l.text == "Log in") {
            return LoginState::LoggedOut(link.clone());
        }
        let user_link = page.link_with(|l| l.url.as_ref().is_some_and(|u| u.path().starts_with("/user")));
        match user_link {
            Some(link) if link.text != "Guest" && !link.text.is_empty() => LoginState::LoggedIn,
            _ => LoginState::Unknown,
        }
    }

    fn login_form(&self, page: &Page, credentials: &Credentials) -> Result<(Form, Option<FormButton>), BrowseError> {
        let form = page
            .form_with(|f| f.action.contains("/login/"))
            .cloned()
            .ok_or_else(|| BrowseError::Structure("no login form on the login page".to_string()))?;
        let button = form.buttons.first().cloned();
        Ok((fill_login(form, "name", "pass", credentials)?, button))
    }

    fn watchlist_url(&self) -> Option<String> {
        Some(format!("{}msg/submissions/", self.base_url))
    }

    fn watchlist_form(&self, page: &Page) -> Option<WatchlistForm> {
        let form = page
            .form_with(|f| f.name.as_deref() == Some(WATCHLIST_FORM))?
            .clone();
        let entries = form
            .checkboxes(WATCHLIST_CHECKBOX)
            .map(|checkbox| {
                let page_id = format!("/view/{}/", checkbox.value);
                let deleted = !page
                    .links()
                    .iter()
                    .any(|link| link.href == page_id || self.view_path(link) == Some(page_id.as_str()));
                WatchEntry {
                    value: checkbox.value.clone(),
                    page_id,
                    deleted,
                }
            })
            .collect();
        Some(WatchlistForm {
            form,
            entries,
            checkbox: WATCHLIST_CHECKBOX,
            mark_read_label: MARK_READ_LABEL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> FurAffinity {
        FurAffinity::new(Url::parse("https://www.furaffinity.net/").unwrap())
    }

    fn page(url: &str, body: &str) -> Page {
        Page::parse(Url::parse(url).unwrap(), body)
    }

    #[test]
    fn listings_are_numbered_from_one() {
        let site = site();
        assert_eq!(
            site.listing_url("some artist", Category::Favourites, 1),
            "https://www.furaffinity.net/favorites/some%20artist/1/"
        );
        let p = page("https://www.furaffinity.net/gallery/a/1/", "");
        assert_eq!(
            site.next_listing(&p, "a", Category::Scraps, 2).as_deref(),
            Some("https://www.furaffinity.net/scraps/a/2/")
        );
    }

    #[test]
    fn only_view_links_are_items() {
        let p = page(
            "https://www.furaffinity.net/gallery/a/1/",
            r#"<a href="/view/10/">x</a><a href="/user/a/">a</a>
               <a href="https://www.furaffinity.net/view/11/">y</a>
               <a href="https://elsewhere.example/view/12/">z</a>"#,
        );
        let ids: Vec<String> = site().item_links(&p).into_iter().map(|c| c.page_id).collect();
        assert_eq!(ids, vec!["/view/10/", "/view/11/"]);
    }

    #[test]
    fn download_link_and_artist_are_found() {
        let p = page(
            "https://www.furaffinity.net/view/10/",
            r#"<div class="submission-id-sub-container"><a href="/user/artie/"><strong>Artie</strong></a></div>
               <a href="//d.furaffinity.net/art/artie/1500000000/1500000000.artie_pic.png">Download</a>"#,
        );
        let site = site();
        assert_eq!(
            site.asset_link(&p).as_deref(),
            Some("//d.furaffinity.net/art/artie/1500000000/1500000000.artie_pic.png")
        );
        assert_eq!(site.artist_name(&p).as_deref(), Some("Artie"));
        assert_eq!(site.detail_url("/view/10/").unwrap(), "https://www.furaffinity.net/view/10/");
    }

    #[test]
    fn login_state_detection() {
        let site = site();
        let guest = page(
            "https://www.furaffinity.net/",
            r#"<a href="/login/?ref=x">Log in</a><a href="/user/guest/">Guest</a>"#,
        );
        assert!(matches!(site.login_state(&guest), LoginState::LoggedOut(_)));

        let member = page("https://www.furaffinity.net/", r#"<a href="/user/wolfie/">wolfie</a>"#);
        assert_eq!(site.login_state(&member), LoginState::LoggedIn);

        let rejected = page("https://www.furaffinity.net/", r#"<a href="/user/">Guest</a>"#);
        assert_eq!(site.login_state(&rejected), LoginState::Unknown);
    }

    #[test]
    fn login_form_is_filled() {
        let p = page(
            "https://www.furaffinity.net/login/",
            r#"<form action="/login/?ref=x" method="post"><input name="name"><input type="password" name="pass">
               <input type="submit" name="login" value="Login to FurAffinity"></form>"#,
        );
        let credentials = Credentials {
            username: "wolfie".into(),
            password: "hunter2".into(),
        };
        let (form, button) = site().login_form(&p, &credentials).unwrap();
        let payload = form.payload(button.as_ref());
        assert!(payload.contains(&("name".to_string(), "wolfie".to_string())));
        assert!(payload.contains(&("pass".to_string(), "hunter2".to_string())));
        assert!(payload.contains(&("login".to_string(), "Login to FurAffinity".to_string())));
    }

    #[test]
    fn watchlist_entries_flag_deleted_items() {
        let p = page(
            "https://www.furaffinity.net/msg/submissions/",
            r#"<form name="messages-form" action="/msg/submissions/" method="post">
                 <input type="checkbox" name="submissions[]" value="101"><a href="/view/101/">one</a>
                 <input type="checkbox" name="submissions[]" value="102">
                 <button type="submit" value="Remove checked">Remove checked</button>
               </form>"#,
        );
        let mut watchlist = site().watchlist_form(&p).unwrap();
        assert_eq!(watchlist.entries.len(), 2);
        assert_eq!(watchlist.entries[0].page_id, "/view/101/");
        assert!(!watchlist.entries[0].deleted);
        assert!(watchlist.entries[1].deleted);

        let entry = watchlist.entries[1].clone();
        assert!(watchlist.mark_read(&entry));
        assert_eq!(watchlist.marked(), 1);
        assert_eq!(watchlist.mark_read_button().unwrap().value, "Remove checked");
    }
}
