use thiserror::Error;

use crate::gallery::browser::{Browser, Page};
use crate::gallery::error::BrowseError;
use crate::gallery::io::Credentials;
use crate::gallery::site::{LoginState, Site};

#[derive(Error, Debug)]
pub(crate) enum SessionError {
    #[error("Unable to reach {site}: {source}")]
    Unreachable { site: &'static str, source: BrowseError },

    #[error("Login page of {site} changed: {source}")]
    LoginPage { site: &'static str, source: BrowseError },

    #[error("Could not log in to {site} as {username}")]
    Rejected { site: &'static str, username: String },

    #[error("Unable to tell whether we are logged in to {0}")]
    Ambiguous(&'static str),
}

/// Makes sure the browser holds a logged-in session, logging in with
/// `credentials` when the home page says we are a guest.
///
/// Returns the last page seen, which shows the logged-in state.
pub(crate) fn ensure_logged_in(
    browser: &dyn Browser,
    site: &dyn Site,
    credentials: &Credentials,
) -> Result<Page, SessionError> {
    let name = site.name();
    let home = browser
        .fetch(&site.home_url())
        .map_err(|source| SessionError::Unreachable { site: name, source })?;

    let login_link = match site.login_state(&home) {
        LoginState::LoggedIn => {
            debug!("Reusing existing session on {name}");
            return Ok(home);
        }
        LoginState::LoggedOut(link) => link,
        LoginState::Unknown => return Err(SessionError::Ambiguous(name)),
    };

    info!("Not logged in, logging in to {name} as {}", credentials.username);
    let login_page = browser
        .follow_link(&login_link)
        .map_err(|source| SessionError::Unreachable { site: name, source })?;
    let (form, button) = site
        .login_form(&login_page, credentials)
        .map_err(|source| SessionError::LoginPage { site: name, source })?;
    let landing = browser
        .submit_form(&form, button.as_ref())
        .map_err(|source| SessionError::Unreachable { site: name, source })?;

    match site.login_state(&landing) {
        LoginState::LoggedIn => {
            info!("Logged in to {name}");
            Ok(landing)
        }
        _ => Err(SessionError::Rejected {
            site: name,
            username: credentials.username.clone(),
        }),
    }
}
