//! The browsing capability the pipeline is written against.
//!
//! Pages are parsed once into owned links, images and forms so the rest of the
//! crate never touches the HTML tree directly. [Browser] is implemented over
//! HTTP by [crate::gallery::sender::RequestSender] and by a scripted fake in tests.

use std::path::Path;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::gallery::error::BrowseError;

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("img[src]"));
static FORM_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("form"));
static CONTROL_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("input, button, textarea, select"));
static OPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("option"));

fn selector(css: &str) -> Selector {
    match Selector::parse(css) {
        Ok(selector) => selector,
        Err(err) => panic!("built-in selector {css:?} does not parse: {err}"),
    }
}

/// A hyperlink as it appears on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Link {
    /// Whitespace-collapsed anchor text.
    pub(crate) text: String,
    /// The raw `href` attribute.
    pub(crate) href: String,
    /// `href` resolved against the page URL, when it resolves.
    pub(crate) url: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Image {
    pub(crate) src: String,
}

/// A named form control that contributes to the submitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormField {
    pub(crate) name: String,
    pub(crate) value: String,
    /// Lower-cased `type` attribute, `text` when absent.
    pub(crate) kind: String,
    pub(crate) checked: bool,
}

impl FormField {
    pub(crate) fn is_checkbox(&self) -> bool {
        self.kind == "checkbox"
    }

    fn is_toggle(&self) -> bool {
        self.kind == "checkbox" || self.kind == "radio"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormButton {
    pub(crate) name: Option<String>,
    pub(crate) value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Form {
    pub(crate) name: Option<String>,
    pub(crate) action: String,
    pub(crate) method: String,
    pub(crate) fields: Vec<FormField>,
    pub(crate) buttons: Vec<FormButton>,
    /// The page the form was found on, used to resolve `action`.
    pub(crate) page_url: Url,
}

impl Form {
    /// Sets the value of the first field called `name`, adding one if missing.
    pub(crate) fn set_field(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|f| f.name == name && !f.is_toggle()) {
            Some(field) => field.value = value.to_string(),
            None => self.fields.push(FormField {
                name: name.to_string(),
                value: value.to_string(),
                kind: "text".to_string(),
                checked: false,
            }),
        }
    }

    pub(crate) fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Checkboxes whose name contains `name_fragment`.
    pub(crate) fn checkboxes<'a>(&'a self, name_fragment: &'a str) -> impl Iterator<Item = &'a FormField> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.is_checkbox() && f.name.contains(name_fragment))
    }

    /// Ticks the checkbox with the given value. Returns false when there is none.
    pub(crate) fn check(&mut self, name_fragment: &str, value: &str) -> bool {
        match self
            .fields
            .iter_mut()
            .find(|f| f.is_checkbox() && f.name.contains(name_fragment) && f.value == value)
        {
            Some(field) => {
                field.checked = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn checked_count(&self, name_fragment: &str) -> usize {
        self.checkboxes(name_fragment).filter(|f| f.checked).count()
    }

    pub(crate) fn button_with_value(&self, value: &str) -> Option<&FormButton> {
        self.buttons.iter().find(|b| b.value.trim() == value)
    }

    pub(crate) fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("post")
    }

    /// Absolute URL the form submits to.
    pub(crate) fn action_url(&self) -> Result<Url, BrowseError> {
        if self.action.trim().is_empty() {
            return Ok(self.page_url.clone());
        }
        self.page_url
            .join(self.action.trim())
            .map_err(|e| BrowseError::InvalidUrl {
                url: self.action.clone(),
                reason: e.to_string(),
            })
    }

    /// Name/value pairs as a browser would submit them with `button` pressed.
    pub(crate) fn payload(&self, button: Option<&FormButton>) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .fields
            .iter()
            .filter(|f| !f.is_toggle() || f.checked)
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect();
        if let Some(FormButton { name: Some(name), value }) = button {
            pairs.push((name.clone(), value.clone()));
        }
        pairs
    }
}

/// A fetched and parsed HTML page.
#[derive(Debug, Clone)]
pub(crate) struct Page {
    pub(crate) url: Url,
    body: String,
    links: Vec<Link>,
    images: Vec<Image>,
    forms: Vec<Form>,
}

impl Page {
    pub(crate) fn parse(url: Url, body: &str) -> Self {
        let document = Html::parse_document(body);

        let links = document
            .select(&LINK_SELECTOR)
            .filter_map(|element| {
                let href = element.value().attr("href")?.trim().to_string();
                Some(Link {
                    text: collapse_text(&element),
                    url: url.join(&href).ok(),
                    href,
                })
            })
            .collect();

        let images = document
            .select(&IMAGE_SELECTOR)
            .filter_map(|element| {
                let src = element.value().attr("src")?.trim().to_string();
                Some(Image { src })
            })
            .collect();

        let forms = document
            .select(&FORM_SELECTOR)
            .map(|element| parse_form(&element, &url))
            .collect();

        Page {
            url,
            body: body.to_string(),
            links,
            images,
            forms,
        }
    }

    pub(crate) fn links(&self) -> &[Link] {
        &self.links
    }

    pub(crate) fn link_with(&self, predicate: impl Fn(&Link) -> bool) -> Option<&Link> {
        self.links.iter().find(|link| predicate(link))
    }

    pub(crate) fn images(&self) -> &[Image] {
        &self.images
    }

    #[cfg(test)]
    pub(crate) fn forms(&self) -> &[Form] {
        &self.forms
    }

    pub(crate) fn form_with(&self, predicate: impl Fn(&Form) -> bool) -> Option<&Form> {
        self.forms.iter().find(|form| predicate(form))
    }

    /// Collapsed text of the first element matching `css`, if any and not empty.
    pub(crate) fn select_text(&self, css: &str) -> Option<String> {
        let selector = Selector::parse(css).ok()?;
        let document = Html::parse_document(&self.body);
        document
            .select(&selector)
            .next()
            .map(|element| collapse_text(&element))
            .filter(|text| !text.is_empty())
    }
}

fn collapse_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_form(element: &ElementRef<'_>, page_url: &Url) -> Form {
    let attrs = element.value();
    let mut fields = Vec::new();
    let mut buttons = Vec::new();

    for control in element.select(&CONTROL_SELECTOR) {
        let value = control.value();
        let name = value.attr("name").map(str::to_string);
        let kind = value.attr("type").unwrap_or("").to_ascii_lowercase();

        match value.name() {
            "button" => {
                if kind.is_empty() || kind == "submit" {
                    buttons.push(FormButton {
                        name,
                        value: value
                            .attr("value")
                            .map(str::to_string)
                            .unwrap_or_else(|| collapse_text(&control)),
                    });
                }
            }
            "input" if kind == "submit" || kind == "image" => buttons.push(FormButton {
                name,
                value: value.attr("value").unwrap_or("").to_string(),
            }),
            "input" if kind == "reset" || kind == "button" || kind == "file" => {}
            "input" => {
                if let Some(name) = name {
                    let is_toggle = kind == "checkbox" || kind == "radio";
                    fields.push(FormField {
                        name,
                        value: value
                            .attr("value")
                            .unwrap_or(if is_toggle { "on" } else { "" })
                            .to_string(),
                        kind: if kind.is_empty() { "text".to_string() } else { kind },
                        checked: value.attr("checked").is_some(),
                    });
                }
            }
            "textarea" => {
                if let Some(name) = name {
                    fields.push(FormField {
                        name,
                        value: control.text().collect(),
                        kind: "textarea".to_string(),
                        checked: false,
                    });
                }
            }
            "select" => {
                if let Some(name) = name {
                    let options: Vec<ElementRef<'_>> = control.select(&OPTION_SELECTOR).collect();
                    let chosen = options
                        .iter()
                        .find(|o| o.value().attr("selected").is_some())
                        .or_else(|| options.first());
                    if let Some(option) = chosen {
                        fields.push(FormField {
                            name,
                            value: option
                                .value()
                                .attr("value")
                                .map(str::to_string)
                                .unwrap_or_else(|| collapse_text(option)),
                            kind: "select".to_string(),
                            checked: false,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    Form {
        name: attrs.attr("name").map(str::to_string),
        action: attrs.attr("action").unwrap_or("").to_string(),
        method: attrs.attr("method").unwrap_or("get").to_string(),
        fields,
        buttons,
        page_url: page_url.clone(),
    }
}

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProbeInfo {
    pub(crate) content_length: Option<u64>,
    pub(crate) last_modified: Option<String>,
}

/// Result of streaming a URL into a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Downloaded {
    pub(crate) bytes_written: u64,
    pub(crate) last_modified: Option<String>,
}

/// What the pipeline needs from a web client.
pub(crate) trait Browser {
    fn fetch(&self, url: &str) -> Result<Page, BrowseError>;

    fn follow_link(&self, link: &Link) -> Result<Page, BrowseError> {
        match &link.url {
            Some(url) => self.fetch(url.as_str()),
            None => Err(BrowseError::InvalidUrl {
                url: link.href.clone(),
                reason: "link does not resolve against its page".to_string(),
            }),
        }
    }

    fn submit_form(&self, form: &Form, button: Option<&FormButton>) -> Result<Page, BrowseError>;

    fn probe(&self, url: &str) -> Result<ProbeInfo, BrowseError>;

    /// Streams `url` into `target`, creating or truncating it.
    fn download(&self, url: &str, target: &Path) -> Result<Downloaded, BrowseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Page {
        Page::parse(Url::parse("https://www.example.net/gallery/someone/1/").unwrap(), body)
    }

    #[test]
    fn links_are_resolved_and_text_collapsed() {
        let p = page(
            r#"<html><head><title> Gallery  page </title></head><body>
               <a href="/view/123/">  <b>Nice</b>
                  picture </a>
               <a href="//d.example.net/art/x/1.jpg">Download</a>
               <a name="anchor">no href</a>
            </body></html>"#,
        );
        assert_eq!(p.links().len(), 2);
        assert_eq!(p.links()[0].text, "Nice picture");
        assert_eq!(p.links()[0].url.as_ref().unwrap().as_str(), "https://www.example.net/view/123/");
        assert_eq!(
            p.links()[1].url.as_ref().unwrap().as_str(),
            "https://d.example.net/art/x/1.jpg"
        );
        assert!(p.link_with(|l| l.text == "Download").is_some());
    }

    #[test]
    fn forms_capture_fields_checkboxes_and_buttons() {
        let p = page(
            r#"<form name="messages-form" action="/msg/submissions/" method="post">
                 <input type="hidden" name="token" value="abc">
                 <input type="checkbox" name="submissions[]" value="11">
                 <input type="checkbox" name="submissions[]" value="12" checked>
                 <select name="order"><option value="a">A</option><option value="b" selected>B</option></select>
                 <button type="submit" name="remove" value="Remove checked">Remove</button>
                 <input type="submit" value="Nuke all">
               </form>"#,
        );
        let mut form = p.form_with(|f| f.name.as_deref() == Some("messages-form")).unwrap().clone();
        assert!(form.is_post());
        assert_eq!(form.checkboxes("submissions").count(), 2);
        assert_eq!(form.checked_count("submissions"), 1);
        assert!(form.check("submissions", "11"));
        assert!(!form.check("submissions", "99"));

        let button = form.button_with_value("Remove checked").unwrap().clone();
        let payload = form.payload(Some(&button));
        assert_eq!(
            payload,
            vec![
                ("token".to_string(), "abc".to_string()),
                ("submissions[]".to_string(), "11".to_string()),
                ("submissions[]".to_string(), "12".to_string()),
                ("order".to_string(), "b".to_string()),
                ("remove".to_string(), "Remove checked".to_string()),
            ]
        );
        assert_eq!(form.action_url().unwrap().as_str(), "https://www.example.net/msg/submissions/");
    }

    #[test]
    fn set_field_updates_or_appends() {
        let p = page(r#"<form action="login_process.php"><input name="username"></form>"#);
        let mut form = p.forms()[0].clone();
        form.set_field("username", "me");
        form.set_field("password", "secret");
        assert!(form.has_field("password"));
        assert_eq!(
            form.payload(None),
            vec![
                ("username".to_string(), "me".to_string()),
                ("password".to_string(), "secret".to_string()),
            ]
        );
        assert!(!form.is_post());
        assert_eq!(
            form.action_url().unwrap().as_str(),
            "https://www.example.net/gallery/someone/1/login_process.php"
        );
    }

    #[test]
    fn select_text_finds_nested_elements() {
        let p = page(r#"<div class="submission-id-sub-container"><a href="/user/artie/"><strong>Artie</strong></a></div>"#);
        assert_eq!(p.select_text("div.submission-id-sub-container a strong").as_deref(), Some("Artie"));
        assert_eq!(p.select_text("span.missing"), None);
    }

    #[test]
    fn images_are_collected() {
        let p = page(r#"<img src="https://cdn.example.net/files/screen/1/a.png"><img alt="none">"#);
        assert_eq!(p.images().len(), 1);
        assert_eq!(p.images()[0].src, "https://cdn.example.net/files/screen/1/a.png");
    }
}
