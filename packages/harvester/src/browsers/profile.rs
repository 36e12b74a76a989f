//! Profile page extractor over server-rendered HTML.
//!
//! Each field has a list of fallback selectors, tried in order; the site
//! ships several layouts at once.

use scraper::{ElementRef, Html, Selector};

use crate::traits::browser::{Extractor, PageSnapshot};
use crate::types::record::{FieldMap, FieldValue};

const NAME_SELECTORS: &[&str] = &[
    "h1.text-heading-xlarge",
    "h1.inline",
    "h1.pv-top-card-section__name",
    "h1.text-heading-large",
];

const HEADLINE_SELECTORS: &[&str] = &[
    "div.text-body-medium",
    "h2.mt1",
    "h2.pv-top-card-section__headline",
    "div.pv-text-details__left-panel",
];

const LOCATION_SELECTORS: &[&str] = &[
    "li.pv-top-card-v2-section__location",
    "span.pv-top-card-section__location",
    "span.text-body-small.inline",
    "span.text-body-small",
];

const ABOUT_SELECTORS: &[&str] = &[
    "section.pv-about-section p",
    "div#about ~ div.display-flex span[aria-hidden='true']",
    "section.summary p",
];

const EXPERIENCE_SELECTORS: &[&str] = &[
    "div#experience ~ div ul > li",
    "section.experience-section li",
    "section#experience li",
];

const EDUCATION_SELECTORS: &[&str] = &[
    "div#education ~ div ul > li",
    "section.education-section li",
    "section#education li",
];

/// Path fragments of the site's auth walls.
const CHALLENGE_PATHS: &[&str] = &["/checkpoint/", "/authwall", "/login", "/uas/login"];

const LOGIN_FORM_SELECTORS: &[&str] = &[
    "form.login__form",
    "form#join-form",
    "input#username",
    "input#session_key",
];

/// Pre-parsed fallback selector list for one field.
struct FieldSelectors(Vec<Selector>);

impl FieldSelectors {
    fn parse(selectors: &[&str]) -> Self {
        Self(
            selectors
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect(),
        )
    }

    /// Text of the first element matched by the first selector that hits.
    fn first_text(&self, document: &Html) -> Option<String> {
        self.0.iter().find_map(|selector| {
            document
                .select(selector)
                .map(element_text)
                .find(|text| !text.is_empty())
        })
    }

    /// Texts of all elements matched by the first selector that hits.
    fn all_texts(&self, document: &Html) -> Vec<String> {
        for selector in &self.0 {
            let texts: Vec<String> = document
                .select(selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();
            if !texts.is_empty() {
                return texts;
            }
        }
        Vec::new()
    }

    fn matches(&self, document: &Html) -> bool {
        self.0
            .iter()
            .any(|selector| document.select(selector).next().is_some())
    }
}

/// Visible text with whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extractor for public profile pages.
///
/// Produces `name`, `headline`, `location`, `about`, `experience` and
/// `education`, in that order, skipping whatever is absent.
pub struct ProfileExtractor {
    name: FieldSelectors,
    headline: FieldSelectors,
    location: FieldSelectors,
    about: FieldSelectors,
    experience: FieldSelectors,
    education: FieldSelectors,
    login_form: FieldSelectors,
}

impl Default for ProfileExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileExtractor {
    pub fn new() -> Self {
        Self {
            name: FieldSelectors::parse(NAME_SELECTORS),
            headline: FieldSelectors::parse(HEADLINE_SELECTORS),
            location: FieldSelectors::parse(LOCATION_SELECTORS),
            about: FieldSelectors::parse(ABOUT_SELECTORS),
            experience: FieldSelectors::parse(EXPERIENCE_SELECTORS),
            education: FieldSelectors::parse(EDUCATION_SELECTORS),
            login_form: FieldSelectors::parse(LOGIN_FORM_SELECTORS),
        }
    }
}

impl Extractor for ProfileExtractor {
    fn extract(&self, page: &PageSnapshot) -> FieldMap {
        let document = Html::parse_document(&page.html);
        let mut fields = FieldMap::new();

        let scalars = [
            ("name", &self.name),
            ("headline", &self.headline),
            ("location", &self.location),
            ("about", &self.about),
        ];
        for (field, selectors) in scalars {
            if let Some(text) = selectors.first_text(&document) {
                fields.insert(field.to_string(), FieldValue::Text(text));
            }
        }

        let lists = [("experience", &self.experience), ("education", &self.education)];
        for (field, selectors) in lists {
            let items = selectors.all_texts(&document);
            if !items.is_empty() {
                fields.insert(field.to_string(), FieldValue::List(items));
            }
        }

        fields
    }

    fn detect_challenge(&self, page: &PageSnapshot) -> bool {
        if CHALLENGE_PATHS.iter().any(|p| page.final_url.contains(p)) {
            return true;
        }
        let document = Html::parse_document(&page.html);
        self.login_form.matches(&document)
    }

    /// The top card has rendered once the name is there.
    fn is_ready(&self, page: &PageSnapshot) -> bool {
        let document = Html::parse_document(&page.html);
        self.name.first_text(&document).is_some()
    }
}
