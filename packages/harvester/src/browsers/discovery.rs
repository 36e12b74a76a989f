//! People-search worklist discovery.
//!
//! Walks the search result pages for a keyword and collects profile links.
//! Every page load goes through the rate governor like any other fetch.

use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::BrowseResult;
use crate::rate::{RateGovernor, RiskSignal};
use crate::traits::browser::Browser;
use crate::types::{identity::Identity, target::TargetId};

const SEARCH_URL: &str = "https://www.linkedin.com/search/results/people/";

const CARD_SELECTORS: &[&str] = &[
    "li.reusable-search__result-container",
    "li.search-result",
    "div.entity-result",
];

const LINK_SELECTORS: &[&str] = &[
    "span.entity-result__title-text a",
    "a.app-aware-link",
    "a[data-control-name='search_srp_result']",
];

/// A keyword search over people results.
#[derive(Debug, Clone)]
pub struct ProfileSearch {
    pub keyword: String,

    /// Result pages to walk at most
    pub max_pages: u32,

    /// Stop once this many profiles are found
    pub limit: Option<usize>,
}

impl ProfileSearch {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            max_pages: 3,
            limit: None,
        }
    }

    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// URL of result page `page` (1-based).
    pub fn page_url(&self, page: u32) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("keywords", &self.keyword)
            .append_pair("page", &page.to_string())
            .finish();
        format!("{}?{}", SEARCH_URL, query)
    }

    /// Collect profile ids, in result order, without duplicates.
    ///
    /// Stops early when a page yields nothing new.
    pub async fn discover(
        &self,
        browser: &dyn Browser,
        identity: &Identity,
        governor: &RateGovernor,
    ) -> BrowseResult<Vec<TargetId>> {
        let mut found: Vec<TargetId> = Vec::new();

        for page in 1..=self.max_pages {
            governor.acquire_slot().await;
            let url = self.page_url(page);
            let snapshot = match browser.navigate(&url, identity).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    governor.report_outcome(RiskSignal::Timeout);
                    return Err(e);
                }
            };

            if snapshot.is_soft_blocked() {
                governor.report_outcome(RiskSignal::SoftBlock);
                warn!(keyword = %self.keyword, page, "search soft-blocked, stopping discovery");
                break;
            }
            governor.report_outcome(RiskSignal::Clean);

            let before = found.len();
            for id in profile_links(&snapshot.html, &snapshot.final_url) {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
            debug!(keyword = %self.keyword, page, new = found.len() - before, "search page processed");

            if let Some(limit) = self.limit {
                if found.len() >= limit {
                    found.truncate(limit);
                    break;
                }
            }
            if found.len() == before {
                break;
            }
        }

        info!(keyword = %self.keyword, profiles = found.len(), "discovery finished");
        Ok(found)
    }
}

/// Profile links on one search result page, tracking query stripped.
pub fn profile_links(html: &str, base_url: &str) -> Vec<TargetId> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let cards: Vec<Selector> = CARD_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect();
    let links: Vec<Selector> = LINK_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect();

    let Some(card_elements) = cards
        .iter()
        .map(|selector| document.select(selector).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
    else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    for card in card_elements {
        let href = links
            .iter()
            .find_map(|selector| card.select(selector).next())
            .and_then(|link| link.value().attr("href"));
        let Some(href) = href else { continue };

        let absolute = match &base {
            Some(base) => base.join(href).map(|u| u.to_string()).ok(),
            None => Some(href.to_string()),
        };
        let Some(id) = absolute.as_deref().and_then(TargetId::from_profile_url) else {
            continue;
        };
        if id.as_str().contains("/in/") && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBrowser, MockStep};
    use crate::types::config::RateConfig;
    use crate::types::identity::{IdentityDescriptor, SessionGrant};
    use std::time::Duration;

    const RESULTS: &str = r#"
        <ul class="reusable-search__entity-result-list">
          <li class="reusable-search__result-container">
            <span class="entity-result__title-text"><a href="https://www.linkedin.com/in/ada?miniProfileUrn=abc">Ada</a></span>
          </li>
          <li class="reusable-search__result-container">
            <a class="app-aware-link" href="/in/grace/?trk=srp">Grace</a>
          </li>
          <li class="reusable-search__result-container">
            <a class="app-aware-link" href="https://www.linkedin.com/company/engines">Company</a>
          </li>
          <li class="reusable-search__result-container">
            <a class="app-aware-link" href="https://www.linkedin.com/in/ada?other=1">Ada again</a>
          </li>
        </ul>
    "#;

    #[test]
    fn test_profile_links_cleaned_and_deduped() {
        let ids = profile_links(RESULTS, "https://www.linkedin.com/search/results/people/?keywords=x");
        let ids: Vec<_> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["https://www.linkedin.com/in/ada", "https://www.linkedin.com/in/grace"]
        );
    }

    #[test]
    fn test_page_url_encodes_keyword() {
        let url = ProfileSearch::new("data analyst").page_url(2);
        assert_eq!(
            url,
            "https://www.linkedin.com/search/results/people/?keywords=data+analyst&page=2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_stops_when_nothing_new() {
        let search = ProfileSearch::new("analyst").with_max_pages(5);
        let browser = MockBrowser::new()
            .with_step(
                search.page_url(1),
                MockStep::Page {
                    html: RESULTS.to_string(),
                    latency: Duration::ZERO,
                },
            )
            .with_step(
                search.page_url(2),
                MockStep::Page {
                    html: RESULTS.to_string(),
                    latency: Duration::ZERO,
                },
            );
        let governor = RateGovernor::new(
            RateConfig::default()
                .with_jitter(0.0)
                .with_requests_per_minute(None),
        )
        .unwrap();
        let identity = Identity::from_grant(
            "me",
            SessionGrant::new("t"),
            IdentityDescriptor::default(),
            1,
        );

        let found = search.discover(&browser, &identity, &governor).await.unwrap();
        assert_eq!(found.len(), 2);
        // Page 2 repeated page 1, so page 3 was never requested
        assert_eq!(browser.navigations().len(), 2);
    }
}
