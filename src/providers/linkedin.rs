use std::collections::BTreeMap;

use super::strategy::SelectorStrategy;

pub(super) const ORIGIN: &str = "https://www.linkedin.com";

/// Guest search results come in two page variants.
pub(super) const STRATEGIES: &[SelectorStrategy] = &[
    SelectorStrategy {
        name: "linkedin-results-list",
        card: "ul.jobs-search__results-list li",
        title: &["h3", ".base-search-card__title"],
        company: &[".base-search-card__subtitle"],
        location: &[".job-search-card__location"],
        snippet: &[".base-search-card__snippet"],
        link: &["a.base-card__full-link", "a"],
        time: &["time"],
    },
    SelectorStrategy {
        name: "linkedin-base-card",
        card: ".base-card",
        title: &[".base-card__title"],
        company: &[".base-card__subtitle"],
        location: &[".job-search-card__location"],
        snippet: &[".base-card__snippet"],
        link: &["a.base-card__full-link", "a"],
        time: &["time"],
    },
];

/// Session cookie parts, in the order LinkedIn sends them.
const COOKIE_KEYS: &[(&str, &str)] = &[
    ("LINKEDIN_LI_AT", "li_at"),
    ("LINKEDIN_JSESSIONID", "JSESSIONID"),
    ("LINKEDIN_LIAP", "liap"),
    ("LINKEDIN_LIDC", "lidc"),
    ("LINKEDIN_BCOOKIE", "bcookie"),
    ("LINKEDIN_BSCOOKIE", "bscookie"),
];

pub(super) fn credential_keys() -> impl Iterator<Item = &'static str> {
    COOKIE_KEYS.iter().map(|(key, _)| *key)
}

/// `f_TPR=r3600` restricts results to the last hour.
pub(super) fn search_url(term: &str, location: &str) -> String {
    format!(
        "{}/jobs/search/?keywords={}&location={}&f_TPR=r3600",
        ORIGIN,
        urlencoding::encode(term),
        urlencoding::encode(location)
    )
}

pub(super) fn cookie_header(bundle: &BTreeMap<String, String>) -> Option<String> {
    let parts: Vec<String> = COOKIE_KEYS
        .iter()
        .filter_map(|(key, cookie)| {
            let value = bundle.get(*key)?;
            Some(if *cookie == "JSESSIONID" {
                format!("{}=\"{}\"", cookie, value)
            } else {
                format!("{}={}", cookie, value)
            })
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
