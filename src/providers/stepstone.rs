use super::strategy::SelectorStrategy;

pub(super) const ORIGIN: &str = "https://www.stepstone.de";

pub(super) const STRATEGIES: &[SelectorStrategy] = &[
    SelectorStrategy {
        name: "stepstone-testid",
        card: "article[data-testid=\"job-item\"]",
        title: &["[data-testid=\"job-item-title\"]", "h2"],
        company: &["[data-at=\"job-item-company-name\"]"],
        location: &["[data-at=\"job-item-location\"]"],
        snippet: &["[data-at=\"jobcard-content\"]"],
        link: &["a[data-testid=\"job-item-title\"]", "a[data-at=\"job-item-title\"]"],
        time: &["time"],
    },
    SelectorStrategy {
        name: "stepstone-data-at",
        card: "article[data-at=\"job-item\"]",
        title: &["[data-at=\"job-item-title\"]", "h2"],
        company: &["[data-at=\"job-item-company-name\"]"],
        location: &["[data-at=\"job-item-location\"]"],
        snippet: &["[data-at=\"job-item-middle\"]"],
        link: &["a[data-at=\"job-item-title\"]", "a"],
        time: &["time", "[data-at=\"job-item-timeago\"]"],
    },
];

/// `ag=age_1` limits results to the last day.
pub(super) fn search_url(term: &str, location: &str) -> String {
    format!(
        "{}/jobs/{}/in-{}?ag=age_1",
        ORIGIN,
        urlencoding::encode(term),
        urlencoding::encode(location)
    )
}
