use std::sync::OnceLock;

use regex::Regex;

use super::strategy::SelectorStrategy;

pub(super) const ORIGIN: &str = "https://www.glassdoor.com";

pub(super) const STRATEGIES: &[SelectorStrategy] = &[
    SelectorStrategy {
        name: "glassdoor-job-listing",
        card: "li[data-test=\"jobListing\"]",
        title: &["a[data-test=\"job-title\"]", "[data-test=\"job-link\"]"],
        company: &["[data-test=\"employer-name\"]", "[data-test=\"employer-short-name\"]"],
        location: &["[data-test=\"emp-location\"]"],
        snippet: &["[data-test=\"descSnippet\"]"],
        link: &["a[data-test=\"job-title\"]", "a[data-test=\"job-link\"]"],
        time: &["[data-test=\"job-age\"]"],
    },
    SelectorStrategy {
        name: "glassdoor-react-listing",
        card: "li.react-job-listing",
        title: &["a.jobLink span", "a.jobLink"],
        company: &[".job-search-key-l2wjgv", ".jobHeader a"],
        location: &[".loc", ".job-search-key-iii9i8"],
        snippet: &[".jobDescriptionContent"],
        link: &["a.jobLink"],
        time: &[".job-age", "[data-test=\"job-age\"]"],
    },
];

/// `fromAge=1` is the narrowest filter Glassdoor offers: one day.
pub(super) fn search_url(term: &str, location: &str) -> String {
    format!(
        "{}/Job/jobs.htm?sc.keyword={}&locKeyword={}&fromAge=1",
        ORIGIN,
        urlencoding::encode(term),
        urlencoding::encode(location)
    )
}

/// Rewrite compact age labels ("24h", "3d", "30d+") as "<n> <unit> ago".
pub(super) fn expand_age(raw: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\s*([mhd])\+?$").unwrap());
    let Some(caps) = re.captures(raw.trim()) else {
        return raw.to_string();
    };
    let unit = match caps[2].to_ascii_lowercase().as_str() {
        "m" => "minutes",
        "h" => "hours",
        _ => "days",
    };
    format!("{} {} ago", &caps[1], unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_ages() {
        assert_eq!(expand_age("24h"), "24 hours ago");
        assert_eq!(expand_age("3d"), "3 days ago");
        assert_eq!(expand_age("30d+"), "30 days ago");
        assert_eq!(expand_age("45m"), "45 minutes ago");
        assert_eq!(expand_age("2024-01-01"), "2024-01-01");
    }
}
