pub mod glassdoor;
pub mod linkedin;
pub mod stepstone;
pub mod strategy;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::timeparse;
use strategy::RawPosting;

/// Credential key used verbatim as a Cookie header by providers without a
/// structured session.
const GENERIC_COOKIE_KEY: &str = "COOKIE";

/// Supported job portals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    LinkedIn,
    Glassdoor,
    Stepstone,
}

/// Narrowest recency filter a portal's search supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    LastHour,
    LastDay,
}

impl Recency {
    pub fn span(&self) -> TimeDelta {
        match self {
            Recency::LastHour => TimeDelta::hours(1),
            Recency::LastDay => TimeDelta::days(1),
        }
    }
}

/// A posting as extracted from a result page, ready to be classified and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub provider: Provider,
    pub term: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub posting_time: DateTime<Tz>,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::LinkedIn, Provider::Glassdoor, Provider::Stepstone];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::LinkedIn => "LinkedIn",
            Provider::Glassdoor => "Glassdoor",
            Provider::Stepstone => "Stepstone",
        }
    }

    /// Case-insensitive lookup; `None` for portals we cannot scrape.
    pub fn parse(name: &str) -> Option<Provider> {
        let name = name.trim();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
    }

    pub fn search_url(&self, term: &str, location: &str) -> String {
        match self {
            Provider::LinkedIn => linkedin::search_url(term, location),
            Provider::Glassdoor => glassdoor::search_url(term, location),
            Provider::Stepstone => stepstone::search_url(term, location),
        }
    }

    pub fn recency(&self) -> Recency {
        match self {
            Provider::LinkedIn => Recency::LastHour,
            Provider::Glassdoor | Provider::Stepstone => Recency::LastDay,
        }
    }

    /// Keys accepted in this provider's credential bundle.
    pub fn credential_keys(&self) -> Vec<&'static str> {
        match self {
            Provider::LinkedIn => linkedin::credential_keys().collect(),
            Provider::Glassdoor | Provider::Stepstone => vec![GENERIC_COOKIE_KEY],
        }
    }

    /// Cookie header value built from a stored credential bundle.
    pub fn credential_header(&self, bundle: &BTreeMap<String, String>) -> Option<String> {
        match self {
            Provider::LinkedIn => linkedin::cookie_header(bundle),
            Provider::Glassdoor | Provider::Stepstone => bundle
                .get(GENERIC_COOKIE_KEY)
                .filter(|v| !v.trim().is_empty())
                .cloned(),
        }
    }

    /// Keep only this provider's known keys with non-blank values, trimmed.
    pub fn sanitize_bundle<I>(&self, raw: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let allowed = self.credential_keys();
        raw.into_iter()
            .filter(|(key, _)| allowed.contains(&key.as_str()))
            .map(|(key, value)| (key, value.trim().to_string()))
            .filter(|(_, value)| !value.is_empty())
            .collect()
    }

    /// Parse one result page into candidates. Never fails; an unrecognised
    /// page yields nothing.
    pub fn extract(&self, markup: &str, term: &str, now: DateTime<Tz>) -> Vec<Candidate> {
        strategy::cascade(markup, self.strategies())
            .into_iter()
            .map(|raw| self.to_candidate(raw, term, now))
            .collect()
    }

    fn strategies(&self) -> &'static [strategy::SelectorStrategy] {
        match self {
            Provider::LinkedIn => linkedin::STRATEGIES,
            Provider::Glassdoor => glassdoor::STRATEGIES,
            Provider::Stepstone => stepstone::STRATEGIES,
        }
    }

    fn origin(&self) -> &'static str {
        match self {
            Provider::LinkedIn => linkedin::ORIGIN,
            Provider::Glassdoor => glassdoor::ORIGIN,
            Provider::Stepstone => stepstone::ORIGIN,
        }
    }

    fn to_candidate(&self, raw: RawPosting, term: &str, now: DateTime<Tz>) -> Candidate {
        let time = match self {
            Provider::Glassdoor => raw.time.as_deref().map(glassdoor::expand_age),
            _ => raw.time,
        };
        let url = raw.url.map(|u| {
            if u.starts_with('/') {
                format!("{}{}", self.origin(), u)
            } else {
                u
            }
        });
        Candidate {
            provider: *self,
            term: term.to_string(),
            title: raw.title,
            company: raw.company,
            location: raw.location,
            url,
            snippet: raw.snippet,
            posting_time: timeparse::normalize(time.as_deref(), now),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;
    use scraper::Selector;

    fn now() -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn names_round_trip_case_insensitively() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(&p.as_str().to_uppercase()), Some(p));
        }
        assert_eq!(Provider::parse(" linkedin "), Some(Provider::LinkedIn));
        assert_eq!(Provider::parse("Indeed"), None);
    }

    #[test]
    fn all_selectors_parse() {
        for p in Provider::ALL {
            for s in p.strategies() {
                let fields = [s.title, s.company, s.location, s.snippet, s.link, s.time];
                for sel in std::iter::once(s.card).chain(fields.into_iter().flatten().copied()) {
                    assert!(Selector::parse(sel).is_ok(), "{} selector {:?}", s.name, sel);
                }
            }
        }
    }

    #[test]
    fn linkedin_results_list() {
        let html = r#"<ul class="jobs-search__results-list">
          <li><div class="base-card">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/1"></a>
            <h3 class="base-search-card__title">Backend Engineer</h3>
            <h4 class="base-search-card__subtitle"><a>Acme</a></h4>
            <span class="job-search-card__location">Berlin, Germany</span>
            <time class="job-search-card__listdate--new" datetime="2024-05-10">20 minutes ago</time>
          </div></li>
          <li><div class="base-card"><h4 class="base-search-card__subtitle">No title</h4></div></li>
        </ul>"#;
        let found = Provider::LinkedIn.extract(html, "rust", now());
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.title, "Backend Engineer");
        assert_eq!(c.company.as_deref(), Some("Acme"));
        assert_eq!(c.location.as_deref(), Some("Berlin, Germany"));
        assert_eq!(c.url.as_deref(), Some("https://www.linkedin.com/jobs/view/1"));
        assert_eq!(c.term, "rust");
        assert_eq!(c.posting_time, Berlin.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn linkedin_base_card_fallback() {
        let html = r#"<div class="base-card">
            <span class="base-card__title">Data Engineer</span>
            <span class="base-card__subtitle">Globex</span>
            <time>2 hours ago</time>
        </div>"#;
        let found = Provider::LinkedIn.extract(html, "data", now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Data Engineer");
        assert_eq!(found[0].company.as_deref(), Some("Globex"));
        assert_eq!(found[0].posting_time, now() - TimeDelta::hours(2));
    }

    #[test]
    fn glassdoor_ages_and_relative_links() {
        let html = r#"<ul><li data-test="jobListing">
            <a data-test="job-title" href="/job-listing/platform-engineer-JV_1.htm">Platform Engineer</a>
            <span data-test="employer-name">Initech</span>
            <div data-test="emp-location">Munich</div>
            <div data-test="job-age">3h</div>
        </li></ul>"#;
        let found = Provider::Glassdoor.extract(html, "platform", now());
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].url.as_deref(),
            Some("https://www.glassdoor.com/job-listing/platform-engineer-JV_1.htm")
        );
        assert_eq!(found[0].posting_time, now() - TimeDelta::hours(3));
    }

    #[test]
    fn stepstone_cards() {
        let html = r#"<article data-testid="job-item">
            <a data-testid="job-item-title" href="/stellenangebote--Rust-Dev--1.html"><h2>Rust Dev</h2></a>
            <span data-at="job-item-company-name">Umbrella</span>
            <span data-at="job-item-location">Hamburg</span>
            <time datetime="2024-05-10T09:30:00+02:00">vor 2 Stunden</time>
        </article>"#;
        let found = Provider::Stepstone.extract(html, "rust", now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Rust Dev");
        assert_eq!(found[0].location.as_deref(), Some("Hamburg"));
        assert_eq!(found[0].posting_time, Berlin.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap());
    }

    #[test]
    fn unknown_markup_is_empty() {
        for p in Provider::ALL {
            assert!(p.extract("<html><body>blocked</body></html>", "x", now()).is_empty());
        }
    }

    #[test]
    fn search_urls_encode_terms() {
        let url = Provider::LinkedIn.search_url("rust developer", "Berlin, DE");
        assert_eq!(
            url,
            "https://www.linkedin.com/jobs/search/?keywords=rust%20developer&location=Berlin%2C%20DE&f_TPR=r3600"
        );
        assert!(Provider::Glassdoor.search_url("a&b", "x").contains("sc.keyword=a%26b"));
        assert!(Provider::Stepstone.search_url("c++", "Köln").starts_with("https://www.stepstone.de/jobs/c%2B%2B/in-K%C3%B6ln"));
    }

    #[test]
    fn linkedin_cookie_from_bundle() {
        let mut bundle = BTreeMap::new();
        assert_eq!(Provider::LinkedIn.credential_header(&bundle), None);
        bundle.insert("LINKEDIN_LI_AT".to_string(), "tok".to_string());
        bundle.insert("LINKEDIN_JSESSIONID".to_string(), "ajax:1".to_string());
        assert_eq!(
            Provider::LinkedIn.credential_header(&bundle).as_deref(),
            Some("li_at=tok; JSESSIONID=\"ajax:1\"")
        );
        bundle.insert("COOKIE".to_string(), "sid=9".to_string());
        assert_eq!(Provider::Stepstone.credential_header(&bundle).as_deref(), Some("sid=9"));
    }

    #[test]
    fn bundles_drop_unknown_and_blank_values() {
        let raw = vec![
            ("LINKEDIN_LI_AT".to_string(), "  tok ".to_string()),
            ("LINKEDIN_LIAP".to_string(), "   ".to_string()),
            ("PASSWORD".to_string(), "hunter2".to_string()),
        ];
        let clean = Provider::LinkedIn.sanitize_bundle(raw);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean["LINKEDIN_LI_AT"], "tok");

        let clean = Provider::Glassdoor.sanitize_bundle(vec![("COOKIE".to_string(), "a=1".to_string())]);
        assert_eq!(clean["COOKIE"], "a=1");
    }

    #[test]
    fn coarse_providers_are_daily() {
        assert_eq!(Provider::LinkedIn.recency().span(), TimeDelta::hours(1));
        assert_eq!(Provider::Glassdoor.recency().span(), TimeDelta::days(1));
        assert_eq!(Provider::Stepstone.recency(), Recency::LastDay);
    }
}
