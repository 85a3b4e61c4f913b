use scraper::{ElementRef, Html, Selector};

/// One way of reading a result page: a card selector plus field selectors
/// tried in order inside each card.
pub struct SelectorStrategy {
    pub name: &'static str,
    pub card: &'static str,
    pub title: &'static [&'static str],
    pub company: &'static [&'static str],
    pub location: &'static [&'static str],
    pub snippet: &'static [&'static str],
    pub link: &'static [&'static str],
    pub time: &'static [&'static str],
}

/// Fields pulled off a single result card, before time normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPosting {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub time: Option<String>,
}

impl SelectorStrategy {
    /// Cards without a title are dropped.
    pub fn apply(&self, document: &Html) -> Vec<RawPosting> {
        let Ok(card) = Selector::parse(self.card) else {
            return Vec::new();
        };
        document
            .select(&card)
            .filter_map(|el| {
                let title = first_text(&el, self.title)?;
                Some(RawPosting {
                    title,
                    company: first_text(&el, self.company),
                    location: first_text(&el, self.location),
                    url: first_attr(&el, self.link, "href"),
                    snippet: first_text(&el, self.snippet),
                    time: first_attr(&el, self.time, "datetime")
                        .or_else(|| first_text(&el, self.time)),
                })
            })
            .collect()
    }
}

/// Try strategies in order; the first one yielding anything wins.
pub fn cascade(markup: &str, strategies: &[SelectorStrategy]) -> Vec<RawPosting> {
    let document = Html::parse_document(markup);
    for strategy in strategies {
        let found = strategy.apply(&document);
        if !found.is_empty() {
            tracing::debug!(strategy = strategy.name, count = found.len(), "extracted postings");
            return found;
        }
    }
    Vec::new()
}

fn first_text(el: &ElementRef, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|s| {
        let sel = Selector::parse(s).ok()?;
        el.select(&sel)
            .next()
            .map(|found| collapse(&found.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    })
}

fn first_attr(el: &ElementRef, selectors: &[&str], attr: &str) -> Option<String> {
    selectors.iter().find_map(|s| {
        let sel = Selector::parse(s).ok()?;
        el.select(&sel)
            .next()
            .and_then(|found| found.value().attr(attr))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: SelectorStrategy = SelectorStrategy {
        name: "primary",
        card: "li.card",
        title: &["h3", ".title"],
        company: &[".company"],
        location: &[".where"],
        snippet: &[],
        link: &["a"],
        time: &["time"],
    };

    const SECONDARY: SelectorStrategy = SelectorStrategy {
        name: "secondary",
        card: "div.alt",
        title: &[".alt-title"],
        company: &[],
        location: &[],
        snippet: &[],
        link: &[],
        time: &[],
    };

    #[test]
    fn reads_fields_and_skips_untitled_cards() {
        let html = r#"<ul>
            <li class="card"><a href=" /jobs/1 "><h3>  Rust
                Engineer </h3></a><span class="company">Acme</span>
                <span class="where">Berlin</span><time datetime="2024-01-01">1 day ago</time></li>
            <li class="card"><span class="company">NoTitle GmbH</span></li>
            <li class="card"><span class="title">Fallback Title</span><time>3 hours ago</time></li>
        </ul>"#;
        let found = cascade(html, &[PRIMARY, SECONDARY]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].title, "Rust Engineer");
        assert_eq!(found[0].company.as_deref(), Some("Acme"));
        assert_eq!(found[0].location.as_deref(), Some("Berlin"));
        assert_eq!(found[0].url.as_deref(), Some("/jobs/1"));
        assert_eq!(found[0].time.as_deref(), Some("2024-01-01"));
        assert_eq!(found[1].title, "Fallback Title");
        assert_eq!(found[1].company, None);
        assert_eq!(found[1].time.as_deref(), Some("3 hours ago"));
    }

    #[test]
    fn falls_through_to_secondary() {
        let html = r#"<div class="alt"><p class="alt-title">Only here</p></div>"#;
        let found = cascade(html, &[PRIMARY, SECONDARY]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Only here");
    }

    #[test]
    fn no_structure_is_empty() {
        assert!(cascade("<html><body><p>nothing</p></body></html>", &[PRIMARY, SECONDARY]).is_empty());
    }
}
