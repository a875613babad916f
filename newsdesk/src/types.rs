//! Domain types shared by the presenter, QA and evaluator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

/// Optional sink for human-readable progress notes ("Fetching Business...").
#[derive(Debug, Clone, Default)]
pub struct Progress(Option<UnboundedSender<String>>);

impl Progress {
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Progress(Some(sender))
    }

    pub fn none() -> Self {
        Progress(None)
    }

    /// A closed receiver is not an error; the note is dropped.
    pub fn report(&self, note: impl Into<String>) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(note.into());
        }
    }
}

/// Language the assistant answers in, detected from the user's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Chinese,
}

impl Language {
    /// Any CJK ideograph in the message switches to Chinese.
    pub fn detect(text: &str) -> Self {
        let has_cjk = text
            .chars()
            .any(|c| matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}'));
        if has_cjk {
            Language::Chinese
        } else {
            Language::English
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Chinese => "Simplified Chinese",
        }
    }

    fn labels(&self) -> Labels {
        match self {
            Language::English => Labels {
                what_happened: "What happened",
                why_it_matters: "Why this matters",
                how_it_relates: "How it relates to us",
                published: "Published",
                source: "Source",
                unavailable: "Unavailable right now",
                nothing_found: "No articles were found for this request.",
            },
            Language::Chinese => Labels {
                what_happened: "发生了什么",
                why_it_matters: "为什么重要",
                how_it_relates: "与我们的关系",
                published: "发布时间",
                source: "来源",
                unavailable: "暂时无法获取",
                nothing_found: "没有找到相关文章。",
            },
        }
    }
}

struct Labels {
    what_happened: &'static str,
    why_it_matters: &'static str,
    how_it_relates: &'static str,
    published: &'static str,
    source: &'static str,
    unavailable: &'static str,
    nothing_found: &'static str,
}

/// Raw article as returned by the news provider, already filtered to ones with a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub source_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: Url,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// The three summary sections of a news item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSections {
    pub what_happened: String,
    pub why_it_matters: String,
    pub how_it_relates: String,
}

/// One summarized article. The source URL is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub category: String,
    pub headline: String,
    pub sections: ItemSections,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: Option<String>,
    pub url: Url,
    pub image_url: Option<String>,
}

impl NewsItem {
    pub fn from_article(category: &str, article: &Article, sections: ItemSections) -> Self {
        NewsItem {
            category: category.to_string(),
            headline: article.title.clone(),
            sections,
            published_at: article.published_at,
            source_name: article.source_name.clone(),
            url: article.url.clone(),
            image_url: article.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySection {
    pub category: String,
    pub items: Vec<NewsItem>,
}

/// Presenter output, grouped by category in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub sections: Vec<CategorySection>,
    /// Categories whose provider request failed
    pub unavailable: Vec<String>,
    pub language: Language,
}

impl Briefing {
    /// All items in reading order; `#n` references index into this (1-based).
    pub fn items(&self) -> impl Iterator<Item = &NewsItem> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    pub fn item(&self, number: usize) -> Option<&NewsItem> {
        number.checked_sub(1).and_then(|idx| self.items().nth(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.items.is_empty())
    }

    pub fn source_urls(&self) -> Vec<String> {
        self.items().map(|item| item.url.to_string()).collect()
    }

    pub fn to_markdown(&self) -> String {
        let labels = self.language.labels();
        let mut out = String::new();
        let mut number = 0;

        if self.is_empty() {
            out.push_str(labels.nothing_found);
            out.push('\n');
        }

        for section in self.sections.iter().filter(|s| !s.items.is_empty()) {
            let _ = writeln!(out, "# {}\n", section.category);
            for item in &section.items {
                number += 1;
                let _ = writeln!(out, "## {}. {}", number, item.headline);
                let _ = writeln!(out, "**{}:** {}  ", labels.what_happened, item.sections.what_happened);
                let _ = writeln!(out, "**{}:** {}  ", labels.why_it_matters, item.sections.why_it_matters);
                let _ = writeln!(out, "**{}:** {}  ", labels.how_it_relates, item.sections.how_it_relates);
                if let Some(published) = item.published_at {
                    let _ = writeln!(out, "{}: {}  ", labels.published, published.format("%B %-d, %Y"));
                }
                let source_name = item.source_name.as_deref().unwrap_or("Link");
                let _ = writeln!(out, "{}: [{}]({})", labels.source, source_name, item.url);
                if let Some(image) = &item.image_url {
                    let _ = writeln!(out, "\n![{}]({})", item.headline.replace(['[', ']'], ""), image);
                }
                out.push('\n');
            }
            out.push_str("---\n\n");
        }

        if !self.unavailable.is_empty() {
            let _ = writeln!(out, "_{}: {}_", labels.unavailable, self.unavailable.join(", "));
        }

        out.trim_end().to_string()
    }
}

/// What a follow-up question points at.
#[derive(Debug, Clone, PartialEq)]
pub enum ArticleRef {
    /// 1-based position in the last briefing (`#3`)
    Index(usize),
    Url(Url),
    None,
}

impl ArticleRef {
    /// `#n` wins over a pasted URL; a bare `#` or `#0` is ignored.
    pub fn parse(message: &str) -> Self {
        for token in message.split_whitespace() {
            if let Some(rest) = token.strip_prefix('#') {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(n) = digits.parse::<usize>() {
                    if n > 0 {
                        return ArticleRef::Index(n);
                    }
                }
            }
        }
        for token in message.split_whitespace() {
            let candidate = token.trim_matches(|c: char| {
                matches!(c, '(' | ')' | '[' | ']' | '<' | '>' | ',' | ';' | ':' | '.' | '?' | '!' | '"' | '\'')
            });
            if candidate.starts_with("http://") || candidate.starts_with("https://") {
                if let Ok(url) = Url::parse(candidate) {
                    return ArticleRef::Url(url);
                }
            }
        }
        ArticleRef::None
    }
}

/// Evaluator verdict on a QA result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Revise { feedback: String },
}

/// QA output, transient per follow-up question.
#[derive(Debug, Clone, PartialEq)]
pub struct QaResult {
    pub article: Option<NewsItem>,
    pub answer: String,
    /// Deduplicated, in first-use order
    pub sources: Vec<Url>,
    pub verdict: Verdict,
    pub revisions: usize,
}

impl QaResult {
    pub fn add_source(&mut self, url: Url) {
        if !self.sources.contains(&url) {
            self.sources.push(url);
        }
    }

    pub fn is_grounded(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Answer text followed by a numbered source list
    pub fn to_markdown(&self) -> String {
        let mut out = self.answer.trim_end().to_string();
        if !self.sources.is_empty() {
            out.push_str("\n\n**Sources**\n");
            for (i, url) in self.sources.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, url);
            }
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(category: &str, headline: &str, url: &str) -> NewsItem {
        NewsItem {
            category: category.to_string(),
            headline: headline.to_string(),
            sections: ItemSections {
                what_happened: "It happened.".into(),
                why_it_matters: "It matters.".into(),
                how_it_relates: "It relates.".into(),
            },
            published_at: Some(Utc.with_ymd_and_hms(2025, 7, 6, 12, 0, 0).unwrap()),
            source_name: Some("BBC News".into()),
            url: Url::parse(url).unwrap(),
            image_url: None,
        }
    }

    #[test]
    fn language_detection() {
        assert_eq!(Language::detect("Tell me today's news"), Language::English);
        assert_eq!(Language::detect("今天的新闻？"), Language::Chinese);
    }

    #[test]
    fn briefing_numbers_items_across_sections() {
        let briefing = Briefing {
            sections: vec![
                CategorySection {
                    category: "Business".into(),
                    items: vec![item("Business", "Rates hold", "https://bbc.com/a")],
                },
                CategorySection {
                    category: "Canada".into(),
                    items: vec![item("Canada", "Budget tabled", "https://cbc.ca/b")],
                },
            ],
            unavailable: vec!["Technology".into()],
            language: Language::English,
        };

        assert_eq!(briefing.item(2).map(|i| i.headline.as_str()), Some("Budget tabled"));
        assert!(briefing.item(0).is_none());
        assert!(briefing.item(3).is_none());

        let md = briefing.to_markdown();
        assert!(md.contains("# Business"));
        assert!(md.contains("## 2. Budget tabled"));
        assert!(md.contains("Source: [BBC News](https://bbc.com/a)"));
        assert!(md.contains("Published: July 6, 2025"));
        assert!(md.contains("Unavailable right now: Technology"));
    }

    #[test]
    fn empty_briefing_renders_nothing_found() {
        let briefing = Briefing {
            language: Language::Chinese,
            ..Default::default()
        };
        assert_eq!(briefing.to_markdown(), "没有找到相关文章。");
    }

    #[test]
    fn article_ref_parsing() {
        assert_eq!(ArticleRef::parse("tell me more about #3 please"), ArticleRef::Index(3));
        assert_eq!(ArticleRef::parse("what about #0"), ArticleRef::None);
        assert_eq!(
            ArticleRef::parse("explain (https://www.cbc.ca/news/story-1)."),
            ArticleRef::Url(Url::parse("https://www.cbc.ca/news/story-1").unwrap())
        );
        assert_eq!(ArticleRef::parse("why did tariffs rise?"), ArticleRef::None);
    }

    #[test]
    fn article_ref_strips_wrapping_punctuation() {
        let expected = ArticleRef::Url(Url::parse("https://www.cbc.ca/news/story-1").unwrap());
        for message in [
            "what does https://www.cbc.ca/news/story-1 say?",
            "see [https://www.cbc.ca/news/story-1];",
            "\"https://www.cbc.ca/news/story-1\"?",
            "summarize <https://www.cbc.ca/news/story-1>!",
        ] {
            assert_eq!(ArticleRef::parse(message), expected, "message: {}", message);
        }
    }

    #[test]
    fn qa_result_sources_are_deduplicated() {
        let mut result = QaResult {
            article: None,
            answer: "Answer.".into(),
            sources: Vec::new(),
            verdict: Verdict::Pass,
            revisions: 0,
        };
        assert!(!result.is_grounded());
        result.add_source(Url::parse("https://a.example/1").unwrap());
        result.add_source(Url::parse("https://a.example/1").unwrap());
        result.add_source(Url::parse("https://b.example/2").unwrap());
        assert_eq!(result.sources.len(), 2);
        let md = result.to_markdown();
        assert!(md.ends_with("2. https://b.example/2"));
    }
}
