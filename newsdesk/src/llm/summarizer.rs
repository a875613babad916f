// Summarizer module
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{info, warn};

use super::{parse_json_reply, ChatMessage, LlmProvider, LlmRequest};
use crate::types::{Article, ItemSections, Language};

/// Summarize a category's articles into the three sections, one LLM call per
/// category. Articles the model skipped or botched get an extractive summary,
/// so the output always has one entry per input article, in input order.
pub async fn summarize_category<P: LlmProvider + ?Sized>(
    provider: &P,
    category: &str,
    articles: &[Article],
    language: Language,
) -> Vec<ItemSections> {
    if articles.is_empty() {
        return Vec::new();
    }

    let request = LlmRequest::new(vec![
        ChatMessage::system(system_prompt(language)),
        ChatMessage::user(articles_prompt(category, articles)),
    ])
    .json()
    .with_temperature(0.5);

    let mut by_index: HashMap<usize, ItemSections> = HashMap::new();
    match provider.generate(request).await {
        Ok(response) => match parse_json_reply::<SummaryJson>(&response.content) {
            Ok(parsed) => {
                for entry in parsed.items {
                    if let Some((idx, sections)) = entry.into_sections() {
                        by_index.insert(idx, sections);
                    }
                }
                info!(
                    category,
                    summarized = by_index.len(),
                    articles = articles.len(),
                    tokens = response.usage.total_tokens,
                    "LLM summarization finished"
                );
            }
            Err(e) => warn!(category, "LLM summary was not valid JSON: {}", e),
        },
        Err(e) => warn!(category, "LLM summarization failed: {}, falling back to extractive summary", e),
    }

    articles
        .iter()
        .enumerate()
        .map(|(idx, article)| {
            by_index
                .remove(&idx)
                .unwrap_or_else(|| extractive_sections(article, language))
        })
        .collect()
}

fn system_prompt(language: Language) -> String {
    format!(
        r#"You are a news editor writing a daily briefing. For every article you receive, write three short sections:
- "what_happened": the facts, 1-2 sentences
- "why_it_matters": the significance, 1-2 sentences
- "how_it_relates": what it means for everyday readers like us, 1 sentence

Rules:
1. Use only the information given; do not invent facts, numbers or quotes.
2. No greetings, no closing remarks.
3. Write every section in {language}.

OUTPUT FORMAT (strict JSON):
{{"items": [{{"index": 0, "what_happened": "...", "why_it_matters": "...", "how_it_relates": "..."}}]}}"#,
        language = language.name()
    )
}

fn articles_prompt(category: &str, articles: &[Article]) -> String {
    let mut prompt = format!("Category: {}\n\n", category);
    for (idx, article) in articles.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", idx, article.title);
        if let Some(source) = &article.source_name {
            let _ = writeln!(prompt, "Source: {}", source);
        }
        if let Some(description) = &article.description {
            let _ = writeln!(prompt, "Description: {}", description);
        }
        if let Some(content) = &article.content {
            let _ = writeln!(prompt, "Content: {}", truncate(content, 1200));
        }
        prompt.push('\n');
    }
    prompt
}

/// Fallback extractive summary when the LLM fails
fn extractive_sections(article: &Article, language: Language) -> ItemSections {
    let text = [article.description.as_deref(), article.content.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    let sentences: Vec<&str> = text
        .split(['.', '!', '?', '。', '！', '？'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && !s.starts_with('[')) // NewsAPI "[+1234 chars]" tails
        .collect();

    let placeholder = match language {
        Language::English => "See the source article for details.",
        Language::Chinese => "详情请参阅原文。",
    };

    let sentence = |idx: usize| sentences.get(idx).map(|s| truncate(s, 300));

    ItemSections {
        what_happened: sentence(0).unwrap_or_else(|| truncate(&article.title, 300)),
        why_it_matters: sentence(1).unwrap_or_else(|| placeholder.to_string()),
        how_it_relates: sentence(2).unwrap_or_else(|| placeholder.to_string()),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

// Internal structure for parsing summary JSON
#[derive(Debug, Deserialize)]
struct SummaryJson {
    #[serde(default)]
    items: Vec<SummaryEntry>,
}

#[derive(Debug, Deserialize)]
struct SummaryEntry {
    index: usize,
    #[serde(default)]
    what_happened: String,
    #[serde(default)]
    why_it_matters: String,
    #[serde(default)]
    how_it_relates: String,
}

impl SummaryEntry {
    /// Entries with any empty section are discarded (the fallback covers them).
    fn into_sections(self) -> Option<(usize, ItemSections)> {
        let sections = ItemSections {
            what_happened: self.what_happened.trim().to_string(),
            why_it_matters: self.why_it_matters.trim().to_string(),
            how_it_relates: self.how_it_relates.trim().to_string(),
        };
        if sections.what_happened.is_empty()
            || sections.why_it_matters.is_empty()
            || sections.how_it_relates.is_empty()
        {
            return None;
        }
        Some((self.index, sections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn article(description: Option<&str>) -> Article {
        Article {
            source_name: Some("Reuters".into()),
            title: "EU imposes tariffs on Chinese EVs".into(),
            description: description.map(str::to_string),
            content: None,
            url: Url::parse("https://www.reuters.com/world/eu-tariffs").unwrap(),
            image_url: None,
            published_at: None,
        }
    }

    #[test]
    fn test_extractive_sections() {
        let a = article(Some(
            "The EU enacted provisional tariffs. China threatened retaliation. Trade tensions escalate. Extra.",
        ));
        let sections = extractive_sections(&a, Language::English);
        assert_eq!(sections.what_happened, "The EU enacted provisional tariffs");
        assert_eq!(sections.why_it_matters, "China threatened retaliation");
        assert_eq!(sections.how_it_relates, "Trade tensions escalate");
    }

    #[test]
    fn test_extractive_sections_without_description() {
        let sections = extractive_sections(&article(None), Language::Chinese);
        assert_eq!(sections.what_happened, "EU imposes tariffs on Chinese EVs");
        assert_eq!(sections.why_it_matters, "详情请参阅原文。");
    }

    #[test]
    fn test_truncation() {
        let long_sentence = "a".repeat(400);
        let truncated = truncate(&long_sentence, 300);
        assert_eq!(truncated.chars().count(), 300);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn entries_with_empty_sections_are_dropped() {
        let entry = SummaryEntry {
            index: 1,
            what_happened: "x".into(),
            why_it_matters: " ".into(),
            how_it_relates: "z".into(),
        };
        assert!(entry.into_sections().is_none());
    }
}
