use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use std::io::Cursor;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Browser-like user agent; several news sites block obvious bots.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";

/// Extracted readable content of a web page
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub url: Url,
    pub title: String,
    pub text: String,
}

impl PageContent {
    /// Text block handed to the LLM as a tool result
    pub fn to_prompt_block(&self) -> String {
        format!("Webpage Title:\n{}\nWebpage Contents:\n{}\n\n", self.title, self.text)
    }
}

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &Url) -> Result<PageContent>;
}

/// Fetches pages over HTTP and extracts the main article text.
pub struct WebPageFetcher {
    client: Client,
    max_chars: usize,
}

impl WebPageFetcher {
    pub fn new(timeout_secs: u64, user_agent: Option<&str>, max_chars: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent.unwrap_or(BROWSER_USER_AGENT))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, max_chars })
    }
}

#[async_trait::async_trait]
impl PageFetcher for WebPageFetcher {
    async fn fetch_page(&self, url: &Url) -> Result<PageContent> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .context("failed to fetch article page")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
        }

        // Readability requires a Reader, so we fetch bytes
        let bytes = response.bytes().await.context("failed to read response body")?;
        let mut page = extract_page(&bytes, url);
        page.text = truncate_chars(&page.text, self.max_chars);
        Ok(page)
    }
}

/// Readability first, then `<article>`/`<main>`/paragraph heuristics.
pub fn extract_page(bytes: &[u8], url: &Url) -> PageContent {
    let html = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&html);
    let fallback_title = document_title(&document);

    let mut reader = Cursor::new(bytes);
    if let Ok(product) = readability::extractor::extract(&mut reader, url) {
        let text = match html2text::from_read(product.content.as_bytes(), 100) {
            Ok(markdown) => markdown,
            Err(e) => {
                warn!("scraping: failed to convert extracted HTML to text: {}", e);
                product.text
            }
        };
        if !text.trim().is_empty() {
            info!("scraping: readability extracted {} chars from {}", text.len(), url);
            let title = if product.title.trim().is_empty() {
                fallback_title
            } else {
                product.title.trim().to_string()
            };
            return PageContent {
                url: url.clone(),
                title,
                text: text.trim().to_string(),
            };
        }
    }

    warn!("scraping: readability found nothing for {}, trying selectors", url);
    PageContent {
        url: url.clone(),
        title: fallback_title,
        text: selector_text(&document),
    }
}

fn document_title(document: &Html) -> String {
    Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title found".to_string())
}

fn selector_text(document: &Html) -> String {
    let selectors = ["article", "main", ".post-content", ".entry-content", "#content"];

    for selector_str in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                if let Ok(text) = html2text::from_read(element.html().as_bytes(), 100) {
                    if !text.trim().is_empty() {
                        return text.trim().to_string();
                    }
                }
            }
        }
    }

    // Fallback: just get all paragraphs
    let mut paragraphs = Vec::new();
    if let Ok(p_selector) = Selector::parse("p") {
        for element in document.select(&p_selector) {
            let text = element.text().collect::<String>();
            let text = text.trim();
            if !text.is_empty() {
                paragraphs.push(text.to_string());
            }
        }
    }
    paragraphs.join("\n")
}

/// Cut on a char boundary, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[...truncated]", &text[..idx]),
        None => text.to_string(),
    }
}
