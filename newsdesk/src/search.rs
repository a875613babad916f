use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::ingestion::send_with_retry;

/// A news search hit. Only `news_result` entries survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub age: Option<String>,
}

/// General web/news search used by the QA agent
#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, count: u32) -> Result<Vec<SearchResult>>;
}

/// Brave news search client
pub struct BraveSearchClient {
    base_url: String,
    api_key: String,
    search_lang: String,
    client: Client,
}

impl BraveSearchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            search_lang: "en".to_string(),
            client,
        })
    }

    pub fn with_search_lang(mut self, lang: impl Into<String>) -> Self {
        self.search_lang = lang.into();
        self
    }
}

#[async_trait::async_trait]
impl WebSearch for BraveSearchClient {
    async fn search(&self, query: &str, count: u32) -> Result<Vec<SearchResult>> {
        let params = [
            ("q", query.to_string()),
            ("count", count.to_string()),
            ("offset", "0".to_string()),
            ("search_lang", self.search_lang.clone()),
        ];

        let response = send_with_retry(
            || {
                self.client
                    .get(&self.base_url)
                    .header("Accept", "application/json")
                    .header("X-Subscription-Token", &self.api_key)
                    .query(&params)
            },
            &self.base_url,
        )
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("search provider error {}: {}", status, body);
        }

        let body: BraveResponse = response
            .json()
            .await
            .context("Failed to parse search provider response")?;

        let received = body.results.len();
        let results: Vec<SearchResult> = body
            .results
            .into_iter()
            .filter(|r| r.kind.as_deref() == Some("news_result"))
            .filter_map(|r| {
                Some(SearchResult {
                    title: r.title?,
                    url: r.url?,
                    description: r.description,
                    source: r.meta_url.and_then(|m| m.hostname),
                    age: r.age,
                })
            })
            .collect();

        info!(query = %query, received, kept = results.len(), "search completed");
        Ok(results)
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
    age: Option<String>,
    meta_url: Option<BraveMetaUrl>,
}

#[derive(Debug, Deserialize)]
struct BraveMetaUrl {
    hostname: Option<String>,
}
