use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use common::{CategoryConfig, NewsEndpoint};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::types::Article;

/// Source of news articles for the presenter
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch(&self, query: &NewsQuery) -> Result<Vec<Article>>;
}

/// One provider query, built from a category or a custom topic.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsQuery {
    pub endpoint: NewsEndpoint,
    pub country: Option<String>,
    pub category: Option<String>,
    pub sources: Option<String>,
    pub query: Option<String>,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub page_size: u32,
    pub from: Option<NaiveDate>,
}

impl NewsQuery {
    pub fn from_category(cfg: &CategoryConfig, today: NaiveDate) -> Self {
        NewsQuery {
            endpoint: cfg.endpoint,
            country: cfg.country.clone(),
            category: cfg.category.clone(),
            sources: cfg.sources.clone(),
            query: cfg.query.clone(),
            language: cfg.language.clone(),
            sort_by: cfg.sort_by.clone(),
            page_size: cfg.page_size.unwrap_or(3),
            from: cfg
                .lookback_days
                .map(|days| today - ChronoDuration::days(days)),
        }
    }

    /// Custom topic search: `everything`, most popular first, recent window.
    pub fn topic(topic: &str, lookback_days: i64, page_size: u32, today: NaiveDate) -> Self {
        NewsQuery {
            endpoint: NewsEndpoint::Everything,
            country: None,
            category: None,
            sources: None,
            query: Some(topic.to_string()),
            language: Some("en".to_string()),
            sort_by: Some("popularity".to_string()),
            page_size,
            from: Some(today - ChronoDuration::days(lookback_days)),
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        let optional = [
            ("country", &self.country),
            ("category", &self.category),
            ("sources", &self.sources),
            ("q", &self.query),
            ("language", &self.language),
            ("sortBy", &self.sort_by),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.push((key, value.clone()));
            }
        }
        if let Some(from) = self.from {
            params.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        params.push(("pageSize", self.page_size.to_string()));
        params
    }
}

/// NewsAPI v2 client (`/top-headlines` and `/everything`)
pub struct NewsApiClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl NewsApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Newsdesk/0.1.0")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl NewsSource for NewsApiClient {
    async fn fetch(&self, query: &NewsQuery) -> Result<Vec<Article>> {
        let url = format!("{}/{}", self.base_url, query.endpoint.path());
        let params = query.params();

        let response = send_with_retry(
            || {
                self.client
                    .get(&url)
                    .header("X-Api-Key", &self.api_key)
                    .query(&params)
            },
            &url,
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<NewsApiResponse>(&body)
                .ok()
                .and_then(|r| match (r.code, r.message) {
                    (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
                    (_, message) => message,
                })
                .unwrap_or(body);
            anyhow::bail!("news provider error {}: {}", status, message);
        }

        let body: NewsApiResponse = response
            .json()
            .await
            .context("Failed to parse news provider response")?;

        if body.status != "ok" {
            anyhow::bail!(
                "news provider returned status '{}': {}",
                body.status,
                body.message.unwrap_or_default()
            );
        }

        let total = body.articles.len();
        let articles: Vec<Article> = body.articles.into_iter().filter_map(convert_article).collect();
        info!(endpoint = query.endpoint.path(), received = total, kept = articles.len(), "news fetched");
        Ok(articles)
    }
}

/// Drops articles without a usable URL and NewsAPI's "[Removed]" placeholders.
fn convert_article(raw: NewsApiArticle) -> Option<Article> {
    let title = raw.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
    if title == "[Removed]" {
        debug!("Skipping removed article");
        return None;
    }
    let url = match raw.url.as_deref().map(Url::parse) {
        Some(Ok(url)) => url,
        _ => {
            debug!("Skipping article without URL: {:?}", title);
            return None;
        }
    };
    let published_at = raw
        .published_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    Some(Article {
        source_name: raw.source.and_then(|s| s.name),
        title,
        description: raw.description.filter(|d| !d.trim().is_empty()),
        content: raw.content.filter(|c| !c.trim().is_empty()),
        url,
        image_url: raw.url_to_image.filter(|u| u.starts_with("http")),
        published_at,
    })
}

/// Sends a GET built by `build`, retrying 5xx, 429 and network errors with
/// exponential backoff. Other statuses are returned to the caller as-is.
pub async fn send_with_retry<F>(build: F, label: &str) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_retries = 3;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
            info!("Retrying request to {} (attempt {}/{}) after {:?}...", label, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                    continue; // Retry
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                    continue; // Retry
                }
                return Ok(response);
            }
            Err(e) => {
                // Network error - retry
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("unknown error after retries"))
        .context(format!("request to {} failed after {} attempts", label, max_retries)))
}

// NewsAPI response structures
#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    source: Option<NewsApiSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 6).unwrap()
    }

    #[test]
    fn category_query_params() {
        let cfg = CategoryConfig {
            name: "China".into(),
            endpoint: NewsEndpoint::Everything,
            country: None,
            category: None,
            sources: None,
            query: Some("China".into()),
            language: Some("en".into()),
            sort_by: Some("popularity".into()),
            page_size: Some(4),
            lookback_days: Some(2),
        };
        let query = NewsQuery::from_category(&cfg, today());
        let params = query.params();
        assert!(params.contains(&("q", "China".to_string())));
        assert!(params.contains(&("from", "2025-07-04".to_string())));
        assert!(params.contains(&("pageSize", "4".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "country"));
    }

    #[test]
    fn topic_query_uses_everything_endpoint() {
        let query = NewsQuery::topic("climate change", 5, 4, today());
        assert_eq!(query.endpoint, NewsEndpoint::Everything);
        assert_eq!(query.from, NaiveDate::from_ymd_opt(2025, 7, 1));
        assert_eq!(query.sort_by.as_deref(), Some("popularity"));
    }

    #[test]
    fn convert_filters_removed_and_urlless_articles() {
        let removed = NewsApiArticle {
            source: None,
            title: Some("[Removed]".into()),
            description: None,
            url: Some("https://removed.com".into()),
            url_to_image: None,
            published_at: None,
            content: None,
        };
        assert!(convert_article(removed).is_none());

        let no_url = NewsApiArticle {
            source: None,
            title: Some("Headline".into()),
            description: None,
            url: None,
            url_to_image: None,
            published_at: None,
            content: None,
        };
        assert!(convert_article(no_url).is_none());

        let ok = NewsApiArticle {
            source: Some(NewsApiSource { name: Some("CBC News".into()) }),
            title: Some(" Budget tabled ".into()),
            description: Some("".into()),
            url: Some("https://www.cbc.ca/news/budget".into()),
            url_to_image: Some("https://i.cbc.ca/budget.jpg".into()),
            published_at: Some("2025-07-06T10:00:00Z".into()),
            content: Some("Full text".into()),
        };
        let article = convert_article(ok).expect("converted");
        assert_eq!(article.title, "Budget tabled");
        assert!(article.description.is_none());
        assert_eq!(article.source_name.as_deref(), Some("CBC News"));
        assert!(article.published_at.is_some());
    }
}
