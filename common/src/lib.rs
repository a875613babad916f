/*!
common/src/lib.rs

Shared configuration types and helpers for Newsdesk.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default config file with an override file
- Per-role LLM endpoint resolution and secret lookup from the environment
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_NEWS_API_URL: &str = "https://newsapi.org/v2";
pub const DEFAULT_SEARCH_API_URL: &str = "https://api.search.brave.com/res/v1/news/search";

/// Remote LLM endpoint config. Every field is optional so a role block only
/// needs to carry what differs from the shared `[llm.remote]` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl RemoteLlmConfig {
    /// Field-wise merge: values set on `self` win over `fallback`.
    fn or(&self, fallback: &RemoteLlmConfig) -> RemoteLlmConfig {
        RemoteLlmConfig {
            api_url: self.api_url.clone().or_else(|| fallback.api_url.clone()),
            api_key_env: self.api_key_env.clone().or_else(|| fallback.api_key_env.clone()),
            model: self.model.clone().or_else(|| fallback.model.clone()),
            timeout_seconds: self.timeout_seconds.or(fallback.timeout_seconds),
            max_tokens: self.max_tokens.or(fallback.max_tokens),
            temperature: self.temperature.or(fallback.temperature),
        }
    }
}

/// The four model roles of the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    Router,
    Presenter,
    Qa,
    Evaluator,
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmRole::Router => "router",
            LlmRole::Presenter => "presenter",
            LlmRole::Qa => "qa",
            LlmRole::Evaluator => "evaluator",
        };
        f.write_str(name)
    }
}

/// LLM top-level config: a shared remote block plus role-specific overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub remote: Option<RemoteLlmConfig>,
    pub router: Option<RemoteLlmConfig>,
    pub presenter: Option<RemoteLlmConfig>,
    pub qa: Option<RemoteLlmConfig>,
    pub evaluator: Option<RemoteLlmConfig>,
}

impl LlmConfig {
    /// Resolve the endpoint for a role, falling back to `[llm.remote]` per field.
    pub fn for_role(&self, role: LlmRole) -> RemoteLlmConfig {
        let shared = self.remote.clone().unwrap_or_default();
        let specific = match role {
            LlmRole::Router => self.router.as_ref(),
            LlmRole::Presenter => self.presenter.as_ref(),
            LlmRole::Qa => self.qa.as_ref(),
            LlmRole::Evaluator => self.evaluator.as_ref(),
        };
        match specific {
            Some(cfg) => cfg.or(&shared),
            None => shared,
        }
    }
}

/// NewsAPI endpoint a category is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NewsEndpoint {
    TopHeadlines,
    Everything,
}

impl NewsEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            NewsEndpoint::TopHeadlines => "top-headlines",
            NewsEndpoint::Everything => "everything",
        }
    }
}

/// One briefing category and the provider query that fills it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub endpoint: NewsEndpoint,
    pub country: Option<String>,
    /// Provider-side category (business, technology, ...)
    pub category: Option<String>,
    /// Comma-separated provider source ids (e.g. "cbc-news")
    pub sources: Option<String>,
    pub query: Option<String>,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub page_size: Option<u32>,
    /// Only articles published within this many days (`everything` only)
    pub lookback_days: Option<i64>,
}

impl CategoryConfig {
    fn top_headlines(name: &str) -> Self {
        CategoryConfig {
            name: name.to_string(),
            endpoint: NewsEndpoint::TopHeadlines,
            country: None,
            category: None,
            sources: None,
            query: None,
            language: None,
            sort_by: None,
            page_size: Some(3),
            lookback_days: None,
        }
    }
}

/// The default briefing: Top Headlines, Business, Technology, Canada.
pub fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig {
            country: Some("us".to_string()),
            page_size: Some(5),
            ..CategoryConfig::top_headlines("Top Headlines")
        },
        CategoryConfig {
            category: Some("business".to_string()),
            ..CategoryConfig::top_headlines("Business")
        },
        CategoryConfig {
            category: Some("technology".to_string()),
            language: Some("en".to_string()),
            ..CategoryConfig::top_headlines("Technology")
        },
        CategoryConfig {
            sources: Some("cbc-news".to_string()),
            ..CategoryConfig::top_headlines("Canada")
        },
    ]
}

/// News provider (NewsAPI v2) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

/// Web search provider (Brave news search) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub count: Option<u32>,
    pub search_lang: Option<String>,
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    /// Extracted page text is cut to this many characters before reaching the LLM
    pub max_page_chars: Option<usize>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenterConfig {
    pub items_per_category: Option<usize>,
    pub topic_lookback_days: Option<i64>,
    pub topic_page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaConfig {
    pub paywalled_domains: Option<Vec<String>>,
    pub max_revisions: Option<usize>,
    pub max_tool_rounds: Option<usize>,
    pub links_per_search: Option<usize>,
    pub llm_plan_review: Option<bool>,
}

/// HTTP server bind settings, merged into Rocket's figment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    pub history_turns: Option<usize>,
    /// Conversations unused for this long are dropped
    pub idle_minutes: Option<i64>,
    pub max_sessions: Option<usize>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    pub news: Option<NewsConfig>,
    pub search: Option<SearchConfig>,
    pub politeness: Option<PolitenessConfig>,
    pub presenter: Option<PresenterConfig>,
    pub qa: Option<QaConfig>,
    pub chat: Option<ChatConfig>,
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for (label, path) in [("default", default_path), ("override", override_path)] {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {} config: {}", label, path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse {} configuration", label))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject endpoint URLs that do not parse, before any request is attempted.
    pub fn validate(&self) -> Result<()> {
        let roles = [LlmRole::Router, LlmRole::Presenter, LlmRole::Qa, LlmRole::Evaluator];
        for role in roles {
            if let Some(api_url) = self.llm.for_role(role).api_url {
                url::Url::parse(&api_url)
                    .with_context(|| format!("Invalid llm api_url for role {}: {}", role, api_url))?;
            }
        }
        if let Some(api_url) = self.news.as_ref().and_then(|n| n.api_url.as_ref()) {
            url::Url::parse(api_url).with_context(|| format!("Invalid news api_url: {}", api_url))?;
        }
        if let Some(api_url) = self.search.as_ref().and_then(|s| s.api_url.as_ref()) {
            url::Url::parse(api_url).with_context(|| format!("Invalid search api_url: {}", api_url))?;
        }
        Ok(())
    }

    /// Briefing categories, falling back to the built-in four.
    pub fn categories(&self) -> Vec<CategoryConfig> {
        match &self.news {
            Some(news) if !news.categories.is_empty() => news.categories.clone(),
            _ => default_categories(),
        }
    }

    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.politeness
            .as_ref()
            .and_then(|p| p.fetch_timeout_seconds)
            .unwrap_or(10)
    }

    pub fn history_turns(&self) -> usize {
        self.chat.as_ref().and_then(|c| c.history_turns).unwrap_or(20)
    }

    /// Clamped to one minute .. one year.
    pub fn session_idle_minutes(&self) -> i64 {
        self.chat
            .as_ref()
            .and_then(|c| c.idle_minutes)
            .unwrap_or(60)
            .clamp(1, 525_600)
    }

    pub fn max_sessions(&self) -> usize {
        self.chat.as_ref().and_then(|c| c.max_sessions).unwrap_or(1000).max(1)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Read a secret from the environment variable named in the config.
pub fn read_secret(env_name: &str) -> Result<String> {
    let value = std::env::var(env_name)
        .with_context(|| format!("API key env var '{}' not set", env_name))?;
    if value.trim().is_empty() {
        anyhow::bail!("API key env var '{}' is empty", env_name);
    }
    Ok(value)
}

/// Short, log-safe preview of a secret ("sk-proj-...").
pub fn secret_preview(secret: &str) -> String {
    let head: String = secret.chars().take(8).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_from_string_with_role_override() {
        let toml = r#"
            [llm.remote]
            api_url = "https://api.openai.com/v1/chat/completions"
            api_key_env = "OPENAI_API_KEY"
            model = "gpt-4o-mini"
            timeout_seconds = 30

            [llm.qa]
            model = "gpt-4.1-mini"
            timeout_seconds = 60

            [[news.categories]]
            name = "AI"
            endpoint = "everything"
            query = "artificial intelligence"
            sort_by = "publishedAt"
            page_size = 3
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");

        let qa = cfg.llm.for_role(LlmRole::Qa);
        assert_eq!(qa.model.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(qa.timeout_seconds, Some(60));
        assert_eq!(qa.api_key_env.as_deref(), Some("OPENAI_API_KEY"));

        let router = cfg.llm.for_role(LlmRole::Router);
        assert_eq!(router.model.as_deref(), Some("gpt-4o-mini"));

        let categories = cfg.categories();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].endpoint, NewsEndpoint::Everything);
        assert_eq!(categories[0].endpoint.path(), "everything");
    }

    #[test]
    fn empty_config_uses_default_categories() {
        let cfg: Config = toml::from_str("").expect("parse empty config");
        let names: Vec<String> = cfg.categories().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Top Headlines", "Business", "Technology", "Canada"]);
        assert_eq!(cfg.fetch_timeout_seconds(), 10);
        assert_eq!(cfg.history_turns(), 20);
        assert_eq!(cfg.session_idle_minutes(), 60);
        assert_eq!(cfg.max_sessions(), 1000);
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        let mut f = std::fs::File::create(&default_path).expect("create default");
        writeln!(
            f,
            "[llm.remote]\nmodel = \"gpt-4o-mini\"\ntimeout_seconds = 30\n\n[qa]\nmax_revisions = 2"
        )
        .expect("write default");

        let mut f = std::fs::File::create(&override_path).expect("create override");
        writeln!(f, "[llm.remote]\nmodel = \"llama3\"").expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");

        let remote = cfg.llm.remote.expect("remote block");
        assert_eq!(remote.model.as_deref(), Some("llama3"));
        assert_eq!(remote.timeout_seconds, Some(30));
        assert_eq!(cfg.qa.and_then(|q| q.max_revisions), Some(2));
    }

    #[tokio::test]
    async fn missing_files_yield_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let cfg = Config::load_with_defaults(Some(&missing), None)
            .await
            .expect("load config");
        assert!(cfg.news.is_none());
        assert_eq!(cfg.categories().len(), 4);
    }

    #[test]
    fn session_limits_are_clamped() {
        let cfg: Config = toml::from_str("[chat]\nidle_minutes = 0\nmax_sessions = 0").expect("parse");
        assert_eq!(cfg.session_idle_minutes(), 1);
        assert_eq!(cfg.max_sessions(), 1);
    }

    #[test]
    fn invalid_api_url_is_rejected() {
        let cfg: Config = toml::from_str("[news]\napi_url = \"not a url\"").expect("parse");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid news api_url"));
    }

    #[test]
    fn secret_preview_truncates() {
        assert_eq!(secret_preview("sk-abcdefghijklmnop"), "sk-abcde...");
        assert_eq!(secret_preview("abc"), "abc...");
    }
}
