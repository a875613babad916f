use anyhow::Result;
use chrono::Utc;
use common::{CategoryConfig, Config};
use std::sync::Arc;
use tracing::{info, warn};

use crate::ingestion::{NewsQuery, NewsSource};
use crate::llm::summarizer::summarize_category;
use crate::llm::LlmProvider;
use crate::router::NewsRequest;
use crate::types::{Briefing, CategorySection, Language, NewsItem, Progress};

#[derive(Debug, Clone)]
pub struct PresenterSettings {
    pub categories: Vec<CategoryConfig>,
    pub items_per_category: usize,
    pub topic_lookback_days: i64,
    pub topic_page_size: u32,
}

impl PresenterSettings {
    pub fn from_config(config: &Config) -> Self {
        let presenter = config.presenter.clone().unwrap_or_default();
        PresenterSettings {
            categories: config.categories(),
            // At least one item, or a category with articles could come back empty
            items_per_category: presenter.items_per_category.unwrap_or(2).max(1),
            topic_lookback_days: presenter.topic_lookback_days.unwrap_or(5),
            topic_page_size: presenter.topic_page_size.unwrap_or(4).max(1),
        }
    }
}

/// Fetches news per category and summarizes it into a briefing
pub struct Presenter {
    news: Arc<dyn NewsSource>,
    llm: Arc<dyn LlmProvider>,
    settings: PresenterSettings,
}

impl Presenter {
    pub fn new(news: Arc<dyn NewsSource>, llm: Arc<dyn LlmProvider>, settings: PresenterSettings) -> Self {
        Self { news, llm, settings }
    }

    pub fn settings(&self) -> &PresenterSettings {
        &self.settings
    }

    /// Categories are processed one after another, in configuration order.
    pub async fn present(
        &self,
        request: &NewsRequest,
        language: Language,
        progress: &Progress,
    ) -> Result<Briefing> {
        let today = Utc::now().date_naive();
        let plan: Vec<(String, NewsQuery, usize)> = match request {
            NewsRequest::Today => self
                .settings
                .categories
                .iter()
                .map(|cfg| {
                    (
                        cfg.name.clone(),
                        NewsQuery::from_category(cfg, today),
                        self.settings.items_per_category,
                    )
                })
                .collect(),
            NewsRequest::Topic(topic) => vec![(
                topic.clone(),
                NewsQuery::topic(
                    topic,
                    self.settings.topic_lookback_days,
                    self.settings.topic_page_size,
                    today,
                ),
                self.settings.topic_page_size as usize,
            )],
        };

        let mut briefing = Briefing {
            language,
            ..Default::default()
        };

        for (category, query, limit) in &plan {
            progress.report(format!("Fetching {}...", category));
            let articles = match self.news.fetch(query).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!(category = %category, "presenter: news fetch failed: {:#}", e);
                    briefing.unavailable.push(category.clone());
                    continue;
                }
            };

            let selected: Vec<_> = articles.into_iter().take(*limit).collect();
            if selected.is_empty() {
                info!(category = %category, "presenter: no articles available");
                continue;
            }

            progress.report(format!("Summarizing {}...", category));
            let sections = summarize_category(self.llm.as_ref(), category, &selected, language).await;
            let items: Vec<NewsItem> = selected
                .iter()
                .zip(sections)
                .map(|(article, sections)| NewsItem::from_article(category, article, sections))
                .collect();

            info!(category = %category, items = items.len(), "presenter: category ready");
            briefing.sections.push(CategorySection {
                category: category.clone(),
                items,
            });
        }

        if !plan.is_empty() && briefing.unavailable.len() == plan.len() {
            anyhow::bail!("news provider unavailable for every category: {}", briefing.unavailable.join(", "));
        }

        Ok(briefing)
    }
}
