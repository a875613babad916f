//! Follow-up question answering with two tools: read a page, or search for
//! articles and read the best of them.

use anyhow::{Context, Result};
use chrono::Utc;
use common::Config;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::evaluator::{Evaluator, DEFAULT_PAYWALLED_DOMAINS};
use crate::llm::{parse_json_reply, ChatMessage, LlmProvider, LlmRequest, ToolCall, ToolChoice, ToolSpec};
use crate::scraping::PageFetcher;
use crate::search::{SearchResult, WebSearch};
use crate::types::{ArticleRef, Briefing, Language, NewsItem, Progress, QaResult, Verdict};

pub const VISIT_WEBSITE_TOOL: &str = "visit_website";
pub const FIND_ARTICLES_TOOL: &str = "find_internet_articles";

#[derive(Debug, Clone)]
pub struct QaSettings {
    pub paywalled_domains: Vec<String>,
    pub max_revisions: usize,
    pub max_tool_rounds: usize,
    pub links_per_search: usize,
    pub search_count: u32,
    pub llm_plan_review: bool,
}

impl Default for QaSettings {
    fn default() -> Self {
        QaSettings {
            paywalled_domains: DEFAULT_PAYWALLED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            max_revisions: 2,
            max_tool_rounds: 3,
            links_per_search: 3,
            search_count: 8,
            llm_plan_review: true,
        }
    }
}

impl QaSettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = QaSettings::default();
        let qa = config.qa.clone().unwrap_or_default();
        let search = config.search.clone().unwrap_or_default();
        QaSettings {
            paywalled_domains: qa.paywalled_domains.unwrap_or(defaults.paywalled_domains),
            max_revisions: qa.max_revisions.unwrap_or(defaults.max_revisions),
            max_tool_rounds: qa.max_tool_rounds.unwrap_or(defaults.max_tool_rounds).max(1),
            links_per_search: qa.links_per_search.unwrap_or(defaults.links_per_search).max(1),
            search_count: search.count.unwrap_or(defaults.search_count).max(1),
            llm_plan_review: qa.llm_plan_review.unwrap_or(defaults.llm_plan_review),
        }
    }
}

/// Everything the agent knows about the conversation when a question arrives
pub struct QaContext<'a> {
    pub message: &'a str,
    pub history: &'a [ChatMessage],
    pub briefing: Option<&'a Briefing>,
    pub language: Language,
}

pub struct QaAgent {
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn WebSearch>,
    pages: Arc<dyn PageFetcher>,
    evaluator: Arc<Evaluator>,
    settings: QaSettings,
}

impl QaAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn WebSearch>,
        pages: Arc<dyn PageFetcher>,
        evaluator: Arc<Evaluator>,
        settings: QaSettings,
    ) -> Self {
        Self {
            llm,
            search,
            pages,
            evaluator,
            settings,
        }
    }

    pub fn settings(&self) -> &QaSettings {
        &self.settings
    }

    /// One attempt at an answer. `feedback` carries the evaluator's reason for
    /// rejecting the previous attempt; with it the model must use a tool.
    pub async fn answer(&self, ctx: &QaContext<'_>, feedback: Option<&str>, progress: &Progress) -> Result<QaResult> {
        let article = resolve_article(ctx);
        let mut result = QaResult {
            article: article.as_ref().and_then(|r| r.item.clone()),
            answer: String::new(),
            sources: Vec::new(),
            verdict: Verdict::Pass,
            revisions: 0,
        };

        let mut question = ctx.message.to_string();
        if let Some(target) = &article {
            question.push_str(&self.original_article_block(target, &mut result, progress).await);
        }

        let mut messages = vec![ChatMessage::system(self.system_prompt(ctx))];
        messages.extend(ctx.history.iter().cloned());
        messages.push(ChatMessage::user(question));
        if let Some(feedback) = feedback {
            messages.push(ChatMessage::user(format!(
                "A reviewer rejected your previous answer: {}\nUse the tools, then answer again.",
                feedback
            )));
        }

        let mut choice = if feedback.is_some() {
            ToolChoice::Required
        } else {
            ToolChoice::Auto
        };

        for round in 0..self.settings.max_tool_rounds {
            let response = self
                .llm
                .generate(LlmRequest::new(messages.clone()).with_tools(tool_specs(), choice))
                .await
                .context("QA model call failed")?;

            if response.tool_calls.is_empty() {
                result.answer = response.content;
                return Ok(result);
            }

            let (content, calls) = self
                .reviewed_plan(ctx.message, &messages, response.content, response.tool_calls, choice, progress)
                .await?;
            if calls.is_empty() {
                result.answer = content.unwrap_or_default();
                return Ok(result);
            }

            info!(round, calls = calls.len(), model = self.llm.model(), "qa: running tool calls");
            messages.push(ChatMessage::assistant_tool_calls(content, calls.clone()));
            for call in &calls {
                let output = self.run_tool(call, &mut result, progress).await;
                messages.push(ChatMessage::tool_result(&call.id, output));
            }
            choice = ToolChoice::Auto;
        }

        debug!("qa: tool rounds exhausted, asking for the final answer");
        messages.push(ChatMessage::user(
            "Answer the question now using the information gathered above.",
        ));
        let response = self
            .llm
            .generate(LlmRequest::new(messages))
            .await
            .context("QA model call failed")?;
        result.answer = response.content;
        Ok(result)
    }

    /// Runs the evaluator over a tool plan; a rejected plan is re-asked once
    /// with the feedback. Returns the (content, calls) to act on.
    async fn reviewed_plan(
        &self,
        question: &str,
        messages: &[ChatMessage],
        content: String,
        calls: Vec<ToolCall>,
        choice: ToolChoice,
        progress: &Progress,
    ) -> Result<(Option<String>, Vec<ToolCall>)> {
        let feedback = match self.evaluator.review_plan(question, &calls).await {
            Verdict::Pass => return Ok((non_empty(content), calls)),
            Verdict::Revise { feedback } => feedback,
        };

        progress.report("Adjusting the research plan...");
        let mut retry = messages.to_vec();
        retry.push(ChatMessage::user(format!(
            "Your planned tool calls were rejected: {}\nPlan your tool calls again.",
            feedback
        )));
        let response = self
            .llm
            .generate(LlmRequest::new(retry).with_tools(tool_specs(), choice))
            .await
            .context("QA model call failed")?;
        Ok((non_empty(response.content), response.tool_calls))
    }

    async fn run_tool(&self, call: &ToolCall, result: &mut QaResult, progress: &Progress) -> String {
        match call.name.as_str() {
            VISIT_WEBSITE_TOOL => match call.parse_arguments::<VisitArgs>() {
                Ok(args) => match Url::parse(args.url.trim()) {
                    Ok(url) => {
                        progress.report(format!("Reading {}...", url.host_str().unwrap_or("page")));
                        self.visit(&url, result).await
                    }
                    Err(_) => format!("'{}' is not a valid URL.", args.url),
                },
                Err(e) => e.to_string(),
            },
            FIND_ARTICLES_TOOL => match call.parse_arguments::<FindArgs>() {
                Ok(args) => {
                    progress.report(format!("Searching for \"{}\"...", args.query));
                    self.find_articles(&args.query, result).await
                }
                Err(e) => e.to_string(),
            },
            other => {
                warn!(tool = %other, "qa: model requested unknown tool");
                format!("Unknown tool '{}'.", other)
            }
        }
    }

    /// Scrape one page; failures become text for the model, not errors.
    async fn visit(&self, url: &Url, result: &mut QaResult) -> String {
        if self.evaluator.is_paywalled(url) {
            return format!(
                "{} is a paywalled source and was not fetched. Use {} instead.",
                url, FIND_ARTICLES_TOOL
            );
        }
        match self.pages.fetch_page(url).await {
            Ok(page) => {
                result.add_source(url.clone());
                page.to_prompt_block()
            }
            Err(e) => {
                warn!(url = %url, "qa: page fetch failed: {:#}", e);
                unfetchable(url)
            }
        }
    }

    async fn find_articles(&self, query: &str, result: &mut QaResult) -> String {
        let hits = match self.search.search(query, self.settings.search_count).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query = %query, "qa: search failed: {:#}", e);
                return format!("The search for \"{}\" failed.", query);
            }
        };

        let open: Vec<(SearchResult, Url)> = hits
            .into_iter()
            .filter_map(|hit| Url::parse(&hit.url).ok().map(|url| (hit, url)))
            .filter(|(_, url)| !self.evaluator.is_paywalled(url))
            .collect();
        if open.is_empty() {
            return format!("No news articles were found for \"{}\".", query);
        }

        let picked = self.pick_links(query, &open).await;
        let mut output = String::new();
        for url in picked {
            let _ = writeln!(output, "Source: {}", url);
            output.push_str(&self.visit(&url, result).await);
        }
        output
    }

    /// Ask the model for the most relevant links; the first hits if it cannot decide.
    async fn pick_links(&self, query: &str, hits: &[(SearchResult, Url)]) -> Vec<Url> {
        let wanted = self.settings.links_per_search;
        let first_hits = || hits.iter().take(wanted).map(|(_, url)| url.clone()).collect::<Vec<_>>();
        if hits.len() <= wanted {
            return first_hits();
        }

        let listing = hits
            .iter()
            .map(|(hit, url)| {
                json!({
                    "title": hit.title,
                    "url": url.as_str(),
                    "description": hit.description,
                    "source": hit.source,
                    "age": hit.age,
                })
            })
            .collect::<Vec<_>>();
        let request = LlmRequest::new(vec![
            ChatMessage::system(format!(
                "You pick the {} articles most relevant to a query from a list of search results. \
                 Prefer well known, trusted sources. Never pick paywalled sources such as {}.\n\
                 Reply in JSON: {{\"links\": [{{\"title\": \"...\", \"url\": \"...\"}}]}}",
                wanted,
                self.evaluator.paywalled_domains().join(", ")
            )),
            ChatMessage::user(format!(
                "Query: {}\nCurrent date: {}\n\nArticles:\n{}",
                query,
                Utc::now().date_naive(),
                serde_json::to_string_pretty(&listing).unwrap_or_default()
            )),
        ])
        .json()
        .with_temperature(0.0);

        let reply = match self.llm.generate(request).await {
            Ok(response) => parse_json_reply::<LinkPicks>(&response.content),
            Err(e) => Err(e),
        };
        match reply {
            Ok(picks) => {
                let mut chosen: Vec<Url> = Vec::new();
                for link in picks.links {
                    // Only URLs that came from the search results
                    let known = hits.iter().find(|(_, url)| url.as_str() == link.url.trim());
                    if let Some((_, url)) = known {
                        if !chosen.contains(url) {
                            chosen.push(url.clone());
                        }
                    }
                }
                chosen.truncate(wanted);
                if chosen.is_empty() {
                    first_hits()
                } else {
                    chosen
                }
            }
            Err(e) => {
                warn!("qa: link selection failed, taking the first results: {}", e);
                first_hits()
            }
        }
    }

    /// Fetch the referenced article up front and return it as prompt text.
    async fn original_article_block(&self, target: &Target, result: &mut QaResult, progress: &Progress) -> String {
        let mut block = String::from("\n\n");
        if let Some(item) = &target.item {
            let _ = writeln!(block, "The question refers to this article: \"{}\" ({})", item.headline, item.url);
        } else {
            let _ = writeln!(block, "The question refers to this page: {}", target.url);
        }

        if self.evaluator.is_paywalled(&target.url) {
            let _ = writeln!(
                block,
                "It is from a paywalled source; use {} to learn about the story.",
                FIND_ARTICLES_TOOL
            );
            return block;
        }

        progress.report("Reading the original article...");
        match self.pages.fetch_page(&target.url).await {
            Ok(page) => {
                result.add_source(target.url.clone());
                let _ = write!(block, "Original article:\n{}", page.to_prompt_block());
            }
            Err(e) => {
                warn!(url = %target.url, "qa: original article fetch failed: {:#}", e);
                let _ = writeln!(block, "{}", unfetchable(&target.url));
            }
        }
        block
    }

    fn system_prompt(&self, ctx: &QaContext<'_>) -> String {
        let mut prompt = format!(
            r#"You explain the news to curious readers in plain, conversational language, defining any jargon right away.
Today is {today}. Answer in {language}.

You have two tools:
1) {visit}(url): reads one web page. Fast. Use it when the user wants to know what a specific article says.
2) {find}(query): searches recent news and reads the most relevant articles. Slower. Use it for broader context,
   for questions not tied to one article, and for anything from a paywalled source.
Never call {visit} on paywalled sources: {paywalled}.

Build your answer from what the tools return and connect it to the earlier conversation.
Do not invent facts or references; only cite pages you actually read.
"#,
            today = Utc::now().format("%B %-d, %Y"),
            language = ctx.language.name(),
            visit = VISIT_WEBSITE_TOOL,
            find = FIND_ARTICLES_TOOL,
            paywalled = self.evaluator.paywalled_domains().join(", "),
        );

        if let Some(briefing) = ctx.briefing.filter(|b| !b.is_empty()) {
            prompt.push_str("\nArticles presented to the user earlier:\n");
            for (idx, item) in briefing.items().enumerate() {
                let _ = writeln!(prompt, "#{} [{}] {} ({})", idx + 1, item.category, item.headline, item.url);
            }
        }
        prompt
    }
}

/// The article or page a question points at
struct Target {
    url: Url,
    item: Option<NewsItem>,
}

fn resolve_article(ctx: &QaContext<'_>) -> Option<Target> {
    match ArticleRef::parse(ctx.message) {
        ArticleRef::Index(n) => {
            let item = ctx.briefing.and_then(|b| b.item(n));
            if item.is_none() {
                debug!(index = n, "qa: article reference outside the last briefing");
            }
            item.map(|item| Target {
                url: item.url.clone(),
                item: Some(item.clone()),
            })
        }
        ArticleRef::Url(url) => {
            let item = ctx
                .briefing
                .and_then(|b| b.items().find(|item| item.url == url))
                .cloned();
            Some(Target { url, item })
        }
        ArticleRef::None => None,
    }
}

fn unfetchable(url: &Url) -> String {
    format!("This website {} cannot be fetched, possibly because it is paywalled.", url)
}

fn non_empty(content: String) -> Option<String> {
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: VISIT_WEBSITE_TOOL.to_string(),
            description: "Read the contents of a web page, such as a news article the user asked about.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "The URL of the page to read"}
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: FIND_ARTICLES_TOOL.to_string(),
            description: "Search recent news articles on a topic and read the most relevant ones.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search engine query describing what to look for"}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct VisitArgs {
    url: String,
}

#[derive(Debug, Deserialize)]
struct FindArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct LinkPicks {
    #[serde(default)]
    links: Vec<PickedLink>,
}

#[derive(Debug, Deserialize)]
struct PickedLink {
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CategorySection, ItemSections};

    fn briefing() -> Briefing {
        let item = NewsItem {
            category: "Business".into(),
            headline: "Rates hold".into(),
            sections: ItemSections {
                what_happened: "a".into(),
                why_it_matters: "b".into(),
                how_it_relates: "c".into(),
            },
            published_at: None,
            source_name: None,
            url: Url::parse("https://www.bbc.com/news/rates").unwrap(),
            image_url: None,
        };
        Briefing {
            sections: vec![CategorySection {
                category: "Business".into(),
                items: vec![item],
            }],
            ..Default::default()
        }
    }

    fn ctx<'a>(message: &'a str, briefing: Option<&'a Briefing>) -> QaContext<'a> {
        QaContext {
            message,
            history: &[],
            briefing,
            language: Language::English,
        }
    }

    #[test]
    fn index_reference_resolves_against_briefing() {
        let b = briefing();
        let target = resolve_article(&ctx("tell me more about #1", Some(&b))).expect("target");
        assert_eq!(target.url.as_str(), "https://www.bbc.com/news/rates");
        assert!(target.item.is_some());

        assert!(resolve_article(&ctx("tell me more about #2", Some(&b))).is_none());
        assert!(resolve_article(&ctx("tell me more about #1", None)).is_none());
    }

    #[test]
    fn url_reference_matches_briefing_item() {
        let b = briefing();
        let target = resolve_article(&ctx("what is https://www.bbc.com/news/rates about?", Some(&b))).expect("target");
        assert_eq!(target.item.map(|i| i.headline), Some("Rates hold".to_string()));
    }

    #[test]
    fn settings_defaults() {
        let settings = QaSettings::from_config(&Config::default());
        assert_eq!(settings.max_revisions, 2);
        assert_eq!(settings.search_count, 8);
        assert_eq!(settings.links_per_search, 3);
        assert!(settings.paywalled_domains.iter().any(|d| d == "wsj.com"));
    }

    #[test]
    fn tool_specs_have_required_arguments() {
        let specs = tool_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].parameters["required"][0], "url");
        assert_eq!(specs[1].parameters["required"][0], "query");
    }
}
