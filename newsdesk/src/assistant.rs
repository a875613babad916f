//! The request pipeline: route, then present news or answer a question,
//! then record the exchange in the conversation.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::evaluator::Evaluator;
use crate::presenter::Presenter;
use crate::qa::{QaAgent, QaContext};
use crate::router::{NewsRequest, Router, RoutingDecision};
use crate::sessions::Conversation;
use crate::types::{Language, Progress, QaResult, Verdict};

/// What the transport sends back for one user message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub route: &'static str,
    pub content: String,
    pub sources: Vec<String>,
}

pub struct Assistant {
    router: Router,
    presenter: Presenter,
    qa: QaAgent,
    evaluator: Arc<Evaluator>,
}

impl Assistant {
    pub fn new(router: Router, presenter: Presenter, qa: QaAgent, evaluator: Arc<Evaluator>) -> Self {
        Self {
            router,
            presenter,
            qa,
            evaluator,
        }
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Never fails: provider errors turn into an apology in the reply.
    pub async fn respond(&self, conversation: &mut Conversation, message: &str, progress: &Progress) -> Reply {
        let language = Language::detect(message);
        let decision = self.router.route(message, conversation.history()).await;
        info!(session = %conversation.id, route = decision.label(), "assistant: routed message");

        let (content, sources) = match &decision {
            RoutingDecision::Unhandled => (capabilities_message(language).to_string(), Vec::new()),
            RoutingDecision::PresentNews(request) => {
                match request {
                    NewsRequest::Today => progress.report("Gathering today's news..."),
                    NewsRequest::Topic(topic) => progress.report(format!("Searching news about {}...", topic)),
                }
                match self.presenter.present(request, language, progress).await {
                    Ok(briefing) => {
                        let rendered = (briefing.to_markdown(), briefing.source_urls());
                        if !briefing.is_empty() {
                            conversation.set_briefing(briefing);
                        }
                        rendered
                    }
                    Err(e) => {
                        error!("assistant: presenter failed: {:#}", e);
                        (apology(language).to_string(), Vec::new())
                    }
                }
            }
            RoutingDecision::AnswerQuestion => {
                progress.report("Looking into your question...");
                match self.answer_question(conversation, message, language, progress).await {
                    Ok(result) => render_answer(&result, language),
                    Err(e) => {
                        error!("assistant: question answering failed: {:#}", e);
                        (apology(language).to_string(), Vec::new())
                    }
                }
            }
        };

        conversation.push_exchange(message, &content);
        Reply {
            route: decision.label(),
            content,
            sources,
        }
    }

    /// QA attempts, each checked by the evaluator, at most `max_revisions` retries.
    pub async fn answer_question(
        &self,
        conversation: &Conversation,
        message: &str,
        language: Language,
        progress: &Progress,
    ) -> Result<QaResult> {
        let ctx = QaContext {
            message,
            history: conversation.history(),
            briefing: conversation.last_briefing(),
            language,
        };
        let max_revisions = self.qa.settings().max_revisions;
        let mut feedback: Option<String> = None;
        let mut revisions = 0;

        loop {
            let mut result = self.qa.answer(&ctx, feedback.as_deref(), progress).await?;
            result.revisions = revisions;
            result.verdict = self.evaluator.review_answer(&result);

            match &result.verdict {
                Verdict::Pass => return Ok(result),
                Verdict::Revise { feedback: reason } if revisions < max_revisions => {
                    info!(revision = revisions + 1, reason = %reason, "assistant: answer sent back for revision");
                    progress.report("Checking the answer against sources...");
                    feedback = Some(reason.clone());
                    revisions += 1;
                }
                Verdict::Revise { feedback: reason } => {
                    warn!(revisions, reason = %reason, "assistant: answer still unverified, withholding it");
                    return Ok(result);
                }
            }
        }
    }
}

/// A passing answer with its sources, or the withheld notice.
fn render_answer(result: &QaResult, language: Language) -> (String, Vec<String>) {
    match result.verdict {
        Verdict::Pass => (
            result.to_markdown(),
            result.sources.iter().map(|u| u.to_string()).collect(),
        ),
        Verdict::Revise { .. } => (withheld_message(language).to_string(), Vec::new()),
    }
}

pub fn capabilities_message(language: Language) -> &'static str {
    match language {
        Language::English => {
            "I'm a news assistant. I can:\n\
             - present today's news (\"What's in the news today?\")\n\
             - search recent news on a topic (`./climate_change`)\n\
             - answer questions about the articles I showed you (\"Tell me more about #2\") or anything in the news (`@ why are rates rising?`)"
        }
        Language::Chinese => {
            "我是新闻助手，可以：\n\
             - 播报今天的新闻（“今天有什么新闻？”）\n\
             - 搜索某个话题的最新新闻（`./气候变化`）\n\
             - 回答关于已展示文章的问题（“详细说说 #2”）或任何新闻问题（`@ 为什么利率上升？`）"
        }
    }
}

pub fn withheld_message(language: Language) -> &'static str {
    match language {
        Language::English => {
            "I could not verify this answer against sources, so I'm not showing it. \
             Try asking about a specific article (for example \"#2\") or rephrasing the question."
        }
        Language::Chinese => "我无法用可靠来源核实这个回答，因此不予展示。请尝试针对某篇文章提问（例如“#2”）或换个问法。",
    }
}

fn apology(language: Language) -> &'static str {
    match language {
        Language::English => "Sorry, I ran into a problem reaching my news sources. Please try again in a moment.",
        Language::Chinese => "抱歉，获取新闻来源时出现问题，请稍后再试。",
    }
}
