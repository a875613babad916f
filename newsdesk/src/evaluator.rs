//! Quality control for the QA agent: tool plans before they run, answers
//! before they reach the user.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::llm::{parse_json_reply, ChatMessage, LlmProvider, LlmRequest, ToolCall};
use crate::qa::{FIND_ARTICLES_TOOL, VISIT_WEBSITE_TOOL};
use crate::types::{QaResult, Verdict};

pub const DEFAULT_PAYWALLED_DOMAINS: &[&str] = &["nytimes.com", "washingtonpost.com", "wsj.com"];

pub struct Evaluator {
    paywalled: Vec<String>,
    /// Reviewer model; `None` leaves only the deterministic rules
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Evaluator {
    pub fn new(paywalled: Vec<String>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let paywalled = paywalled
            .into_iter()
            .map(|d| d.trim().trim_start_matches("www.").to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { paywalled, llm }
    }

    pub fn paywalled_domains(&self) -> &[String] {
        &self.paywalled
    }

    /// Host equals a listed domain or is a subdomain of one.
    pub fn is_paywalled(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.paywalled
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }

    /// Review the tool calls the QA model wants to make.
    pub async fn review_plan(&self, question: &str, calls: &[ToolCall]) -> Verdict {
        if let Some(feedback) = self.paywall_violations(calls) {
            info!("evaluator: plan rejected by paywall rule");
            return Verdict::Revise { feedback };
        }

        let Some(llm) = &self.llm else {
            return Verdict::Pass;
        };

        let plan = calls
            .iter()
            .map(|c| format!("- {}({})", c.name, c.arguments))
            .collect::<Vec<_>>()
            .join("\n");
        let request = LlmRequest::new(vec![
            ChatMessage::system(self.plan_review_prompt()),
            ChatMessage::user(format!(
                "User question:\n{}\n\nPlanned tool calls:\n{}\n\nIs this plan acceptable?",
                question, plan
            )),
        ])
        .json()
        .with_temperature(0.0);

        match llm.generate(request).await {
            Ok(response) => match parse_json_reply::<PlanReview>(&response.content) {
                Ok(review) if review.is_acceptable => Verdict::Pass,
                Ok(review) => {
                    info!(feedback = %review.feedback, "evaluator: plan rejected by reviewer");
                    let feedback = if review.feedback.trim().is_empty() {
                        "The reviewer rejected these tool calls.".to_string()
                    } else {
                        review.feedback
                    };
                    Verdict::Revise { feedback }
                }
                Err(e) => {
                    warn!("evaluator: unreadable plan review, accepting plan: {}", e);
                    Verdict::Pass
                }
            },
            Err(e) => {
                warn!("evaluator: plan review call failed, accepting plan: {}", e);
                Verdict::Pass
            }
        }
    }

    /// An answer passes only when it is non-empty and backed by at least one source.
    pub fn review_answer(&self, result: &QaResult) -> Verdict {
        if result.answer.trim().is_empty() {
            return Verdict::Revise {
                feedback: "The answer was empty. Research the question with the tools and answer it.".into(),
            };
        }
        if !result.is_grounded() {
            return Verdict::Revise {
                feedback: format!(
                    "The answer cites no sources. Call {} or {} and base the answer on what they return.",
                    VISIT_WEBSITE_TOOL, FIND_ARTICLES_TOOL
                ),
            };
        }
        Verdict::Pass
    }

    fn paywall_violations(&self, calls: &[ToolCall]) -> Option<String> {
        let blocked: Vec<String> = calls
            .iter()
            .filter(|c| c.name == VISIT_WEBSITE_TOOL)
            .filter_map(|c| c.parse_arguments::<VisitArgs>().ok())
            .filter_map(|args| Url::parse(&args.url).ok())
            .filter(|url| self.is_paywalled(url))
            .map(|url| url.to_string())
            .collect();

        if blocked.is_empty() {
            return None;
        }
        Some(format!(
            "{} must not be used on paywalled sources ({}). Call {} with a query describing the story instead.",
            VISIT_WEBSITE_TOOL,
            blocked.join(", "),
            FIND_ARTICLES_TOOL
        ))
    }

    fn plan_review_prompt(&self) -> String {
        format!(
            r#"You review the tool calls of a news assistant before they run.
The assistant has two tools: {visit} (reads one web page) and {find} (searches news articles).
Rule: {visit} must never be called on paywalled news sources such as {domains} or any other known paywalled source.
For those, {find} with a query describing the story must be used instead.

Reply in JSON: {{"is_acceptable": true|false, "feedback": "what to change, empty if acceptable"}}"#,
            visit = VISIT_WEBSITE_TOOL,
            find = FIND_ARTICLES_TOOL,
            domains = self.paywalled.join(", ")
        )
    }
}

#[derive(Debug, Deserialize)]
struct VisitArgs {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PlanReview {
    is_acceptable: bool,
    #[serde(default)]
    feedback: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> Evaluator {
        Evaluator::new(
            DEFAULT_PAYWALLED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            None,
        )
    }

    fn visit(url: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: VISIT_WEBSITE_TOOL.into(),
            arguments: format!(r#"{{"url": "{}"}}"#, url),
        }
    }

    #[test]
    fn paywall_matches_subdomains_only() {
        let e = evaluator();
        assert!(e.is_paywalled(&Url::parse("https://www.nytimes.com/2025/07/06/x.html").unwrap()));
        assert!(e.is_paywalled(&Url::parse("https://wsj.com/articles/y").unwrap()));
        assert!(!e.is_paywalled(&Url::parse("https://notnytimes.com/a").unwrap()));
        assert!(!e.is_paywalled(&Url::parse("https://www.bbc.com/news").unwrap()));
    }

    #[tokio::test]
    async fn paywalled_visit_is_rejected() {
        let verdict = evaluator()
            .review_plan("what happened?", &[visit("https://www.washingtonpost.com/politics/story")])
            .await;
        match verdict {
            Verdict::Revise { feedback } => assert!(feedback.contains(FIND_ARTICLES_TOOL)),
            Verdict::Pass => panic!("paywalled visit should be rejected"),
        }
    }

    #[tokio::test]
    async fn open_visit_passes_without_reviewer() {
        let verdict = evaluator()
            .review_plan("what happened?", &[visit("https://www.cbc.ca/news/story")])
            .await;
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn ungrounded_answer_is_revised() {
        let mut result = QaResult {
            article: None,
            answer: "Rates went up.".into(),
            sources: Vec::new(),
            verdict: Verdict::Pass,
            revisions: 0,
        };
        assert!(matches!(evaluator().review_answer(&result), Verdict::Revise { .. }));

        result.add_source(Url::parse("https://www.bbc.com/news/rates").unwrap());
        assert_eq!(evaluator().review_answer(&result), Verdict::Pass);

        result.answer = "  ".into();
        assert!(matches!(evaluator().review_answer(&result), Verdict::Revise { .. }));
    }
}
