//! Intent routing: every user message gets exactly one decision.

use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::{ChatMessage, LlmProvider, LlmRequest};
use crate::types::ArticleRef;

/// What the presenter should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewsRequest {
    Today,
    Topic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    PresentNews(NewsRequest),
    AnswerQuestion,
    /// Neither a news request nor a follow-up (small talk, empty input)
    Unhandled,
}

impl RoutingDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RoutingDecision::PresentNews(_) => "present_news",
            RoutingDecision::AnswerQuestion => "answer_question",
            RoutingDecision::Unhandled => "unhandled",
        }
    }
}

const ROUTER_SYSTEM_PROMPT: &str = r#"You are a ROUTER. You never answer the user directly.
Your only job is to pick exactly one handler for the user's latest message.

Handlers:
1) Presenter
   - Presents today's news: headlines, latest news, daily briefing.
   - Pick it when the user asks to SEE news, e.g. "Show me today's news", "What are today's headlines?", "今天的新闻？".
   - Do NOT pick it for questions about articles already shown.
2) Question_Answer
   - Answers questions, explains articles, gives context or analysis about news, people, events or concepts.
   - Pick it for follow-ups ("Tell me more about the second article"), and for any factual question
     ("Why did the US impose tariffs on Canada?", "告诉我更多欧洲上空神秘无人机？", "Is today Cyber Monday?").
3) Unhandled
   - Greetings, small talk, thanks, or requests unrelated to news and questions ("hi", "write me a poem").

Reply with exactly one word: Presenter, Question_Answer, or Unhandled."#;

/// Classifies user messages. Triggers are checked deterministically before the LLM.
pub struct Router {
    llm: Arc<dyn LlmProvider>,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Total: never fails, always returns exactly one decision.
    pub async fn route(&self, message: &str, history: &[ChatMessage]) -> RoutingDecision {
        let message = message.trim();
        if message.is_empty() {
            return RoutingDecision::Unhandled;
        }
        if let Some(topic) = topic_trigger(message) {
            info!(topic = %topic, "router: topic trigger");
            return RoutingDecision::PresentNews(NewsRequest::Topic(topic));
        }
        if has_question_trigger(message) {
            info!("router: question trigger");
            return RoutingDecision::AnswerQuestion;
        }

        let mut messages = vec![ChatMessage::system(ROUTER_SYSTEM_PROMPT)];
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));

        let request = LlmRequest::new(messages)
            .with_temperature(0.0)
            .with_max_tokens(10);

        let decision = match self.llm.generate(request).await {
            Ok(response) => parse_decision(&response.content),
            Err(e) => {
                warn!("router LLM failed: {}, using keyword fallback", e);
                keyword_fallback(message)
            }
        };
        info!(route = decision.label(), model = self.llm.model(), "router: decision");
        decision
    }
}

/// `./<topic>` at the start of the message or after whitespace.
pub fn topic_trigger(message: &str) -> Option<String> {
    let start = match message.starts_with("./") {
        true => 0,
        false => message
            .char_indices()
            .find(|(i, c)| c.is_whitespace() && message[i + c.len_utf8()..].starts_with("./"))
            .map(|(i, c)| i + c.len_utf8())?,
    };
    let topic = message[start + 2..].trim();
    if topic.is_empty() {
        None
    } else {
        Some(topic.replace('_', " "))
    }
}

/// `@` at the start of the message or after whitespace (not an e-mail address).
pub fn has_question_trigger(message: &str) -> bool {
    message.starts_with('@')
        || message
            .char_indices()
            .any(|(i, c)| c.is_whitespace() && message[i + c.len_utf8()..].starts_with('@'))
}

fn parse_decision(reply: &str) -> RoutingDecision {
    let reply = reply.trim().to_lowercase();
    if reply.contains("question") {
        RoutingDecision::AnswerQuestion
    } else if reply.contains("presenter") {
        RoutingDecision::PresentNews(NewsRequest::Today)
    } else {
        if !reply.contains("unhandled") {
            warn!(reply = %reply, "router: unrecognized reply");
        }
        RoutingDecision::Unhandled
    }
}

const NEWS_WORDS: [&str; 5] = ["news", "headline", "headlines", "briefing", "briefings"];

/// Used when the router model is unreachable. A message pointing at an article
/// is a follow-up even when it mentions "news".
fn keyword_fallback(message: &str) -> RoutingDecision {
    let lower = message.to_lowercase();
    if ArticleRef::parse(&lower) != ArticleRef::None {
        return RoutingDecision::AnswerQuestion;
    }

    let has_news_word = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| NEWS_WORDS.contains(&word));
    if has_news_word || lower.contains("新闻") || lower.contains("头条") {
        RoutingDecision::PresentNews(NewsRequest::Today)
    } else if lower.ends_with('?') || lower.ends_with('？') {
        RoutingDecision::AnswerQuestion
    } else {
        RoutingDecision::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_trigger_variants() {
        assert_eq!(topic_trigger("./ai_regulation"), Some("ai regulation".to_string()));
        assert_eq!(topic_trigger("./ Fashion"), Some("Fashion".to_string()));
        assert_eq!(topic_trigger("show me ./climate change"), Some("climate change".to_string()));
        assert_eq!(topic_trigger("./ 俄罗斯"), Some("俄罗斯".to_string()));
        assert_eq!(topic_trigger("./"), None);
        assert_eq!(topic_trigger("see file.txt"), None);
    }

    #[test]
    fn question_trigger_ignores_email() {
        assert!(has_question_trigger("@ Explain the second article"));
        assert!(has_question_trigger("I saw the inflation story. @ How will this affect mortgages?"));
        assert!(!has_question_trigger("mail me at someone@example.com"));
    }

    #[test]
    fn parse_decision_is_lenient() {
        assert_eq!(parse_decision("Presenter"), RoutingDecision::PresentNews(NewsRequest::Today));
        assert_eq!(parse_decision(" Presenter LLM\n"), RoutingDecision::PresentNews(NewsRequest::Today));
        assert_eq!(parse_decision("Question_Answer"), RoutingDecision::AnswerQuestion);
        assert_eq!(parse_decision("Unhandled"), RoutingDecision::Unhandled);
        assert_eq!(parse_decision("I think maybe"), RoutingDecision::Unhandled);
    }

    #[test]
    fn keyword_fallback_routes() {
        assert_eq!(keyword_fallback("Give me the latest news"), RoutingDecision::PresentNews(NewsRequest::Today));
        assert_eq!(keyword_fallback("今天的新闻"), RoutingDecision::PresentNews(NewsRequest::Today));
        assert_eq!(keyword_fallback("Why are rates rising?"), RoutingDecision::AnswerQuestion);
        assert_eq!(keyword_fallback("hello there"), RoutingDecision::Unhandled);
    }

    #[test]
    fn keyword_fallback_matches_whole_news_words() {
        let today = RoutingDecision::PresentNews(NewsRequest::Today);
        assert_eq!(keyword_fallback("show me the news"), today);
        assert_eq!(keyword_fallback("Any headline worth reading?"), today);
        assert_eq!(keyword_fallback("News, please."), today);
        assert_eq!(keyword_fallback("I read the newsletter"), RoutingDecision::Unhandled);
        assert_eq!(keyword_fallback("more news on #2"), RoutingDecision::AnswerQuestion);
    }
}
