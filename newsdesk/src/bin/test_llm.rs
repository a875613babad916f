//! Manual smoke test against a real OpenAI-compatible endpoint:
//! a plain completion, a JSON-mode completion and a tool call.

use anyhow::Context;
use newsdesk::llm::remote::RemoteLlmProvider;
use newsdesk::llm::summarizer::summarize_category;
use newsdesk::llm::{ChatMessage, LlmProvider, LlmRequest, ToolChoice};
use newsdesk::qa::tool_specs;
use newsdesk::types::{Article, Language};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let api_key = std::env::var("OPENAI_API_KEY").context("Set OPENAI_API_KEY environment variable")?;
    let base_url = std::env::var("LLM_BASE_URL").unwrap_or_else(|_| common::DEFAULT_LLM_API_URL.to_string());
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| common::DEFAULT_LLM_MODEL.to_string());

    println!("\n{}", "=".repeat(60));
    println!("Testing LLM Provider");
    println!("Base URL: {}", base_url);
    println!("Model: {}", model);
    println!("{}", "=".repeat(60));

    let provider = RemoteLlmProvider::new(&base_url, &api_key, &model).with_defaults(30, 500, 0.7);

    println!("\n[Test 1] Plain completion...");
    let request = LlmRequest::new(vec![
        ChatMessage::system("Reply with exactly one word: Presenter, Question_Answer, or Unhandled."),
        ChatMessage::user("What are today's headlines?"),
    ])
    .with_temperature(0.0)
    .with_max_tokens(10);
    match provider.generate(request).await {
        Ok(response) => println!("✓ Router reply: {:?} ({} tokens)", response.content, response.usage.total_tokens),
        Err(e) => eprintln!("✗ Failed: {:#}", e),
    }

    println!("\n[Test 2] Category summary (JSON mode)...");
    let article = Article {
        source_name: Some("Example News".into()),
        title: "Rust 1.80 released with new language features".into(),
        description: Some("The Rust team shipped a new stable release. It stabilizes several long-awaited APIs.".into()),
        content: None,
        url: url::Url::parse("https://example.com/rust-1-80")?,
        image_url: None,
        published_at: None,
    };
    let sections = summarize_category(&provider, "Technology", &[article], Language::English).await;
    for s in &sections {
        println!("✓ What happened: {}", s.what_happened);
        println!("  Why it matters: {}", s.why_it_matters);
        println!("  How it relates: {}", s.how_it_relates);
    }

    println!("\n[Test 3] Tool call...");
    let request = LlmRequest::new(vec![ChatMessage::user(
        "Find recent articles about the EU AI Act and summarize them.",
    )])
    .with_tools(tool_specs(), ToolChoice::Required);
    match provider.generate(request).await {
        Ok(response) => {
            for call in &response.tool_calls {
                println!("✓ {}({})", call.name, call.arguments);
            }
            if response.tool_calls.is_empty() {
                eprintln!("✗ No tool call returned: {}", response.content);
            }
        }
        Err(e) => eprintln!("✗ Failed: {:#}", e),
    }

    println!("\n{}", "=".repeat(60));
    println!("Tests completed");
    println!("{}", "=".repeat(60));
    Ok(())
}
