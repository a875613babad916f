/*
newsdesk - single-binary main.rs
Builds the assistant pipeline from configuration, then serves it over HTTP/WebSocket
or runs it from the terminal (one-shot `ask` or an interactive `repl`).
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{read_secret, secret_preview, Config, LlmConfig, LlmRole};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use newsdesk::assistant::Assistant;
use newsdesk::evaluator::Evaluator;
use newsdesk::ingestion::NewsApiClient;
use newsdesk::llm::remote::RemoteLlmProvider;
use newsdesk::llm::LlmProvider;
use newsdesk::presenter::{Presenter, PresenterSettings};
use newsdesk::qa::{QaAgent, QaSettings};
use newsdesk::router::Router;
use newsdesk::scraping::WebPageFetcher;
use newsdesk::search::BraveSearchClient;
use newsdesk::server::{launch_rocket, AppState};
use newsdesk::sessions::Conversation;
use newsdesk::types::Progress;

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "News assistant: daily briefings and sourced follow-up answers")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP + WebSocket server (default)
    Serve,
    /// Answer a single message and exit
    Ask {
        /// The message, e.g. "What's in the news today?"
        message: Vec<String>,
    },
    /// Chat in the terminal
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A missing .env is fine; keys may come from the real environment
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let config = Arc::new(config);
    let assistant = Arc::new(build_assistant(&config)?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Launching Rocket HTTP server");
            launch_rocket(AppState::new(config.clone(), assistant)).await?;
            info!("Shutdown complete");
        }
        Command::Ask { message } => {
            let message = message.join(" ");
            let mut conversation = Conversation::new(config.history_turns());
            let content = respond_in_terminal(&assistant, &mut conversation, &message).await;
            println!("{}", content);
        }
        Command::Repl => run_repl(&assistant, config.history_turns()).await?,
    }

    Ok(())
}

/// Wire every component from configuration. Missing keys fail here, at startup.
fn build_assistant(config: &Config) -> Result<Assistant> {
    let timeout = config.fetch_timeout_seconds();

    let news = config.news.clone().unwrap_or_default();
    let news_key = read_secret(news.api_key_env.as_deref().unwrap_or("NEWS_API_KEY"))?;
    info!(key = %secret_preview(&news_key), "news provider key loaded");
    let news_client = NewsApiClient::new(
        news.api_url.as_deref().unwrap_or(common::DEFAULT_NEWS_API_URL),
        news_key,
        timeout,
    )?;

    let search = config.search.clone().unwrap_or_default();
    let search_key = read_secret(search.api_key_env.as_deref().unwrap_or("BRAVE_API_KEY"))?;
    info!(key = %secret_preview(&search_key), "search provider key loaded");
    let search_client = BraveSearchClient::new(
        search.api_url.as_deref().unwrap_or(common::DEFAULT_SEARCH_API_URL),
        search_key,
        timeout,
    )?
    .with_search_lang(search.search_lang.as_deref().unwrap_or("en"));

    let politeness = config.politeness.clone().unwrap_or_default();
    let pages = WebPageFetcher::new(
        timeout,
        politeness.user_agent.as_deref(),
        politeness.max_page_chars.unwrap_or(12_000),
    )?;

    let qa_settings = QaSettings::from_config(config);
    let reviewer = if qa_settings.llm_plan_review {
        Some(create_llm_provider(&config.llm, LlmRole::Evaluator)?)
    } else {
        None
    };
    let evaluator = Arc::new(Evaluator::new(qa_settings.paywalled_domains.clone(), reviewer));

    let router = Router::new(create_llm_provider(&config.llm, LlmRole::Router)?);
    let presenter = Presenter::new(
        Arc::new(news_client),
        create_llm_provider(&config.llm, LlmRole::Presenter)?,
        PresenterSettings::from_config(config),
    );
    let qa = QaAgent::new(
        create_llm_provider(&config.llm, LlmRole::Qa)?,
        Arc::new(search_client),
        Arc::new(pages),
        evaluator.clone(),
        qa_settings,
    );

    Ok(Assistant::new(router, presenter, qa, evaluator))
}

/// Create the provider for one role from `[llm.<role>]`, falling back to `[llm.remote]`
fn create_llm_provider(llm_config: &LlmConfig, role: LlmRole) -> Result<Arc<dyn LlmProvider>> {
    let remote_config = llm_config.for_role(role);

    let api_key_env = remote_config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
    let api_key = read_secret(api_key_env).with_context(|| format!("LLM role '{}' has no API key", role))?;

    let model = remote_config.model.clone().unwrap_or_else(|| common::DEFAULT_LLM_MODEL.to_string());
    let api_url = remote_config
        .api_url
        .clone()
        .unwrap_or_else(|| common::DEFAULT_LLM_API_URL.to_string());

    let provider = RemoteLlmProvider::new(api_url.as_str(), api_key.as_str(), model.as_str()).with_defaults(
        remote_config.timeout_seconds.unwrap_or(30),
        remote_config.max_tokens.unwrap_or(1500),
        remote_config.temperature.unwrap_or(0.7),
    );
    info!(%role, model = %model, api_url = %api_url, key = %secret_preview(&api_key), "LLM provider initialized");
    Ok(Arc::new(provider))
}

/// Run one message, echoing progress notes to stderr while it is handled.
async fn respond_in_terminal(assistant: &Assistant, conversation: &mut Conversation, message: &str) -> String {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(note) = rx.recv().await {
            eprintln!("... {}", note);
        }
    });

    let progress = Progress::new(tx);
    let reply = assistant.respond(conversation, message, &progress).await;
    drop(progress);
    let _ = printer.await;
    reply.content
}

async fn run_repl(assistant: &Assistant, history_turns: usize) -> Result<()> {
    let mut conversation = Conversation::new(history_turns);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("newsdesk ready. Ask for today's news, `./topic`, `@ question`, or `exit`.");
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        let content = respond_in_terminal(assistant, &mut conversation, line).await;
        println!("\n{}\n", content);
    }
    Ok(())
}
