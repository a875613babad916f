use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::Config;

use crate::assistant::Assistant;
use crate::sessions::SessionStore;
use crate::types::Progress;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub assistant: Arc<Assistant>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Arc<Config>, assistant: Arc<Assistant>) -> Self {
        let sessions = Arc::new(SessionStore::with_limits(
            config.history_turns(),
            chrono::Duration::minutes(config.session_idle_minutes()),
            config.max_sessions(),
        ));
        Self {
            started_at: Utc::now(),
            config,
            assistant,
            sessions,
        }
    }
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    active_sessions: usize,
    categories: Vec<String>,
}

#[derive(Deserialize)]
struct ChatRequest {
    session_id: Option<String>,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: Uuid,
    route: &'static str,
    content: String,
    sources: Vec<String>,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning uptime, live sessions and the briefing categories.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let categories = state
        .assistant
        .presenter()
        .settings()
        .categories
        .iter()
        .map(|c| c.name.clone())
        .collect();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        active_sessions: state.sessions.len(),
        categories,
    })
}

/// One message in, one reply out. Omit `session_id` to start a conversation.
#[post("/api/v1/chat", format = "json", data = "<req>")]
async fn chat(state: &State<AppState>, req: Json<ChatRequest>) -> Result<Json<ChatResponse>, Status> {
    let requested = match req.session_id.as_deref() {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| Status::BadRequest)?),
        None => None,
    };

    let (session_id, conversation) = state.sessions.get_or_create(requested);
    let mut conversation = conversation.lock().await;
    let reply = state
        .assistant
        .respond(&mut conversation, &req.message, &Progress::none())
        .await;

    Ok(Json(ChatResponse {
        session_id,
        route: reply.route,
        content: reply.content,
        sources: reply.sources,
    }))
}

/// Rocket instance with all routes mounted; used by `launch_rocket` and tests.
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount("/", routes![health, status, chat])
        .mount("/ws", routes![crate::sessions::websocket::chat_websocket])
}

pub async fn launch_rocket(state: AppState) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = &state.config.server {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    // Runs until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!("Starting Rocket HTTP server");
    build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
