use rocket::futures::{SinkExt, StreamExt};
use rocket::{get, State};
use rocket_ws::{Channel, Message, WebSocket};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::assistant::capabilities_message;
use crate::types::{Language, Progress};

fn progress_event(note: &str) -> Message {
    Message::Text(json!({"type": "progress", "message": note}).to_string())
}

/// WebSocket chat endpoint. Each text frame is one user message, either raw
/// text or `{"message": "..."}`; progress notes stream while it is handled.
#[get("/chat?<session_id>")]
pub fn chat_websocket(
    ws: WebSocket,
    session_id: Option<String>,
    state: &State<crate::server::AppState>,
) -> Channel<'static> {
    let assistant = state.assistant.clone();
    let sessions = state.sessions.clone();
    let requested = session_id.as_deref().and_then(|s| Uuid::parse_str(s).ok());
    if session_id.is_some() && requested.is_none() {
        warn!("websocket: ignoring malformed session id {:?}", session_id);
    }

    ws.channel(move |mut stream| {
        Box::pin(async move {
            let (session_id, conversation) = sessions.get_or_create(requested);
            info!("WebSocket connected for session {}", session_id);

            let greeting = json!({
                "type": "message",
                "session_id": session_id,
                "route": "unhandled",
                "content": capabilities_message(Language::English),
                "sources": [],
            });
            if let Err(e) = stream.send(Message::Text(greeting.to_string())).await {
                error!("Failed to send greeting: {}", e);
                sessions.remove(&session_id);
                return Ok(());
            }

            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed for session {}", session_id);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                };

                let user_message = match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => value["message"].as_str().map(str::to_string).unwrap_or(text),
                    Err(_) => text,
                };

                sessions.touch(&session_id);
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                let progress = Progress::new(tx);
                let mut guard = conversation.lock().await;

                let reply = {
                    let respond = assistant.respond(&mut guard, &user_message, &progress);
                    tokio::pin!(respond);
                    loop {
                        tokio::select! {
                            reply = &mut respond => break reply,
                            Some(note) = rx.recv() => {
                                if let Err(e) = stream.send(progress_event(&note)).await {
                                    warn!("Failed to send progress: {}", e);
                                }
                            }
                        }
                    }
                };
                drop(guard);
                drop(progress);

                // Notes queued right before the reply was ready
                while let Ok(note) = rx.try_recv() {
                    let _ = stream.send(progress_event(&note)).await;
                }

                let event = json!({
                    "type": "message",
                    "session_id": session_id,
                    "route": reply.route,
                    "content": reply.content,
                    "sources": reply.sources,
                });
                if let Err(e) = stream.send(Message::Text(event.to_string())).await {
                    error!("Failed to send response: {}", e);
                    break;
                }
            }

            sessions.remove(&session_id);
            info!("Session {} released", session_id);
            Ok(())
        })
    })
}
