//! Stub chat backend for exercising the proxy locally.
//!
//! Answers the small chat API the proxy fronts, keeps conversations in
//! memory, and echoes the `X-Use-Case-ID` it received so the pass-through can
//! be checked end to end.
//!
//! # Environment Variables
//!
//! - `MOCK_BACKEND_PORT`: Listen port (default: 8002)
//! - `MOCK_BACKEND_DELAY_MS`: Delay before each conversation reply (default: 0)
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin mock_backend
//!
//! curl -X POST http://localhost:8001/api/2.0/genie_dummy/spaces/start-conversation \
//!   -H "Content-Type: application/json" \
//!   -H "X-Use-Case-ID: 100000" \
//!   -d '{"message":"hello"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const CANNED_REPLIES: &[&str] = &[
    "Hello! I'm a stub chat assistant. How can I help you today?",
    "That's an interesting question! Let me think about that...",
    "I understand your request. Here's what I think about that topic...",
    "Great question! Here are some thoughts...",
    "Thanks for reaching out! I'm here to help with your query...",
];

#[derive(Debug, Deserialize)]
struct StartConversation {
    message: String,
    #[serde(default = "default_model")]
    model: String,
}

fn default_model() -> String {
    "llama2".to_string()
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ConversationReply {
    conversation_id: String,
    response: String,
    model_used: String,
    timestamp: String,
    use_case_id: String,
}

#[derive(Clone, Default)]
struct AppState {
    conversations: Arc<Mutex<HashMap<String, Vec<Message>>>>,
    delay: Duration,
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Mock Chat Backend",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "active_conversations": state.conversations.lock().len(),
        "service": "mock_backend",
    }))
}

async fn start_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartConversation>,
) -> impl IntoResponse {
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let conversation_id = uuid::Uuid::new_v4().to_string();
    let use_case_id = headers
        .get("x-use-case-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let reply = CANNED_REPLIES[req.message.len() % CANNED_REPLIES.len()];
    let response = format!("{reply} (Processed by {})", req.model);
    let now = chrono::Utc::now().to_rfc3339();

    state.conversations.lock().insert(
        conversation_id.clone(),
        vec![
            Message {
                role: "user",
                content: req.message,
                timestamp: now.clone(),
            },
            Message {
                role: "assistant",
                content: response.clone(),
                timestamp: now.clone(),
            },
        ],
    );
    println!("New conversation {conversation_id} for use case {use_case_id}");

    Json(ConversationReply {
        conversation_id,
        response,
        model_used: req.model,
        timestamp: now,
        use_case_id,
    })
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    match state.conversations.lock().get(&conversation_id) {
        Some(messages) => Json(serde_json::json!({
            "conversation_id": conversation_id,
            "messages": messages,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "detail": "Conversation not found" })),
        )
            .into_response(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = std::env::var("MOCK_BACKEND_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8002);
    let delay_ms: u64 = std::env::var("MOCK_BACKEND_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let state = AppState {
        delay: Duration::from_millis(delay_ms),
        ..AppState::default()
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/api/2.0/genie_dummy/health", get(health))
        .route(
            "/api/2.0/genie_dummy/spaces/start-conversation",
            post(start_conversation),
        )
        .route(
            "/api/2.0/genie_dummy/conversations/{conversation_id}",
            get(get_conversation),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("Mock backend listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
