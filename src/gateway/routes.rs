use crate::agents::AgentReply;
use crate::channels::{ReadReceipt, WebhookOutcome};
use crate::error::ConfigError;
use crate::gateway::auth::{extract_signature, verify_signature};
use crate::gateway::server::GatewayState;
use crate::providers::ProviderMessage;

use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Build all routes for the control surface.
pub fn build_routes(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/api/health", get(health_handler))
        // Settings
        .route("/api/settings", get(settings_get_handler).patch(settings_patch_handler))
        // Agent
        .route("/api/agent/initialize", post(agent_initialize_handler))
        .route("/api/agent/shutdown", post(agent_shutdown_handler))
        .route("/api/agent/reload", post(agent_reload_handler))
        .route("/api/agent/status", get(agent_status_handler))
        .route("/api/agent/invoke", post(agent_invoke_handler))
        // Personal-account bot
        .route("/api/bot/connect", post(bot_connect_handler))
        .route("/api/bot/disconnect", post(bot_disconnect_handler))
        .route("/api/bot/restart", post(bot_restart_handler))
        .route("/api/bot/status", get(bot_status_handler))
        .route("/api/bot/send", post(bot_send_handler))
        .route("/api/bot/conversations", get(bot_conversations_handler))
        .route("/api/bot/messages/{thread_id}", get(bot_messages_handler))
        .route("/api/bot/mark-as-read", post(bot_mark_read_handler))
        // Official Account
        .route("/api/zalo-oa/webhook", post(oa_webhook_handler))
        .route("/api/zalo-oa/status", get(oa_status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

// ============================================================================
// Health
// ============================================================================

async fn health_handler(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "uptime": state.start_time.elapsed().as_secs(),
        "agent": state.agent.controller().state(),
        "bot": state.bot.controller().state(),
        "settings_hash": state.store.settings_hash(),
    }))
}

// ============================================================================
// Settings
// ============================================================================

async fn settings_get_handler(State(state): State<GatewayState>) -> Response {
    Json(state.store.snapshot().as_ref().clone()).into_response()
}

async fn settings_patch_handler(
    State(state): State<GatewayState>,
    Json(patch): Json<serde_json::Value>,
) -> Response {
    match state.store.update(patch).await {
        Ok(settings) => Json(settings.as_ref().clone()).into_response(),
        Err(ConfigError::Validation(details)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "settings validation failed", "details": details })),
        )
            .into_response(),
        Err(e @ ConfigError::InvalidPatch) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            warn!(error = %e, "Settings update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

fn agent_disabled(state: &GatewayState) -> Option<Response> {
    if state.store.snapshot().agent_config.enabled {
        None
    } else {
        Some(error_response(
            StatusCode::BAD_REQUEST,
            "agent is disabled in configuration",
        ))
    }
}

async fn agent_initialize_handler(State(state): State<GatewayState>) -> Response {
    if let Some(resp) = agent_disabled(&state) {
        return resp;
    }
    match state.agent.enable().await {
        Ok(()) => Json(state.agent.status()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "status": state.agent.status() })),
        )
            .into_response(),
    }
}

async fn agent_shutdown_handler(State(state): State<GatewayState>) -> Response {
    state.agent.disable().await;
    Json(state.agent.status()).into_response()
}

async fn agent_reload_handler(State(state): State<GatewayState>) -> Response {
    if let Some(resp) = agent_disabled(&state) {
        return resp;
    }
    match state.agent.reload().await {
        Ok(()) => Json(state.agent.status()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "status": state.agent.status() })),
        )
            .into_response(),
    }
}

async fn agent_status_handler(State(state): State<GatewayState>) -> Response {
    Json(state.agent.status()).into_response()
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    messages: Vec<ProviderMessage>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct InvokeResponse {
    request_id: String,
    #[serde(flatten)]
    reply: AgentReply,
}

async fn agent_invoke_handler(
    State(state): State<GatewayState>,
    Json(req): Json<InvokeRequest>,
) -> Response {
    let mut messages = req.messages;
    if let Some(text) = req.message {
        messages.push(ProviderMessage::user(text));
    }
    if messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no messages provided");
    }

    let request_id = Uuid::new_v4().to_string();
    info!(request_id = %request_id, messages = messages.len(), "Agent invoke");
    let reply = state.agent.invoke(messages).await;
    Json(InvokeResponse { request_id, reply }).into_response()
}

// ============================================================================
// Bot
// ============================================================================

fn bot_disabled(state: &GatewayState) -> Option<Response> {
    if state.store.snapshot().zalo_config.personal.enabled {
        None
    } else {
        Some(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Zalo personal integration is currently disabled",
        ))
    }
}

fn bot_not_connected(state: &GatewayState) -> Option<Response> {
    if state.bot.controller().ready_resource().is_some() {
        None
    } else {
        Some(error_response(StatusCode::CONFLICT, "bot is not connected"))
    }
}

async fn bot_connect_handler(State(state): State<GatewayState>) -> Response {
    if let Some(resp) = bot_disabled(&state) {
        return resp;
    }
    match state.bot.enable().await {
        Ok(()) => Json(state.bot.status()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "status": state.bot.status() })),
        )
            .into_response(),
    }
}

async fn bot_disconnect_handler(State(state): State<GatewayState>) -> Response {
    state.bot.disable().await;
    Json(state.bot.status()).into_response()
}

async fn bot_restart_handler(State(state): State<GatewayState>) -> Response {
    if let Some(resp) = bot_disabled(&state) {
        return resp;
    }
    match state.bot.reload().await {
        Ok(()) => Json(state.bot.status()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "status": state.bot.status() })),
        )
            .into_response(),
    }
}

async fn bot_status_handler(State(state): State<GatewayState>) -> Response {
    Json(state.bot.status()).into_response()
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    thread_id: String,
    text: String,
}

async fn bot_send_handler(
    State(state): State<GatewayState>,
    Json(req): Json<SendRequest>,
) -> Response {
    if let Some(resp) = bot_not_connected(&state) {
        return resp;
    }
    match state.bot.send_message(&req.thread_id, &req.text).await {
        Ok(()) => Json(json!({ "status": "sent" })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn bot_conversations_handler(State(state): State<GatewayState>) -> Response {
    if let Some(resp) = bot_not_connected(&state) {
        return resp;
    }
    match state.bot.fetch_threads().await {
        Ok(threads) => Json(json!({ "conversations": threads })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: u32,
}

fn default_history_limit() -> u32 {
    50
}

async fn bot_messages_handler(
    State(state): State<GatewayState>,
    Path(thread_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if let Some(resp) = bot_not_connected(&state) {
        return resp;
    }
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);
    match state.bot.fetch_messages(&thread_id, limit).await {
        Ok(messages) => Json(json!({ "thread_id": thread_id, "messages": messages })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

#[derive(Debug, Deserialize)]
struct MarkReadRequest {
    thread_id: String,
    message_id: String,
    client_message_id: String,
    sender_id: String,
    /// `"USER"` or `"GROUP"`.
    #[serde(default)]
    thread_type: String,
}

async fn bot_mark_read_handler(
    State(state): State<GatewayState>,
    Json(req): Json<MarkReadRequest>,
) -> Response {
    if let Some(resp) = bot_not_connected(&state) {
        return resp;
    }
    let receipt = ReadReceipt {
        is_group: req.thread_type.eq_ignore_ascii_case("group"),
        thread_id: req.thread_id,
        message_id: req.message_id,
        client_message_id: req.client_message_id,
        sender_id: req.sender_id,
    };
    match state.bot.mark_read(&receipt).await {
        Ok(()) => Json(json!({ "status": "read" })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

// ============================================================================
// Official Account
// ============================================================================

async fn oa_webhook_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.oa.is_enabled() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Zalo OA integration is currently disabled",
        );
    }

    let secret = state.oa.secret_key().unwrap_or_default();
    let verified = extract_signature(&headers)
        .map(|sig| verify_signature(&secret, &body, sig))
        .unwrap_or(false);
    if !verified {
        warn!("Rejected OA webhook with missing or invalid signature");
        return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let outcome = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(event) => state.oa.handle_event(&event).await,
        Err(e) => WebhookOutcome::AcknowledgedWithFailure(format!("body is not JSON: {e}")),
    };
    if let WebhookOutcome::AcknowledgedWithFailure(reason) = outcome {
        warn!(reason = %reason, "OA webhook acknowledged with failure");
    }
    Json(json!({ "status": "success" })).into_response()
}

async fn oa_status_handler(State(state): State<GatewayState>) -> Response {
    if !state.oa.is_enabled() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Zalo OA integration is currently disabled",
        );
    }
    Json(state.oa.status()).into_response()
}
