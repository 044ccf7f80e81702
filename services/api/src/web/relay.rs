//! services/api/src/web/relay.rs
//!
//! The server-side relay: the only place a real provider credential is
//! combined with an outbound network call. The caller is re-resolved from
//! the bearer token (middleware), the stored key is loaded server-side, and
//! the upstream chat-completion body is passed back verbatim. The key never
//! reaches the browser.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use greenbot_core::domain::{ChatTurn, CredentialRecord, Provider};
use greenbot_core::ports::ServiceError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::adapters::providers;
use crate::web::state::AppState;

/// The relay request body.
#[derive(Deserialize)]
pub struct RelayRequest {
    pub messages: Vec<ChatTurn>,
    #[serde(default = "default_provider")]
    pub provider: Provider,
}

fn default_provider() -> Provider {
    Provider::OpenAi
}

fn missing_key_error(provider: Provider) -> String {
    format!(
        "No {} API key found. Please add it in settings.",
        provider.as_str().to_uppercase()
    )
}

/// Resolves the caller's key for `provider`, or the 400 body explaining
/// what is missing. Split out so the decision is testable without a server.
fn resolve_key(
    record: Option<&CredentialRecord>,
    provider: Provider,
) -> Result<&str, serde_json::Value> {
    let record = record.ok_or_else(|| {
        json!({
            "error": "No API keys configured. Please add your API keys in settings.",
            "needsSetup": true,
        })
    })?;
    record
        .key_for(provider)
        .ok_or_else(|| json!({ "error": missing_key_error(provider) }))
}

/// POST /ai-chat: forwards a chat history to the selected provider using
/// the caller's stored credential.
pub async fn relay_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(request): Json<RelayRequest>,
) -> impl IntoResponse {
    // 1. Load the caller's credential record.
    let record = match state.credentials.get_credentials(user_id).await {
        Ok(record) => record,
        Err(e) => {
            error!(%user_id, "relay: failed to fetch API keys: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch API keys from database." })),
            );
        }
    };

    // 2. Resolve the provider key; nothing is forwarded upstream without one.
    let key = match resolve_key(record.as_ref(), request.provider) {
        Ok(key) => key.to_string(),
        Err(body) => return (StatusCode::BAD_REQUEST, Json(body)),
    };

    // 3. Forward to the provider and pass the body through verbatim.
    match providers::forward_chat(&state.http, request.provider, &key, &request.messages).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(ServiceError::Provider { status, body }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            Json(json!({
                "error": format!(
                    "{} API error: {} {}",
                    request.provider.as_str().to_uppercase(),
                    status,
                    body
                ),
            })),
        ),
        Err(e) => {
            error!(provider = %request.provider, "relay: upstream call failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
