//! services/api/src/adapters/providers.rs
//!
//! The provider wire layer: builds the provider-specific chat-completion
//! request and performs the outbound HTTP call. The upstream JSON body is
//! returned verbatim so the relay can pass it through untouched; a typed
//! view exists only for pulling out the reply text.

use greenbot_core::domain::{ChatTurn, Provider};
use greenbot_core::ports::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1000;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'static str,
    messages: &'a [ChatTurn],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

/// Sends `turns` to `provider`'s chat-completions endpoint using `api_key`.
///
/// Returns the upstream JSON body verbatim on 2xx. Non-2xx responses become
/// [`ServiceError::Provider`] carrying the HTTP status and raw error body;
/// transport failures become [`ServiceError::Network`].
pub async fn forward_chat(
    http: &reqwest::Client,
    provider: Provider,
    api_key: &str,
    turns: &[ChatTurn],
) -> ServiceResult<Value> {
    let body = CompletionRequest {
        model: provider.model(),
        messages: turns,
        temperature: TEMPERATURE,
        max_tokens: MAX_TOKENS,
    };

    let response = http
        .post(provider.endpoint_url())
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| ServiceError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::Provider {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ServiceError::Network(e.to_string()))
}

/// Reads `choices[0].message.content` out of a chat-completion body.
pub fn extract_reply(body: &Value) -> ServiceResult<String> {
    let completion: CompletionResponse = serde_json::from_value(body.clone())
        .map_err(|_| ServiceError::Validation("invalid response format from AI service".into()))?;
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::Validation("AI service returned no choices".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_reply_reads_first_choice() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [
                { "message": { "role": "assistant", "content": "Solar is a good start." },
                  "finish_reason": "stop" },
                { "message": { "role": "assistant", "content": "ignored" },
                  "finish_reason": "stop" }
            ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18 }
        });
        assert_eq!(extract_reply(&body).unwrap(), "Solar is a good start.");
    }

    #[test]
    fn extract_reply_rejects_empty_choices() {
        let body = serde_json::json!({ "choices": [] });
        assert!(matches!(
            extract_reply(&body),
            Err(ServiceError::Validation(_))
        ));
        let body = serde_json::json!({ "error": "nope" });
        assert!(matches!(
            extract_reply(&body),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn request_body_matches_the_wire_shape() {
        let turns = vec![ChatTurn::new(
            greenbot_core::domain::Role::User,
            "Hello",
        )];
        let body = CompletionRequest {
            model: Provider::DeepSeek.model(),
            messages: &turns,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }
}
