//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use greenbot_core::domain::{mask_key, CredentialUpdate, QuizAnswer, QuizResult, Sender};
use greenbot_core::persona::PersonaId;
use greenbot_core::ports::ConversationRepository;
use greenbot_core::quiz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_conversations_handler,
        get_conversation_handler,
        delete_conversation_handler,
        get_credentials_handler,
        save_credentials_handler,
        save_quiz_result_handler,
    ),
    components(
        schemas(
            ConversationSummary,
            ConversationDetail,
            MessageBody,
            MaskedCredentials,
            SaveCredentialsRequest,
            QuizSubmission,
            SubmittedAnswer,
            QuizResultResponse,
        )
    ),
    tags(
        (name = "GreenBot API", description = "Conversations, provider credentials, and quiz results.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ConversationSummary {
    id: Uuid,
    title: String,
    persona: String,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct MessageBody {
    id: Uuid,
    content: String,
    sender: String,
    persona: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationDetail {
    id: Uuid,
    title: String,
    persona: String,
    messages: Vec<MessageBody>,
}

/// Stored keys, masked for display. Full key material never leaves the server.
#[derive(Serialize, ToSchema)]
pub struct MaskedCredentials {
    openai: Option<String>,
    deepseek: Option<String>,
    grok: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
pub struct SaveCredentialsRequest {
    openai_key: Option<String>,
    deepseek_key: Option<String>,
    grok_key: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmittedAnswer {
    question_id: String,
    selected_answer: i32,
    correct_answer: i32,
}

/// A completed quiz. `quiz_type` is the persona slug; the quiz title is
/// derived from it server-side.
#[derive(Deserialize, ToSchema)]
pub struct QuizSubmission {
    quiz_type: String,
    answers: Vec<SubmittedAnswer>,
}

#[derive(Serialize, ToSchema)]
pub struct QuizResultResponse {
    id: Uuid,
    score: i32,
    total_questions: i32,
    percentage: i32,
    feedback: String,
}

#[derive(Deserialize)]
pub struct BestScoreParams {
    quiz_type: String,
}

fn internal(context: &str) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
}

//=========================================================================================
// Conversation Handlers
//=========================================================================================

/// List the caller's conversations, most recently active first.
#[utoipa::path(
    get,
    path = "/conversations",
    responses(
        (status = 200, description = "Conversations for the caller", body = [ConversationSummary]),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let conversations = state
        .db
        .list_conversations(Some(user_id))
        .await
        .map_err(|e| {
            error!(%user_id, "Failed to list conversations: {:?}", e);
            internal("Failed to list conversations")
        })?;

    let body: Vec<ConversationSummary> = conversations
        .into_iter()
        .map(|c| ConversationSummary {
            id: c.id,
            title: c.title,
            persona: c.persona.display_name().to_string(),
            updated_at: c.updated_at,
        })
        .collect();
    Ok(Json(body))
}

/// Load one conversation with its messages in timestamp order.
#[utoipa::path(
    get,
    path = "/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "The conversation and its messages", body = ConversationDetail),
        (status = 404, description = "Unknown conversation"),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (conversation, messages) =
        state.db.conversation_with_messages(id).await.map_err(|e| {
            error!(%id, "Failed to load conversation: {:?}", e);
            (StatusCode::NOT_FOUND, "Conversation not found".to_string())
        })?;

    // Conversations are private to their owner.
    if conversation.user_id != Some(user_id) {
        return Err((StatusCode::NOT_FOUND, "Conversation not found".to_string()));
    }

    let body = ConversationDetail {
        id: conversation.id,
        title: conversation.title,
        persona: conversation.persona.display_name().to_string(),
        messages: messages
            .into_iter()
            .map(|m| MessageBody {
                id: m.id,
                content: m.content,
                sender: match m.sender {
                    Sender::User => "user".to_string(),
                    Sender::Bot => "bot".to_string(),
                },
                persona: m.persona.map(|p| p.display_name().to_string()),
                timestamp: m.timestamp,
            })
            .collect(),
    };
    Ok(Json(body))
}

/// Delete a conversation and all of its messages.
#[utoipa::path(
    delete,
    path = "/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown conversation"),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (conversation, _) = state.db.conversation_with_messages(id).await.map_err(|_| {
        (StatusCode::NOT_FOUND, "Conversation not found".to_string())
    })?;
    if conversation.user_id != Some(user_id) {
        return Err((StatusCode::NOT_FOUND, "Conversation not found".to_string()));
    }

    state.db.delete_conversation(id).await.map_err(|e| {
        error!(%id, "Failed to delete conversation: {:?}", e);
        internal("Failed to delete conversation")
    })?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Credential Handlers
//=========================================================================================

/// Fetch the caller's stored provider keys, masked for display.
#[utoipa::path(
    get,
    path = "/credentials",
    responses(
        (status = 200, description = "Masked keys", body = MaskedCredentials),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn get_credentials_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = state.credentials.get_credentials(user_id).await.map_err(|e| {
        error!(%user_id, "Failed to fetch credentials: {:?}", e);
        internal("Failed to fetch credentials")
    })?;

    let body = match record {
        Some(record) => MaskedCredentials {
            openai: record.openai_key.as_deref().map(mask_key),
            deepseek: record.deepseek_key.as_deref().map(mask_key),
            grok: record.grok_key.as_deref().map(mask_key),
            updated_at: Some(record.updated_at),
        },
        None => MaskedCredentials {
            openai: None,
            deepseek: None,
            grok: None,
            updated_at: None,
        },
    };
    Ok(Json(body))
}

/// Save provider keys. Partial: omitted providers keep their stored keys.
#[utoipa::path(
    put,
    path = "/credentials",
    request_body = SaveCredentialsRequest,
    responses(
        (status = 204, description = "Saved"),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Store failure; nothing was written")
    )
)]
pub async fn save_credentials_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<SaveCredentialsRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let update = CredentialUpdate {
        openai_key: req.openai_key,
        deepseek_key: req.deepseek_key,
        grok_key: req.grok_key,
    };
    state
        .credentials
        .save_credentials(user_id, &update)
        .await
        .map_err(|e| {
            // Log the operation, never the key material.
            error!(%user_id, "Failed to save credentials: {:?}", e);
            internal("Failed to save API keys")
        })?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Quiz Handlers
//=========================================================================================

/// Record a completed quiz. The server grades the submitted answers.
#[utoipa::path(
    post,
    path = "/quiz/results",
    request_body = QuizSubmission,
    responses(
        (status = 201, description = "Result stored", body = QuizResultResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn save_quiz_result_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(submission): Json<QuizSubmission>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut answers: Vec<QuizAnswer> = submission
        .answers
        .into_iter()
        .map(|a| QuizAnswer {
            question_id: a.question_id,
            selected_answer: a.selected_answer,
            correct_answer: a.correct_answer,
            is_correct: false,
        })
        .collect();
    let score = quiz::mark(&mut answers);
    let quiz_title = PersonaId::from_slug(&submission.quiz_type).quiz_title();

    let result = QuizResult {
        id: Uuid::new_v4(),
        user_id,
        quiz_type: submission.quiz_type,
        quiz_title: quiz_title.to_string(),
        score: score.correct,
        total_questions: score.total,
        percentage: score.percentage,
        answers,
        completed_at: Utc::now(),
    };

    let id = state.quizzes.save_result(&result).await.map_err(|e| {
        error!(%user_id, quiz_type = %result.quiz_type, "Failed to save quiz result: {:?}", e);
        internal("Failed to save quiz result")
    })?;

    let body = QuizResultResponse {
        id,
        score: score.correct,
        total_questions: score.total,
        percentage: score.percentage,
        feedback: quiz::feedback(score.percentage).to_string(),
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// The caller's quiz history, most recent first.
pub async fn quiz_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let results = state.quizzes.history(user_id, 50).await.map_err(|e| {
        error!(%user_id, "Failed to fetch quiz history: {:?}", e);
        internal("Failed to fetch quiz history")
    })?;

    let body: Vec<QuizResultResponse> = results
        .into_iter()
        .map(|r| QuizResultResponse {
            id: r.id,
            score: r.score,
            total_questions: r.total_questions,
            percentage: r.percentage,
            feedback: quiz::feedback(r.percentage).to_string(),
        })
        .collect();
    Ok(Json(body))
}

/// The caller's best percentage for one quiz type, if any attempts exist.
pub async fn best_score_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(params): Query<BestScoreParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let best = state
        .quizzes
        .best_score(user_id, &params.quiz_type)
        .await
        .map_err(|e| {
            error!(%user_id, quiz_type = %params.quiz_type, "Failed to fetch best score: {:?}", e);
            internal("Failed to fetch best score")
        })?;
    Ok(Json(serde_json::json!({
        "quiz_type": params.quiz_type,
        "best_percentage": best,
    })))
}
