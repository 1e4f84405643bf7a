use crate::api::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, HealthResponse};
use crate::api::{ApiError, ApiResult, ApiState};
use crate::inference::prompt::ChatPrompt;
use crate::types::message::{Role, Turn};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.service.config().model_id,
        ready: state.service.is_ready(),
    })
}

/// Fold an OpenAI message list into a prompt.
///
/// A system message replaces the system prompt. A user message becomes the
/// pending message; an assistant message pairs with it into a history turn.
/// Returns `None` when no user message is left pending.
pub fn fold_messages(messages: &[ChatMessage], default_system: &str) -> Option<ChatPrompt> {
    let mut system = default_system.to_string();
    let mut history = Vec::new();
    let mut pending = String::new();

    for message in messages {
        let content = message.content.clone().unwrap_or_default();
        match message.role.as_str() {
            r if r == Role::System.as_str() => system = content,
            r if r == Role::User.as_str() => pending = content,
            r if r == Role::Assistant.as_str() => {
                if !pending.is_empty() {
                    history.push(Turn::new(std::mem::take(&mut pending), content));
                }
            }
            other => tracing::debug!("Ignoring message with role {:?}", other),
        }
    }

    if pending.is_empty() {
        None
    } else {
        Some(ChatPrompt::new(system, history, pending))
    }
}

pub async fn chat_completions(
    State(state): State<ApiState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> ApiResult<Json<ChatCompletionResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let config = state.service.config();
    let prompt = fold_messages(&request.messages, &config.system_prompt)
        .ok_or_else(|| ApiError::BadRequest("No user message provided".to_string()))?;

    if let Some(model) = request.model.as_deref().filter(|m| *m != config.model_id) {
        tracing::debug!("Request asked for {}, answering with {}", model, config.model_id);
    }
    let preview: String = prompt.user.chars().take(50).collect();
    tracing::info!("Generating response for: {}...", preview);

    let completion = state.service.complete(prompt, &request.overrides()).await?;
    tracing::info!(
        "Response generated ({} chars, {} tokens)",
        completion.text.chars().count(),
        completion.stats.completion_tokens
    );

    Ok(Json(ChatCompletionResponse::new(
        config.model_id,
        completion.text,
        &completion.stats,
    )))
}
