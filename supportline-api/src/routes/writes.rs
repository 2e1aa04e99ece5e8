/// Mutating endpoints behind the admission gate chain
///
/// The conversation/message/AI-reply handlers run behind the admission
/// layer: by the time they execute, the request has already passed the rate
/// limiter, kill switch, billing lock, and quota gates, and the normalized
/// [`RequestContext`] sits in request extensions. Automation is the
/// exception: its visitor key arrives in the body, so its handler drives the
/// gate chain itself.
///
/// Persisting the business objects themselves (conversations, messages) is
/// the domain services' concern; these handlers produce the acknowledgement
/// shapes the widget consumes.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use supportline_shared::ai::{ReplyConfig, ReplyMessage};
use supportline_shared::context::RequestContext;

use crate::admission::WriteAction;
use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::admission::context_from_request;

/// Create-conversation request body
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Opening message from the visitor
    pub message: String,
}

/// Create-conversation response
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    /// New conversation ID
    pub conversation_id: Uuid,
}

/// Creates a conversation. Admission already ran in the layer.
pub async fn create_conversation(
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateConversationRequest>,
) -> ApiResult<Json<CreateConversationResponse>> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    tracing::debug!(tenant_id = ?ctx.tenant_id, "conversation created");

    Ok(Json(CreateConversationResponse {
        conversation_id: Uuid::new_v4(),
    }))
}

/// Send-message request body
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Target conversation
    pub conversation_id: Uuid,

    /// Message body
    pub message: String,
}

/// Send-message response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// New message ID
    pub message_id: Uuid,
}

/// Sends a human-authored message. Admission already ran in the layer.
pub async fn send_message(
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<Json<SendMessageResponse>> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    tracing::debug!(
        tenant_id = ?ctx.tenant_id,
        conversation_id = %body.conversation_id,
        "message sent"
    );

    Ok(Json(SendMessageResponse {
        message_id: Uuid::new_v4(),
    }))
}

/// AI-reply request body
#[derive(Debug, Deserialize)]
pub struct AiReplyRequest {
    /// Target conversation
    pub conversation_id: Uuid,

    /// Conversation history to reply to
    pub messages: Vec<ReplyMessage>,
}

/// AI-reply response
#[derive(Debug, Serialize, Deserialize)]
pub struct AiReplyResponse {
    /// Generated reply body
    pub reply: String,
}

/// Generates an AI reply. The admission layer has already charged this
/// request against the M2 allowance.
pub async fn generate_ai_reply(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<AiReplyRequest>,
) -> ApiResult<Json<AiReplyResponse>> {
    let reply = state
        .reply_generator
        .generate(&body.messages, &ReplyConfig::default())
        .await?;

    tracing::debug!(
        tenant_id = ?ctx.tenant_id,
        conversation_id = %body.conversation_id,
        "AI reply generated"
    );

    Ok(Json(AiReplyResponse {
        reply: reply.content,
    }))
}

/// Automation-touch request body
#[derive(Debug, Deserialize)]
pub struct AutomationTouchRequest {
    /// Stable visitor identity used for dedupe
    pub visitor_key: String,
}

/// Automation-touch response
#[derive(Debug, Serialize, Deserialize)]
pub struct AutomationTouchResponse {
    /// Whether the touch was admitted
    pub admitted: bool,
}

/// Records an automation run reaching a visitor (M3).
///
/// Runs the gate chain in-handler because the visitor key lives in the
/// body; a repeated visitor in the same period is admitted but not
/// re-counted. Limiter metadata is stamped onto the response the same way
/// the admission layer does for the other gated routes.
pub async fn automation_touch(
    State(state): State<AppState>,
    req: axum::extract::Request,
) -> ApiResult<Response> {
    let ctx = context_from_request(&req, "automation.touch");
    let body: AutomationTouchRequest = {
        let bytes = axum::body::to_bytes(req.into_body(), 64 * 1024)
            .await
            .map_err(|_| ApiError::BadRequest("Unreadable request body".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("Invalid body: {}", e)))?
    };
    if body.visitor_key.trim().is_empty() {
        return Err(ApiError::BadRequest("visitor_key is required".to_string()));
    }

    let action = WriteAction::AutomationTouch {
        visitor_key: body.visitor_key,
    };
    let outcome = state.admission.evaluate(&ctx, &action).await;
    if !outcome.decision.allowed {
        return Err(ApiError::from_denial(outcome.decision));
    }

    if let Some(tenant_id) = ctx.tenant_id {
        state.admission.record(tenant_id, &action, Utc::now()).await;
    }

    let mut response = Json(AutomationTouchResponse { admitted: true }).into_response();
    if let Some(rate) = &outcome.rate {
        crate::middleware::rate_limit::set_rate_limit_headers(&mut response, rate);
    }
    Ok(response)
}
