/// Admission middleware for mutating routes
///
/// Every mutating route is wrapped in [`admission_layer`] with the
/// [`WriteAction`] that route performs. The layer normalizes the request
/// into a [`RequestContext`], runs the full gate chain, and converts a
/// denial into the matching HTTP error before the handler ever runs. On
/// success it forwards the request and, if the handler produced a success
/// status, records the consumed usage.
///
/// Caller authority is resolved once here from the headers the edge proxy
/// stamps after authentication; handlers read the finished context from
/// request extensions instead of re-deriving it.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use supportline_shared::context::{CallerAuthority, RequestContext};

use crate::admission::WriteAction;
use crate::app::AppState;
use crate::error::ApiError;

/// Header carrying the resolved tenant for widget traffic.
pub const TENANT_HEADER: &str = "x-supportline-tenant";

/// Header stamped by the edge proxy after credential verification.
pub const AUTHORITY_HEADER: &str = "x-supportline-authority";

/// Builds the normalized request context from proxy-stamped headers.
///
/// The authority header is only trustworthy because the edge strips it from
/// inbound traffic and re-stamps it after verifying credentials; an
/// unrecognized or absent value degrades to anonymous.
pub fn context_from_request(req: &Request, action: &str) -> RequestContext {
    let tenant_id = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    let authority = match req
        .headers()
        .get(AUTHORITY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some("operator") => CallerAuthority::Operator,
        Some("internal") => CallerAuthority::InternalAutomation,
        Some("portal") => CallerAuthority::PortalUser,
        Some("widget") => CallerAuthority::Widget,
        _ => CallerAuthority::Anonymous,
    };

    let caller_ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    RequestContext::new(tenant_id, caller_ip, authority, action)
}

/// Gate-chain middleware; mount with the route's [`WriteAction`] as state.
pub async fn admission_layer(
    State((state, action)): State<(AppState, WriteAction)>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = context_from_request(&req, action_name(&action));

    let outcome = state.admission.evaluate(&ctx, &action).await;
    if !outcome.decision.allowed {
        return Err(ApiError::from_denial(outcome.decision));
    }

    let tenant_id = ctx.tenant_id;
    req.extensions_mut().insert(ctx);
    let mut response = next.run(req).await;

    if let Some(rate) = &outcome.rate {
        super::rate_limit::set_rate_limit_headers(&mut response, rate);
    }

    // Usage is consumed only after the write actually landed.
    if response.status().is_success() {
        if let Some(tenant_id) = tenant_id {
            state
                .admission
                .record(tenant_id, &action, chrono::Utc::now())
                .await;
        }
    }

    Ok(response)
}

fn action_name(action: &WriteAction) -> &'static str {
    match action {
        WriteAction::CreateConversation => "conversations.create",
        WriteAction::SendHumanMessage => "messages.send",
        WriteAction::GenerateAiReply => "messages.ai_reply",
        WriteAction::AutomationTouch { .. } => "automation.touch",
    }
}
