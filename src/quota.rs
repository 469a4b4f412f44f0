//! Monthly message quota, usage reporting and the blast-limit check.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    app::{auth_user_from_headers, AppState},
    error::{ApiError, ApiJson},
    store::Store,
};

/// Usage counters are bucketed per calendar month.
pub fn current_period(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Reject the send when the monthly limit is used up.
///
/// Lookup failures do not block sending; accounts without a limit skip the check.
pub async fn enforce_message_quota(
    store: &dyn Store,
    user_id: &str,
    period: &str,
) -> Result<(), ApiError> {
    let limits = match store.subscription_limits(user_id).await {
        Ok(limits) => limits,
        Err(err) => {
            tracing::warn!(user_id, error = %err, "quota lookup failed; sending unchecked");
            return Ok(());
        }
    };
    let Some(limit) = limits.message_limit else {
        return Ok(());
    };
    let used = match store.messages_sent(user_id, period).await {
        Ok(used) => used,
        Err(err) => {
            tracing::warn!(user_id, error = %err, "usage lookup failed; sending unchecked");
            return Ok(());
        }
    };
    if used >= limit {
        return Err(ApiError::QuotaExceeded { limit, used });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlastCheck {
    pub allowed: bool,
    pub requested: i64,
    pub blast_limit: Option<i64>,
    pub message_limit: Option<i64>,
    pub used: i64,
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub async fn check_blast(
    store: &dyn Store,
    user_id: &str,
    period: &str,
    requested: i64,
) -> Result<BlastCheck, ApiError> {
    let limits = store.subscription_limits(user_id).await?;
    let used = store.messages_sent(user_id, period).await?;
    let remaining = limits.message_limit.map(|limit| (limit - used).max(0));

    let reason = if requested <= 0 {
        Some("recipient count must be positive".to_string())
    } else if limits.blast_limit.is_some_and(|limit| requested > limit) {
        Some("recipient count exceeds the blast limit".to_string())
    } else if remaining.is_some_and(|left| requested > left) {
        Some("not enough messages left this month".to_string())
    } else {
        None
    };

    Ok(BlastCheck {
        allowed: reason.is_none(),
        requested,
        blast_limit: limits.blast_limit,
        message_limit: limits.message_limit,
        used,
        remaining,
        reason,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlastCheckBody {
    pub recipient_count: i64,
}

pub async fn post_blast_limit_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<BlastCheckBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let check = check_blast(
        state.store.as_ref(),
        &user_id,
        &current_period(Utc::now()),
        body.recipient_count,
    )
    .await?;
    Ok(Json(check))
}

pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let period = current_period(Utc::now());
    let limits = state.store.subscription_limits(&user_id).await?;
    let sent = state.store.messages_sent(&user_id, &period).await?;
    Ok(Json(serde_json::json!({
        "period": period,
        "messagesSent": sent,
        "messageLimit": limits.message_limit,
        "blastLimit": limits.blast_limit,
        "remaining": limits.message_limit.map(|limit| (limit - sent).max(0)),
    })))
}
