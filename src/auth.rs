//! Password login, bearer tokens and signed one-time login links.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bcrypt::verify;
use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    app::{auth_user_from_headers, now_iso, AppState},
    error::{ApiError, ApiJson},
};

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn login_link_payload(user_id: &str, ticket: &str, exp: i64) -> String {
    format!("{user_id}:{ticket}:{exp}")
}

pub fn sign_login_ticket(secret: &str, user_id: &str, ticket: &str, exp: i64) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(login_link_payload(user_id, ticket, exp).as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Signature check plus expiry against `now` (unix seconds).
pub fn verify_login_ticket(
    secret: &str,
    user_id: &str,
    ticket: &str,
    exp: i64,
    sig: &str,
    now: i64,
) -> bool {
    if exp < now {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(sig.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(login_link_payload(user_id, ticket, exp).as_bytes());
    mac.verify_slice(&signature_bytes).is_ok()
}

pub async fn issue_auth_token(db: &PgPool, user_id: &str) -> Result<String, ApiError> {
    let token = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO auth_tokens (token, user_id, created_at) VALUES ($1,$2,$3)")
        .bind(&token)
        .bind(user_id)
        .bind(now_iso())
        .execute(db)
        .await?;
    Ok(token)
}

async fn user_profile(db: &PgPool, user_id: &str) -> Result<Value, ApiError> {
    let row = sqlx::query(
        "SELECT id, email, full_name, role, parent_user_id, status FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(json!({
        "id": row.try_get::<String, _>("id")?,
        "email": row.try_get::<String, _>("email")?,
        "fullName": row.try_get::<String, _>("full_name")?,
        "role": row.try_get::<String, _>("role")?,
        "parentUserId": row.try_get::<Option<String>, _>("parent_user_id")?,
        "status": row.try_get::<String, _>("status")?,
    }))
}

async fn finish_login(db: &PgPool, user_id: &str) -> Result<Value, ApiError> {
    if let Err(err) = sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
        .bind(now_iso())
        .bind(user_id)
        .execute(db)
        .await
    {
        tracing::warn!(user_id, error = %err, "failed to record last login");
    }
    let token = issue_auth_token(db, user_id).await?;
    let user = user_profile(db, user_id).await?;
    Ok(json!({ "token": token, "user": user }))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&body.email);
    let row = sqlx::query(
        "SELECT id, password_hash FROM users WHERE email = $1 AND status <> 'disabled'",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::Unauthorized("invalid credentials".into()))?;
    let user_id: String = row.try_get("id")?;
    let password_hash: String = row.try_get("password_hash")?;

    if !verify(&body.password, &password_hash).unwrap_or(false) {
        tracing::info!(email = %email, "login rejected");
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }
    Ok(Json(finish_login(&state.db, &user_id).await?))
}

pub async fn get_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    Ok(Json(user_profile(&state.db, &user_id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginLinkBody {
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn create_login_link(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<LoginLinkBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller_id = auth_user_from_headers(&state, &headers).await?;
    let target_id = match body.agent_id.as_deref().map(str::trim) {
        None | Some("") => caller_id.clone(),
        Some(agent_id) if agent_id == caller_id => caller_id.clone(),
        Some(agent_id) => sqlx::query_scalar::<_, String>(
            "SELECT id FROM users WHERE id = $1 AND parent_user_id = $2 AND role = 'agent'",
        )
        .bind(agent_id)
        .bind(&caller_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("agent not found"))?,
    };

    let ticket = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires = now + ChronoDuration::minutes(state.config.login_link_ttl_minutes);
    let exp = expires.timestamp();
    let sig = sign_login_ticket(&state.config.login_link_secret, &target_id, &ticket, exp)
        .ok_or_else(|| ApiError::Internal("failed to sign login link".into()))?;

    sqlx::query(
        "INSERT INTO login_links (ticket, user_id, created_by, expires_at, used, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(&ticket)
    .bind(&target_id)
    .bind(&caller_id)
    .bind(expires.to_rfc3339())
    .bind(false)
    .bind(now.to_rfc3339())
    .execute(&state.db)
    .await?;

    let url = format!(
        "{}/auth/link?ticket={ticket}&exp={exp}&sig={sig}",
        state.config.public_base_url
    );
    tracing::info!(created_by = %caller_id, user_id = %target_id, "login link issued");
    Ok(Json(json!({
        "url": url,
        "ticket": ticket,
        "exp": exp,
        "sig": sig,
        "expiresAt": expires.to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConsumeLinkBody {
    pub ticket: String,
    pub exp: i64,
    pub sig: String,
}

pub async fn consume_login_link(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<ConsumeLinkBody>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("invalid or expired login link".into());
    let ticket = body.ticket.trim();

    let user_id = sqlx::query_scalar::<_, String>("SELECT user_id FROM login_links WHERE ticket = $1")
        .bind(ticket)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(invalid)?;
    if !verify_login_ticket(
        &state.config.login_link_secret,
        &user_id,
        ticket,
        body.exp,
        &body.sig,
        Utc::now().timestamp(),
    ) {
        return Err(invalid());
    }

    sqlx::query_scalar::<_, String>(
        "UPDATE login_links SET used = true WHERE ticket = $1 AND used = false AND expires_at > $2 \
         RETURNING user_id",
    )
    .bind(ticket)
    .bind(now_iso())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(invalid)?;

    Ok(Json(finish_login(&state.db, &user_id).await?))
}
