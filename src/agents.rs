//! Agents: sub-users created by an account owner.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, DEFAULT_COST};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    app::{auth_user_from_headers, now_iso, AppState},
    auth::normalize_email,
    error::{ApiError, ApiJson},
};

const MIN_PASSWORD_LEN: usize = 8;
const AGENT_COLUMNS: &str =
    "id, email, full_name, phone, status, parent_user_id, last_login_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub status: String,
    pub parent_user_id: String,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_agent_row(row: &PgRow) -> Result<Agent, sqlx::Error> {
    Ok(Agent {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        status: row.try_get("status")?,
        parent_user_id: row.try_get("parent_user_id")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn validate_email(email: &str) -> Result<String, ApiError> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::bad_request("a valid email is required")),
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_status(status: &str) -> Result<String, ApiError> {
    match status.trim() {
        s @ ("active" | "disabled") => Ok(s.to_string()),
        _ => Err(ApiError::bad_request("status must be active or disabled")),
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    hash(password, DEFAULT_COST)
        .map_err(|err| ApiError::Internal(format!("failed to hash password: {err}")))
}

fn email_conflict(err: sqlx::Error) -> ApiError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::Conflict("email already registered".into())
        }
        _ => err.into(),
    }
}

pub async fn get_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = auth_user_from_headers(&state, &headers).await?;
    let rows = sqlx::query(&format!(
        "SELECT {AGENT_COLUMNS} FROM users WHERE parent_user_id = $1 AND role = 'agent' ORDER BY created_at ASC"
    ))
    .bind(&owner_id)
    .fetch_all(&state.db)
    .await?;
    let agents = rows
        .iter()
        .map(parse_agent_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(agents))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentBody {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<CreateAgentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = auth_user_from_headers(&state, &headers).await?;
    let email = validate_email(&body.email)?;
    validate_password(&body.password)?;
    let full_name = body.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(ApiError::bad_request("fullName is required"));
    }

    let taken = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if taken.is_some() {
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let now = now_iso();
    let agent = Agent {
        id: Uuid::new_v4().to_string(),
        email,
        full_name,
        phone: body.phone.trim().to_string(),
        status: "active".into(),
        parent_user_id: owner_id,
        last_login_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let password_hash = hash_password(&body.password)?;

    sqlx::query(
        "INSERT INTO users (id, email, full_name, phone, password_hash, role, parent_user_id, status, created_at, updated_at) \
         VALUES ($1,$2,$3,$4,$5,'agent',$6,$7,$8,$9)",
    )
    .bind(&agent.id)
    .bind(&agent.email)
    .bind(&agent.full_name)
    .bind(&agent.phone)
    .bind(&password_hash)
    .bind(&agent.parent_user_id)
    .bind(&agent.status)
    .bind(&agent.created_at)
    .bind(&agent.updated_at)
    .execute(&state.db)
    .await
    .map_err(email_conflict)?;

    tracing::info!(owner_id = %agent.parent_user_id, agent_id = %agent.id, "agent created");
    Ok((StatusCode::CREATED, Json(agent)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAgentBody {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub password: Option<String>,
}

pub async fn patch_agent(
    Path(agent_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<PatchAgentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = auth_user_from_headers(&state, &headers).await?;
    let row = sqlx::query(&format!(
        "SELECT {AGENT_COLUMNS} FROM users WHERE id = $1 AND parent_user_id = $2 AND role = 'agent'"
    ))
    .bind(&agent_id)
    .bind(&owner_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("agent not found"))?;
    let mut agent = parse_agent_row(&row)?;

    if let Some(v) = body.email {
        agent.email = validate_email(&v)?;
    }
    if let Some(v) = body.full_name {
        let v = v.trim();
        if v.is_empty() {
            return Err(ApiError::bad_request("fullName cannot be empty"));
        }
        agent.full_name = v.to_string();
    }
    if let Some(v) = body.phone {
        agent.phone = v.trim().to_string();
    }
    if let Some(v) = body.status {
        agent.status = validate_status(&v)?;
    }
    let password_hash = match body.password {
        Some(password) => {
            validate_password(&password)?;
            Some(hash_password(&password)?)
        }
        None => None,
    };
    agent.updated_at = now_iso();

    sqlx::query(
        "UPDATE users SET email = $1, full_name = $2, phone = $3, status = $4, \
         password_hash = COALESCE($5, password_hash), updated_at = $6 WHERE id = $7",
    )
    .bind(&agent.email)
    .bind(&agent.full_name)
    .bind(&agent.phone)
    .bind(&agent.status)
    .bind(password_hash)
    .bind(&agent.updated_at)
    .bind(&agent.id)
    .execute(&state.db)
    .await
    .map_err(email_conflict)?;

    if agent.status == "disabled" {
        sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1")
            .bind(&agent.id)
            .execute(&state.db)
            .await?;
    }
    Ok(Json(agent))
}

pub async fn delete_agent(
    Path(agent_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = auth_user_from_headers(&state, &headers).await?;
    let result =
        sqlx::query("DELETE FROM users WHERE id = $1 AND parent_user_id = $2 AND role = 'agent'")
            .bind(&agent_id)
            .bind(&owner_id)
            .execute(&state.db)
            .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("agent not found"));
    }
    tracing::info!(owner_id = %owner_id, agent_id = %agent_id, "agent deleted");
    Ok(Json(json!({ "ok": true })))
}
