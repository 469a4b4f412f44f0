use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    agents, appointments, auth, broadcast,
    config::Config,
    crm, dispatch,
    error::ApiError,
    evolution::{self, EvolutionClient, Gateway},
    media, quota, segments,
    store::{PgStore, Store},
    uploads, webhook,
};

const INTERNAL_CALL_HEADER: &str = "x-internal-call";
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn Gateway>,
    pub config: Config,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

pub async fn auth_user_from_headers(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    sqlx::query_scalar::<_, String>(
        "SELECT t.user_id FROM auth_tokens t JOIN users u ON u.id = t.user_id \
         WHERE t.token = $1 AND u.status <> 'disabled'",
    )
    .bind(&token)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::Unauthorized("invalid token".into()))
}

/// Who is calling: a signed-in user, or another backend service holding the
/// service-role key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(String),
    Service,
}

impl Caller {
    /// The account the request acts for. Service calls must name it in `userId`.
    pub fn acting_user(&self, requested: Option<&str>) -> Result<String, ApiError> {
        match self {
            Self::User(id) => Ok(id.clone()),
            Self::Service => requested
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ApiError::bad_request("userId is required for internal calls")),
        }
    }

    /// Resources owned by somebody else are reported as missing.
    pub fn ensure_owner(&self, owner_id: &str, requested: Option<&str>) -> Result<(), ApiError> {
        let allowed = match self {
            Self::User(id) => id == owner_id,
            Self::Service => requested.map_or(true, |id| id.trim() == owner_id),
        };
        if allowed {
            Ok(())
        } else {
            Err(ApiError::not_found("not found"))
        }
    }
}

pub async fn resolve_caller(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<Caller, ApiError> {
    let internal = headers
        .get(INTERNAL_CALL_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
    if !internal {
        return auth_user_from_headers(state, headers).await.map(Caller::User);
    }

    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    match state.config.service_role_key.as_deref() {
        Some(key) if !key.is_empty() && key == token => Ok(Caller::Service),
        _ => {
            tracing::warn!("internal call rejected: service key mismatch");
            Err(ApiError::Unauthorized("invalid service credentials".into()))
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::get_me))
        .route("/api/auth/login-link", post(auth::create_login_link))
        .route(
            "/api/auth/login-link/consume",
            post(auth::consume_login_link),
        )
        .route("/api/messages/send", post(dispatch::post_send_message))
        .route("/api/evolution", post(evolution::proxy_action))
        .route(
            "/api/broadcasts",
            get(broadcast::list_broadcasts).post(broadcast::create_broadcast),
        )
        .route("/api/broadcasts/{broadcast_id}", get(broadcast::get_broadcast))
        .route(
            "/api/broadcasts/{broadcast_id}/resume",
            post(broadcast::resume_broadcast),
        )
        .route("/api/usage", get(quota::get_usage))
        .route("/api/blast-limit/check", post(quota::post_blast_limit_check))
        .route(
            "/api/segments",
            get(segments::get_segments).post(segments::create_segment),
        )
        .route(
            "/api/segments/from-contacts",
            post(segments::create_segment_from_contacts),
        )
        .route("/api/segments/{segment_id}", delete(segments::delete_segment))
        .route(
            "/api/segments/{segment_id}/contacts",
            post(segments::add_segment_contact),
        )
        .route(
            "/api/segments/{segment_id}/contacts/{customer_id}",
            delete(segments::remove_segment_contact),
        )
        .route(
            "/api/segments/{segment_id}/import",
            post(segments::import_segment_csv),
        )
        .route(
            "/api/agents",
            get(agents::get_agents).post(agents::create_agent),
        )
        .route(
            "/api/agents/{agent_id}",
            patch(agents::patch_agent).delete(agents::delete_agent),
        )
        .route(
            "/api/appointments",
            get(appointments::get_appointments).post(appointments::create_appointment),
        )
        .route(
            "/api/appointments/{appointment_id}",
            patch(appointments::patch_appointment).delete(appointments::delete_appointment),
        )
        .route("/api/conversations", get(crm::get_conversations))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(crm::get_conversation_messages),
        )
        .route("/api/pipelines", get(crm::get_pipelines))
        .route("/api/leads", get(crm::get_leads))
        .route("/api/leads/{lead_id}/stage", patch(crm::move_lead_stage))
        .route(
            "/api/uploads",
            post(uploads::upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/media/{file_name}", get(media::serve_stored_media))
        .route(
            "/api/webhooks/evolution/{config_id}",
            post(webhook::evolution_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.media_storage_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create media storage directory {}",
                config.media_storage_dir.display()
            )
        })?;

    let db = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("failed to run sqlx migrations")?;

    let gateway =
        EvolutionClient::new(config.gateway_timeout).context("failed to build gateway client")?;
    let port = config.port;
    let state = Arc::new(AppState {
        store: Arc::new(PgStore::new(db.clone())),
        gateway: Arc::new(gateway),
        db,
        config,
    });

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(port, "inbox server listening");
    axum::serve(listener, router(state))
        .await
        .context("server runtime failure")?;
    Ok(())
}
