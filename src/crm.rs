//! Inbox and sales-pipeline reads for the dashboard, plus moving leads between stages.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{
    app::{auth_user_from_headers, now_iso, AppState},
    error::{ApiError, ApiJson},
    store::postgres::{parse_message_row, MESSAGE_COLUMNS},
    types::Message,
};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub lead_id: Option<String>,
    pub integration_config_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_identifier: Option<String>,
    pub last_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub pipeline_id: String,
    pub name: String,
    pub position: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub customer_id: Option<String>,
    pub pipeline_stage_id: Option<String>,
    pub value: f64,
    pub company_name: String,
    pub contact_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Attach stages to their pipelines, ordered by position then creation time.
fn group_stages(mut pipelines: Vec<Pipeline>, mut stages: Vec<Stage>) -> Vec<Pipeline> {
    stages.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    for stage in stages {
        if let Some(pipeline) = pipelines.iter_mut().find(|p| p.id == stage.pipeline_id) {
            pipeline.stages.push(stage);
        }
    }
    pipelines
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
}

impl PageQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
    }
}

pub async fn get_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let rows = sqlx::query(
        "SELECT c.id, c.lead_id, c.integration_config_id, c.created_at, c.updated_at, \
           (SELECT cu.name FROM conversation_participants p JOIN customers cu ON cu.id = p.customer_id \
             WHERE p.conversation_id = c.id AND p.role = 'member' LIMIT 1) AS contact_name, \
           (SELECT p.external_user_identifier FROM conversation_participants p \
             WHERE p.conversation_id = c.id AND p.role = 'member' LIMIT 1) AS contact_identifier, \
           (SELECT m.content FROM messages m WHERE m.conversation_id = c.id \
             ORDER BY m.created_at DESC LIMIT 1) AS last_message \
         FROM conversations c WHERE c.user_id = $1 ORDER BY c.updated_at DESC LIMIT $2",
    )
    .bind(&user_id)
    .bind(page.limit())
    .fetch_all(&state.db)
    .await?;

    let conversations = rows
        .iter()
        .map(|row| {
            Ok(ConversationSummary {
                id: row.try_get("id")?,
                lead_id: row.try_get("lead_id")?,
                integration_config_id: row.try_get("integration_config_id")?,
                contact_name: row.try_get("contact_name")?,
                contact_identifier: row.try_get("contact_identifier")?,
                last_message: row.try_get("last_message")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;
    Ok(Json(conversations))
}

pub async fn get_conversation_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    sqlx::query_scalar::<_, String>("SELECT id FROM conversations WHERE id = $1 AND user_id = $2")
        .bind(&conversation_id)
        .bind(&user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("conversation not found"))?;

    let rows = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC"
    ))
    .bind(&conversation_id)
    .fetch_all(&state.db)
    .await?;
    let messages = rows
        .iter()
        .map(parse_message_row)
        .collect::<Result<Vec<Message>, _>>()?;
    Ok(Json(messages))
}

pub async fn get_pipelines(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let pipelines = sqlx::query(
        "SELECT id, name, created_at FROM pipelines WHERE user_id = $1 ORDER BY created_at ASC",
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?
    .iter()
    .map(|row| {
        Ok(Pipeline {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
            stages: Vec::new(),
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let stages = sqlx::query(
        "SELECT s.id, s.pipeline_id, s.name, s.position, s.created_at FROM pipeline_stages s \
         JOIN pipelines p ON p.id = s.pipeline_id WHERE p.user_id = $1",
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?
    .iter()
    .map(|row| {
        Ok(Stage {
            id: row.try_get("id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            name: row.try_get("name")?,
            position: row.try_get("position")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Json(group_stages(pipelines, stages)))
}

const LEAD_COLUMNS: &str =
    "id, customer_id, pipeline_stage_id, value, company_name, contact_name, created_at, updated_at";

fn parse_lead_row(row: &sqlx::postgres::PgRow) -> Result<Lead, sqlx::Error> {
    Ok(Lead {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        pipeline_stage_id: row.try_get("pipeline_stage_id")?,
        value: row.try_get("value")?,
        company_name: row.try_get("company_name")?,
        contact_name: row.try_get("contact_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn get_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let rows = sqlx::query(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads WHERE user_id = $1 ORDER BY updated_at DESC"
    ))
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?;
    let leads = rows
        .iter()
        .map(parse_lead_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(leads))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveLeadBody {
    pub stage_id: String,
}

pub async fn move_lead_stage(
    Path(lead_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<MoveLeadBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    sqlx::query_scalar::<_, String>(
        "SELECT s.id FROM pipeline_stages s JOIN pipelines p ON p.id = s.pipeline_id \
         WHERE s.id = $1 AND p.user_id = $2",
    )
    .bind(&body.stage_id)
    .bind(&user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("stage not found"))?;

    let row = sqlx::query(&format!(
        "UPDATE leads SET pipeline_stage_id = $1, updated_at = $2 WHERE id = $3 AND user_id = $4 \
         RETURNING {LEAD_COLUMNS}"
    ))
    .bind(&body.stage_id)
    .bind(now_iso())
    .bind(&lead_id)
    .bind(&user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("lead not found"))?;

    let lead = parse_lead_row(&row)?;
    tracing::info!(lead_id = %lead.id, stage_id = %body.stage_id, "lead moved");
    Ok(Json(lead))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, pipeline_id: &str, position: i32) -> Stage {
        Stage {
            id: id.into(),
            pipeline_id: pipeline_id.into(),
            name: id.to_uppercase(),
            position,
            created_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    fn pipeline(id: &str) -> Pipeline {
        Pipeline {
            id: id.into(),
            name: id.into(),
            created_at: now_iso(),
            stages: Vec::new(),
        }
    }

    #[test]
    fn test_stages_grouped_in_position_order() {
        let grouped = group_stages(
            vec![pipeline("sales"), pipeline("support")],
            vec![
                stage("won", "sales", 3),
                stage("new", "sales", 1),
                stage("open", "support", 1),
                stage("orphan", "gone", 1),
                stage("qualified", "sales", 2),
            ],
        );
        let sales = grouped[0].stages.iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
        assert_eq!(sales, ["new", "qualified", "won"]);
        assert_eq!(grouped[1].stages.len(), 1);
    }

    #[test]
    fn test_equal_positions_keep_creation_order() {
        let mut later = stage("later", "sales", 1);
        later.created_at = "2026-02-01T00:00:00+00:00".into();
        let grouped = group_stages(
            vec![pipeline("sales")],
            vec![later, stage("earlier", "sales", 1)],
        );
        let ids = grouped[0].stages.iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["earlier", "later"]);
    }

    #[test]
    fn test_page_limit_is_clamped() {
        assert_eq!(PageQuery { limit: None }.limit(), DEFAULT_PAGE);
        assert_eq!(PageQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(PageQuery { limit: Some(10_000) }.limit(), MAX_PAGE);
    }
}
