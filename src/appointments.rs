//! Appointment CRUD.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    app::{auth_user_from_headers, now_iso, AppState},
    error::{ApiError, ApiJson},
};

const APPOINTMENT_COLUMNS: &str =
    "id, user_id, customer_id, lead_id, title, notes, starts_at, ends_at, status, created_at, updated_at";
const STATUSES: [&str; 3] = ["scheduled", "completed", "cancelled"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    pub customer_id: Option<String>,
    pub lead_id: Option<String>,
    pub title: String,
    pub notes: String,
    pub starts_at: String,
    pub ends_at: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_appointment_row(row: &PgRow) -> Result<Appointment, sqlx::Error> {
    Ok(Appointment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        customer_id: row.try_get("customer_id")?,
        lead_id: row.try_get("lead_id")?,
        title: row.try_get("title")?,
        notes: row.try_get("notes")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<FixedOffset>, ApiError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map_err(|_| ApiError::BadRequest(format!("{field} must be an RFC 3339 timestamp")))
}

/// Checks the time window and status, and canonicalizes timestamps to UTC RFC 3339.
fn validate_appointment(appointment: &mut Appointment) -> Result<(), ApiError> {
    if appointment.title.trim().is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }
    let starts = parse_time("startsAt", &appointment.starts_at)?;
    let ends = parse_time("endsAt", &appointment.ends_at)?;
    if starts >= ends {
        return Err(ApiError::bad_request("startsAt must be before endsAt"));
    }
    if !STATUSES.contains(&appointment.status.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "status must be one of {}",
            STATUSES.join(", ")
        )));
    }
    appointment.title = appointment.title.trim().to_string();
    appointment.starts_at = starts.with_timezone(&Utc).to_rfc3339();
    appointment.ends_at = ends.with_timezone(&Utc).to_rfc3339();
    Ok(())
}

async fn ensure_customer_owned(
    state: &AppState,
    user_id: &str,
    customer_id: Option<&str>,
) -> Result<(), ApiError> {
    let Some(customer_id) = customer_id else {
        return Ok(());
    };
    sqlx::query_scalar::<_, String>("SELECT id FROM customers WHERE id = $1 AND user_id = $2")
        .bind(customer_id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("customer not found"))?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub async fn get_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(range): Query<AppointmentRange>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let from = range
        .from
        .as_deref()
        .map(|v| parse_time("from", v).map(|t| t.with_timezone(&Utc).to_rfc3339()))
        .transpose()?;
    let to = range
        .to
        .as_deref()
        .map(|v| parse_time("to", v).map(|t| t.with_timezone(&Utc).to_rfc3339()))
        .transpose()?;

    let rows = sqlx::query(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE user_id = $1 \
         AND ($2::text IS NULL OR starts_at >= $2) AND ($3::text IS NULL OR starts_at < $3) \
         ORDER BY starts_at ASC"
    ))
    .bind(&user_id)
    .bind(from)
    .bind(to)
    .fetch_all(&state.db)
    .await?;
    let appointments = rows
        .iter()
        .map(parse_appointment_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(appointments))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentBody {
    pub title: String,
    #[serde(default)]
    pub notes: String,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<CreateAppointmentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let now = now_iso();
    let mut appointment = Appointment {
        id: Uuid::new_v4().to_string(),
        user_id,
        customer_id: body.customer_id.filter(|v| !v.trim().is_empty()),
        lead_id: body.lead_id.filter(|v| !v.trim().is_empty()),
        title: body.title,
        notes: body.notes,
        starts_at: body.starts_at,
        ends_at: body.ends_at,
        status: body.status.unwrap_or_else(|| "scheduled".into()),
        created_at: now.clone(),
        updated_at: now,
    };
    validate_appointment(&mut appointment)?;
    ensure_customer_owned(&state, &appointment.user_id, appointment.customer_id.as_deref()).await?;

    sqlx::query(&format!(
        "INSERT INTO appointments ({APPOINTMENT_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)"
    ))
    .bind(&appointment.id)
    .bind(&appointment.user_id)
    .bind(&appointment.customer_id)
    .bind(&appointment.lead_id)
    .bind(&appointment.title)
    .bind(&appointment.notes)
    .bind(&appointment.starts_at)
    .bind(&appointment.ends_at)
    .bind(&appointment.status)
    .bind(&appointment.created_at)
    .bind(&appointment.updated_at)
    .execute(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAppointmentBody {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    pub customer_id: Option<String>,
    pub lead_id: Option<String>,
    pub status: Option<String>,
}

fn apply_patch(appointment: &mut Appointment, body: PatchAppointmentBody) {
    if let Some(v) = body.title {
        appointment.title = v;
    }
    if let Some(v) = body.notes {
        appointment.notes = v;
    }
    if let Some(v) = body.starts_at {
        appointment.starts_at = v;
    }
    if let Some(v) = body.ends_at {
        appointment.ends_at = v;
    }
    if let Some(v) = body.customer_id {
        appointment.customer_id = Some(v).filter(|v| !v.trim().is_empty());
    }
    if let Some(v) = body.lead_id {
        appointment.lead_id = Some(v).filter(|v| !v.trim().is_empty());
    }
    if let Some(v) = body.status {
        appointment.status = v.trim().to_string();
    }
}

pub async fn patch_appointment(
    Path(appointment_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<PatchAppointmentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let row = sqlx::query(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 AND user_id = $2"
    ))
    .bind(&appointment_id)
    .bind(&user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("appointment not found"))?;
    let mut appointment = parse_appointment_row(&row)?;

    apply_patch(&mut appointment, body);
    validate_appointment(&mut appointment)?;
    ensure_customer_owned(&state, &user_id, appointment.customer_id.as_deref()).await?;
    appointment.updated_at = now_iso();

    sqlx::query(
        "UPDATE appointments SET title = $1, notes = $2, starts_at = $3, ends_at = $4, customer_id = $5, \
         lead_id = $6, status = $7, updated_at = $8 WHERE id = $9 AND user_id = $10",
    )
    .bind(&appointment.title)
    .bind(&appointment.notes)
    .bind(&appointment.starts_at)
    .bind(&appointment.ends_at)
    .bind(&appointment.customer_id)
    .bind(&appointment.lead_id)
    .bind(&appointment.status)
    .bind(&appointment.updated_at)
    .bind(&appointment.id)
    .bind(&user_id)
    .execute(&state.db)
    .await?;
    Ok(Json(appointment))
}

pub async fn delete_appointment(
    Path(appointment_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let result = sqlx::query("DELETE FROM appointments WHERE id = $1 AND user_id = $2")
        .bind(&appointment_id)
        .bind(&user_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("appointment not found"));
    }
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(starts_at: &str, ends_at: &str) -> Appointment {
        Appointment {
            id: "a-1".into(),
            user_id: "u-1".into(),
            customer_id: None,
            lead_id: None,
            title: " Demo call ".into(),
            notes: String::new(),
            starts_at: starts_at.into(),
            ends_at: ends_at.into(),
            status: "scheduled".into(),
            created_at: now_iso(),
            updated_at: now_iso(),
        }
    }

    #[test]
    fn test_window_is_normalized_to_utc() {
        let mut a = appointment("2026-05-01T10:00:00-03:00", "2026-05-01T11:00:00-03:00");
        validate_appointment(&mut a).unwrap();
        assert_eq!(a.starts_at, "2026-05-01T13:00:00+00:00");
        assert_eq!(a.title, "Demo call");
    }

    #[test]
    fn test_end_must_follow_start() {
        let mut a = appointment("2026-05-01T10:00:00Z", "2026-05-01T10:00:00Z");
        assert!(validate_appointment(&mut a).is_err());
    }

    #[test]
    fn test_bad_timestamp_and_status_rejected() {
        let mut a = appointment("tomorrow", "2026-05-01T10:00:00Z");
        assert!(validate_appointment(&mut a).is_err());

        let mut a = appointment("2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z");
        a.status = "maybe".into();
        assert!(validate_appointment(&mut a).is_err());
    }

    #[test]
    fn test_patch_clears_customer_with_empty_string() {
        let mut a = appointment("2026-05-01T09:00:00Z", "2026-05-01T10:00:00Z");
        a.customer_id = Some("c-1".into());
        apply_patch(
            &mut a,
            PatchAppointmentBody {
                customer_id: Some(String::new()),
                status: Some(" cancelled ".into()),
                ..Default::default()
            },
        );
        assert_eq!(a.customer_id, None);
        assert_eq!(a.status, "cancelled");
    }
}
