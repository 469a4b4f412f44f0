//! Customer segments and CSV contact import.

use std::{collections::HashSet, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    app::{auth_user_from_headers, now_iso, AppState},
    error::{ApiError, ApiJson},
    phone::{normalize_phone, phone_candidates},
    store::Store,
    types::{Customer, Segment},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    #[default]
    Skip,
    Update,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvContact {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub company: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub linked: usize,
    pub skipped: usize,
    pub invalid: usize,
}

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let header = header.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        names.contains(&header.as_str())
    })
}

/// Parse a contact CSV with a header row. A phone column is required.
pub fn parse_contact_csv(data: &str) -> Result<Vec<CsvContact>, ApiError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.trim_start_matches('\u{feff}').as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ApiError::BadRequest(format!("failed to read CSV headers: {e}")))?
        .clone();
    let phone_col = column(&headers, &["phone", "phone_number", "number", "whatsapp"])
        .ok_or_else(|| ApiError::bad_request("CSV needs a phone column"))?;
    let name_col = column(&headers, &["name", "full_name", "contact_name"]);
    let email_col = column(&headers, &["email", "e_mail"]);
    let company_col = column(&headers, &["company", "company_name"]);

    let field = |record: &csv::StringRecord, col: Option<usize>| {
        col.and_then(|i| record.get(i))
            .unwrap_or_default()
            .to_string()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| ApiError::BadRequest(format!("failed to read CSV record: {e}")))?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        rows.push(CsvContact {
            name: field(&record, name_col),
            phone: field(&record, Some(phone_col)),
            email: field(&record, email_col),
            company: field(&record, company_col),
        });
    }
    Ok(rows)
}

fn merge_non_empty(target: &mut String, value: &str) -> bool {
    if value.is_empty() || target == value {
        return false;
    }
    *target = value.to_string();
    true
}

/// Upsert customers from `rows` and link them into the segment.
pub async fn import_contacts(
    store: &dyn Store,
    user_id: &str,
    segment_id: &str,
    rows: &[CsvContact],
    action: DuplicateAction,
) -> Result<ImportReport, ApiError> {
    let mut report = ImportReport::default();
    let mut seen = HashSet::new();

    for row in rows {
        let Some(digits) = normalize_phone(&row.phone) else {
            report.invalid += 1;
            continue;
        };
        if !seen.insert(digits.clone()) {
            report.skipped += 1;
            continue;
        }
        let now = now_iso();

        let customer = match store
            .find_customer_by_phone(user_id, &phone_candidates(&digits))
            .await?
        {
            None => {
                let customer = Customer {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    name: if row.name.is_empty() {
                        digits.clone()
                    } else {
                        row.name.clone()
                    },
                    phone_number: digits.clone(),
                    email: row.email.clone(),
                    company: row.company.clone(),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                };
                store.insert_customer(&customer).await?;
                report.created += 1;
                customer
            }
            Some(existing) if action == DuplicateAction::Skip => {
                report.skipped += 1;
                existing
            }
            Some(mut existing) => {
                let changed = merge_non_empty(&mut existing.name, &row.name)
                    | merge_non_empty(&mut existing.email, &row.email)
                    | merge_non_empty(&mut existing.company, &row.company);
                if changed {
                    existing.updated_at = now.clone();
                    store.update_customer(&existing).await?;
                    report.updated += 1;
                }
                existing
            }
        };

        if store
            .link_segment_customer(segment_id, &customer.id, &now)
            .await?
        {
            report.linked += 1;
        }
    }

    tracing::info!(
        segment_id,
        created = report.created,
        updated = report.updated,
        linked = report.linked,
        skipped = report.skipped,
        invalid = report.invalid,
        "segment import finished"
    );
    Ok(report)
}

async fn owned_segment(
    store: &dyn Store,
    user_id: &str,
    segment_id: &str,
) -> Result<Segment, ApiError> {
    store
        .get_segment(user_id, segment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("segment not found"))
}

fn new_segment(user_id: &str, name: &str, description: Option<String>) -> Result<Segment, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let now = now_iso();
    Ok(Segment {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: name.to_string(),
        description: description.unwrap_or_default().trim().to_string(),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub async fn get_segments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    Ok(Json(state.store.list_segments(&user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateSegmentBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create_segment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<CreateSegmentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let segment = new_segment(&user_id, &body.name, body.description)?;
    state.store.insert_segment(&segment).await?;
    Ok((StatusCode::CREATED, Json(segment)))
}

pub async fn delete_segment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(segment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    if !state.store.delete_segment(&user_id, &segment_id).await? {
        return Err(ApiError::not_found("segment not found"));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddContactBody {
    pub customer_id: String,
}

pub async fn add_segment_contact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(segment_id): Path<String>,
    ApiJson(body): ApiJson<AddContactBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let segment = owned_segment(state.store.as_ref(), &user_id, &segment_id).await?;
    let customers = state
        .store
        .customers_by_ids(&user_id, std::slice::from_ref(&body.customer_id))
        .await?;
    if customers.is_empty() {
        return Err(ApiError::not_found("customer not found"));
    }
    let added = state
        .store
        .link_segment_customer(&segment.id, &body.customer_id, &now_iso())
        .await?;
    Ok(Json(json!({ "ok": true, "added": added })))
}

pub async fn remove_segment_contact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((segment_id, customer_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let segment = owned_segment(state.store.as_ref(), &user_id, &segment_id).await?;
    if !state
        .store
        .unlink_segment_customer(&segment.id, &customer_id)
        .await?
    {
        return Err(ApiError::not_found("contact is not in this segment"));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBody {
    pub csv: String,
    #[serde(default)]
    pub duplicate_action: DuplicateAction,
}

pub async fn import_segment_csv(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(segment_id): Path<String>,
    ApiJson(body): ApiJson<ImportBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let segment = owned_segment(state.store.as_ref(), &user_id, &segment_id).await?;
    let rows = parse_contact_csv(&body.csv)?;
    let report = import_contacts(
        state.store.as_ref(),
        &user_id,
        &segment.id,
        &rows,
        body.duplicate_action,
    )
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromContactsBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub customer_ids: Vec<String>,
}

pub async fn segment_from_contacts(
    store: &dyn Store,
    user_id: &str,
    body: FromContactsBody,
) -> Result<(Segment, usize), ApiError> {
    let segment = new_segment(user_id, &body.name, body.description)?;
    store.insert_segment(&segment).await?;

    let now = now_iso();
    let mut linked = 0;
    for customer in store.customers_by_ids(user_id, &body.customer_ids).await? {
        if store
            .link_segment_customer(&segment.id, &customer.id, &now)
            .await?
        {
            linked += 1;
        }
    }
    Ok((segment, linked))
}

pub async fn create_segment_from_contacts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<FromContactsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;
    let (segment, linked) = segment_from_contacts(state.store.as_ref(), &user_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "segment": segment, "linked": linked })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::memory::MemoryStore,
        testing::{customer, USER},
    };

    const CSV: &str = "Name,Phone,Email\nAna,+55 11 90000-0001,ana@example.com\nBruno,5511900000002,\nNobody,n/a,\n";

    fn store_with_segment() -> MemoryStore {
        let store = MemoryStore::new();
        store.with(|data| {
            data.segments.push(Segment {
                id: "seg-1".into(),
                user_id: USER.into(),
                name: "VIP".into(),
                description: String::new(),
                created_at: now_iso(),
                updated_at: now_iso(),
            })
        });
        store
    }

    #[test]
    fn test_csv_columns_are_matched_by_header() {
        let rows = parse_contact_csv("Phone Number,notes\n5511900000001\n").unwrap();
        assert_eq!(rows[0].phone, "5511900000001");

        let rows = parse_contact_csv(CSV).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "Ana");
        assert_eq!(rows[0].email, "ana@example.com");
        assert_eq!(rows[1].company, "");
    }

    #[test]
    fn test_csv_without_phone_column_is_rejected() {
        let err = parse_contact_csv("name,email\nAna,a@x.com\n").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_import_creates_and_counts_invalid_rows() {
        let store = store_with_segment();
        let rows = parse_contact_csv(CSV).unwrap();

        let report = import_contacts(&store, USER, "seg-1", &rows, DuplicateAction::Skip)
            .await
            .unwrap();

        assert_eq!(
            report,
            ImportReport {
                created: 2,
                updated: 0,
                linked: 2,
                skipped: 0,
                invalid: 1,
            }
        );
        store.with(|data| {
            assert_eq!(data.customers.len(), 2);
            assert_eq!(data.customers[0].phone_number, "5511900000001");
        });
    }

    #[tokio::test]
    async fn test_skip_never_links_twice() {
        let store = store_with_segment();
        store.with(|data| {
            data.customers.push(customer("c-1", "Ana", "5511900000001"));
            data.segment_links.push(("seg-1".into(), "c-1".into()));
        });
        let rows = parse_contact_csv(CSV).unwrap();

        let first = import_contacts(&store, USER, "seg-1", &rows, DuplicateAction::Skip)
            .await
            .unwrap();
        let second = import_contacts(&store, USER, "seg-1", &rows, DuplicateAction::Skip)
            .await
            .unwrap();

        assert_eq!(first.skipped, 1);
        assert_eq!(first.linked, 1);
        assert_eq!(second.linked, 0);
        store.with(|data| {
            let links = data
                .segment_links
                .iter()
                .filter(|(_, cid)| cid == "c-1")
                .count();
            assert_eq!(links, 1);
            assert_eq!(data.segment_links.len(), 2);
            let ana = data.customers.iter().find(|c| c.id == "c-1").unwrap();
            assert_eq!(ana.email, "");
        });
    }

    #[tokio::test]
    async fn test_update_overwrites_non_empty_fields() {
        let store = store_with_segment();
        store.with(|data| {
            let mut ana = customer("c-1", "Ana", "+5511900000001");
            ana.company = "Acme".into();
            data.customers.push(ana);
        });
        let rows = parse_contact_csv("name,phone,email,company\nAna Souza,5511900000001,ana@example.com,\n").unwrap();

        let report = import_contacts(&store, USER, "seg-1", &rows, DuplicateAction::Update)
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.linked, 1);
        store.with(|data| {
            let ana = &data.customers[0];
            assert_eq!(ana.name, "Ana Souza");
            assert_eq!(ana.email, "ana@example.com");
            assert_eq!(ana.company, "Acme");
        });
    }

    #[tokio::test]
    async fn test_from_contacts_links_only_own_customers() {
        let store = MemoryStore::new();
        store.with(|data| {
            data.customers.push(customer("c-1", "Ana", "5511900000001"));
            let mut foreign = customer("c-9", "Zed", "5511900000009");
            foreign.user_id = "other-user".into();
            data.customers.push(foreign);
        });

        let (segment, linked) = segment_from_contacts(
            &store,
            USER,
            FromContactsBody {
                name: "Campaign".into(),
                description: None,
                customer_ids: vec!["c-1".into(), "c-9".into(), "c-1".into()],
            },
        )
        .await
        .unwrap();

        assert_eq!(linked, 1);
        store.with(|data| {
            assert_eq!(data.segment_links, vec![(segment.id.clone(), "c-1".to_string())]);
        });
    }
}
