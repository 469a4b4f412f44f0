//! Broadcast campaigns: audience resolution, blacklist filtering, sequential
//! delivery with per-recipient status, and status aggregation.

use std::{collections::HashSet, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    app::{now_iso, resolve_caller, AppState},
    dispatch::{send_message, MessageKind, SendMessageBody},
    error::{ApiError, ApiJson},
    evolution::{split_data_url, Gateway, MediaKind},
    media::{content_type_from_extension, extension_from_filename},
    phone::{normalize_phone, parse_phone_list},
    store::Store,
    templating::{render_broadcast_message, RecipientContext},
    types::{Broadcast, BroadcastRecipient, BroadcastStatus, DeliveryStatus},
};

const NO_ELIGIBLE_RECIPIENTS: &str = "no eligible recipients";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Customers,
    Segment,
    Csv,
}

impl TargetMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "customers" | "contacts" => Some(Self::Customers),
            "segment" => Some(Self::Segment),
            "csv" | "numbers" => Some(Self::Csv),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Segment => "segment",
            Self::Csv => "csv",
        }
    }
}

/// Pasted numbers arrive either as one CSV-style string or as an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PhoneNumbers {
    List(Vec<String>),
    Text(String),
}

impl PhoneNumbers {
    fn normalized(&self) -> Vec<String> {
        match self {
            Self::Text(raw) => parse_phone_list(raw),
            Self::List(items) => parse_phone_list(&items.join("\n")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target_mode: String,
    #[serde(default)]
    pub customer_ids: Vec<String>,
    #[serde(default)]
    pub segment_id: Option<String>,
    #[serde(default)]
    pub phone_numbers: Option<PhoneNumbers>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub integration_id: String,
    #[serde(default, alias = "instanceId")]
    pub integration_config_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One resolved audience member before blacklist filtering.
#[derive(Debug, Clone, PartialEq)]
struct Audience {
    customer_id: Option<String>,
    name: String,
    phone: String,
}

/// all sent → completed, none sent → failed, anything else → partial_completion.
pub fn aggregate_status(sent: i64, total: i64) -> BroadcastStatus {
    if total == 0 || sent == 0 {
        BroadcastStatus::Failed
    } else if sent >= total {
        BroadcastStatus::Completed
    } else {
        BroadcastStatus::PartialCompletion
    }
}

fn media_kind_of(media_type: Option<&str>) -> Option<MediaKind> {
    let media_type = media_type.map(str::trim).filter(|t| !t.is_empty())?;
    if media_type.contains('/') {
        Some(MediaKind::from_mime(media_type))
    } else {
        MediaKind::parse(media_type)
    }
}

/// Kind for media sent without an explicit type: data-URL MIME first, then
/// the URL or file name extension.
fn inferred_media_kind(media_url: &str, file_name: Option<&str>) -> MediaKind {
    if let Some((mime, _)) = split_data_url(media_url.trim()) {
        return MediaKind::from_mime(&mime);
    }
    let path = media_url
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    extension_from_filename(last_segment)
        .or_else(|| file_name.and_then(extension_from_filename))
        .map(|ext| MediaKind::from_mime(content_type_from_extension(&ext)))
        .unwrap_or(MediaKind::Document)
}

fn send_body_for(broadcast: &Broadcast, recipient: &BroadcastRecipient) -> SendMessageBody {
    let text = render_broadcast_message(
        &broadcast.message,
        &RecipientContext {
            name: &recipient.name,
            phone: &recipient.phone_number,
        },
    );
    let media_url = broadcast
        .media_url
        .as_deref()
        .filter(|url| !url.trim().is_empty());
    let has_media = media_url.is_some();
    let message_type = match media_url {
        Some(url) => media_kind_of(broadcast.media_type.as_deref())
            .unwrap_or_else(|| inferred_media_kind(url, broadcast.file_name.as_deref()))
            .into(),
        None => MessageKind::Text,
    };
    let mimetype = broadcast
        .media_type
        .as_deref()
        .filter(|t| t.contains('/'))
        .map(str::to_string);

    SendMessageBody {
        recipient: recipient.phone_number.clone(),
        message_type,
        message: Some(text),
        media_url: broadcast.media_url.clone().filter(|_| has_media),
        caption: None,
        file_name: broadcast.file_name.clone(),
        mimetype,
        integration_config_id: broadcast.integration_config_id.clone(),
        user_id: None,
    }
}

fn delivery_error(err: &ApiError) -> String {
    match err {
        ApiError::Provider(provider) => format!("{provider}: {}", provider.details()),
        other => other.to_string(),
    }
}

async fn resolve_audience(
    store: &dyn Store,
    user_id: &str,
    mode: TargetMode,
    body: &BroadcastBody,
) -> Result<Vec<Audience>, ApiError> {
    let raw = match mode {
        TargetMode::Customers => {
            let found = store.customers_by_ids(user_id, &body.customer_ids).await?;
            body.customer_ids
                .iter()
                .filter_map(|id| found.iter().find(|c| &c.id == id))
                .map(|c| Audience {
                    customer_id: Some(c.id.clone()),
                    name: c.name.clone(),
                    phone: c.phone_number.clone(),
                })
                .collect::<Vec<_>>()
        }
        TargetMode::Segment => {
            let segment_id = body.segment_id.as_deref().unwrap_or_default();
            store
                .segment_customers(segment_id)
                .await?
                .into_iter()
                .map(|c| Audience {
                    customer_id: Some(c.id),
                    name: c.name,
                    phone: c.phone_number,
                })
                .collect()
        }
        TargetMode::Csv => body
            .phone_numbers
            .as_ref()
            .map(PhoneNumbers::normalized)
            .unwrap_or_default()
            .into_iter()
            .map(|phone| Audience {
                customer_id: None,
                name: String::new(),
                phone,
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    Ok(raw
        .into_iter()
        .filter_map(|member| {
            let digits = normalize_phone(&member.phone)?;
            seen.insert(digits.clone()).then_some(Audience {
                phone: digits,
                ..member
            })
        })
        .collect())
}

async fn fail_broadcast(
    store: &dyn Store,
    broadcast: &mut Broadcast,
    reason: &str,
) -> Result<(), ApiError> {
    let now = now_iso();
    broadcast.status = BroadcastStatus::Failed;
    broadcast.error_message = Some(reason.to_string());
    broadcast.updated_at = now.clone();
    broadcast.completed_at = Some(now);
    store.update_broadcast(broadcast).await?;
    tracing::warn!(broadcast_id = %broadcast.id, reason, "broadcast failed before delivery");
    Ok(())
}

/// Create a broadcast, resolve its audience and deliver it.
pub async fn run_broadcast(
    store: &dyn Store,
    gateway: &dyn Gateway,
    user_id: &str,
    body: &BroadcastBody,
    pacing: Duration,
) -> Result<Broadcast, ApiError> {
    let mode = TargetMode::parse(&body.target_mode).ok_or_else(|| {
        ApiError::bad_request("targetMode must be one of customers, segment, csv")
    })?;
    let has_media = body
        .media_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    if body.message.trim().is_empty() && !has_media {
        return Err(ApiError::bad_request("message or mediaUrl is required"));
    }
    match mode {
        TargetMode::Customers if body.customer_ids.is_empty() => {
            return Err(ApiError::bad_request("customerIds is required"));
        }
        TargetMode::Segment => {
            let segment_id = body
                .segment_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ApiError::bad_request("segmentId is required"))?;
            store
                .get_segment(user_id, segment_id)
                .await?
                .ok_or_else(|| ApiError::not_found("segment not found"))?;
        }
        TargetMode::Csv if body.phone_numbers.is_none() => {
            return Err(ApiError::bad_request("phoneNumbers is required"));
        }
        _ => {}
    }

    let config_id = body.integration_config_id.trim();
    if config_id.is_empty() {
        return Err(ApiError::bad_request("integrationConfigId is required"));
    }
    let credentials = store
        .integration_credentials(config_id)
        .await?
        .filter(|creds| creds.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("integration config not found"))?;
    let integration_id = body.integration_id.trim();
    if !integration_id.is_empty() && integration_id != credentials.integration_id {
        return Err(ApiError::bad_request(
            "instance does not belong to the given integration",
        ));
    }

    let now = now_iso();
    let name = match body.name.trim() {
        "" => format!("Broadcast {}", &now[..10]),
        name => name.to_string(),
    };
    let mut broadcast = Broadcast {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name,
        message: body.message.clone(),
        media_url: body.media_url.clone().filter(|_| has_media),
        media_type: body.media_type.clone(),
        file_name: body.file_name.clone(),
        integration_id: credentials.integration_id.clone(),
        integration_config_id: credentials.integration_config_id.clone(),
        target_mode: mode.as_str().to_string(),
        segment_id: body.segment_id.clone().filter(|_| mode == TargetMode::Segment),
        status: BroadcastStatus::Pending,
        total_recipients: 0,
        sent_count: 0,
        failed_count: 0,
        error_message: None,
        created_at: now.clone(),
        updated_at: now.clone(),
        completed_at: None,
    };
    store.insert_broadcast(&broadcast).await?;

    let audience = match resolve_audience(store, user_id, mode, body).await {
        Ok(audience) => audience,
        Err(err) => {
            fail_broadcast(store, &mut broadcast, &err.to_string()).await?;
            return Err(err);
        }
    };
    let phones = audience.iter().map(|m| m.phone.clone()).collect::<Vec<_>>();
    let blocked = match store.blacklisted_numbers(user_id, &phones).await {
        Ok(blocked) => blocked,
        Err(err) => {
            fail_broadcast(store, &mut broadcast, &err.to_string()).await?;
            return Err(err.into());
        }
    };
    let eligible = audience
        .into_iter()
        .filter(|member| !blocked.contains(&member.phone))
        .collect::<Vec<_>>();
    if !blocked.is_empty() {
        tracing::info!(broadcast_id = %broadcast.id, blocked = blocked.len(), "blacklisted numbers excluded");
    }

    if eligible.is_empty() {
        fail_broadcast(store, &mut broadcast, NO_ELIGIBLE_RECIPIENTS).await?;
        return Err(ApiError::bad_request(NO_ELIGIBLE_RECIPIENTS));
    }

    let requested = eligible.len() as i64;
    let blast_limit = match store.subscription_limits(user_id).await {
        Ok(limits) => limits.blast_limit,
        Err(err) => {
            tracing::warn!(user_id, error = %err, "blast limit lookup failed; sending unchecked");
            None
        }
    };
    if let Some(limit) = blast_limit.filter(|limit| requested > *limit) {
        fail_broadcast(
            store,
            &mut broadcast,
            &format!("{requested} recipients exceed the blast limit of {limit}"),
        )
        .await?;
        return Err(ApiError::BlastLimitExceeded { limit, requested });
    }

    let recipients = eligible
        .into_iter()
        .map(|member| BroadcastRecipient {
            id: Uuid::new_v4().to_string(),
            broadcast_id: broadcast.id.clone(),
            customer_id: member.customer_id,
            name: member.name,
            phone_number: member.phone,
            status: DeliveryStatus::Pending,
            error_message: None,
            wamid: None,
            sent_at: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .collect::<Vec<_>>();
    if let Err(err) = store.insert_recipients(&recipients).await {
        fail_broadcast(store, &mut broadcast, &err.to_string()).await?;
        return Err(err.into());
    }
    broadcast.total_recipients = requested;

    deliver_pending(store, gateway, &mut broadcast, pacing).await?;
    Ok(broadcast)
}

/// Send to every recipient still `pending`, one at a time, then re-aggregate.
///
/// A broadcast that failed before its recipients were recorded is left as is.
pub async fn deliver_pending(
    store: &dyn Store,
    gateway: &dyn Gateway,
    broadcast: &mut Broadcast,
    pacing: Duration,
) -> Result<(), ApiError> {
    let recipients = store.broadcast_recipients(&broadcast.id).await?;
    let failed_before_delivery =
        broadcast.status == BroadcastStatus::Failed && broadcast.total_recipients == 0;
    if recipients.is_empty() || failed_before_delivery {
        return Err(ApiError::bad_request(format!(
            "broadcast has nothing to resume: {}",
            broadcast
                .error_message
                .as_deref()
                .unwrap_or(NO_ELIGIBLE_RECIPIENTS)
        )));
    }
    let pending = recipients
        .into_iter()
        .filter(|r| r.status == DeliveryStatus::Pending)
        .collect::<Vec<_>>();

    broadcast.status = BroadcastStatus::Sending;
    broadcast.updated_at = now_iso();
    store.update_broadcast(broadcast).await?;
    tracing::info!(broadcast_id = %broadcast.id, pending = pending.len(), "broadcast delivery started");

    for (index, mut recipient) in pending.into_iter().enumerate() {
        if index > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
        let body = send_body_for(broadcast, &recipient);
        let result = send_message(
            store,
            gateway,
            &broadcast.user_id,
            &body,
            Some(&broadcast.id),
        )
        .await;

        let now = now_iso();
        match result {
            Ok(outcome) => {
                recipient.status = DeliveryStatus::Sent;
                recipient.wamid = outcome.wamid;
                recipient.error_message = None;
                recipient.sent_at = Some(now.clone());
            }
            Err(err) => {
                recipient.status = DeliveryStatus::Failed;
                recipient.error_message = Some(delivery_error(&err));
            }
        }
        recipient.updated_at = now;
        if let Err(err) = store.update_recipient(&recipient).await {
            tracing::error!(
                broadcast_id = %broadcast.id,
                recipient_id = %recipient.id,
                error = %err,
                "failed to record recipient outcome"
            );
        }
    }

    let recipients = store.broadcast_recipients(&broadcast.id).await?;
    let total = recipients.len() as i64;
    let sent = recipients
        .iter()
        .filter(|r| r.status == DeliveryStatus::Sent)
        .count() as i64;
    let failed = recipients
        .iter()
        .filter(|r| r.status == DeliveryStatus::Failed)
        .count() as i64;

    let now = now_iso();
    broadcast.total_recipients = total;
    broadcast.sent_count = sent;
    broadcast.failed_count = failed;
    broadcast.status = aggregate_status(sent, total);
    broadcast.error_message = (broadcast.status == BroadcastStatus::Failed)
        .then(|| "all sends failed".to_string());
    broadcast.updated_at = now.clone();
    broadcast.completed_at = Some(now);
    store.update_broadcast(broadcast).await?;

    tracing::info!(
        broadcast_id = %broadcast.id,
        status = broadcast.status.as_str(),
        sent,
        failed,
        total,
        "broadcast finished"
    );
    Ok(())
}

async fn owned_broadcast(
    store: &dyn Store,
    user_id: &str,
    broadcast_id: &str,
) -> Result<Broadcast, ApiError> {
    store
        .get_broadcast(broadcast_id)
        .await?
        .filter(|b| b.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("broadcast not found"))
}

pub async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<BroadcastBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &headers).await?;
    let user_id = caller.acting_user(body.user_id.as_deref())?;
    let broadcast = run_broadcast(
        state.store.as_ref(),
        state.gateway.as_ref(),
        &user_id,
        &body,
        state.config.broadcast_send_delay,
    )
    .await?;
    Ok(Json(json!({ "success": true, "broadcast": broadcast })))
}

pub async fn list_broadcasts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ActingUserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &headers).await?;
    let user_id = caller.acting_user(query.user_id.as_deref())?;
    let broadcasts = state.store.list_broadcasts(&user_id).await?;
    Ok(Json(broadcasts))
}

pub async fn get_broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(broadcast_id): Path<String>,
    Query(query): Query<ActingUserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &headers).await?;
    let user_id = caller.acting_user(query.user_id.as_deref())?;
    let broadcast = owned_broadcast(state.store.as_ref(), &user_id, &broadcast_id).await?;
    let recipients = state.store.broadcast_recipients(&broadcast.id).await?;
    Ok(Json(json!({ "broadcast": broadcast, "recipients": recipients })))
}

/// `?userId=` for service callers on the read and resume routes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActingUserQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn resume_broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(broadcast_id): Path<String>,
    Query(query): Query<ActingUserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &headers).await?;
    let user_id = caller.acting_user(query.user_id.as_deref())?;
    let mut broadcast = owned_broadcast(state.store.as_ref(), &user_id, &broadcast_id).await?;
    deliver_pending(
        state.store.as_ref(),
        state.gateway.as_ref(),
        &mut broadcast,
        state.config.broadcast_send_delay,
    )
    .await?;
    Ok(Json(json!({ "success": true, "broadcast": broadcast })))
}
