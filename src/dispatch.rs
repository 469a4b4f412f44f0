//! Outbound send path: validation, quota, delivery log, gateway call and the
//! conversation mirror.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    app::{now_iso, resolve_caller, AppState},
    error::{ApiError, ApiJson},
    evolution::{extract_wamid, Gateway, GatewayAction, MediaKind, MediaPayload},
    phone::{normalize_phone, phone_candidates, whatsapp_jid},
    quota::{current_period, enforce_message_quota},
    store::{DeliveryOutcome, Store, StoreError},
    types::{
        Conversation, ConversationParticipant, Credentials, Customer, DeliveryStatus, Message,
        MessageDirection, MessageLog, ParticipantRole,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Self::Text => None,
            Self::Image => Some(MediaKind::Image),
            Self::Video => Some(MediaKind::Video),
            Self::Audio => Some(MediaKind::Audio),
            Self::Document => Some(MediaKind::Document),
        }
    }
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => Self::Image,
            MediaKind::Video => Self::Video,
            MediaKind::Audio => Self::Audio,
            MediaKind::Document => Self::Document,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[serde(alias = "number", alias = "phone")]
    pub recipient: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub integration_config_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A validated send, ready for the gateway.
#[derive(Debug, Clone)]
pub struct PreparedSend {
    pub number: String,
    pub kind: MessageKind,
    /// Text shown in the log and the conversation: the message, or the media caption.
    pub content: String,
    pub media_url: Option<String>,
    pub action: GatewayAction,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn prepare_send(body: &SendMessageBody) -> Result<PreparedSend, ApiError> {
    let number = normalize_phone(&body.recipient)
        .ok_or_else(|| ApiError::bad_request("recipient must be a phone number"))?;
    if body.integration_config_id.trim().is_empty() {
        return Err(ApiError::bad_request("integrationConfigId is required"));
    }

    let Some(media_kind) = body.message_type.media_kind() else {
        let text = non_empty(&body.message)
            .ok_or_else(|| ApiError::bad_request("message is required for text messages"))?;
        return Ok(PreparedSend {
            action: GatewayAction::SendText {
                number: number.clone(),
                text: text.to_string(),
            },
            number,
            kind: MessageKind::Text,
            content: text.to_string(),
            media_url: None,
        });
    };

    let source = non_empty(&body.media_url).ok_or_else(|| {
        ApiError::bad_request(format!(
            "mediaUrl is required for {} messages",
            body.message_type.as_str()
        ))
    })?;
    let caption = non_empty(&body.caption)
        .or_else(|| non_empty(&body.message))
        .map(str::to_string);
    let media = MediaPayload::new(
        Some(media_kind),
        source,
        body.mimetype.clone(),
        caption.clone(),
        body.file_name.clone(),
    )
    .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    // Inline base64 is not worth keeping in the log; URLs are.
    let media_url = (source.starts_with("http://") || source.starts_with("https://"))
        .then(|| source.to_string());

    Ok(PreparedSend {
        action: GatewayAction::SendMedia {
            number: number.clone(),
            media,
        },
        number,
        kind: body.message_type,
        content: caption.unwrap_or_default(),
        media_url,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub log_id: String,
    pub recipient: String,
    pub wamid: Option<String>,
    pub message_id: Option<String>,
    pub provider_response: Value,
}

/// Deliver one message on behalf of `user_id`.
///
/// `broadcast_id` tags the delivery log row when the send is part of a campaign.
pub async fn send_message(
    store: &dyn Store,
    gateway: &dyn Gateway,
    user_id: &str,
    body: &SendMessageBody,
    broadcast_id: Option<&str>,
) -> Result<SendOutcome, ApiError> {
    let prepared = prepare_send(body)?;
    let credentials = store
        .integration_credentials(body.integration_config_id.trim())
        .await?
        .filter(|creds| creds.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("integration config not found"))?;

    let period = current_period(Utc::now());
    enforce_message_quota(store, user_id, &period).await?;

    let now = now_iso();
    let log = MessageLog {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        integration_config_id: credentials.integration_config_id.clone(),
        recipient: prepared.number.clone(),
        message_type: prepared.kind.as_str().to_string(),
        content: prepared.content.clone(),
        media_url: prepared.media_url.clone(),
        status: DeliveryStatus::Pending,
        error_message: None,
        wamid: None,
        broadcast_id: broadcast_id.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    };
    store.insert_message_log(&log).await?;

    let response = match gateway.execute(&credentials, &prepared.action).await {
        Ok(response) => response,
        Err(err) => {
            let outcome = DeliveryOutcome {
                status: DeliveryStatus::Failed,
                wamid: None,
                error: Some(format!("{err}: {}", err.details())),
                at: now_iso(),
            };
            if let Err(log_err) = store.finish_message_log(&log.id, &outcome).await {
                tracing::error!(log_id = %log.id, error = %log_err, "failed to mark message log failed");
            }
            tracing::warn!(
                user_id,
                recipient = %prepared.number,
                error = %err,
                "message send failed"
            );
            return Err(ApiError::Provider(err));
        }
    };

    let wamid = extract_wamid(&response);
    let outcome = DeliveryOutcome {
        status: DeliveryStatus::Sent,
        wamid: wamid.clone(),
        error: None,
        at: now_iso(),
    };
    // The message is already out; bookkeeping failures below must not turn it into an error.
    if let Err(err) = store.finish_message_log(&log.id, &outcome).await {
        tracing::error!(log_id = %log.id, error = %err, "failed to mark message log sent");
    }
    if let Err(err) = store.increment_messages_sent(user_id, &period, 1).await {
        tracing::warn!(user_id, error = %err, "usage counter update failed");
    }
    let message_id =
        match mirror_outbound(store, &credentials, user_id, &prepared, wamid.as_deref()).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(user_id, recipient = %prepared.number, error = %err, "conversation mirror failed");
                None
            }
        };

    tracing::info!(
        user_id,
        recipient = %prepared.number,
        kind = prepared.kind.as_str(),
        wamid = wamid.as_deref().unwrap_or(""),
        "message sent"
    );
    Ok(SendOutcome {
        log_id: log.id,
        recipient: prepared.number,
        wamid,
        message_id,
        provider_response: response,
    })
}

/// Conversation and contact participant for one phone number.
#[derive(Debug, Clone)]
pub struct ContactThread {
    pub conversation_id: String,
    pub participant_id: String,
}

/// Find the conversation for a contact, or open one.
///
/// Lookup order: customer by phone, participant by customer id, participant by
/// external identifier. Pass `customer` when the caller already resolved it.
pub async fn ensure_contact_conversation(
    store: &dyn Store,
    user_id: &str,
    integration_config_id: Option<&str>,
    phone: &str,
    customer: Option<&Customer>,
    now: &str,
) -> Result<ContactThread, StoreError> {
    let candidates = phone_candidates(phone);
    let customer = match customer {
        Some(customer) => Some(customer.clone()),
        None => store.find_customer_by_phone(user_id, &candidates).await?,
    };
    let customer_id = customer.map(|c| c.id);

    if let Some(participant) = store
        .find_contact_participant(user_id, customer_id.as_deref(), &candidates)
        .await?
    {
        return Ok(ContactThread {
            conversation_id: participant.conversation_id,
            participant_id: participant.id,
        });
    }

    let conversation = Conversation {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        lead_id: None,
        integration_config_id: integration_config_id.map(str::to_string),
        created_at: now.to_string(),
        updated_at: now.to_string(),
    };
    store.insert_conversation(&conversation).await?;

    let external = normalize_phone(phone).map(|digits| whatsapp_jid(&digits));
    let participant = ConversationParticipant {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        role: ParticipantRole::Member,
        customer_id,
        user_id: None,
        external_user_identifier: external,
        created_at: now.to_string(),
    };
    store.insert_participant(&participant).await?;

    Ok(ContactThread {
        conversation_id: conversation.id,
        participant_id: participant.id,
    })
}

async fn ensure_user_participant(
    store: &dyn Store,
    conversation_id: &str,
    user_id: &str,
    now: &str,
) -> Result<String, StoreError> {
    if let Some(existing) = store.find_user_participant(conversation_id, user_id).await? {
        return Ok(existing.id);
    }
    let participant = ConversationParticipant {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        role: ParticipantRole::Admin,
        customer_id: None,
        user_id: Some(user_id.to_string()),
        external_user_identifier: None,
        created_at: now.to_string(),
    };
    store.insert_participant(&participant).await?;
    Ok(participant.id)
}

/// Copy a delivered message into the conversation view. Returns the message id.
pub async fn mirror_outbound(
    store: &dyn Store,
    credentials: &Credentials,
    user_id: &str,
    prepared: &PreparedSend,
    wamid: Option<&str>,
) -> Result<String, StoreError> {
    let now = now_iso();
    let thread = ensure_contact_conversation(
        store,
        user_id,
        Some(&credentials.integration_config_id),
        &prepared.number,
        None,
        &now,
    )
    .await?;
    let sender_id = ensure_user_participant(store, &thread.conversation_id, user_id, &now).await?;

    let message = Message {
        id: Uuid::new_v4().to_string(),
        conversation_id: thread.conversation_id.clone(),
        sender_participant_id: sender_id,
        content: prepared.content.clone(),
        media_type: prepared.kind.media_kind().map(|k| k.as_str().to_string()),
        media_url: prepared.media_url.clone(),
        media_thumbnail: None,
        wamid: wamid.map(str::to_string),
        direction: MessageDirection::Outbound,
        created_at: now.clone(),
    };
    store.insert_message(&message).await?;
    store.touch_conversation(&thread.conversation_id, &now).await?;
    Ok(message.id)
}

pub async fn post_send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &headers).await?;
    let user_id = caller.acting_user(body.user_id.as_deref())?;
    let outcome = send_message(
        state.store.as_ref(),
        state.gateway.as_ref(),
        &user_id,
        &body,
        None,
    )
    .await?;
    Ok(Json(json!({ "success": true, "result": outcome })))
}
