//! Inbound Evolution API webhook: incoming messages and connection state.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    app::{now_iso, AppState},
    dispatch::ensure_contact_conversation,
    error::{ApiError, ApiJson},
    phone::{is_group_jid, normalize_phone, phone_candidates},
    store::{Store, StoreError},
    types::{Credentials, Customer, Message, MessageDirection},
};

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub remote_jid: String,
    pub from_me: bool,
    pub wamid: Option<String>,
    pub push_name: String,
    pub text: String,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    MessageUpsert(InboundMessage),
    ConnectionUpdate(String),
    Ignored(String),
}

/// `MESSAGES_UPSERT` and `messages.upsert` both occur in the wild.
fn normalize_event_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', ".")
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn message_content(message: &Value) -> (String, Option<String>) {
    if let Some(text) = str_at(message, "/conversation") {
        return (text.to_string(), None);
    }
    if let Some(text) = str_at(message, "/extendedTextMessage/text") {
        return (text.to_string(), None);
    }
    for (key, kind) in [
        ("imageMessage", "image"),
        ("videoMessage", "video"),
        ("audioMessage", "audio"),
        ("documentMessage", "document"),
        ("stickerMessage", "image"),
    ] {
        if let Some(media) = message.get(key) {
            let caption = media
                .get("caption")
                .or_else(|| media.get("fileName"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            return (caption.to_string(), Some(kind.to_string()));
        }
    }
    (String::new(), None)
}

fn parse_message(data: &Value) -> Option<InboundMessage> {
    let remote_jid = str_at(data, "/key/remoteJid")?.to_string();
    let (text, media_type) = data
        .get("message")
        .map(message_content)
        .unwrap_or_default();
    Some(InboundMessage {
        remote_jid,
        from_me: data
            .pointer("/key/fromMe")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        wamid: str_at(data, "/key/id").map(str::to_string),
        push_name: str_at(data, "/pushName").unwrap_or_default().trim().to_string(),
        text,
        media_type,
    })
}

pub fn parse_events(payload: &Value) -> Vec<WebhookEvent> {
    let event = normalize_event_name(str_at(payload, "/event").unwrap_or_default());
    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    match event.as_str() {
        "messages.upsert" => {
            let items = match data {
                Value::Array(items) => items,
                other => vec![other],
            };
            items
                .iter()
                .filter_map(parse_message)
                .map(WebhookEvent::MessageUpsert)
                .collect()
        }
        "connection.update" => str_at(&data, "/state")
            .map(|state| vec![WebhookEvent::ConnectionUpdate(state.to_string())])
            .unwrap_or_default(),
        _ => vec![WebhookEvent::Ignored(event)],
    }
}

/// Record one inbound message. Returns the stored message id, or `None` when skipped.
pub async fn record_inbound(
    store: &dyn Store,
    credentials: &Credentials,
    inbound: &InboundMessage,
) -> Result<Option<String>, StoreError> {
    if inbound.from_me || is_group_jid(&inbound.remote_jid) {
        return Ok(None);
    }
    let Some(digits) = normalize_phone(&inbound.remote_jid) else {
        return Ok(None);
    };
    let user_id = credentials.user_id.as_str();
    let now = now_iso();

    let customer = match store
        .find_customer_by_phone(user_id, &phone_candidates(&digits))
        .await?
    {
        Some(customer) => customer,
        None => {
            let customer = Customer {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                name: if inbound.push_name.is_empty() {
                    digits.clone()
                } else {
                    inbound.push_name.clone()
                },
                phone_number: digits.clone(),
                email: String::new(),
                company: String::new(),
                created_at: now.clone(),
                updated_at: now.clone(),
            };
            store.insert_customer(&customer).await?;
            tracing::info!(user_id, customer_id = %customer.id, "customer created from inbound message");
            customer
        }
    };

    let thread = ensure_contact_conversation(
        store,
        user_id,
        Some(&credentials.integration_config_id),
        &digits,
        Some(&customer),
        &now,
    )
    .await?;

    let message = Message {
        id: Uuid::new_v4().to_string(),
        conversation_id: thread.conversation_id.clone(),
        sender_participant_id: thread.participant_id,
        content: inbound.text.clone(),
        media_type: inbound.media_type.clone(),
        media_url: None,
        media_thumbnail: None,
        wamid: inbound.wamid.clone(),
        direction: MessageDirection::Inbound,
        created_at: now.clone(),
    };
    store.insert_message(&message).await?;
    store.touch_conversation(&thread.conversation_id, &now).await?;
    Ok(Some(message.id))
}

pub async fn apply_events(
    store: &dyn Store,
    credentials: &Credentials,
    events: &[WebhookEvent],
) -> Result<usize, StoreError> {
    let mut processed = 0usize;
    for event in events {
        match event {
            WebhookEvent::MessageUpsert(inbound) => {
                if record_inbound(store, credentials, inbound).await?.is_some() {
                    processed += 1;
                }
            }
            WebhookEvent::ConnectionUpdate(state) => {
                store
                    .set_integration_status(&credentials.integration_config_id, state, &now_iso())
                    .await?;
                tracing::info!(
                    integration_config_id = %credentials.integration_config_id,
                    state = %state,
                    "instance connection changed"
                );
                processed += 1;
            }
            WebhookEvent::Ignored(name) => {
                tracing::debug!(event = %name, "webhook event ignored");
            }
        }
    }
    Ok(processed)
}

pub async fn evolution_webhook(
    Path(config_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = state
        .store
        .integration_credentials(&config_id)
        .await?
        .ok_or_else(|| ApiError::not_found("integration config not found"))?;

    let provided = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    let accepted = [&credentials.api_key, &credentials.instance_token]
        .iter()
        .any(|key| !key.is_empty() && key.as_str() == provided);
    if !accepted {
        tracing::warn!(integration_config_id = %config_id, "webhook rejected: bad apikey");
        return Err(ApiError::Unauthorized("invalid webhook key".into()));
    }

    let events = parse_events(&payload);
    let processed = apply_events(state.store.as_ref(), &credentials, &events).await?;
    Ok(Json(json!({ "ok": true, "processed": processed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credentials, customer, store_with_integration, CONFIG, USER};

    fn upsert(jid: &str, from_me: bool, message: Value) -> Value {
        json!({
            "event": "messages.upsert",
            "instance": "sales",
            "data": {
                "key": { "remoteJid": jid, "fromMe": from_me, "id": "IN-1" },
                "pushName": "Dani",
                "message": message
            }
        })
    }

    #[test]
    fn test_parses_text_and_media_messages() {
        let events = parse_events(&upsert(
            "5511900000001@s.whatsapp.net",
            false,
            json!({ "extendedTextMessage": { "text": "hello" } }),
        ));
        let WebhookEvent::MessageUpsert(msg) = &events[0] else {
            panic!("expected message");
        };
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.wamid.as_deref(), Some("IN-1"));

        let events = parse_events(&upsert(
            "5511900000001@s.whatsapp.net",
            false,
            json!({ "imageMessage": { "caption": "look" } }),
        ));
        let WebhookEvent::MessageUpsert(msg) = &events[0] else {
            panic!("expected message");
        };
        assert_eq!(msg.media_type.as_deref(), Some("image"));
        assert_eq!(msg.text, "look");
    }

    #[test]
    fn test_event_names_are_normalized() {
        let events = parse_events(&json!({ "event": "CONNECTION_UPDATE", "data": { "state": "open" } }));
        assert_eq!(events, vec![WebhookEvent::ConnectionUpdate("open".into())]);

        let events = parse_events(&json!({ "event": "presence.update", "data": {} }));
        assert!(matches!(events[0], WebhookEvent::Ignored(_)));
    }

    #[tokio::test]
    async fn test_inbound_creates_customer_and_thread_once() {
        let store = store_with_integration();
        let events = parse_events(&upsert(
            "5511900000001@s.whatsapp.net",
            false,
            json!({ "conversation": "hi" }),
        ));

        apply_events(&store, &credentials(), &events).await.unwrap();
        apply_events(&store, &credentials(), &events).await.unwrap();

        store.with(|data| {
            assert_eq!(data.customers.len(), 1);
            assert_eq!(data.customers[0].name, "Dani");
            assert_eq!(data.conversations.len(), 1);
            assert_eq!(
                data.conversations[0].integration_config_id.as_deref(),
                Some(CONFIG)
            );
            assert_eq!(data.messages.len(), 2);
            assert!(data
                .messages
                .iter()
                .all(|m| m.direction == MessageDirection::Inbound));
        });
    }

    #[tokio::test]
    async fn test_inbound_matches_existing_customer() {
        let store = store_with_integration();
        store.with(|data| data.customers.push(customer("c-1", "Ana", "+55 11 90000-0001")));
        let events = parse_events(&upsert(
            "5511900000001@s.whatsapp.net",
            false,
            json!({ "conversation": "hi" }),
        ));

        apply_events(&store, &credentials(), &events).await.unwrap();

        store.with(|data| {
            assert_eq!(data.customers.len(), 1);
            assert_eq!(data.participants[0].customer_id.as_deref(), Some("c-1"));
            assert_eq!(data.conversations[0].user_id, USER);
        });
    }

    #[tokio::test]
    async fn test_own_and_group_messages_are_skipped() {
        let store = store_with_integration();
        let mut events = parse_events(&upsert(
            "5511900000001@s.whatsapp.net",
            true,
            json!({ "conversation": "sent from phone" }),
        ));
        events.extend(parse_events(&upsert(
            "120363025246125486@g.us",
            false,
            json!({ "conversation": "group chatter" }),
        )));

        let processed = apply_events(&store, &credentials(), &events).await.unwrap();

        assert_eq!(processed, 0);
        store.with(|data| assert!(data.messages.is_empty()));
    }

    #[tokio::test]
    async fn test_connection_update_stores_state() {
        let store = store_with_integration();
        apply_events(
            &store,
            &credentials(),
            &[WebhookEvent::ConnectionUpdate("close".into())],
        )
        .await
        .unwrap();
        store.with(|data| {
            assert_eq!(
                data.integration_status.get(CONFIG).map(String::as_str),
                Some("close")
            )
        });
    }
}
