//! Evolution API (WhatsApp gateway) client and the `/api/evolution` proxy.
//!
//! Every action maps to exactly one HTTP call against the instance's base URL,
//! authenticated with the integration's `apikey` header.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    app::{now_iso, resolve_caller, AppState},
    error::{ApiError, ApiJson},
    phone::normalize_phone,
    types::Credentials,
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid gateway request: {0}")]
    InvalidRequest(String),

    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway responded with HTTP {status}")]
    Status { status: u16, body: Value },
}

impl GatewayError {
    pub fn details(&self) -> Value {
        match self {
            Self::InvalidRequest(reason) => json!(reason),
            Self::Transport(err) => json!(err.to_string()),
            Self::Status { status, body } => json!({ "status": status, "body": body }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        let mt = mime.trim().to_ascii_lowercase();
        if mt.starts_with("image/") {
            Self::Image
        } else if mt.starts_with("video/") {
            Self::Video
        } else if mt.starts_with("audio/") {
            Self::Audio
        } else {
            Self::Document
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" | "sticker" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" | "voice" | "ptt" => Some(Self::Audio),
            "document" | "file" => Some(Self::Document),
            _ => None,
        }
    }
}

/// Media ready for the gateway: either an http(s) URL or bare base64.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub kind: MediaKind,
    pub media: String,
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
}

impl MediaPayload {
    pub fn new(
        kind: Option<MediaKind>,
        source: &str,
        mimetype: Option<String>,
        caption: Option<String>,
        file_name: Option<String>,
    ) -> Result<Self, GatewayError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(GatewayError::InvalidRequest("media is required".into()));
        }
        let mut mimetype = mimetype.filter(|m| !m.trim().is_empty());
        let media = if let Some((data_mime, data)) = split_data_url(source) {
            if mimetype.is_none() && !data_mime.is_empty() {
                mimetype = Some(data_mime);
            }
            ensure_base64(data)?;
            data.to_string()
        } else if source.starts_with("http://") || source.starts_with("https://") {
            source.to_string()
        } else {
            ensure_base64(source)?;
            source.to_string()
        };
        let kind = kind
            .or_else(|| mimetype.as_deref().map(MediaKind::from_mime))
            .unwrap_or(MediaKind::Document);
        Ok(Self {
            kind,
            media,
            mimetype,
            caption: caption.filter(|c| !c.trim().is_empty()),
            file_name: file_name.filter(|f| !f.trim().is_empty()),
        })
    }
}

/// `data:<mime>;base64,<payload>` → (`mime`, `payload`).
pub fn split_data_url(input: &str) -> Option<(String, &str)> {
    let rest = input.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64").unwrap_or(header);
    Some((mime.trim().to_ascii_lowercase(), data.trim()))
}

fn ensure_base64(data: &str) -> Result<(), GatewayError> {
    let compact = data.split_whitespace().collect::<String>();
    STANDARD
        .decode(compact.as_bytes())
        .map(|_| ())
        .map_err(|_| GatewayError::InvalidRequest("media is neither a URL nor valid base64".into()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyButton {
    pub id: String,
    pub display_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayAction {
    SendText {
        number: String,
        text: String,
    },
    SendMedia {
        number: String,
        media: MediaPayload,
    },
    SendButtons {
        number: String,
        title: String,
        description: String,
        footer: String,
        buttons: Vec<ReplyButton>,
    },
    GetStatus,
    ConnectInstance,
    SyncInstanceConfig,
    ListInstances,
}

fn param_text(params: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        params
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn param_number(params: &Value) -> Result<String, GatewayError> {
    param_text(params, &["number", "recipient", "phone"])
        .and_then(|raw| normalize_phone(&raw))
        .ok_or_else(|| GatewayError::InvalidRequest("a valid recipient number is required".into()))
}

impl GatewayAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendText { .. } => "sendText",
            Self::SendMedia { .. } => "send-media",
            Self::SendButtons { .. } => "send-buttons",
            Self::GetStatus => "get-status",
            Self::ConnectInstance => "connect-instance",
            Self::SyncInstanceConfig => "sync-instance-config",
            Self::ListInstances => "list-instances",
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(
            self,
            Self::SendText { .. } | Self::SendMedia { .. } | Self::SendButtons { .. }
        )
    }

    /// Build an action from the loosely-shaped proxy request body.
    pub fn from_request(action: &str, params: &Value) -> Result<Self, GatewayError> {
        match action {
            "sendText" | "send-text" => {
                let number = param_number(params)?;
                let text = param_text(params, &["text", "message"])
                    .ok_or_else(|| GatewayError::InvalidRequest("text is required".into()))?;
                Ok(Self::SendText { number, text })
            }
            "send-media" | "sendMedia" => {
                let number = param_number(params)?;
                let source = param_text(params, &["media", "mediaUrl", "base64"])
                    .ok_or_else(|| GatewayError::InvalidRequest("media is required".into()))?;
                let kind = param_text(params, &["mediatype", "mediaType"])
                    .as_deref()
                    .and_then(MediaKind::parse);
                let media = MediaPayload::new(
                    kind,
                    &source,
                    param_text(params, &["mimetype", "mimeType"]),
                    param_text(params, &["caption", "text", "message"]),
                    param_text(params, &["fileName", "filename"]),
                )?;
                Ok(Self::SendMedia { number, media })
            }
            "send-buttons" | "sendButtons" => {
                let number = param_number(params)?;
                let buttons = params
                    .get("buttons")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .enumerate()
                            .filter_map(|(idx, item)| {
                                let text = param_text(item, &["displayText", "text", "title"])?;
                                let id = param_text(item, &["id"])
                                    .unwrap_or_else(|| format!("btn-{}", idx + 1));
                                Some(ReplyButton {
                                    id,
                                    display_text: text,
                                })
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if buttons.is_empty() {
                    return Err(GatewayError::InvalidRequest(
                        "at least one button is required".into(),
                    ));
                }
                Ok(Self::SendButtons {
                    number,
                    title: param_text(params, &["title"]).unwrap_or_default(),
                    description: param_text(params, &["description", "text", "message"])
                        .unwrap_or_default(),
                    footer: param_text(params, &["footer"]).unwrap_or_default(),
                    buttons,
                })
            }
            "get-status" => Ok(Self::GetStatus),
            "connect-instance" => Ok(Self::ConnectInstance),
            "sync-instance-config" => Ok(Self::SyncInstanceConfig),
            "list-instances" => Ok(Self::ListInstances),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown action '{other}'"
            ))),
        }
    }

    /// Method, path and JSON body of the gateway call for `instance`.
    pub fn request(&self, instance: &str) -> (Method, String, Option<Value>) {
        match self {
            Self::SendText { number, text } => (
                Method::POST,
                format!("/message/sendText/{instance}"),
                Some(json!({ "number": number, "text": text })),
            ),
            Self::SendMedia { number, media } if media.kind == MediaKind::Audio => (
                Method::POST,
                format!("/message/sendWhatsAppAudio/{instance}"),
                Some(json!({ "number": number, "audio": media.media })),
            ),
            Self::SendMedia { number, media } => {
                let mut body = json!({
                    "number": number,
                    "mediatype": media.kind.as_str(),
                    "media": media.media,
                });
                if let Some(mimetype) = &media.mimetype {
                    body["mimetype"] = json!(mimetype);
                }
                if let Some(caption) = &media.caption {
                    body["caption"] = json!(caption);
                }
                if let Some(file_name) = &media.file_name {
                    body["fileName"] = json!(file_name);
                }
                (
                    Method::POST,
                    format!("/message/sendMedia/{instance}"),
                    Some(body),
                )
            }
            Self::SendButtons {
                number,
                title,
                description,
                footer,
                buttons,
            } => (
                Method::POST,
                format!("/message/sendButtons/{instance}"),
                Some(json!({
                    "number": number,
                    "title": title,
                    "description": description,
                    "footer": footer,
                    "buttons": buttons
                        .iter()
                        .map(|b| json!({ "type": "reply", "displayText": b.display_text, "id": b.id }))
                        .collect::<Vec<_>>(),
                })),
            ),
            Self::GetStatus | Self::SyncInstanceConfig => (
                Method::GET,
                format!("/instance/connectionState/{instance}"),
                None,
            ),
            Self::ConnectInstance => (Method::GET, format!("/instance/connect/{instance}"), None),
            Self::ListInstances => (Method::GET, "/instance/fetchInstances".to_string(), None),
        }
    }
}

/// Provider message id from a send response.
pub fn extract_wamid(response: &Value) -> Option<String> {
    response
        .pointer("/key/id")
        .or_else(|| response.get("messageId"))
        .or_else(|| response.get("id"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn extract_connection_state(response: &Value) -> Option<String> {
    response
        .pointer("/instance/state")
        .or_else(|| response.get("state"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn execute(
        &self,
        credentials: &Credentials,
        action: &GatewayAction,
    ) -> Result<Value, GatewayError>;
}

pub struct EvolutionClient {
    http: reqwest::Client,
}

impl EvolutionClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Gateway for EvolutionClient {
    async fn execute(
        &self,
        credentials: &Credentials,
        action: &GatewayAction,
    ) -> Result<Value, GatewayError> {
        if credentials.base_url.trim().is_empty() || credentials.api_key.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "integration is missing base url or api key".into(),
            ));
        }
        let (method, path, body) = action.request(&credentials.instance_name);
        let url = format!("{}{}", credentials.base_url.trim_end_matches('/'), path);

        let mut request = self
            .http
            .request(method, &url)
            .header("apikey", &credentials.api_key);
        if let Some(body) = &body {
            request = request.json(body);
        }

        tracing::debug!(action = action.name(), %url, "calling evolution api");
        let response = request.send().await?;
        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        let body = if raw_body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({ "raw": raw_body }))
        };

        if status.is_success() {
            return Ok(body);
        }
        tracing::warn!(
            action = action.name(),
            status = status.as_u16(),
            instance = %credentials.instance_name,
            "evolution api call rejected"
        );
        Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyBody {
    pub action: String,
    pub integration_config_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

pub async fn proxy_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<ProxyBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = resolve_caller(&state, &headers).await?;
    let credentials = state
        .store
        .integration_credentials(&body.integration_config_id)
        .await?
        .ok_or_else(|| ApiError::not_found("integration config not found"))?;
    caller.ensure_owner(&credentials.user_id, body.user_id.as_deref())?;

    let params = Value::Object(body.params);
    let action = GatewayAction::from_request(&body.action, &params).map_err(|err| match err {
        GatewayError::InvalidRequest(reason) => ApiError::BadRequest(reason),
        other => ApiError::Provider(other),
    })?;

    let data = state.gateway.execute(&credentials, &action).await?;
    let mut payload = json!({ "success": true, "action": action.name(), "data": data });

    if action == GatewayAction::SyncInstanceConfig {
        let connection = extract_connection_state(&data).unwrap_or_else(|| "unknown".into());
        state
            .store
            .set_integration_status(&credentials.integration_config_id, &connection, &now_iso())
            .await?;
        payload["status"] = json!(connection);
    }
    if action.is_send() {
        payload["wamid"] = json!(extract_wamid(&data));
    }
    Ok(Json(payload))
}
