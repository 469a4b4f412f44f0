use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    app::{auth_user_from_headers, AppState},
    error::ApiError,
    evolution::MediaKind,
    media::{public_media_url, stored_file_name, write_media},
};

/// Store the multipart `file` field and return a URL usable as `mediaUrl`.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth_user_from_headers(&state, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(format!("failed to read upload: {err}")))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("uploaded file is empty"));
        }

        let stored = stored_file_name(&original, &content_type);
        write_media(&state.config.media_storage_dir, &stored, &bytes).await?;
        tracing::info!(user_id = %user_id, file = %stored, size = bytes.len(), "file uploaded");

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "url": public_media_url(&state.config.public_base_url, &stored),
                "fileName": if original.is_empty() { stored.clone() } else { original },
                "mimeType": content_type,
                "mediaType": MediaKind::from_mime(&content_type).as_str(),
                "sizeBytes": bytes.len(),
                "storedFileName": stored,
            })),
        ));
    }

    Err(ApiError::bad_request("missing file field in multipart form"))
}
