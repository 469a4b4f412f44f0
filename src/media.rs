//! Local media storage: file naming, content types and the public download route.

use std::{path::Path as FsPath, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::{app::AppState, error::ApiError};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extension ↔ content type. The first entry for a MIME type wins when naming files.
const KNOWN_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("opus", "audio/opus"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("pdf", "application/pdf"),
    ("csv", "text/csv"),
    ("txt", "text/plain; charset=utf-8"),
    ("json", "application/json"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
];

pub fn extension_from_filename(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

pub fn extension_from_mime(mime: &str) -> &'static str {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    KNOWN_TYPES
        .iter()
        .find(|(_, known)| known.split(';').next() == Some(essence.as_str()))
        .map(|(ext, _)| *ext)
        .unwrap_or("bin")
}

pub fn content_type_from_extension(ext: &str) -> &'static str {
    let ext = ext.to_ascii_lowercase();
    KNOWN_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Stored names are generated, so anything outside this alphabet is rejected.
pub fn is_safe_media_file_name(value: &str) -> bool {
    !value.is_empty()
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Name for a new stored file, keeping the client's extension when it is usable.
pub fn stored_file_name(original: &str, content_type: &str) -> String {
    let ext = extension_from_filename(original)
        .unwrap_or_else(|| extension_from_mime(content_type).to_string());
    format!("{}.{ext}", Uuid::new_v4())
}

pub fn public_media_url(base_url: &str, file_name: &str) -> String {
    format!("{}/api/media/{file_name}", base_url.trim_end_matches('/'))
}

pub async fn write_media(dir: &FsPath, file_name: &str, bytes: &[u8]) -> Result<(), ApiError> {
    tokio::fs::write(dir.join(file_name), bytes)
        .await
        .map_err(|err| {
            ApiError::Internal(format!("failed to store uploaded file: {err}"))
        })
}

pub async fn serve_stored_media(
    Path(file_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    if !is_safe_media_file_name(&file_name) {
        return Err(ApiError::bad_request("invalid media file name"));
    }
    let path = state.config.media_storage_dir.join(&file_name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found("media file not found"))?;

    let ext = extension_from_filename(&file_name).unwrap_or_default();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_from_extension(&ext)),
    );
    Ok(response.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_prefers_file_name() {
        let name = stored_file_name("Invoice.PDF", "application/octet-stream");
        assert!(name.ends_with(".pdf"));
        let name = stored_file_name("voice-note", "audio/ogg; codecs=opus");
        assert!(name.ends_with(".ogg"));
        let name = stored_file_name("blob", "application/x-unknown");
        assert!(name.ends_with(".bin"));
    }

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type_from_extension("JPG"), "image/jpeg");
        assert_eq!(content_type_from_extension("exe"), DEFAULT_CONTENT_TYPE);
        assert_eq!(extension_from_mime("image/jpeg"), "jpg");
    }

    #[test]
    fn test_unsafe_names_rejected() {
        assert!(is_safe_media_file_name("0b1c-22.png"));
        assert!(!is_safe_media_file_name("../secrets.env"));
        assert!(!is_safe_media_file_name("a/b.png"));
        assert!(!is_safe_media_file_name(""));
    }

    #[test]
    fn test_public_url_joins_cleanly() {
        assert_eq!(
            public_media_url("https://crm.example.com/", "x.png"),
            "https://crm.example.com/api/media/x.png"
        );
    }
}
