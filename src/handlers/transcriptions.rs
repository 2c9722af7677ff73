//! # Transcription API Handlers
//!
//! ## Available Endpoints:
//! - `POST /api/transcribe` - upload audio files, returns a batch id immediately
//! - `GET /api/transcriptions` - every stored transcription record
//! - `GET /api/search` - records filtered by original file name

use crate::batch::BatchFile;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// File extensions accepted for upload.
const SUPPORTED_EXTENSIONS: &[&str] = &[".wav", ".mp3", ".m4a"];

fn has_supported_extension(file_name: &str) -> bool {
    SUPPORTED_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext))
}

/// Storage name for one uploaded file: the batch id prefixed to the original
/// name, so same-named files never collide across or within batches. Any
/// client-supplied directory components are stripped first.
fn storage_file_name(batch_uuid: Uuid, original_name: &str) -> String {
    let base = Path::new(original_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| original_name.to_string());
    format!("{}_{}", batch_uuid, base)
}

struct Upload {
    original_name: String,
    bytes: web::BytesMut,
}

/// Read every multipart field into memory. Nothing touches disk here, so a
/// validation failure later rejects the whole request without leaving files
/// behind.
async fn collect_uploads(mut payload: Multipart) -> AppResult<Vec<Upload>> {
    let mut uploads = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let original_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|name| name.to_string())
            .ok_or_else(|| {
                AppError::BadRequest("Multipart field is missing a file name".to_string())
            })?;

        let mut bytes = web::BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
            bytes.extend_from_slice(&chunk);
        }

        uploads.push(Upload {
            original_name,
            bytes,
        });
    }

    Ok(uploads)
}

/// `POST /api/transcribe`
///
/// Accepts one or more audio files. The whole request is rejected with 400
/// when any file name lacks a supported extension; otherwise every file is
/// persisted under a fresh batch id, batch processing is scheduled in the
/// background, and the response returns immediately with the batch id.
pub async fn transcribe(payload: Multipart, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let uploads = collect_uploads(payload).await?;

    if uploads
        .iter()
        .any(|upload| !has_supported_extension(&upload.original_name))
    {
        error!("Unsupported file format");
        return Err(AppError::BadRequest("Unsupported file format".to_string()));
    }

    let batch_uuid = Uuid::new_v4();
    let audio_dir = state.get_config().storage.audio_dir;

    let mut files = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let path = audio_dir.join(storage_file_name(batch_uuid, &upload.original_name));
        tokio::fs::write(&path, &upload.bytes).await.map_err(|e| {
            error!(file = %upload.original_name, error = %e, "Failed to store uploaded audio");
            AppError::Internal(format!("Error writing file {}: {}", upload.original_name, e))
        })?;
        files.push(BatchFile {
            path,
            original_name: upload.original_name,
        });
    }

    Arc::clone(&state.processor).spawn(batch_uuid, files);

    info!(%batch_uuid, "Transcription started");
    Ok(HttpResponse::Accepted().json(json!({
        "message": "Files uploaded, transcription started.",
        "batch_uuid": batch_uuid,
    })))
}

/// `GET /api/transcriptions`
pub async fn list_transcriptions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let records = state.store.list_all().await?;
    Ok(HttpResponse::Ok().json(records))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    file_name: String,
    #[serde(default)]
    match_full_file_name: bool,
    #[serde(default)]
    match_case: bool,
}

/// `GET /api/search?file_name=&match_full_file_name=&match_case=`
pub async fn search_transcriptions(
    query: web::Query<SearchQuery>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let records = state
        .store
        .search(
            &query.file_name,
            query.match_full_file_name,
            query.match_case,
        )
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(has_supported_extension("voice.wav"));
        assert!(has_supported_extension("voice.mp3"));
        assert!(has_supported_extension("voice.m4a"));
        assert!(!has_supported_extension("voice.flac"));
        assert!(!has_supported_extension("voice"));
        assert!(!has_supported_extension("voice.mp3.txt"));
    }

    #[test]
    fn test_storage_file_name_is_batch_prefixed() {
        let batch = Uuid::new_v4();
        assert_eq!(
            storage_file_name(batch, "a.mp3"),
            format!("{}_a.mp3", batch)
        );
    }

    #[test]
    fn test_storage_file_name_strips_directories() {
        let batch = Uuid::new_v4();
        assert_eq!(
            storage_file_name(batch, "../../etc/cron.wav"),
            format!("{}_cron.wav", batch)
        );
    }
}
