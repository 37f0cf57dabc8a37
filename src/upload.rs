use axum::Json;
use axum::extract::Multipart;
use axum::extract::State;
use axum::extract::multipart::Field;
use axum::extract::multipart::MultipartRejection;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;
use uuid::Uuid;

use crate::app::ServerState;
use crate::catalog;
use crate::catalog::CatalogEntry;
use crate::error::AppError;
use crate::listing::VideoRecord;
use crate::listing::playback_url;

/// Name of the form field holding the video
const VIDEO_FIELD: &str = "video";

/// Room for the multipart framing around the file when checking `Content-Length`
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Longest extension carried over from the uploaded file name
const MAX_EXTENSION_LEN: usize = 8;

/// Extension of the client's file name, including the dot, when it is safe to reuse
fn stored_extension(original_name: &str) -> String {
    let Some((stem, extension)) = original_name.rsplit_once('.') else {
        return String::new();
    };

    let is_safe = !stem.is_empty()
        && !extension.is_empty()
        && extension.len() <= MAX_EXTENSION_LEN
        && extension.chars().all(|c| c.is_ascii_alphanumeric());

    if is_safe {
        format!(".{}", extension.to_ascii_lowercase())
    } else {
        String::new()
    }
}

/// Persist the field under a fresh id, rejecting it once it reaches the limit
async fn store_field(state: &ServerState, mut field: Field<'_>) -> Result<VideoRecord, AppError> {
    let limit = state.config.max_upload_size;

    // a plain text field is not a file, browsers send an empty name when none was picked
    let original_name = match field.file_name() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(AppError::MissingFile),
    };

    let id = Uuid::new_v4();
    let file_name = format!("{id}{}", stored_extension(&original_name));

    tracing::debug!(
        "Receiving {original_name:?} ({}) as {file_name}",
        field.content_type().unwrap_or("unknown type")
    );

    let mut pending = state.storage.create_pending(&file_name).await?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                pending.discard().await;
                return Err(err.into());
            }
        };

        if pending.written() + chunk.len() as u64 >= limit {
            pending.discard().await;
            return Err(AppError::TooLarge { limit });
        }

        if let Err(err) = pending.write(&chunk).await {
            pending.discard().await;
            return Err(err.into());
        }
    }

    let size = pending.commit().await?;

    let entry = CatalogEntry {
        id,
        original_name: original_name.clone(),
        file_name: file_name.clone(),
        size,
    };

    // the video itself is stored, a missing sidecar only costs the original name
    if let Err(err) = catalog::record(&state.storage, &entry).await {
        tracing::warn!("Could not record {file_name} in the catalog: {err}");
    }

    tracing::info!("Uploaded video {original_name:?} as {file_name} ({size} bytes)");

    Ok(VideoRecord {
        id: id.to_string(),
        name: original_name,
        url: Some(playback_url(&state.public_url, &file_name)),
        size: Some(size),
        original_name: None,
    })
}

/// `POST /upload`, store the file in the `video` field of a multipart form
pub async fn upload_video(
    State(state): State<ServerState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<VideoRecord>), AppError> {
    let limit = state.config.max_upload_size;

    // fail before reading anything when the client tells us it's too large
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    if content_length.is_some_and(|length| length >= limit.saturating_add(MULTIPART_OVERHEAD)) {
        return Err(AppError::TooLarge { limit });
    }

    let mut multipart = multipart?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(VIDEO_FIELD) {
            tracing::debug!("Skipping form field {:?}", field.name());
            continue;
        }

        let video = store_field(&state, field).await?;

        return Ok((StatusCode::CREATED, Json(video)));
    }

    Err(AppError::MissingFile)
}
