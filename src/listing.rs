use axum::Json;
use axum::extract::State;
use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;
use percent_encoding::utf8_percent_encode;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::app::ServerState;
use crate::catalog;
use crate::error::AppError;

/// Characters that can go into a path segment as-is
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A video as presented to clients, derived from the file system on every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

/// Stable id of a stored file
///
/// Uploaded files are named after their id, so that one is used. Any other file gets a
/// name based UUID, the same name always gives the same id.
pub fn video_id(file_name: &str) -> Uuid {
    file_name
        .rsplit_once('.')
        .and_then(|(stem, _)| {
            Uuid::parse_str(stem)
                .ok()
                .filter(|id| id.hyphenated().to_string() == stem)
        })
        .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, file_name.as_bytes()))
}

/// URL a stored file can be streamed from
pub fn playback_url(public_url: &str, file_name: &str) -> String {
    format!(
        "{public_url}/videos/{}",
        utf8_percent_encode(file_name, PATH_SEGMENT)
    )
}

/// `GET /videos`, every stored file with a recognized video extension
pub async fn list_videos(State(state): State<ServerState>) -> Result<Json<Vec<VideoRecord>>, AppError> {
    let entries = state.storage.list().await?;

    let mut videos = vec![];

    for entry in entries {
        if !state.config.is_video_file_name(&entry.file_name) {
            tracing::trace!("Not listing {}, not a video", entry.file_name);
            continue;
        }

        let original_name = catalog::lookup(&state.storage, &entry.file_name)
            .await
            .map(|catalog_entry| catalog_entry.original_name);

        videos.push(VideoRecord {
            id: video_id(&entry.file_name).to_string(),
            url: Some(playback_url(&state.public_url, &entry.file_name)),
            size: Some(entry.size),
            name: entry.file_name,
            original_name,
        });
    }

    tracing::debug!("Listing {} videos", videos.len());

    Ok(Json(videos))
}
