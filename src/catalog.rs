//! Small on-disk catalog remembering what was uploaded.
//!
//! Every upload gets a JSON sidecar in `<root>/.meta/`, keyed by the stored file name.
//! Streaming never looks at it, the listing uses it to show the original file name.

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::storage::Storage;
use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub original_name: String,
    pub file_name: String,
    pub size: u64,
}

/// Store the sidecar for `entry`, replacing any previous one
pub async fn record(storage: &Storage, entry: &CatalogEntry) -> Result<(), StorageError> {
    let path = storage.meta_path(&entry.file_name);

    if let Some(meta_dir) = path.parent() {
        tokio::fs::create_dir_all(meta_dir)
            .await
            .map_err(|source| StorageError::Io {
                op: "create",
                path: meta_dir.to_path_buf(),
                source,
            })?;
    }

    let json = serde_json::to_vec_pretty(entry).map_err(|err| StorageError::Io {
        op: "serialize",
        path: path.clone(),
        source: err.into(),
    })?;

    tokio::fs::write(&path, json)
        .await
        .map_err(|source| StorageError::Io {
            op: "write",
            path,
            source,
        })
}

/// Look up the sidecar for `file_name`, videos that were not uploaded have none
pub async fn lookup(storage: &Storage, file_name: &str) -> Option<CatalogEntry> {
    let path = storage.meta_path(file_name);

    let json = match tokio::fs::read(&path).await {
        Ok(json) => json,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!("Could not read catalog entry {path:?}: {err}");
            return None;
        }
    };

    match serde_json::from_slice::<CatalogEntry>(&json) {
        Ok(entry) if entry.file_name == file_name => Some(entry),
        Ok(entry) => {
            tracing::warn!(
                "Catalog entry {path:?} belongs to {}, ignoring it",
                entry.file_name
            );
            None
        }
        Err(err) => {
            tracing::warn!("Invalid catalog entry {path:?}: {err}");
            None
        }
    }
}
