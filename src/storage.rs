//! Access to the flat directory the videos live in.
//!
//! Every name handed to the storage comes from a client, so it is checked twice: it has
//! to be a single normal path component, and once resolved (following symlinks) it has to
//! stay inside the storage root.

use std::io;
use std::io::ErrorKind;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use tokio::fs::File;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt as _;
use tokio::io::BufWriter;

/// Directory inside the storage root holding the catalog sidecars
pub const META_DIR: &str = ".meta";

/// Suffix of files that are still being uploaded
const PENDING_SUFFIX: &str = ".part";

/// Size of the write buffer used while persisting uploads
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No video named \"{0}\"")]
    NotFound(String),

    #[error("Invalid video name \"{0}\"")]
    InvalidName(String),

    #[error("Could not {op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl StorageError {
    fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }
}

/// An opened video, the handle is closed when this is dropped
#[derive(Debug)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub file: File,
}

/// A regular file found in the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open the storage, creating the root directory when it does not exist yet
    pub async fn open_root(root: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(StorageError::io("create", root))?;

        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(StorageError::io("canonicalize", root))?;

        tracing::debug!("Storage root at {root:?}");

        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the root exists, it might have been removed while running
    async fn ensure_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(StorageError::io("create", &self.root))
    }

    /// Turn a client supplied name into a path inside the root, without touching the disk
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = Path::new(name);
        let mut components = path.components();

        // exactly one normal component: no separators, no `..`, no absolute paths
        let is_valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !name.starts_with('.')
            && !name.contains(['/', '\\']);

        if !is_valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }

        Ok(self.root.join(path))
    }

    /// Open a stored video by file name, or by the id it was uploaded under
    pub async fn open(&self, name: &str) -> Result<StoredFile, StorageError> {
        let mut path = self.resolve(name)?;

        // uploads in progress are not videos yet
        if name.ends_with(PENDING_SUFFIX) {
            return Err(StorageError::NotFound(name.to_string()));
        }

        if !name.contains('.') && !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Some(file_name) = self.find_by_stem(name).await {
                tracing::trace!("Resolved id {name} to {file_name}");
                path = self.root.join(file_name);
            }
        }

        let canonical = tokio::fs::canonicalize(&path).await;

        let path = match canonical {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            Err(err) => return Err(StorageError::io("canonicalize", path)(err)),
        };

        // symlinks might point anywhere
        if !path.starts_with(&self.root) {
            tracing::warn!("Refusing {name}, it resolves outside the storage root");
            return Err(StorageError::InvalidName(name.to_string()));
        }

        let opened = File::open(&path).await;

        let file = match opened {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            Err(err) => return Err(StorageError::io("open", path)(err)),
        };

        let meta = file
            .metadata()
            .await
            .map_err(StorageError::io("stat", &path))?;

        if !meta.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }

        Ok(StoredFile {
            size: meta.len(),
            modified: meta.modified().ok(),
            path,
            file,
        })
    }

    /// Find the file uploaded as `stem`, ie `<stem>.<ext>`
    ///
    /// An unreadable root has no files to match.
    async fn find_by_stem(&self, stem: &str) -> Option<String> {
        let entries = match self.list().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!("No lookup of id {stem}: {err}");
                return None;
            }
        };

        entries
            .into_iter()
            .map(|entry| entry.file_name)
            .filter(|file_name| {
                file_name
                    .rsplit_once('.')
                    .is_some_and(|(file_stem, _)| file_stem == stem)
            })
            .min()
    }

    /// All regular files directly in the root, sorted by name
    ///
    /// Files with a name that is not valid UTF-8 can't be addressed over HTTP and are skipped.
    pub async fn list(&self) -> Result<Vec<StoredEntry>, StorageError> {
        let mut read_dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(StorageError::io("read", &self.root))?;

        let mut entries = vec![];

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(StorageError::io("read", &self.root))?
        {
            let Ok(file_name) = entry.file_name().into_string() else {
                tracing::debug!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };

            if file_name.starts_with('.') || file_name.ends_with(PENDING_SUFFIX) {
                continue;
            }

            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::warn!("Could not stat {file_name}, skipping it: {err}");
                    continue;
                }
            };

            if meta.is_file() {
                entries.push(StoredEntry {
                    file_name,
                    size: meta.len(),
                });
            }
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        Ok(entries)
    }

    /// Start writing a new file named `file_name`, it only shows up once committed
    pub async fn create_pending(&self, file_name: &str) -> Result<PendingFile, StorageError> {
        self.ensure_root().await?;

        let final_path = self.resolve(file_name)?;
        let temp_path = self.resolve(&format!("{file_name}{PENDING_SUFFIX}"))?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(StorageError::io("create", &temp_path))?;

        Ok(PendingFile {
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            temp_path,
            final_path,
            written: 0,
            done: false,
        })
    }

    /// Path of the catalog sidecar belonging to `file_name`
    pub fn meta_path(&self, file_name: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{file_name}.json"))
    }
}

/// A file being written into the storage
///
/// Removed from disk when dropped before [`PendingFile::commit`] succeeded.
#[derive(Debug)]
pub struct PendingFile {
    writer: BufWriter<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    done: bool,
}

impl PendingFile {
    #[inline]
    pub const fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(StorageError::io("write", &self.temp_path))?;

        self.written += chunk.len() as u64;

        Ok(())
    }

    /// Flush everything to disk and move the file in place
    pub async fn commit(mut self) -> Result<u64, StorageError> {
        self.writer
            .flush()
            .await
            .map_err(StorageError::io("write", &self.temp_path))?;

        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(StorageError::io("sync", &self.temp_path))?;

        tokio::fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(StorageError::io("rename", &self.temp_path))?;

        self.done = true;

        Ok(self.written)
    }

    /// Throw away what was written so far
    pub async fn discard(mut self) {
        self.done = true;

        if let Err(err) = tokio::fs::remove_file(&self.temp_path).await {
            tracing::error!("Could not remove unfinished upload {:?}: {err}", self.temp_path);
        }
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        // the request went away halfway through
        tracing::debug!("Removing abandoned upload {:?}", self.temp_path);

        if let Err(err) = std::fs::remove_file(&self.temp_path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::error!("Could not remove abandoned upload {:?}: {err}", self.temp_path);
            }
        }
    }
}
