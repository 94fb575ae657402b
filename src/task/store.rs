use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::task::tracer::{DocumentError, TaskTracer};

/// Errors from persisting or loading task documents.
///
/// Always scoped to a single document: a batch operation over many tracers
/// reports these per file and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt document at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
}

/// Durable store for task tracers: one `task_<id>.json` file per tracer.
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    /// Creates a store rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("task_{id}.json"))
    }

    /// Writes a tracer's document atomically (write-temp-then-rename), so a
    /// crash never leaves a partial document behind.
    pub async fn save(&self, tracer: &TaskTracer) -> Result<(), PersistenceError> {
        let path = self.path_for(tracer.id());
        let doc = tracer.to_document().map_err(|source| PersistenceError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|source| PersistenceError::Corrupt {
            path: path.clone(),
            source: DocumentError::Json(source),
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PersistenceError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| PersistenceError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "saved task document");
        Ok(())
    }

    /// Loads a single tracer by id.
    pub async fn load(&self, id: &str) -> Result<TaskTracer, PersistenceError> {
        self.load_path(&self.path_for(id)).await
    }

    /// Loads every `task_*.json` document in the directory.
    ///
    /// Each file is independently fallible: a corrupt or unreadable document
    /// is reported in the error list and never aborts the rest of the load.
    pub async fn load_all(&self) -> (Vec<TaskTracer>, Vec<PersistenceError>) {
        let mut tracers = Vec::new();
        let mut errors = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return (tracers, errors);
            }
            Err(source) => {
                errors.push(PersistenceError::Io {
                    path: self.dir.clone(),
                    source,
                });
                return (tracers, errors);
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    errors.push(PersistenceError::Io {
                        path: self.dir.clone(),
                        source,
                    });
                    break;
                }
            };
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("task_") || !name.ends_with(".json") {
                continue;
            }
            match self.load_path(&path).await {
                Ok(tracer) => tracers.push(tracer),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable task document");
                    errors.push(error);
                }
            }
        }

        (tracers, errors)
    }

    /// Deletes a tracer's document. A missing file is not an error.
    pub async fn delete(&self, id: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }

    async fn load_path(&self, path: &Path) -> Result<TaskTracer, PersistenceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let doc = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source: DocumentError::Json(source),
        })?;
        TaskTracer::from_document(doc).map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }
}
