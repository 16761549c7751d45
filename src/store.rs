//! Persistence of the composite security document.
//!
//! Stores are versioned: every successful `persist` bumps the version, and a write
//! that names a stale version is refused with [`StoreError::VersionConflict`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Security document `{path}` could not be accessed")]
    #[diagnostic(code(warden::store::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Security document is not valid JSON: {0}")]
    #[diagnostic(code(warden::store::json))]
    Json(#[from] serde_json::Error),

    #[error("Version conflict: expected {expected}, found {actual}")]
    #[diagnostic(
        code(warden::store::version_conflict),
        help("The security document changed since it was read; re-read it and retry the edit")
    )]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Store lock poisoned")]
    #[diagnostic(code(warden::store::poisoned))]
    Poisoned,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::VersionConflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub document: Value,
}

pub trait SecurityConfStore: Send + Sync {
    fn load(&self) -> Result<Versioned, StoreError>;

    /// Write `document` if the stored version is still `expected_version`.
    /// Returns the new version.
    fn persist(&self, document: &Value, expected_version: u64) -> Result<u64, StoreError>;
}

/// Keeps the document in memory only.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Versioned>,
}

impl MemoryStore {
    pub fn new(document: Value) -> Self {
        Self {
            inner: Mutex::new(Versioned {
                version: 0,
                document,
            }),
        }
    }
}

impl SecurityConfStore for MemoryStore {
    fn load(&self) -> Result<Versioned, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.clone())
    }

    fn persist(&self, document: &Value, expected_version: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if inner.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: inner.version,
            });
        }
        inner.version += 1;
        inner.document = document.clone();
        Ok(inner.version)
    }
}

/// A JSON file on local disk. The version counts writes made through this store.
///
/// Changes made to the file by anything else are read by the next edit and reach
/// live decisions once that edit is applied, or on restart.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    version: Mutex<u64>,
}

impl FileStore {
    /// Open `path`, creating it with an empty document `{}` if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(&path, source))?;
        }
        if !path.exists() {
            fs::write(&path, "{}").map_err(|source| io_error(&path, source))?;
            tracing::info!(path = %path.display(), "Created empty security document");
        }
        Ok(Self {
            path,
            version: Mutex::new(0),
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl SecurityConfStore for FileStore {
    fn load(&self) -> Result<Versioned, StoreError> {
        let version = self.version.lock().map_err(|_| StoreError::Poisoned)?;
        let contents =
            fs::read_to_string(&self.path).map_err(|source| io_error(&self.path, source))?;
        let document = if contents.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&contents)?
        };
        Ok(Versioned {
            version: *version,
            document,
        })
    }

    fn persist(&self, document: &Value, expected_version: u64) -> Result<u64, StoreError> {
        let mut version = self.version.lock().map_err(|_| StoreError::Poisoned)?;
        if *version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: *version,
            });
        }

        // write then rename so readers never see a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(document)?)
            .map_err(|source| io_error(&tmp, source))?;
        fs::rename(&tmp, &self.path).map_err(|source| io_error(&self.path, source))?;

        *version += 1;
        tracing::info!(path = %self.path.display(), version = *version, "Persisted security document");
        Ok(*version)
    }
}
