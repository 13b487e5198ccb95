use crate::db::DbMapRecord;
use crate::library::LibraryError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A file as received from the upload layer
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-side file name (no directory part)
    pub name: String,
    pub content: Vec<u8>,
}

/// A file from a folder upload, with its path relative to the chosen folder
#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub file: UploadedFile,
    /// e.g. "study/run1/spmT_0001.img"; only the directory part is used
    pub relative_path: String,
}

/// The two accepted upload shapes
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A single .zip or .tar.gz archive
    Archive(UploadedFile),
    /// Individually uploaded files carrying their relative paths
    Parts(Vec<UploadedPart>),
}

/// Raw multipart form fields as the web layer collects them
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    /// The `file` field (archive upload)
    pub file: Option<UploadedFile>,
    /// The `file_input[]` fields (folder upload)
    pub file_inputs: Vec<UploadedFile>,
    /// The `paths[]` fields, one per entry of `file_inputs`
    pub paths: Vec<String>,
}

impl TryFrom<UploadForm> for UploadSource {
    type Error = StagingError;

    fn try_from(form: UploadForm) -> Result<Self, Self::Error> {
        match form {
            UploadForm {
                file: Some(archive),
                ..
            } => Ok(UploadSource::Archive(archive)),
            UploadForm {
                file: None,
                file_inputs,
                paths,
            } if !file_inputs.is_empty() => {
                if file_inputs.len() != paths.len() {
                    return Err(StagingError::UnrecognizedUploadShape(format!(
                        "{} files but {} relative paths",
                        file_inputs.len(),
                        paths.len()
                    )));
                }
                let parts = file_inputs
                    .into_iter()
                    .zip(paths)
                    .map(|(file, relative_path)| UploadedPart {
                        file,
                        relative_path,
                    })
                    .collect();
                Ok(UploadSource::Parts(parts))
            }
            UploadForm { .. } => Err(StagingError::UnrecognizedUploadShape(
                "neither an archive nor folder files were uploaded".to_string(),
            )),
        }
    }
}

/// Fatal failures while materializing an upload on disk
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Unsupported archive: {name}")]
    UnsupportedArchive { name: String },
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("Unrecognized upload shape: {0}")]
    UnrecognizedUploadShape(String),
    #[error("Unsafe upload path: {0}")]
    UnsafePath(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file failures while reading or converting a volume
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Volume format error: {0}")]
    VolumeFormat(String),
    #[error("Unreadable header: {0}")]
    HeaderUnreadable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that abort a whole ingestion request
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
    #[error("Ingestion cancelled")]
    Cancelled,
    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Why a discovered file produced no record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A 4D series rather than a single 3D map
    FourDimensional { shape: Vec<usize> },
    /// Header unreadable, decode or encode failure
    Volume { message: String },
    /// Classification and normalization exceeded the per-file deadline
    TimedOut,
    /// The blocking worker panicked
    WorkerFailed { message: String },
}

impl From<VolumeError> for SkipReason {
    fn from(error: VolumeError) -> Self {
        SkipReason::Volume {
            message: error.to_string(),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FourDimensional { shape } => {
                write!(f, "4D volume with shape {:?}", shape)
            }
            SkipReason::Volume { message } => write!(f, "{}", message),
            SkipReason::TimedOut => write!(f, "timed out"),
            SkipReason::WorkerFailed { message } => write!(f, "worker failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    /// Path relative to the staging root
    pub path: String,
    pub reason: SkipReason,
}

/// Outcome of one ingestion request that got past staging
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub request_id: String,
    pub created: Vec<DbMapRecord>,
    pub skipped: Vec<SkippedFile>,
}
