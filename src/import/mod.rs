// # Import Module
//
// Ingestion of uploaded statistical maps, built from small testable parts:
//
// - **Staging**: Materializes an archive or folder upload in a temp directory
// - **VolumeScanner**: Lazily discovers candidate volume files
// - **Nifti**: Reads and rewrites NIfTI-1 / Analyze headers
// - **Classifier**: Rejects 4D series, derives map type and description
// - **Normalizer**: Converts volumes to canonical `.nii.gz` content
// - **NameResolver**: Derives record display names from staged paths
// - **Pipeline**: Bounded, deadline-guarded per-file preparation
// - **IngestService**: Orchestrates a request and guarantees cleanup
//
// Public API:
// - `IngestService`: Ingest directly, or start a worker
// - `IngestServiceHandle`: Submit requests and subscribe to progress
// - `UploadSource` / `UploadForm`: Accepted upload shapes
// - `IngestReport`: Created records and skipped files

mod classifier;
mod name_resolver;
mod nifti;
mod normalizer;
mod pipeline;
mod progress;
mod service;
mod staging;
mod types;
mod volume_scanner;

// Public API exports
pub use classifier::{classify, map_type_for, Classification, ClassifyOutcome};
pub use name_resolver::resolve_display_name;
pub use nifti::{parse_header, to_single_file, ByteOrder, VolumeHeader, HEADER_SIZE, SINGLE_FILE_VOX_OFFSET};
pub use normalizer::{normalize, NormalizedVolume};
pub use progress::{IngestProgress, IngestProgressHandle};
pub use service::{IngestCancellation, IngestConfig, IngestService, IngestServiceHandle, IngestTicket};
pub use staging::StagingArea;
pub use types::{
    IngestError, IngestReport, SkipReason, SkippedFile, StagingError, UploadForm, UploadSource,
    UploadedFile, UploadedPart, VolumeError,
};
pub use volume_scanner::{discover_volumes, split_extension, CandidateFile, VolumeFormat, CANONICAL_EXTENSION};
