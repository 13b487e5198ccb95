// Per-file preparation stage of an ingestion request
//
// Each candidate goes through classify → normalize → name on a blocking
// worker. Work is bounded by `max_workers` and every file has its own
// deadline. Results come back in discovery order so persistence stays
// deterministic; the consumer (the service) owns all writes.

use crate::db::MapType;
use crate::import::classifier::{classify, ClassifyOutcome};
use crate::import::name_resolver::resolve_display_name;
use crate::import::normalizer::normalize;
use crate::import::service::{IngestCancellation, IngestConfig};
use crate::import::types::{SkipReason, SkippedFile};
use crate::import::volume_scanner::CandidateFile;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// A volume ready to be persisted
#[derive(Debug, Clone)]
pub(super) struct PreparedVolume {
    /// Path relative to the staging root, for logs
    pub(super) path: String,
    pub(super) name: String,
    pub(super) description: String,
    pub(super) map_type: MapType,
    pub(super) content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(super) enum PreparedFile {
    Ready(PreparedVolume),
    Skipped(SkippedFile),
}

/// Stream of prepared files, one per candidate, in candidate order.
///
/// No new file is scheduled once `cancellation` is set.
pub(super) fn build_pipeline(
    candidates: Vec<CandidateFile>,
    staging_root: PathBuf,
    config: &IngestConfig,
    cancellation: IngestCancellation,
) -> impl Stream<Item = PreparedFile> {
    let file_timeout = config.file_timeout;

    stream::iter(candidates)
        .take_while(move |_| future::ready(!cancellation.is_cancelled()))
        .map(move |candidate| {
            let staging_root = staging_root.clone();
            async move {
                let path = relative_path(&candidate.path, &staging_root);
                let task = tokio::task::spawn_blocking(move || {
                    prepare_volume(&candidate, &staging_root)
                });

                let outcome = match tokio::time::timeout(file_timeout, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_error)) => Err(SkipReason::WorkerFailed {
                        message: join_error.to_string(),
                    }),
                    Err(_) => {
                        warn!("{} exceeded {:?}, abandoning it", path, file_timeout);
                        Err(SkipReason::TimedOut)
                    }
                };

                match outcome {
                    Ok(mut volume) => {
                        volume.path = path;
                        PreparedFile::Ready(volume)
                    }
                    Err(reason) => PreparedFile::Skipped(SkippedFile { path, reason }),
                }
            }
        })
        .buffered(config.max_workers.max(1))
}

/// Classify, normalize and name one candidate. Blocking.
fn prepare_volume(candidate: &CandidateFile, staging_root: &Path) -> Result<PreparedVolume, SkipReason> {
    let classification = match classify(candidate)? {
        ClassifyOutcome::Accepted(classification) => classification,
        ClassifyOutcome::Rejected { shape } => return Err(SkipReason::FourDimensional { shape }),
    };

    // Scratch space lives inside the staging area so cleanup covers it
    let normalized = normalize(candidate, &classification, Some(staging_root))?;
    let name = resolve_display_name(
        &candidate.path,
        staging_root,
        normalized.converted_from.as_deref(),
    );

    Ok(PreparedVolume {
        path: String::new(),
        name,
        description: classification.description,
        map_type: classification.map_type,
        content: normalized.content,
    })
}

/// `/`-separated path relative to the staging root
pub(super) fn relative_path(path: &Path, staging_root: &Path) -> String {
    path.strip_prefix(staging_root)
        .unwrap_or(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::nifti::test_headers::header_bytes;
    use crate::import::nifti::ByteOrder;
    use crate::import::volume_scanner::discover_volumes;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_nifti(path: &Path, shape: &[i16]) {
        let mut volume = header_bytes(ByteOrder::Little, shape, "", b"n+1\0");
        let voxels: usize = shape.iter().map(|s| *s as usize).product();
        volume.extend_from_slice(&[0u8; 4]);
        volume.extend_from_slice(&vec![0u8; voxels * 4]);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, volume).unwrap();
    }

    fn config() -> IngestConfig {
        IngestConfig {
            staging_dir: None,
            max_workers: 2,
            file_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_pipeline_preserves_candidate_order() {
        let root = TempDir::new().unwrap();
        write_nifti(&root.path().join("study/spmT_0001.nii"), &[2, 2, 2]);
        write_nifti(&root.path().join("study/series.nii"), &[2, 2, 2, 5]);
        write_nifti(&root.path().join("study/spmF_0002.nii"), &[2, 2, 2]);
        let candidates: Vec<CandidateFile> = discover_volumes(root.path()).collect();

        let prepared: Vec<PreparedFile> = build_pipeline(
            candidates,
            root.path().to_path_buf(),
            &config(),
            IngestCancellation::new(),
        )
        .collect()
        .await;

        assert_eq!(prepared.len(), 3);
        assert!(matches!(
            &prepared[0],
            PreparedFile::Skipped(SkippedFile { path, reason: SkipReason::FourDimensional { .. } })
                if path == "study/series.nii"
        ));
        match (&prepared[1], &prepared[2]) {
            (PreparedFile::Ready(f), PreparedFile::Ready(t)) => {
                assert_eq!(f.map_type, MapType::F);
                assert_eq!(f.name, "spmF_0002.nii.gz (old ext: .nii)");
                assert_eq!(t.map_type, MapType::T);
                assert_eq!(t.path, "study/spmT_0001.nii");
            }
            other => panic!("unexpected outcomes: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_schedules_nothing() {
        let root = TempDir::new().unwrap();
        write_nifti(&root.path().join("study/a.nii"), &[2, 2, 2]);
        let candidates: Vec<CandidateFile> = discover_volumes(root.path()).collect();
        let cancellation = IngestCancellation::new();
        cancellation.cancel();

        let prepared: Vec<PreparedFile> =
            build_pipeline(candidates, root.path().to_path_buf(), &config(), cancellation)
                .collect()
                .await;

        assert!(prepared.is_empty());
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let root = Path::new("/staging");
        assert_eq!(relative_path(&root.join("a/b/c.nii"), root), "a/b/c.nii");
    }
}
