//! Header inspection: 3D/4D decision and statistic type of a candidate volume.

use crate::db::MapType;
use crate::import::nifti::{self, VolumeHeader, HEADER_SIZE};
use crate::import::types::VolumeError;
use crate::import::volume_scanner::{CandidateFile, VolumeFormat};
use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Everything the later stages need to know about an accepted volume
#[derive(Debug, Clone)]
pub struct Classification {
    pub header: VolumeHeader,
    /// Raw header as read from disk, `HEADER_SIZE` bytes
    pub header_bytes: Vec<u8>,
    pub map_type: MapType,
    pub description: String,
}

#[derive(Debug, Clone)]
pub enum ClassifyOutcome {
    Accepted(Classification),
    /// A 4D series; excluded from ingestion
    Rejected { shape: Vec<usize> },
}

/// Read a candidate's header and decide whether it is a single 3D map
pub fn classify(candidate: &CandidateFile) -> Result<ClassifyOutcome, VolumeError> {
    let header_bytes = read_header_bytes(candidate)?;
    let header = nifti::parse_header(&header_bytes)?;

    if header.is_multi_volume() {
        debug!(
            "Rejecting {}: 4D shape {:?}",
            candidate.path.display(),
            header.shape()
        );
        return Ok(ClassifyOutcome::Rejected {
            shape: header.shape(),
        });
    }

    let map_type = map_type_for(candidate.file_name());
    let description = header.descrip.clone();
    debug!(
        "Classified {} as {:?} with shape {:?}",
        candidate.path.display(),
        map_type,
        header.shape()
    );

    Ok(ClassifyOutcome::Accepted(Classification {
        header,
        header_bytes,
        map_type,
        description,
    }))
}

/// Statistic type from the file name, SPM naming convention
pub fn map_type_for(file_name: &str) -> MapType {
    static T_MAP: OnceLock<Regex> = OnceLock::new();
    static F_MAP: OnceLock<Regex> = OnceLock::new();

    let t_map = T_MAP.get_or_init(|| Regex::new(r"^spmT").expect("valid regex"));
    let f_map = F_MAP.get_or_init(|| Regex::new(r"^spmF").expect("valid regex"));

    if t_map.is_match(file_name) {
        MapType::T
    } else if f_map.is_match(file_name) {
        MapType::F
    } else {
        MapType::Other
    }
}

/// The file holding a candidate's header: itself, or the sibling `.hdr`
pub fn header_path(candidate: &CandidateFile) -> Result<PathBuf, VolumeError> {
    match candidate.format {
        VolumeFormat::Nifti | VolumeFormat::NiftiGz => Ok(candidate.path.clone()),
        VolumeFormat::AnalyzePair => ["hdr", "HDR", "Hdr"]
            .iter()
            .map(|ext| candidate.path.with_extension(ext))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                VolumeError::HeaderUnreadable(format!(
                    "no .hdr file next to {}",
                    candidate.path.display()
                ))
            }),
    }
}

fn read_header_bytes(candidate: &CandidateFile) -> Result<Vec<u8>, VolumeError> {
    let path = header_path(candidate)?;
    let file = File::open(&path)?;
    match candidate.format {
        VolumeFormat::NiftiGz => read_prefix(GzDecoder::new(file), &path),
        VolumeFormat::Nifti | VolumeFormat::AnalyzePair => read_prefix(file, &path),
    }
}

fn read_prefix<R: Read>(mut reader: R, path: &Path) -> Result<Vec<u8>, VolumeError> {
    let mut bytes = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes).map_err(|e| {
        VolumeError::HeaderUnreadable(format!("{}: {}", path.display(), e))
    })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::nifti::test_headers::header_bytes;
    use crate::import::nifti::ByteOrder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn candidate(path: PathBuf) -> CandidateFile {
        CandidateFile::from_path(path).unwrap()
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_map_type_by_prefix() {
        assert_eq!(map_type_for("spmT_0001.img"), MapType::T);
        assert_eq!(map_type_for("spmF_0003.nii"), MapType::F);
        assert_eq!(map_type_for("con_0001.nii.gz"), MapType::Other);
        assert_eq!(map_type_for("my_spmT_0001.nii"), MapType::Other);
    }

    #[test]
    fn test_classify_nifti_gz() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spmF_0002.nii.gz");
        let mut volume = header_bytes(ByteOrder::Little, &[2, 2, 2], "F contrast", b"n+1\0");
        volume.extend_from_slice(&[0u8; 4 + 32]);
        fs::write(&path, gzip(&volume)).unwrap();

        match classify(&candidate(path)).unwrap() {
            ClassifyOutcome::Accepted(classification) => {
                assert_eq!(classification.map_type, MapType::F);
                assert_eq!(classification.description, "F contrast");
                assert_eq!(classification.header.shape(), vec![2, 2, 2]);
            }
            other => panic!("expected accepted, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_four_dimensional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("series.nii");
        fs::write(&path, header_bytes(ByteOrder::Little, &[4, 4, 4, 10], "", b"n+1\0")).unwrap();

        assert!(matches!(
            classify(&candidate(path)).unwrap(),
            ClassifyOutcome::Rejected { shape } if shape == vec![4, 4, 4, 10]
        ));
    }

    #[test]
    fn test_single_volume_4d_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.nii");
        fs::write(&path, header_bytes(ByteOrder::Little, &[4, 4, 4, 1], "", b"n+1\0")).unwrap();

        assert!(matches!(
            classify(&candidate(path)).unwrap(),
            ClassifyOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_analyze_pair_reads_sibling_header() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("spmT_0001.hdr"),
            header_bytes(ByteOrder::Big, &[3, 3, 3], "T map", b"ni1\0"),
        )
        .unwrap();
        fs::write(dir.path().join("spmT_0001.img"), vec![0u8; 108]).unwrap();

        match classify(&candidate(dir.path().join("spmT_0001.img"))).unwrap() {
            ClassifyOutcome::Accepted(classification) => {
                assert_eq!(classification.map_type, MapType::T);
                assert_eq!(classification.header.byte_order, ByteOrder::Big);
            }
            other => panic!("expected accepted, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_truncated_header_is_unreadable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("orphan.img"), vec![0u8; 64]).unwrap();
        fs::write(dir.path().join("short.nii"), vec![0u8; 64]).unwrap();
        fs::write(dir.path().join("bad.nii.gz"), b"not gzip at all").unwrap();

        for name in ["orphan.img", "short.nii", "bad.nii.gz"] {
            let result = classify(&candidate(dir.path().join(name)));
            assert!(
                matches!(result, Err(VolumeError::HeaderUnreadable(_))),
                "{}: {:?}",
                name,
                result
            );
        }
    }
}
