//! Conversion of accepted volumes to the canonical `.nii.gz` byte stream.

use crate::import::classifier::Classification;
use crate::import::nifti::{self, HEADER_SIZE};
use crate::import::types::VolumeError;
use crate::import::volume_scanner::{split_extension, CandidateFile, VolumeFormat, CANONICAL_EXTENSION};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

const SCRATCH_PREFIX: &str = "statmap-normalize-";

/// Canonical content for one volume
#[derive(Debug, Clone)]
pub struct NormalizedVolume {
    pub content: Vec<u8>,
    /// Original extension when the file had to be converted, e.g. ".img"
    pub converted_from: Option<String>,
}

/// Produce canonical bytes for a classified candidate.
///
/// Canonical files are returned unchanged. Everything else is rebuilt as a
/// single-file volume, compressed into a throwaway directory under
/// `scratch_parent` (system temp dir if None) and read back. The uploaded
/// files are never modified.
pub fn normalize(
    candidate: &CandidateFile,
    classification: &Classification,
    scratch_parent: Option<&Path>,
) -> Result<NormalizedVolume, VolumeError> {
    let single_file = match candidate.format {
        VolumeFormat::NiftiGz => {
            return Ok(NormalizedVolume {
                content: fs::read(&candidate.path)?,
                converted_from: None,
            })
        }
        VolumeFormat::Nifti => read_single_file(candidate, classification)?,
        VolumeFormat::AnalyzePair => merge_pair(candidate, classification)?,
    };

    let (stem, _) = split_extension(candidate.file_name());
    let content = encode_canonical(stem, &single_file, scratch_parent)?;
    debug!(
        "Normalized {} ({} -> {} bytes)",
        candidate.path.display(),
        single_file.len(),
        content.len()
    );

    Ok(NormalizedVolume {
        content,
        converted_from: Some(candidate.extension().to_string()),
    })
}

/// Whole `.nii` file, checked to hold all the voxel data its header promises
fn read_single_file(
    candidate: &CandidateFile,
    classification: &Classification,
) -> Result<Vec<u8>, VolumeError> {
    let (offset, data_len) = classification.header.data_range()?;
    ensure_holds_data(candidate, fs::metadata(&candidate.path)?.len(), offset, data_len)?;
    Ok(fs::read(&candidate.path)?)
}

/// Header from the `.hdr`, voxel data from the `.img`, as one single-file volume
fn merge_pair(
    candidate: &CandidateFile,
    classification: &Classification,
) -> Result<Vec<u8>, VolumeError> {
    let header = &classification.header;
    let (offset, data_len) = header.data_range()?;

    let mut image = File::open(&candidate.path)?;
    ensure_holds_data(candidate, image.metadata()?.len(), offset, data_len)?;
    image.seek(SeekFrom::Start(offset))?;
    let mut data = vec![0u8; data_len];
    image.read_exact(&mut data).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => VolumeError::VolumeFormat(format!(
            "{} is shorter than the {} bytes of data its header describes",
            candidate.path.display(),
            data_len
        )),
        _ => VolumeError::Io(e),
    })?;

    Ok(nifti::to_single_file(
        &classification.header_bytes[..HEADER_SIZE],
        header,
        &data,
    ))
}

/// Checked before any buffer is sized from header values
fn ensure_holds_data(
    candidate: &CandidateFile,
    file_len: u64,
    offset: u64,
    data_len: usize,
) -> Result<(), VolumeError> {
    // data_range already proved this cannot overflow
    let required = offset.saturating_add(data_len as u64);
    if file_len < required {
        return Err(VolumeError::VolumeFormat(format!(
            "{} holds {} bytes, header needs {}",
            candidate.path.display(),
            file_len,
            required
        )));
    }
    Ok(())
}

fn encode_canonical(
    stem: &str,
    single_file: &[u8],
    scratch_parent: Option<&Path>,
) -> Result<Vec<u8>, VolumeError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(SCRATCH_PREFIX);
    let scratch = match scratch_parent {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };
    let target = scratch.path().join(format!("{}{}", stem, CANONICAL_EXTENSION));

    let encoded = write_gzip(&target, single_file).and_then(|_| fs::read(&target));
    if let Err(e) = scratch.close() {
        warn!("Failed to remove normalization scratch directory: {}", e);
    }
    encoded.map_err(|e| VolumeError::VolumeFormat(format!("encoding failed: {}", e)))
}

fn write_gzip(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = BufWriter::new(File::create(target)?);
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?.flush()
}
