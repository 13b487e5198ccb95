//! Lazy discovery of candidate volume files in a staging tree.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension of the canonical stored format
pub const CANONICAL_EXTENSION: &str = ".nii.gz";

/// On-disk layout of a candidate volume, derived from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    /// `.nii` - header and data in one uncompressed file
    Nifti,
    /// `.nii.gz` - the canonical format
    NiftiGz,
    /// `.img` - data file whose header lives in a sibling `.hdr`
    AnalyzePair,
}

impl VolumeFormat {
    /// Map a (compound) extension such as ".nii.gz" to a format, ignoring case
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            ".nii" => Some(VolumeFormat::Nifti),
            ".nii.gz" => Some(VolumeFormat::NiftiGz),
            ".img" => Some(VolumeFormat::AnalyzePair),
            _ => None,
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, VolumeFormat::NiftiGz)
    }
}

/// A discovered file that looks like a volume
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub format: VolumeFormat,
}

impl CandidateFile {
    /// Classify a path by its file name. Hidden files are never candidates.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('.') {
            return None;
        }
        let (_, ext) = split_extension(file_name);
        let format = VolumeFormat::from_extension(ext)?;
        Some(CandidateFile { path, format })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Original extension as written, e.g. ".img" or ".NII.GZ"
    pub fn extension(&self) -> &str {
        split_extension(self.file_name()).1
    }
}

/// Split a file name into stem and extension, treating `x.<ext>.gz` as one
/// compound extension.
///
/// Leading dots belong to the stem, so `.gz` has no extension.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    let (stem, ext) = split_last_extension(file_name);
    if ext.eq_ignore_ascii_case(".gz") {
        let (inner_stem, _) = split_last_extension(stem);
        return (inner_stem, &file_name[inner_stem.len()..]);
    }
    (stem, ext)
}

fn split_last_extension(name: &str) -> (&str, &str) {
    let body_start = name.len() - name.trim_start_matches('.').len();
    match name[body_start..].rfind('.') {
        Some(idx) => name.split_at(body_start + idx),
        None => (name, ""),
    }
}

/// Walk `root` and yield every candidate volume file.
///
/// The walk is bottom-up (directory contents before the directory itself) and
/// entries are visited in file-name order, so the sequence is deterministic
/// for a given tree. Each call starts a fresh walk.
pub fn discover_volumes(root: &Path) -> impl Iterator<Item = CandidateFile> {
    debug!("Discovering volumes under {}", root.display());

    WalkDir::new(root)
        .follow_links(false)
        .contents_first(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable staging entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| CandidateFile::from_path(entry.into_path()))
}
