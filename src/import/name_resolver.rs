//! Display names for ingested maps, derived from staged paths.

use crate::import::volume_scanner::{split_extension, CANONICAL_EXTENSION};
use std::path::{Component, Path};

/// Derive the display name stored on a map record.
///
/// The first component of the path relative to the staging root is the
/// uploaded folder (or the archive's top directory) and is dropped. A file
/// sitting directly in the staging root keeps its own name. The extension
/// becomes `.nii.gz`; converted files get an `(old ext: ...)` suffix.
pub fn resolve_display_name(path: &Path, staging_root: &Path, converted_from: Option<&str>) -> String {
    let relative = path.strip_prefix(staging_root).unwrap_or(path);
    let components: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let kept = match components.len() {
        0 => return String::new(),
        1 => &components[..],
        _ => &components[1..],
    };

    let (dirs, file_name) = kept.split_at(kept.len() - 1);
    let (stem, _) = split_extension(&file_name[0]);

    let mut name = dirs
        .iter()
        .map(|dir| format!("{}/", dir))
        .collect::<String>();
    name.push_str(stem);
    name.push_str(CANONICAL_EXTENSION);

    if let Some(ext) = converted_from {
        name.push_str(&format!(" (old ext: {})", ext));
    }
    name
}
