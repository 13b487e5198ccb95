//! Materializes an upload into an exclusively-owned temporary directory.
//!
//! The staging directory lives exactly as long as its `StagingArea`: it is
//! removed on `close()` or, on any early return, when the value is dropped.

use crate::import::types::{StagingError, UploadSource, UploadedFile, UploadedPart};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const STAGING_PREFIX: &str = "statmap-staging-";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// `.zip` selects the zip decoder; every other name is tried as gzip+tar
    fn from_name(name: &str) -> Self {
        let is_zip = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if is_zip {
            ArchiveKind::Zip
        } else {
            ArchiveKind::TarGz
        }
    }
}

/// Temporary directory tree holding one request's upload
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create an empty staging area under `parent` (system temp dir if None)
    pub fn create(parent: Option<&Path>) -> Result<Self, StagingError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!("Created staging area {}", dir.path().display());
        Ok(StagingArea { dir })
    }

    /// Create a staging area and materialize the upload into it.
    ///
    /// On failure the partially written staging area is removed before the
    /// error is returned.
    pub fn stage(source: UploadSource, parent: Option<&Path>) -> Result<Self, StagingError> {
        let area = Self::create(parent)?;
        match &source {
            UploadSource::Archive(archive) => area.extract_archive(archive)?,
            UploadSource::Parts(parts) => area.write_parts(parts)?,
        }
        Ok(area)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the staging directory and everything in it
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed staging area {}", path.display());
        Ok(())
    }

    fn extract_archive(&self, archive: &UploadedFile) -> Result<(), StagingError> {
        let kind = ArchiveKind::from_name(&archive.name);
        info!(
            "Extracting {:?} archive '{}' ({} bytes)",
            kind,
            archive.name,
            archive.content.len()
        );
        match kind {
            ArchiveKind::Zip => extract_zip(archive, self.root()),
            ArchiveKind::TarGz => extract_tar_gz(archive, self.root()),
        }
    }

    fn write_parts(&self, parts: &[UploadedPart]) -> Result<(), StagingError> {
        info!("Staging {} uploaded files", parts.len());
        for part in parts {
            let relative_dir = safe_relative_dir(&part.relative_path)?;
            let file_name = safe_file_name(&part.file.name)?;

            let dir = self.root().join(relative_dir);
            // create_dir_all is a no-op for directories that already exist
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(file_name), &part.file.content)?;
        }
        Ok(())
    }
}

fn extract_zip(archive: &UploadedFile, root: &Path) -> Result<(), StagingError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive.content.as_slice())).map_err(|e| {
        debug!("Not a zip archive: {}", e);
        StagingError::UnsupportedArchive {
            name: archive.name.clone(),
        }
    })?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| StagingError::CorruptArchive(format!("entry {}: {}", index, e)))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            StagingError::CorruptArchive(format!("entry escapes archive root: {}", entry.name()))
        })?;
        let target = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            StagingError::CorruptArchive(format!("{}: {}", target.display(), e))
        })?;
    }
    Ok(())
}

fn extract_tar_gz(archive: &UploadedFile, root: &Path) -> Result<(), StagingError> {
    if !archive.content.starts_with(&GZIP_MAGIC) {
        return Err(StagingError::UnsupportedArchive {
            name: archive.name.clone(),
        });
    }

    let decoder = GzDecoder::new(Cursor::new(archive.content.as_slice()));
    tar::Archive::new(decoder)
        .unpack(root)
        .map_err(|e| StagingError::CorruptArchive(e.to_string()))
}

/// Directory part of an uploaded relative path, restricted to plain components
fn safe_relative_dir(relative_path: &str) -> Result<PathBuf, StagingError> {
    let mut dir = PathBuf::new();
    let parent = Path::new(relative_path).parent().unwrap_or(Path::new(""));
    for component in parent.components() {
        match component {
            Component::Normal(part) => dir.push(part),
            Component::CurDir => {}
            _ => return Err(StagingError::UnsafePath(relative_path.to_string())),
        }
    }
    Ok(dir)
}

fn safe_file_name(name: &str) -> Result<&str, StagingError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(StagingError::UnsafePath(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn tar_gz_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (path, data) in entries {
            writer.start_file(*path, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn archive(name: &str, content: Vec<u8>) -> UploadSource {
        UploadSource::Archive(UploadedFile {
            name: name.to_string(),
            content,
        })
    }

    #[test]
    fn test_archive_kind_by_extension() {
        assert_eq!(ArchiveKind::from_name("maps.zip"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_name("MAPS.ZIP"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_name("maps.tar.gz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_name("maps.rar"), ArchiveKind::TarGz);
    }

    #[test]
    fn test_stage_tar_gz() {
        let parent = TempDir::new().unwrap();
        let content = tar_gz_with(&[("study/run1/a.nii", b"aaa"), ("study/b.img", b"bb")]);

        let area = StagingArea::stage(archive("maps.tar.gz", content), Some(parent.path())).unwrap();

        assert_eq!(fs::read(area.root().join("study/run1/a.nii")).unwrap(), b"aaa");
        assert_eq!(fs::read(area.root().join("study/b.img")).unwrap(), b"bb");
    }

    #[test]
    fn test_stage_zip() {
        let parent = TempDir::new().unwrap();
        let content = zip_with(&[("study/run1/a.nii", b"aaa")]);

        let area = StagingArea::stage(archive("maps.zip", content), Some(parent.path())).unwrap();

        assert_eq!(fs::read(area.root().join("study/run1/a.nii")).unwrap(), b"aaa");
    }

    #[test]
    fn test_unrecognized_archive_is_unsupported_and_cleaned_up() {
        let parent = TempDir::new().unwrap();

        let rar = StagingArea::stage(archive("maps.rar", b"Rar!\x1a\x07".to_vec()), Some(parent.path()));
        assert!(matches!(rar, Err(StagingError::UnsupportedArchive { .. })));

        let fake_zip = StagingArea::stage(archive("maps.zip", b"not a zip".to_vec()), Some(parent.path()));
        assert!(matches!(fake_zip, Err(StagingError::UnsupportedArchive { .. })));

        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_truncated_tar_gz_is_corrupt() {
        let parent = TempDir::new().unwrap();
        let mut content = tar_gz_with(&[("study/a.nii", &[7u8; 4096])]);
        content.truncate(content.len() / 2);

        let result = StagingArea::stage(archive("maps.tgz", content), Some(parent.path()));

        assert!(matches!(result, Err(StagingError::CorruptArchive(_))));
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stage_parts_recreates_directories() {
        let parent = TempDir::new().unwrap();
        let parts = vec![
            UploadedPart {
                file: UploadedFile {
                    name: "spmT_0001.img".to_string(),
                    content: b"img".to_vec(),
                },
                relative_path: "a/b/spmT_0001.img".to_string(),
            },
            UploadedPart {
                file: UploadedFile {
                    name: "spmT_0001.hdr".to_string(),
                    content: b"hdr".to_vec(),
                },
                relative_path: "a/b/spmT_0001.hdr".to_string(),
            },
        ];

        let area = StagingArea::stage(UploadSource::Parts(parts), Some(parent.path())).unwrap();

        assert_eq!(fs::read(area.root().join("a/b/spmT_0001.img")).unwrap(), b"img");
        assert_eq!(fs::read(area.root().join("a/b/spmT_0001.hdr")).unwrap(), b"hdr");
    }

    #[test]
    fn test_parts_with_parent_components_are_rejected() {
        let parent = TempDir::new().unwrap();
        let parts = vec![UploadedPart {
            file: UploadedFile {
                name: "x.nii".to_string(),
                content: vec![],
            },
            relative_path: "../../x.nii".to_string(),
        }];

        let result = StagingArea::stage(UploadSource::Parts(parts), Some(parent.path()));

        assert!(matches!(result, Err(StagingError::UnsafePath(_))));
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_close_removes_directory() {
        let area = StagingArea::create(None).unwrap();
        let root = area.root().to_path_buf();
        fs::write(root.join("file"), b"x").unwrap();

        area.close().unwrap();

        assert!(!root.exists());
    }
}
