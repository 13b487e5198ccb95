//! In-memory volumes and archives for ingestion tests.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Cursor, Write};

const HEADER_SIZE: usize = 348;
const BITPIX_FLOAT32: i16 = 32;
const DT_FLOAT32: i16 = 16;

/// 348-byte little-endian header with float32 voxels
pub fn header(shape: &[i16], descrip: &str, magic: &[u8; 4]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    bytes[40..42].copy_from_slice(&(shape.len() as i16).to_le_bytes());
    for (axis, size) in shape.iter().enumerate() {
        let pos = 42 + axis * 2;
        bytes[pos..pos + 2].copy_from_slice(&size.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&DT_FLOAT32.to_le_bytes());
    bytes[72..74].copy_from_slice(&BITPIX_FLOAT32.to_le_bytes());
    for (axis, spacing) in [1.0f32, 2.0, 2.0, 2.0].iter().enumerate() {
        let pos = 76 + axis * 4;
        bytes[pos..pos + 4].copy_from_slice(&spacing.to_le_bytes());
    }
    bytes[148..148 + descrip.len()].copy_from_slice(descrip.as_bytes());
    bytes[344..348].copy_from_slice(magic);
    bytes
}

/// Deterministic voxel payload for a shape
pub fn voxels(shape: &[i16]) -> Vec<u8> {
    let count: usize = shape.iter().map(|s| *s as usize).product();
    (0..count * 4).map(|i| (i % 251) as u8).collect()
}

/// Uncompressed single-file `.nii` content
pub fn nifti(shape: &[i16], descrip: &str) -> Vec<u8> {
    let mut bytes = header(shape, descrip, b"n+1\0");
    bytes[108..112].copy_from_slice(&352f32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.extend_from_slice(&voxels(shape));
    bytes
}

/// Compressed `.nii.gz` content
pub fn nifti_gz(shape: &[i16], descrip: &str) -> Vec<u8> {
    gzip(&nifti(shape, descrip))
}

/// `.hdr` and `.img` contents of an Analyze-style pair
pub fn analyze_pair(shape: &[i16], descrip: &str) -> (Vec<u8>, Vec<u8>) {
    (header(shape, descrip, b"ni1\0"), voxels(shape))
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

pub fn gunzip(bytes: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .expect("valid gzip");
    out
}

pub fn tar_gz_archive(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data.as_slice())
            .expect("tar entry");
    }
    builder
        .into_inner()
        .expect("tar finish")
        .finish()
        .expect("gzip finish")
}

pub fn zip_archive(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, data) in entries {
        writer.start_file(*path, options).expect("zip entry");
        writer.write_all(data).expect("zip write");
    }
    writer.finish().expect("zip finish").into_inner()
}
