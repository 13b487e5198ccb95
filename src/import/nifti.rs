//! NIfTI-1 / Analyze 7.5 header codec.
//!
//! Both formats share the 348-byte header layout for every field read here.
//! Byte order is detected from `sizeof_hdr`, which must read as 348.

use crate::import::types::VolumeError;
use nom::{
    bytes::complete::take,
    multi::count,
    number::{complete as number, Endianness},
    IResult,
};

pub const HEADER_SIZE: usize = 348;
/// Data offset of a single-file volume with no header extensions
pub const SINGLE_FILE_VOX_OFFSET: usize = 352;

const VOX_OFFSET_POS: usize = 108;
const MAGIC_POS: usize = 344;
const MAGIC_SINGLE_FILE: [u8; 4] = *b"n+1\0";
const MAX_DIMS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl From<ByteOrder> for Endianness {
    fn from(order: ByteOrder) -> Self {
        match order {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        }
    }
}

impl ByteOrder {
    fn f32_bytes(&self, value: f32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Header fields the pipeline relies on
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeHeader {
    pub byte_order: ByteOrder,
    /// dim[0] is the number of axes, dim[1..=dim[0]] their sizes
    pub dim: [i16; 8],
    pub datatype: i16,
    pub bitpix: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub descrip: String,
    pub magic: [u8; 4],
}

impl VolumeHeader {
    pub fn ndim(&self) -> usize {
        (self.dim[0].max(0) as usize).min(MAX_DIMS)
    }

    /// Axis sizes, outermost last
    pub fn shape(&self) -> Vec<usize> {
        self.dim[1..=self.ndim()]
            .iter()
            .map(|size| (*size).max(0) as usize)
            .collect()
    }

    /// True for series with more than one volume along the 4th axis
    pub fn is_multi_volume(&self) -> bool {
        let shape = self.shape();
        shape.len() > 3 && shape[3] > 1
    }

    /// Whole bytes per voxel, None for bit-packed or invalid `bitpix`
    pub fn bytes_per_voxel(&self) -> Option<usize> {
        if self.bitpix <= 0 || self.bitpix % 8 != 0 {
            return None;
        }
        Some(self.bitpix as usize / 8)
    }

    /// Bytes of voxel data the header describes
    pub fn data_len(&self) -> Result<usize, VolumeError> {
        let voxel = self.bytes_per_voxel().ok_or_else(|| {
            VolumeError::VolumeFormat(format!("unsupported bitpix {}", self.bitpix))
        })?;
        let shape = self.shape();
        shape
            .iter()
            .try_fold(voxel, |acc, size| acc.checked_mul(*size))
            .ok_or_else(|| {
                VolumeError::VolumeFormat(format!(
                    "shape {:?} at {} bits per voxel is too large to address",
                    shape, self.bitpix
                ))
            })
    }

    /// Byte range of the voxel data: offset into the data file and length.
    ///
    /// Negative or NaN offsets read as 0. The end of the range must fit in a
    /// u64 so it can be compared against a file length.
    pub fn data_range(&self) -> Result<(u64, usize), VolumeError> {
        let data_len = self.data_len()?;
        if self.vox_offset.is_infinite() {
            return Err(VolumeError::VolumeFormat(format!(
                "invalid data offset {}",
                self.vox_offset
            )));
        }
        let offset = self.vox_offset.max(0.0) as u64;
        offset.checked_add(data_len as u64).ok_or_else(|| {
            VolumeError::VolumeFormat(format!(
                "data offset {} plus {} bytes of data overflows",
                self.vox_offset, data_len
            ))
        })?;
        Ok((offset, data_len))
    }
}

/// Parse the first `HEADER_SIZE` bytes of a header
pub fn parse_header(bytes: &[u8]) -> Result<VolumeHeader, VolumeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(VolumeError::HeaderUnreadable(format!(
            "header is {} bytes, expected {}",
            bytes.len(),
            HEADER_SIZE
        )));
    }

    let byte_order = detect_byte_order(bytes)?;
    let (_, header) = header_fields(&bytes[..HEADER_SIZE], byte_order)
        .map_err(|e| VolumeError::HeaderUnreadable(format!("{:?}", e)))?;

    if header.dim[0] < 1 || header.dim[0] as usize > MAX_DIMS {
        return Err(VolumeError::HeaderUnreadable(format!(
            "invalid number of dimensions: {}",
            header.dim[0]
        )));
    }
    Ok(header)
}

fn detect_byte_order(bytes: &[u8]) -> Result<ByteOrder, VolumeError> {
    let sizeof_hdr = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if i32::from_le_bytes(sizeof_hdr) == HEADER_SIZE as i32 {
        Ok(ByteOrder::Little)
    } else if i32::from_be_bytes(sizeof_hdr) == HEADER_SIZE as i32 {
        Ok(ByteOrder::Big)
    } else {
        Err(VolumeError::HeaderUnreadable(
            "sizeof_hdr is not 348 in either byte order".to_string(),
        ))
    }
}

fn header_fields(input: &[u8], byte_order: ByteOrder) -> IResult<&[u8], VolumeHeader> {
    let endian = Endianness::from(byte_order);

    let (input, _sizeof_hdr) = number::i32(endian)(input)?;
    // data_type, db_name, extents, session_error, regular, dim_info
    let (input, _) = take(36usize)(input)?;
    let (input, dim) = count(number::i16(endian), 8)(input)?;
    // intent_p1..p3, intent_code
    let (input, _) = take(14usize)(input)?;
    let (input, datatype) = number::i16(endian)(input)?;
    let (input, bitpix) = number::i16(endian)(input)?;
    // slice_start
    let (input, _) = take(2usize)(input)?;
    let (input, pixdim) = count(number::f32(endian), 8)(input)?;
    let (input, vox_offset) = number::f32(endian)(input)?;
    // scl_slope .. glmin
    let (input, _) = take(36usize)(input)?;
    let (input, descrip) = take(80usize)(input)?;
    // aux_file, qform/sform, quaternions, srow_*, intent_name
    let (input, _) = take(116usize)(input)?;
    let (input, magic) = take(4usize)(input)?;

    let mut dims = [0i16; 8];
    dims.copy_from_slice(&dim);
    let mut pixdims = [0f32; 8];
    pixdims.copy_from_slice(&pixdim);
    let mut magic_bytes = [0u8; 4];
    magic_bytes.copy_from_slice(magic);

    Ok((
        input,
        VolumeHeader {
            byte_order,
            dim: dims,
            datatype,
            bitpix,
            pixdim: pixdims,
            vox_offset,
            descrip: c_string(descrip),
            magic: magic_bytes,
        },
    ))
}

/// NUL-terminated fixed-width text field
fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim_end().to_string()
}

/// Build an uncompressed single-file volume from a header and its voxel data.
///
/// The header is copied verbatim except for the magic (single-file) and the
/// data offset, written in the header's own byte order. No extensions follow.
pub fn to_single_file(header_bytes: &[u8], header: &VolumeHeader, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SINGLE_FILE_VOX_OFFSET + data.len());
    out.extend_from_slice(&header_bytes[..HEADER_SIZE]);
    out[MAGIC_POS..MAGIC_POS + 4].copy_from_slice(&MAGIC_SINGLE_FILE);
    out[VOX_OFFSET_POS..VOX_OFFSET_POS + 4]
        .copy_from_slice(&header.byte_order.f32_bytes(SINGLE_FILE_VOX_OFFSET as f32));
    // extension flag bytes: none present
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
pub(crate) mod test_headers {
    use super::*;

    /// Minimal little- or big-endian header with the given shape
    pub fn header_bytes(byte_order: ByteOrder, shape: &[i16], descrip: &str, magic: &[u8; 4]) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        let put_i16 = |bytes: &mut Vec<u8>, pos: usize, value: i16| {
            let raw = match byte_order {
                ByteOrder::Little => value.to_le_bytes(),
                ByteOrder::Big => value.to_be_bytes(),
            };
            bytes[pos..pos + 2].copy_from_slice(&raw);
        };

        let sizeof_hdr = match byte_order {
            ByteOrder::Little => (HEADER_SIZE as i32).to_le_bytes(),
            ByteOrder::Big => (HEADER_SIZE as i32).to_be_bytes(),
        };
        bytes[0..4].copy_from_slice(&sizeof_hdr);
        put_i16(&mut bytes, 40, shape.len() as i16);
        for (axis, size) in shape.iter().enumerate() {
            put_i16(&mut bytes, 42 + axis * 2, *size);
        }
        put_i16(&mut bytes, 70, 16); // DT_FLOAT32
        put_i16(&mut bytes, 72, 32);
        bytes[148..148 + descrip.len()].copy_from_slice(descrip.as_bytes());
        bytes[MAGIC_POS..MAGIC_POS + 4].copy_from_slice(magic);
        bytes
    }
}
