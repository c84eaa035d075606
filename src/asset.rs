// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Image assets on disk.

Two formats are understood.  Files ending in `.png` are decoded with the `png` crate and expanded
to 8-bit RGBA.  Anything else is read as a raw image: a 32-byte little-endian header,

| offset | size | field            |
|--------|------|------------------|
| 0      | 4    | tag              |
| 4      | 2    | major version    |
| 6      | 2    | minor version    |
| 8      | 4    | reserved         |
| 12     | 4    | width            |
| 16     | 4    | height           |
| 20     | 4    | pixel format id  |
| 24     | 4    | bytes per pixel  |
| 28     | 4    | note length      |

then `note length` bytes that are skipped, then `width * height * bytes per pixel` bytes of dense,
row-major pixels.

Assets larger than the loader's trampoline are refused before their pixels are read.
*/

mod png_support;

pub use png_support::encode_png;

use crate::gpu::Format;
use std::path::{Path, PathBuf};

/// Length of the raw header.
pub const HEADER_LEN: usize = 32;

/// Tag written by [encode_raw].
pub const RAW_TAG: [u8; 4] = *b"FSRW";

/// Format ids in the raw header.
pub mod format_id {
    pub const UNSPECIFIED: u32 = 0;
    pub const RGBA8_UNORM: u32 = 28;
    pub const RGBA8_UNORM_SRGB: u32 = 29;
    pub const BGRA8_UNORM: u32 = 87;
}

/// A file to load, in the order it was queued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRequest {
    pub path: PathBuf,
    pub label: String,
}

impl AssetRequest {
    /// A request labeled with the file name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        AssetRequest { path, label }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    fn is_png(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
    }
}

/// Dense decoded pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub pixels: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AssetError {
    #[error("Can't locate file: {0}")]
    NotFound(#[source] std::io::Error),
    #[error("Can't read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("File maybe broken: {section} needs {expected} bytes, {actual} available")]
    Truncated {
        section: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("{width}x{height} is larger than the trampoline ({max_width}x{max_height})")]
    ExceedsCapacity {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
    #[error("Unsupported pixel format {format_id} with {bytes_per_pixel} bytes per pixel")]
    UnsupportedFormat { format_id: u32, bytes_per_pixel: u32 },
    #[error("Image has no pixels")]
    Empty,
    #[error("Can't decode png: {0}")]
    Png(#[from] png::DecodingError),
}

/// The fixed header of a raw asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub tag: [u8; 4],
    pub major: u16,
    pub minor: u16,
    pub reserved: u32,
    pub width: u32,
    pub height: u32,
    pub format_id: u32,
    pub bytes_per_pixel: u32,
    pub note_len: u32,
}

impl RawHeader {
    pub fn parse(bytes: &[u8]) -> Result<RawHeader, AssetError> {
        if bytes.len() < HEADER_LEN {
            return Err(AssetError::Truncated {
                section: "header",
                expected: HEADER_LEN as u64,
                actual: bytes.len() as u64,
            });
        }
        let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
        let u32_at =
            |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        Ok(RawHeader {
            tag: [bytes[0], bytes[1], bytes[2], bytes[3]],
            major: u16_at(4),
            minor: u16_at(6),
            reserved: u32_at(8),
            width: u32_at(12),
            height: u32_at(16),
            format_id: u32_at(20),
            bytes_per_pixel: u32_at(24),
            note_len: u32_at(28),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.tag);
        out[4..6].copy_from_slice(&self.major.to_le_bytes());
        out[6..8].copy_from_slice(&self.minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.reserved.to_le_bytes());
        out[12..16].copy_from_slice(&self.width.to_le_bytes());
        out[16..20].copy_from_slice(&self.height.to_le_bytes());
        out[20..24].copy_from_slice(&self.format_id.to_le_bytes());
        out[24..28].copy_from_slice(&self.bytes_per_pixel.to_le_bytes());
        out[28..32].copy_from_slice(&self.note_len.to_le_bytes());
        out
    }

    fn format(&self) -> Result<Format, AssetError> {
        if self.bytes_per_pixel != 4 {
            return Err(AssetError::UnsupportedFormat {
                format_id: self.format_id,
                bytes_per_pixel: self.bytes_per_pixel,
            });
        }
        Ok(match self.format_id {
            format_id::RGBA8_UNORM_SRGB => Format::Rgba8UnormSrgb,
            format_id::BGRA8_UNORM => Format::Bgra8Unorm,
            format_id::UNSPECIFIED | format_id::RGBA8_UNORM => Format::Rgba8Unorm,
            other => {
                logwise::warn_sync!(
                    "unknown raw format id {other}, treating as RGBA8",
                    other = other
                );
                Format::Rgba8Unorm
            }
        })
    }
}

fn check_extent(width: u32, height: u32, max: (u32, u32)) -> Result<(), AssetError> {
    if width > max.0 || height > max.1 {
        return Err(AssetError::ExceedsCapacity {
            width,
            height,
            max_width: max.0,
            max_height: max.1,
        });
    }
    if width == 0 || height == 0 {
        return Err(AssetError::Empty);
    }
    Ok(())
}

/// Decodes a raw asset held in memory.  Images wider or taller than `max` are refused.
pub fn decode_raw(bytes: &[u8], max: (u32, u32)) -> Result<DecodedImage, AssetError> {
    let header = RawHeader::parse(bytes)?;
    let pixels_start = HEADER_LEN as u64 + header.note_len as u64;
    if pixels_start > bytes.len() as u64 {
        return Err(AssetError::Truncated {
            section: "note",
            expected: pixels_start,
            actual: bytes.len() as u64,
        });
    }
    check_extent(header.width, header.height, max)?;
    let format = header.format()?;
    let pixel_len =
        header.width as u64 * header.height as u64 * header.bytes_per_pixel as u64;
    let available = bytes.len() as u64 - pixels_start;
    if available < pixel_len {
        return Err(AssetError::Truncated {
            section: "pixels",
            expected: pixel_len,
            actual: available,
        });
    }
    let start = pixels_start as usize;
    Ok(DecodedImage {
        width: header.width,
        height: header.height,
        format,
        pixels: bytes[start..start + pixel_len as usize].to_vec(),
    })
}

/// Serializes an image in the raw format.
pub fn encode_raw(image: &DecodedImage, note: &[u8]) -> Vec<u8> {
    let format_id = match image.format {
        Format::Rgba8UnormSrgb => format_id::RGBA8_UNORM_SRGB,
        Format::Bgra8Unorm => format_id::BGRA8_UNORM,
        Format::Rgba8Unorm | Format::Depth32Float => format_id::RGBA8_UNORM,
    };
    let header = RawHeader {
        tag: RAW_TAG,
        major: 1,
        minor: 0,
        reserved: 0,
        width: image.width,
        height: image.height,
        format_id,
        bytes_per_pixel: image.format.bytes_per_pixel(),
        note_len: note.len() as u32,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + note.len() + image.pixels.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(note);
    out.extend_from_slice(&image.pixels);
    out
}

fn read(path: &Path) -> Result<Vec<u8>, AssetError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AssetError::NotFound(e),
        _ => AssetError::Io(e),
    })
}

/// Loads and decodes `request`.
pub fn load(request: &AssetRequest, max: (u32, u32)) -> Result<DecodedImage, AssetError> {
    let bytes = read(&request.path)?;
    if request.is_png() {
        png_support::decode_rgba8(&bytes, max)
    } else {
        decode_raw(&bytes, max)
    }
}

/// [load], logging a warning and returning `None` on any failure.
pub fn load_or_skip(request: &AssetRequest, max: (u32, u32)) -> Option<DecodedImage> {
    match load(request, max) {
        Ok(image) => Some(image),
        Err(e) => {
            logwise::warn_sync!(
                "skipping {path}: {e}",
                path = request.path.display().to_string(),
                e = logwise::privacy::LogIt(&e)
            );
            None
        }
    }
}
