// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{AssetError, DecodedImage, check_extent};
use crate::gpu::Format;
use png::{BitDepth, ColorType, Transformations};
use std::io::Cursor;

/// Decodes a png of any color type into dense sRGB RGBA8.
///
/// The declared extent is checked against `max` before any pixel storage is allocated.
pub(super) fn decode_rgba8(bytes: &[u8], max: (u32, u32)) -> Result<DecodedImage, AssetError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let width = reader.info().width;
    let height = reader.info().height;
    check_extent(width, height, max)?;
    //after EXPAND and STRIP_16 no pixel is wider than four bytes
    let mut buf = vec![0; width as usize * height as usize * 4];
    let info = reader.next_frame(&mut buf)?;
    if info.bit_depth != BitDepth::Eight {
        return Err(AssetError::UnsupportedFormat {
            format_id: info.color_type as u32,
            bytes_per_pixel: 0,
        });
    }
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in buf.chunks(info.line_size).take(height as usize) {
        match info.color_type {
            ColorType::Rgba => pixels.extend_from_slice(&row[..width as usize * 4]),
            ColorType::Rgb => {
                for p in row.chunks_exact(3).take(width as usize) {
                    pixels.extend_from_slice(&[p[0], p[1], p[2], 255]);
                }
            }
            ColorType::GrayscaleAlpha => {
                for p in row.chunks_exact(2).take(width as usize) {
                    pixels.extend_from_slice(&[p[0], p[0], p[0], p[1]]);
                }
            }
            ColorType::Grayscale => {
                for &g in row.iter().take(width as usize) {
                    pixels.extend_from_slice(&[g, g, g, 255]);
                }
            }
            other => {
                return Err(AssetError::UnsupportedFormat {
                    format_id: other as u32,
                    bytes_per_pixel: 1,
                });
            }
        }
    }
    Ok(DecodedImage {
        width,
        height,
        format: Format::Rgba8UnormSrgb,
        pixels,
    })
}

/// Encodes dense RGBA8 pixels as a png.
pub fn encode_png(image: &DecodedImage) -> Result<Vec<u8>, png::EncodingError> {
    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(out)
}
