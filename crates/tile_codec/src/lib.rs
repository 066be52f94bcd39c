//! Decodes a PNG byte stream into a fixed-size 256x256 8-bit RGB pixel
//! buffer. Stateless and reentrant: safe to call concurrently from many
//! worker threads.

use std::fmt;

pub const TILE_SIZE: u32 = 256;
pub const TILE_BYTES: usize = (TILE_SIZE * TILE_SIZE * 3) as usize;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug)]
pub enum DecodeError {
    InvalidSignature,
    Decode(png::DecodingError),
    WrongSize { width: u32, height: u32 },
    UnsupportedColorType(png::ColorType),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidSignature => write!(formatter, "not a PNG stream"),
            DecodeError::Decode(err) => write!(formatter, "PNG decode error: {err}"),
            DecodeError::WrongSize { width, height } => {
                write!(formatter, "tile is {width}x{height}, expected 256x256")
            }
            DecodeError::UnsupportedColorType(color_type) => {
                write!(formatter, "unsupported PNG color type: {color_type:?}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<png::DecodingError> for DecodeError {
    fn from(value: png::DecodingError) -> Self {
        DecodeError::Decode(value)
    }
}

/// Decodes `bytes` into a densely packed, row-major, top-down 256x256x3
/// RGB buffer. Palette and grayscale (with or without alpha) inputs are
/// normalized to RGB; sub-8-bit depths are upsampled; any alpha channel
/// is stripped. Any output size other than 256x256 is `WrongSize`.
pub fn decode_tile(bytes: &[u8]) -> Result<Box<[u8; TILE_BYTES]>, DecodeError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(DecodeError::InvalidSignature);
    }

    let mut decoder = png::Decoder::new(bytes);
    // `STRIP_ALPHA` is a deprecated no-op in this version of the `png`
    // crate — it never removes the channel, so alpha is stripped by
    // hand below instead. `EXPAND` still does real work: palette ->
    // RGB, and sub-8-bit depths up to 8 bits.
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info()?;

    let (width, height) = (reader.info().width, reader.info().height);
    if width != TILE_SIZE || height != TILE_SIZE {
        return Err(DecodeError::WrongSize { width, height });
    }

    let mut raw = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut raw)?;
    raw.truncate(frame.buffer_size());

    let rgb = match frame.color_type {
        png::ColorType::Rgb => raw,
        png::ColorType::Rgba => strip_alpha(&raw),
        png::ColorType::Grayscale => expand_gray_to_rgb(&raw),
        png::ColorType::GrayscaleAlpha => expand_gray_alpha_to_rgb(&raw),
        other => return Err(DecodeError::UnsupportedColorType(other)),
    };

    let mut out = Box::new([0u8; TILE_BYTES]);
    if rgb.len() != TILE_BYTES {
        return Err(DecodeError::WrongSize { width, height });
    }
    out.copy_from_slice(&rgb);
    Ok(out)
}

fn expand_gray_to_rgb(gray: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(gray.len() * 3);
    for &sample in gray {
        rgb.push(sample);
        rgb.push(sample);
        rgb.push(sample);
    }
    rgb
}

/// Drops every 4th (alpha) byte from a densely packed RGBA buffer.
fn strip_alpha(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for pixel in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }
    rgb
}

/// Expands a densely packed gray+alpha buffer to RGB triplets, dropping
/// the alpha sample of each pixel.
fn expand_gray_alpha_to_rgb(gray_alpha: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(gray_alpha.len() / 2 * 3);
    for pixel in gray_alpha.chunks_exact(2) {
        let sample = pixel[0];
        rgb.push(sample);
        rgb.push(sample);
        rgb.push(sample);
    }
    rgb
}
