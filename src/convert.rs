//! Integer YUV to RGB conversion for 4:2:0 preview frames.
//!
//! Luma is scaled by 1192/1024 after removing the studio-range offset of 16,
//! chroma is centred on 128, and each channel is computed with an
//! arithmetic right shift by 10 before clamping. Output is bit-exact with
//! the fixed-point reference; intermediate sums are never floored before the
//! shift.

use thiserror::Error;

/// Opaque alpha for packed ARGB pixels.
const ALPHA: u32 = 0xFF00_0000;

/// An 8-bit RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Create a new RGB triple.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack as `0xAARRGGBB` with full alpha.
    #[must_use]
    pub const fn to_argb(self) -> u32 {
        ALPHA | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

/// Errors raised while interpreting frame bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Input frame is shorter than its dimensions require.
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Bytes required.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// Output pixel buffer cannot hold the frame.
    #[error("output buffer too small: expected {expected} pixels, got {actual}")]
    OutputTooSmall {
        /// Pixels required.
        expected: usize,
        /// Pixels supplied.
        actual: usize,
    },
    /// Chroma subsampling needs even dimensions.
    #[error("frame dimensions must be even for 4:2:0 chroma, got {width}x{height}")]
    OddDimensions {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },
}

#[inline]
fn scaled_luma(y: u8) -> i32 {
    1192 * (i32::from(y) - 16).max(0)
}

#[inline]
fn chroma(c: u8) -> i32 {
    i32::from(c) - 128
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert one Y/U/V sample to RGB.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb {
    let y1192 = scaled_luma(y);
    let uu = chroma(u);
    let vv = chroma(v);

    Rgb {
        r: clamp_channel((y1192 + 1634 * vv) >> 10),
        g: clamp_channel((y1192 - 833 * vv - 400 * uu) >> 10),
        b: clamp_channel((y1192 + 2066 * uu) >> 10),
    }
}

/// Red channel of [`yuv_to_rgb`].
#[must_use]
pub fn red_from_yuv(y: u8, _u: u8, v: u8) -> u8 {
    clamp_channel((scaled_luma(y) + 1634 * chroma(v)) >> 10)
}

/// Green channel of [`yuv_to_rgb`].
#[must_use]
pub fn green_from_yuv(y: u8, u: u8, v: u8) -> u8 {
    clamp_channel((scaled_luma(y) - 833 * chroma(v) - 400 * chroma(u)) >> 10)
}

/// Blue channel of [`yuv_to_rgb`].
#[must_use]
pub fn blue_from_yuv(y: u8, u: u8, _v: u8) -> u8 {
    clamp_channel((scaled_luma(y) + 2066 * chroma(u)) >> 10)
}

/// Packed ARGB value for one Y/U/V sample.
#[must_use]
pub fn color_from_yuv(y: u8, u: u8, v: u8) -> u32 {
    yuv_to_rgb(y, u, v).to_argb()
}

/// Packed ARGB gray pixel with R = G = B = `luma`.
#[must_use]
pub const fn gray_argb(luma: u8) -> u32 {
    Rgb::new(luma, luma, luma).to_argb()
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn check_output(out: &[u32], pixels: usize) -> Result<(), FrameError> {
    if out.len() < pixels {
        return Err(FrameError::OutputTooSmall {
            expected: pixels,
            actual: out.len(),
        });
    }
    Ok(())
}

/// Fill `out` with a gray image built from the luma plane of `frame`.
///
/// Chroma is ignored entirely; each luma byte becomes an opaque gray pixel
/// without going through the YUV transform.
pub fn fill_grayscale(
    frame: &[u8],
    width: u32,
    height: u32,
    out: &mut [u32],
) -> Result<(), FrameError> {
    let pixels = pixel_count(width, height);
    let luma = frame.get(..pixels).ok_or(FrameError::InvalidLength {
        expected: pixels,
        actual: frame.len(),
    })?;
    check_output(out, pixels)?;

    for (pixel, &y) in out.iter_mut().zip(luma) {
        *pixel = gray_argb(y);
    }
    Ok(())
}

/// Allocating form of [`fill_grayscale`].
pub fn grayscale_argb(frame: &[u8], width: u32, height: u32) -> Result<Vec<u32>, FrameError> {
    let mut out = vec![0u32; pixel_count(width, height)];
    fill_grayscale(frame, width, height, &mut out)?;
    Ok(out)
}

/// Fill `out` with full-colour ARGB pixels from an NV21 frame.
///
/// The chroma plane holds one V/U pair per 2x2 luma block, rows `width`
/// bytes apart.
pub fn fill_argb_from_nv21(
    frame: &[u8],
    width: u32,
    height: u32,
    out: &mut [u32],
) -> Result<(), FrameError> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(FrameError::OddDimensions { width, height });
    }

    let pixels = pixel_count(width, height);
    let required = pixels + pixels / 2;
    if frame.len() < required {
        return Err(FrameError::InvalidLength {
            expected: required,
            actual: frame.len(),
        });
    }
    check_output(out, pixels)?;
    if pixels == 0 {
        return Ok(());
    }

    let row_len = width as usize;
    let (luma, chroma) = frame.split_at(pixels);
    let rows = luma
        .chunks_exact(row_len)
        .zip(out.chunks_exact_mut(row_len));

    for (row, (luma_row, out_row)) in rows.enumerate() {
        let chroma_start = (row / 2) * row_len;
        let Some(chroma_row) = chroma.get(chroma_start..chroma_start + row_len) else {
            break;
        };

        let blocks = luma_row
            .chunks_exact(2)
            .zip(out_row.chunks_exact_mut(2))
            .zip(chroma_row.chunks_exact(2));
        for ((luma_pair, out_pair), vu) in blocks {
            let &[v, u] = vu else { continue };
            for (pixel, &y) in out_pair.iter_mut().zip(luma_pair) {
                *pixel = color_from_yuv(y, u, v);
            }
        }
    }
    Ok(())
}

/// Allocating form of [`fill_argb_from_nv21`].
pub fn nv21_to_argb(frame: &[u8], width: u32, height: u32) -> Result<Vec<u32>, FrameError> {
    let mut out = vec![0u32; pixel_count(width, height)];
    fill_argb_from_nv21(frame, width, height, &mut out)?;
    Ok(out)
}

/// Repack YUYV (4:2:2) into an NV21 (4:2:0) buffer.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]. Chroma is taken from
/// the even rows; odd rows only contribute luma.
pub fn yuyv_to_nv21(
    yuyv: &[u8],
    width: u32,
    height: u32,
    out: &mut [u8],
) -> Result<(), FrameError> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(FrameError::OddDimensions { width, height });
    }

    let pixels = pixel_count(width, height);
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let required = pixels + pixels / 2;
    if out.len() < required {
        return Err(FrameError::InvalidLength {
            expected: required,
            actual: out.len(),
        });
    }
    if pixels == 0 {
        return Ok(());
    }

    let row_len = width as usize;
    let (luma, chroma) = out.split_at_mut(pixels);

    for ((row, src_row), luma_row) in yuyv
        .chunks_exact(row_len * 2)
        .enumerate()
        .zip(luma.chunks_exact_mut(row_len))
    {
        for (quad, luma_pair) in src_row.chunks_exact(4).zip(luma_row.chunks_exact_mut(2)) {
            let &[y0, _, y1, _] = quad else { continue };
            luma_pair.copy_from_slice(&[y0, y1]);
        }

        if row % 2 == 0 {
            let chroma_start = (row / 2) * row_len;
            let Some(chroma_row) = chroma.get_mut(chroma_start..chroma_start + row_len) else {
                break;
            };
            for (quad, vu) in src_row.chunks_exact(4).zip(chroma_row.chunks_exact_mut(2)) {
                let &[_, u, _, v] = quad else { continue };
                vu.copy_from_slice(&[v, u]);
            }
        }
    }
    Ok(())
}
