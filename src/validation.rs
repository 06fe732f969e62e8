//! Frame validation utilities for test pattern verification.
//!
//! These check that captured NV21 frames contain the expected test pattern,
//! which makes them usable against virtual cameras in integration tests.

use crate::convert::Rgb;
use crate::traits::{CameraError, Frame, Result};

/// Expected RGB values for the eight color bars after integer conversion.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const COLOR_BARS: [Rgb; 8] = [
    Rgb::new(254, 254, 254), // White
    Rgb::new(254, 254, 0),   // Yellow
    Rgb::new(0, 255, 255),   // Cyan
    Rgb::new(0, 255, 0),     // Green
    Rgb::new(254, 0, 254),   // Magenta
    Rgb::new(254, 0, 0),     // Red
    Rgb::new(0, 0, 255),     // Blue
    Rgb::new(0, 0, 0),       // Black
];

/// Tolerance for RGB color matching (accounts for capture and chroma siting).
const COLOR_TOLERANCE: u8 = 15;

/// Validates that a frame contains the eight-bar color pattern.
///
/// Samples the centre of each vertical bar on the middle row.
///
/// # Errors
///
/// Returns `StreamError` if a sample falls outside the frame or any bar
/// differs from its expected color by more than the tolerance.
pub fn validate_color_bars(frame: &Frame) -> Result<()> {
    let bar_width = frame.size.width / 8;
    let center_y = frame.size.height / 2;

    for (bar_idx, expected) in (0u32..).zip(COLOR_BARS.iter()) {
        let sample_x = bar_idx * bar_width + bar_width / 2;

        let actual = frame.pixel_at(sample_x, center_y).ok_or_else(|| {
            CameraError::StreamError(format!("Failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(CameraError::StreamError(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected {expected:?}, got {actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient.
///
/// Samples the middle row every 10 pixels. Luminance must never drop by
/// more than one step and must rise by at least 50 across the frame.
///
/// # Errors
///
/// Returns `StreamError` if a sample falls outside the frame, the luminance
/// decreases, or the overall change is too small.
pub fn validate_gradient(frame: &Frame) -> Result<()> {
    let center_y = frame.size.height / 2;

    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..frame.size.width).step_by(10) {
        let rgb = frame.pixel_at(x, center_y).ok_or_else(|| {
            CameraError::StreamError(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;
        let luminance = luminance(rgb);

        if let Some(prev) = prev {
            if luminance < prev - 1.0 {
                return Err(CameraError::StreamError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }
        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, prev) {
        let change = last - first;
        if change < 50.0 {
            return Err(CameraError::StreamError(format!(
                "Insufficient luminance change for gradient: {change} (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that frame sequence numbers increase by exactly one.
///
/// # Errors
///
/// Returns `StreamError` for an empty slice or on the first gap.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::StreamError(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else { continue };
        let expected = prev.metadata.sequence.wrapping_add(1);
        if curr.metadata.sequence != expected {
            return Err(CameraError::StreamError(format!(
                "Frame sequence gap at index {}: expected {expected}, got {}",
                i + 1,
                curr.metadata.sequence
            )));
        }
    }

    Ok(())
}

// Rec. 601 luma weights.
fn luminance(rgb: Rgb) -> f32 {
    0.114f32.mul_add(
        f32::from(rgb.b),
        0.587f32.mul_add(f32::from(rgb.g), 0.299 * f32::from(rgb.r)),
    )
}

fn colors_match(actual: Rgb, expected: Rgb, tolerance: u8) -> bool {
    actual.r.abs_diff(expected.r) <= tolerance
        && actual.g.abs_diff(expected.g) <= tolerance
        && actual.b.abs_diff(expected.b) <= tolerance
}
