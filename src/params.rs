//! Capture parameter selection.
//!
//! Every setter reads the device's parameter block, changes only the field
//! it was asked to change, and writes the block back.

use std::cmp::Reverse;

use crate::traits::{CameraDevice, FlashMode, Result, Size};

/// Supported size closest to `target`, by summed per-dimension distance.
///
/// Ties go to the earliest entry. Returns `None` for an absent or empty list
/// and for a zero-sized target.
pub fn best_preview_size(supported: Option<&[Size]>, target: Size) -> Option<Size> {
    if target.is_empty() {
        return None;
    }
    supported?
        .iter()
        .copied()
        .min_by_key(|size| size.l1_distance(target))
}

/// Supported size with the most pixels. Ties go to the earliest entry.
pub fn best_picture_size(supported: Option<&[Size]>) -> Option<Size> {
    supported?
        .iter()
        .copied()
        .min_by_key(|size| Reverse(size.area()))
}

/// Move the preview size to the supported size nearest `target`.
///
/// Returns the preview size in effect afterwards, which is the unchanged
/// current size when no supported size matches.
pub fn set_nearest_preview_size<D: CameraDevice + ?Sized>(
    device: &mut D,
    target: Size,
) -> Result<Size> {
    let mut params = device.parameters()?;
    let Some(size) = best_preview_size(params.supported_preview_sizes.as_deref(), target) else {
        tracing::debug!(%target, "no preview size match, keeping current");
        return Ok(params.preview_size);
    };

    if size != params.preview_size {
        params.preview_size = size;
        device.set_parameters(&params)?;
        tracing::info!(%target, selected = %size, "preview size updated");
    }
    Ok(size)
}

/// Move the picture size to the largest supported size.
pub fn set_largest_picture_size<D: CameraDevice + ?Sized>(device: &mut D) -> Result<Size> {
    let mut params = device.parameters()?;
    let Some(size) = best_picture_size(params.supported_picture_sizes.as_deref()) else {
        return Ok(params.picture_size);
    };

    if size != params.picture_size {
        params.picture_size = size;
        device.set_parameters(&params)?;
        tracing::info!(selected = %size, "picture size updated");
    }
    Ok(size)
}

/// Supported flash modes, or just `off` if the device cannot report them.
pub fn flash_modes<D: CameraDevice + ?Sized>(device: &D) -> Vec<FlashMode> {
    device
        .parameters()
        .ok()
        .and_then(|params| params.supported_flash_modes)
        .unwrap_or_else(|| vec![FlashMode::Off])
}

/// Active flash mode, if the device reports one.
pub fn current_flash_mode<D: CameraDevice + ?Sized>(device: &D) -> Option<FlashMode> {
    device.parameters().ok()?.flash_mode
}

/// True if `mode` appears in `modes`, compared by its platform string.
pub fn supports_flash_mode(modes: &[FlashMode], mode: &str) -> bool {
    modes.iter().any(|candidate| candidate.as_str() == mode)
}

/// True if `current` is torch mode.
pub fn is_torch(current: Option<&FlashMode>) -> bool {
    current.is_some_and(|mode| mode.as_str() == FlashMode::Torch.as_str())
}

/// Apply `mode` if the device lists it as supported.
///
/// Returns `false` without touching the device when flash modes cannot be
/// queried or `mode` is not among them, and when the device rejects the
/// write.
pub fn set_flash_mode<D: CameraDevice + ?Sized>(device: &mut D, mode: &FlashMode) -> bool {
    let mut params = match device.parameters() {
        Ok(params) => params,
        Err(err) => {
            tracing::debug!(error = %err, "cannot read parameters for flash change");
            return false;
        }
    };

    let supported = params
        .supported_flash_modes
        .as_deref()
        .is_some_and(|modes| supports_flash_mode(modes, mode.as_str()));
    if !supported {
        tracing::debug!(%mode, "declining unsupported flash mode");
        return false;
    }

    params.flash_mode = Some(mode.clone());
    match device.set_parameters(&params) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%mode, error = %err, "flash mode rejected");
            false
        }
    }
}
