//! Optional-operation detection for an open device.

use crate::traits::{CameraDevice, CameraPlatform};

/// Which optional operations the current device stack provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    /// The platform can count and open cameras by index.
    pub supports_multi_camera: bool,
    /// The device reports its supported preview and picture sizes.
    pub supports_size_enumeration: bool,
    /// The device can deliver frames into registered buffers.
    pub supports_buffered_preview: bool,
    /// The device reports its supported flash modes.
    pub supports_flash_query: bool,
}

/// Count cameras, or `None` if the platform cannot enumerate them.
pub fn probe_camera_count<P: CameraPlatform>(platform: &P) -> Option<u32> {
    match platform.number_of_cameras() {
        Ok(count) => Some(count),
        Err(err) => {
            tracing::debug!(error = %err, "camera enumeration unavailable, assuming one camera");
            None
        }
    }
}

/// Detect the optional operations of `device`.
///
/// Every failure is recorded as "unsupported"; nothing is propagated and the
/// device is not modified.
pub fn probe<D: CameraDevice + ?Sized>(
    device: &mut D,
    camera_count: Option<u32>,
) -> DeviceCapabilities {
    let params = match device.parameters() {
        Ok(params) => Some(params),
        Err(err) => {
            tracing::debug!(error = %err, "parameter query failed while probing");
            None
        }
    };

    let capabilities = DeviceCapabilities {
        supports_multi_camera: camera_count.is_some(),
        supports_size_enumeration: params
            .as_ref()
            .is_some_and(|params| params.supported_preview_sizes.is_some()),
        supports_buffered_preview: device.buffered_preview().is_some(),
        supports_flash_query: params
            .as_ref()
            .is_some_and(|params| params.supported_flash_modes.is_some()),
    };

    tracing::debug!(?capabilities, "probed device capabilities");
    capabilities
}
