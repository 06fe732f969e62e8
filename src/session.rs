//! Device session: one open camera with its capability cache and buffer pool.
//!
//! The session is created when a camera is opened and consumed by
//! [`DeviceSession::close`]. Capabilities are probed on first use and kept
//! for the lifetime of the session.

use crate::capabilities::{self, DeviceCapabilities};
use crate::params;
use crate::pool::{BufferId, BufferPool, PreviewBuffer};
use crate::traits::{
    CameraDevice, CameraError, CameraPlatform, FlashMode, Frame, FrameData, Result, Size,
};

/// An open camera and the state negotiated for it.
pub struct DeviceSession<D: CameraDevice> {
    device: D,
    camera_count: Option<u32>,
    capabilities: Option<DeviceCapabilities>,
    flash_modes: Option<Vec<FlashMode>>,
    pool: BufferPool,
}

impl<D: CameraDevice> DeviceSession<D> {
    /// Open camera `index` on `platform`.
    ///
    /// Platforms that cannot enumerate or open by index get their default
    /// camera instead. An index beyond the reported camera count, or a
    /// device that fails to open, is returned as an error.
    pub fn open<P>(platform: &P, index: u32) -> Result<Self>
    where
        P: CameraPlatform<Device = D>,
    {
        let camera_count = capabilities::probe_camera_count(platform);

        let device = match camera_count {
            Some(count) if index >= count => return Err(CameraError::DeviceNotFound(index)),
            Some(_) => match platform.open(index) {
                Ok(device) => device,
                Err(CameraError::Unsupported(what)) => {
                    tracing::debug!(
                        index,
                        what,
                        "indexed open unavailable, opening default camera"
                    );
                    platform.open_default()?
                }
                Err(err) => return Err(err),
            },
            None => platform.open_default()?,
        };

        tracing::info!(
            index,
            cameras = camera_count.unwrap_or(1),
            "camera session opened"
        );
        Ok(Self::with_device(device, camera_count))
    }

    /// Wrap an already-open device.
    pub fn with_device(device: D, camera_count: Option<u32>) -> Self {
        Self {
            device,
            camera_count,
            capabilities: None,
            flash_modes: None,
            pool: BufferPool::new(),
        }
    }

    /// Optional operations available on this device, probed once.
    pub fn capabilities(&mut self) -> DeviceCapabilities {
        if let Some(capabilities) = self.capabilities {
            return capabilities;
        }
        let capabilities = capabilities::probe(&mut self.device, self.camera_count);
        self.capabilities = Some(capabilities);
        capabilities
    }

    /// Number of cameras on the platform; 1 when it cannot enumerate.
    pub fn camera_count(&self) -> u32 {
        self.camera_count.unwrap_or(1)
    }

    /// The underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The underlying device, for backend-specific calls.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The preview buffer pool.
    pub const fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Active preview size.
    pub fn preview_size(&self) -> Result<Size> {
        Ok(self.device.parameters()?.preview_size)
    }

    /// Select the supported preview size nearest `target` and apply it.
    ///
    /// Capture must be stopped. If the size changes, registered buffers are
    /// released and must be reallocated.
    pub fn select_best_preview_size(&mut self, target: Size) -> Result<Size> {
        let before = self.preview_size()?;
        let size = params::set_nearest_preview_size(&mut self.device, target)?;
        if size != before && self.pool.buffer_len() != 0 {
            let released = self.pool.release(self.device.buffered_preview());
            tracing::debug!(released, "preview size changed, buffers released");
        }
        Ok(size)
    }

    /// Select the largest supported picture size and apply it.
    pub fn select_best_picture_size(&mut self) -> Result<Size> {
        params::set_largest_picture_size(&mut self.device)
    }

    /// Allocate and register `count` preview buffers for the current preview size.
    ///
    /// Without buffered preview support this returns an empty set and frames
    /// arrive as per-frame copies.
    pub fn allocate_preview_buffers(&mut self, count: usize) -> Result<Vec<BufferId>> {
        if !self.capabilities().supports_buffered_preview {
            return self.pool.allocate(None, count, 0);
        }

        let buffer_len = self.preview_size()?.preview_buffer_len();
        let ids = self
            .pool
            .allocate(self.device.buffered_preview(), count, buffer_len)?;

        let pooled = self
            .device
            .buffered_preview()
            .map(|preview| preview.set_pooled_delivery(true));
        match pooled {
            Some(Ok(())) => Ok(ids),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "pooled delivery refused, falling back to copies");
                self.pool.release(self.device.buffered_preview());
                Ok(Vec::new())
            }
            None => {
                self.pool.release(None);
                Ok(Vec::new())
            }
        }
    }

    /// Wait for the next preview frame.
    ///
    /// A pooled frame's buffer belongs to the caller until it is passed to
    /// [`Self::recycle_frame`] or [`Self::recycle_buffer`]; skipping that
    /// step eventually starves the device of buffers.
    pub fn next_frame(&mut self) -> Result<Frame> {
        let frame = self.device.next_frame()?;
        if let FrameData::Pooled(buffer) = &frame.data {
            self.pool.mark_delivered(buffer)?;
        }
        Ok(frame)
    }

    /// Return a delivered buffer to the device.
    pub fn recycle_buffer(&mut self, buffer: PreviewBuffer) -> Result<()> {
        self.pool.recycle(self.device.buffered_preview(), buffer)
    }

    /// Release a consumed frame, recycling its buffer if it was pooled.
    pub fn recycle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.data {
            FrameData::Pooled(buffer) => self.recycle_buffer(buffer),
            FrameData::Copied(_) => Ok(()),
        }
    }

    /// Supported flash modes, queried once per session.
    pub fn flash_modes(&mut self) -> &[FlashMode] {
        let device = &self.device;
        self.flash_modes
            .get_or_insert_with(|| params::flash_modes(device))
    }

    /// True if `mode` is a supported flash mode.
    pub fn supports_flash_mode(&mut self, mode: &str) -> bool {
        params::supports_flash_mode(self.flash_modes(), mode)
    }

    /// True if the device has a flash that fires on capture.
    pub fn supports_flash(&mut self) -> bool {
        self.supports_flash_mode(FlashMode::On.as_str())
    }

    /// True if the device supports automatic flash.
    pub fn supports_auto_flash(&mut self) -> bool {
        self.supports_flash_mode(FlashMode::Auto.as_str())
    }

    /// True if the device supports torch mode.
    pub fn supports_torch(&mut self) -> bool {
        self.supports_flash_mode(FlashMode::Torch.as_str())
    }

    /// Active flash mode.
    pub fn current_flash_mode(&self) -> Option<FlashMode> {
        params::current_flash_mode(&self.device)
    }

    /// True if the flash is held on in torch mode.
    pub fn is_in_torch_mode(&self) -> bool {
        params::is_torch(self.current_flash_mode().as_ref())
    }

    /// Apply `mode`; returns `false` if it is unsupported or rejected.
    pub fn set_flash_mode(&mut self, mode: &FlashMode) -> bool {
        params::set_flash_mode(&mut self.device, mode)
    }

    /// Release every buffer and hand back the device.
    pub fn close(mut self) -> D {
        let released = self.pool.release(self.device.buffered_preview());
        tracing::info!(released, "camera session closed");
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockPlatform};

    fn session(device: MockDevice) -> DeviceSession<MockDevice> {
        DeviceSession::with_device(device, Some(1))
    }

    #[test]
    fn test_open_by_index() {
        let platform = MockPlatform::new(2);
        let session = DeviceSession::open(&platform, 1).expect("open failed");

        assert_eq!(session.device().opened_index(), Some(1));
        assert_eq!(session.camera_count(), 2);
    }

    #[test]
    fn test_open_out_of_range_is_not_masked() {
        let platform = MockPlatform::new(1);
        let result = DeviceSession::open(&platform, 3);

        assert!(matches!(result, Err(CameraError::DeviceNotFound(3))));
        assert_eq!(platform.opens(), 0);
    }

    #[test]
    fn test_open_without_enumeration_uses_default_camera() {
        let platform = MockPlatform::without_enumeration();
        let mut session = DeviceSession::open(&platform, 5).expect("open failed");

        assert_eq!(session.device().opened_index(), None);
        assert_eq!(session.camera_count(), 1);
        assert!(!session.capabilities().supports_multi_camera);
    }

    #[test]
    fn test_open_falls_back_when_indexed_open_unsupported() {
        let platform = MockPlatform::new(2).without_indexed_open();
        let session = DeviceSession::open(&platform, 1).expect("open failed");

        assert_eq!(session.device().opened_index(), None);
    }

    #[test]
    fn test_open_with_no_cameras() {
        let platform = MockPlatform::new(0);
        let result = DeviceSession::open(&platform, 0);
        assert!(matches!(result, Err(CameraError::DeviceNotFound(0))));
    }

    #[test]
    fn test_capabilities_are_cached() {
        let mut session = session(MockDevice::new());
        let first = session.capabilities();
        let second = session.capabilities();

        assert_eq!(first, second);
        assert!(first.supports_buffered_preview);
    }

    #[test]
    fn test_pooled_capture_cycle() {
        let mut session = session(MockDevice::new());
        let ids = session
            .allocate_preview_buffers(3)
            .expect("allocate_preview_buffers failed");
        assert_eq!(ids.len(), 3);

        for _ in 0..10 {
            let frame = session.next_frame().expect("next_frame failed");
            assert!(frame.is_pooled());
            assert_eq!(frame.bytes().len(), 640 * 480 * 3 / 2);
            session.recycle_frame(frame).expect("recycle_frame failed");
        }

        assert_eq!(session.pool().registered_count(), 3);
        assert_eq!(session.pool().delivered_count(), 0);
        assert_eq!(session.pool().fresh_allocations(), 3);
    }

    #[test]
    fn test_unrecycled_buffers_starve_preview() {
        let mut session = session(MockDevice::new());
        session
            .allocate_preview_buffers(2)
            .expect("allocate_preview_buffers failed");

        let held: Vec<Frame> = (0..2)
            .map(|_| session.next_frame().expect("next_frame failed"))
            .collect();
        assert!(matches!(
            session.next_frame(),
            Err(CameraError::NoBufferAvailable)
        ));

        for frame in held {
            session.recycle_frame(frame).expect("recycle_frame failed");
        }
        assert!(session.next_frame().is_ok());
    }

    #[test]
    fn test_copying_fallback_without_buffered_preview() {
        let mut session = session(MockDevice::new().without_buffered_preview());

        let ids = session
            .allocate_preview_buffers(4)
            .expect("fallback allocation should not fail");
        assert!(ids.is_empty());

        let frame = session.next_frame().expect("next_frame failed");
        assert!(!frame.is_pooled());
        session
            .recycle_frame(frame)
            .expect("copied frames recycle as no-op");
    }

    #[test]
    fn test_refused_pooled_delivery_falls_back_to_copies() {
        let mut session = session(MockDevice::new().refusing_pooled_delivery());

        let ids = session
            .allocate_preview_buffers(3)
            .expect("refused pooled delivery should not fail");
        assert!(ids.is_empty());
        assert_eq!(session.pool().registered_count(), 0);
        assert_eq!(session.device().queued_count(), 0);

        let frame = session.next_frame().expect("next_frame failed");
        assert!(!frame.is_pooled());
        assert_eq!(frame.bytes().len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_allocation_failure_surfaces() {
        let mut session = session(MockDevice::new().with_buffer_limit(1));
        let result = session.allocate_preview_buffers(3);

        assert!(matches!(result, Err(CameraError::ResourceExhausted(_))));
        assert_eq!(session.device().queued_count(), 0);
    }

    #[test]
    fn test_preview_resize_releases_buffers() {
        let mut session = session(MockDevice::new());
        session
            .allocate_preview_buffers(2)
            .expect("allocate_preview_buffers failed");

        let size = session
            .select_best_preview_size(Size::new(1280, 720))
            .expect("select_best_preview_size failed");
        assert_eq!(size, Size::new(1280, 720));
        assert_eq!(session.pool().registered_count(), 0);
        assert_eq!(session.device().queued_count(), 0);

        session
            .allocate_preview_buffers(2)
            .expect("reallocation failed");
        assert_eq!(session.pool().buffer_len(), 1280 * 720 * 3 / 2);
        let frame = session.next_frame().expect("next_frame failed");
        assert_eq!(frame.size, Size::new(1280, 720));
    }

    #[test]
    fn test_select_best_picture_size() {
        let mut session = session(MockDevice::new());
        let size = session
            .select_best_picture_size()
            .expect("select_best_picture_size failed");
        assert_eq!(size, Size::new(2592, 1944));
    }

    #[test]
    fn test_flash_helpers() {
        let mut session = session(MockDevice::new().with_flash_modes(vec![
            FlashMode::Off,
            FlashMode::On,
            FlashMode::Torch,
        ]));

        assert!(session.supports_flash());
        assert!(!session.supports_auto_flash());
        assert!(session.supports_torch());
        assert!(!session.is_in_torch_mode());

        assert!(session.set_flash_mode(&FlashMode::Torch));
        assert!(session.is_in_torch_mode());
        assert!(!session.set_flash_mode(&FlashMode::Auto));
        assert_eq!(session.current_flash_mode(), Some(FlashMode::Torch));
    }

    #[test]
    fn test_flash_helpers_without_flash_query() {
        let mut session = session(MockDevice::new().without_flash_query());

        assert_eq!(session.flash_modes(), &[FlashMode::Off]);
        assert!(!session.supports_flash());
        assert!(!session.set_flash_mode(&FlashMode::On));
        assert!(!session.is_in_torch_mode());
    }

    #[test]
    fn test_close_drains_device() {
        let mut session = session(MockDevice::new());
        session
            .allocate_preview_buffers(3)
            .expect("allocate_preview_buffers failed");

        let device = session.close();
        assert_eq!(device.queued_count(), 0);
    }
}
