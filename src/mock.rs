//! Mock platform and device for testing without hardware.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::pool::PreviewBuffer;
use crate::traits::{
    BufferedPreview, CameraDevice, CameraError, CameraPlatform, FlashMode, Frame, FrameData,
    FrameMetadata, ParameterBlock, RegistrationError, Result, Size,
};

/// Mock camera stack.
pub struct MockPlatform {
    camera_count: Option<u32>,
    indexed_open: bool,
    opens: Cell<u32>,
}

impl MockPlatform {
    /// Platform reporting `camera_count` cameras.
    #[must_use]
    pub const fn new(camera_count: u32) -> Self {
        Self {
            camera_count: Some(camera_count),
            indexed_open: true,
            opens: Cell::new(0),
        }
    }

    /// Platform that can neither count cameras nor open them by index.
    #[must_use]
    pub const fn without_enumeration() -> Self {
        Self {
            camera_count: None,
            indexed_open: false,
            opens: Cell::new(0),
        }
    }

    /// Platform that counts cameras but only opens the default one.
    #[must_use]
    pub const fn without_indexed_open(mut self) -> Self {
        self.indexed_open = false;
        self
    }

    /// Number of successful opens.
    pub fn opens(&self) -> u32 {
        self.opens.get()
    }
}

impl CameraPlatform for MockPlatform {
    type Device = MockDevice;

    fn number_of_cameras(&self) -> Result<u32> {
        self.camera_count
            .ok_or(CameraError::Unsupported("camera enumeration"))
    }

    fn open(&self, index: u32) -> Result<MockDevice> {
        if !self.indexed_open {
            return Err(CameraError::Unsupported("open by index"));
        }
        if self.camera_count.is_some_and(|count| index >= count) {
            return Err(CameraError::DeviceNotFound(index));
        }
        self.opens.set(self.opens.get() + 1);
        Ok(MockDevice::new().with_index(Some(index)))
    }

    fn open_default(&self) -> Result<MockDevice> {
        if self.camera_count == Some(0) {
            return Err(CameraError::DeviceOpenFailed("no cameras".to_owned()));
        }
        self.opens.set(self.opens.get() + 1);
        Ok(MockDevice::new())
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    params: ParameterBlock,
    index: Option<u32>,
    buffered: bool,
    pooled: bool,
    refuse_pooled: bool,
    queue: VecDeque<PreviewBuffer>,
    buffer_limit: Option<usize>,
    fail_parameter_reads: bool,
    reject_parameters: bool,
    set_parameter_calls: usize,
    pattern: TestPattern,
    frame_count: u32,
    fail_after: Option<u32>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: ParameterBlock {
                preview_size: Size::new(640, 480),
                picture_size: Size::new(640, 480),
                supported_preview_sizes: Some(vec![
                    Size::new(320, 240),
                    Size::new(640, 480),
                    Size::new(1280, 720),
                ]),
                supported_picture_sizes: Some(vec![
                    Size::new(640, 480),
                    Size::new(1920, 1080),
                    Size::new(2592, 1944),
                ]),
                flash_mode: Some(FlashMode::Off),
                supported_flash_modes: Some(vec![
                    FlashMode::Off,
                    FlashMode::On,
                    FlashMode::Auto,
                    FlashMode::Torch,
                ]),
            },
            index: None,
            buffered: true,
            pooled: false,
            refuse_pooled: false,
            queue: VecDeque::new(),
            buffer_limit: None,
            fail_parameter_reads: false,
            reject_parameters: false,
            set_parameter_calls: 0,
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            fail_after: None,
        }
    }

    #[must_use]
    fn with_index(mut self, index: Option<u32>) -> Self {
        self.index = index;
        self
    }

    /// Drop the supported size lists.
    #[must_use]
    pub fn without_size_enumeration(mut self) -> Self {
        self.params.supported_preview_sizes = None;
        self.params.supported_picture_sizes = None;
        self
    }

    /// Drop flash reporting entirely.
    #[must_use]
    pub fn without_flash_query(mut self) -> Self {
        self.params.flash_mode = None;
        self.params.supported_flash_modes = None;
        self
    }

    /// Deliver every frame as a copy.
    #[must_use]
    pub const fn without_buffered_preview(mut self) -> Self {
        self.buffered = false;
        self
    }

    /// Refuse registrations beyond `limit` queued buffers.
    #[must_use]
    pub const fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit);
        self
    }

    /// Accept buffer registration but refuse to deliver into the buffers.
    #[must_use]
    pub const fn refusing_pooled_delivery(mut self) -> Self {
        self.refuse_pooled = true;
        self
    }

    /// Fail every parameter read.
    #[must_use]
    pub const fn with_failing_parameter_reads(mut self) -> Self {
        self.fail_parameter_reads = true;
        self
    }

    /// Reject every parameter write.
    #[must_use]
    pub const fn rejecting_parameters(mut self) -> Self {
        self.reject_parameters = true;
        self
    }

    /// Set the supported flash modes.
    #[must_use]
    pub fn with_flash_modes(mut self, modes: Vec<FlashMode>) -> Self {
        self.params.supported_flash_modes = Some(modes);
        self
    }

    /// Set the active flash mode.
    #[must_use]
    pub fn with_flash_mode(mut self, mode: FlashMode) -> Self {
        self.params.flash_mode = Some(mode);
        self
    }

    /// Set the test pattern for frame generation.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Fail every capture after `frames` successful ones.
    #[must_use]
    pub const fn failing_after(mut self, frames: u32) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Change the registration limit on a device already in use.
    pub const fn set_buffer_limit(&mut self, limit: Option<usize>) {
        self.buffer_limit = limit;
    }

    /// Index this device was opened with, `None` for the default camera.
    pub const fn opened_index(&self) -> Option<u32> {
        self.index
    }

    /// Buffers currently queued for delivery.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Number of `set_parameters` calls that reached the device.
    pub const fn set_parameter_calls(&self) -> usize {
        self.set_parameter_calls
    }

    fn check_supported(supported: Option<&[Size]>, size: Size, what: &str) -> Result<()> {
        match supported {
            Some(sizes) if !sizes.contains(&size) => Err(CameraError::ParameterRejected(format!(
                "{what} size {size} not supported"
            ))),
            _ => Ok(()),
        }
    }

    fn metadata(&mut self) -> FrameMetadata {
        let seq = self.frame_count;
        self.frame_count += 1;
        let len = self.params.preview_size.preview_buffer_len();
        let bytes_used = u32::try_from(len).unwrap_or(u32::MAX);

        FrameMetadata {
            sequence: seq,
            timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
            bytes_used,
        }
    }
}

impl CameraDevice for MockDevice {
    fn parameters(&self) -> Result<ParameterBlock> {
        if self.fail_parameter_reads {
            return Err(CameraError::StreamError("parameter read failed".to_owned()));
        }
        Ok(self.params.clone())
    }

    fn set_parameters(&mut self, params: &ParameterBlock) -> Result<()> {
        if self.reject_parameters {
            let reason = "mock rejects writes".to_owned();
            return Err(CameraError::ParameterRejected(reason));
        }
        Self::check_supported(
            self.params.supported_preview_sizes.as_deref(),
            params.preview_size,
            "preview",
        )?;
        Self::check_supported(
            self.params.supported_picture_sizes.as_deref(),
            params.picture_size,
            "picture",
        )?;

        self.set_parameter_calls += 1;
        self.params.preview_size = params.preview_size;
        self.params.picture_size = params.picture_size;
        if self.params.supported_flash_modes.is_some() {
            self.params.flash_mode.clone_from(&params.flash_mode);
        }
        Ok(())
    }

    fn buffered_preview(&mut self) -> Option<&mut dyn BufferedPreview> {
        if self.buffered {
            Some(self)
        } else {
            None
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let count = self.frame_count;
        if self.fail_after.is_some_and(|limit| count >= limit) {
            return Err(CameraError::StreamError("mock stream ended".to_owned()));
        }
        let size = self.params.preview_size;
        let data = if self.pooled {
            let buffer = self.queue.pop_front();
            let mut buffer = buffer.ok_or(CameraError::NoBufferAvailable)?;
            fill_test_frame(buffer.as_mut_slice(), size, self.pattern);
            FrameData::Pooled(buffer)
        } else {
            let mut data = vec![0u8; size.preview_buffer_len()];
            fill_test_frame(&mut data, size, self.pattern);
            FrameData::Copied(data)
        };

        Ok(Frame {
            data,
            size,
            metadata: self.metadata(),
        })
    }
}

impl BufferedPreview for MockDevice {
    fn add_callback_buffer(
        &mut self,
        buffer: PreviewBuffer,
    ) -> std::result::Result<(), RegistrationError> {
        let queued = self.queue.len();
        if self.buffer_limit.is_some_and(|limit| queued >= limit) {
            return Err(RegistrationError {
                buffer,
                reason: "mock buffer limit reached".to_owned(),
            });
        }
        self.queue.push_back(buffer);
        Ok(())
    }

    fn drain_callback_buffers(&mut self) -> Vec<PreviewBuffer> {
        self.queue.drain(..).collect()
    }

    fn set_pooled_delivery(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.refuse_pooled {
            return Err(CameraError::Unsupported("pooled delivery"));
        }
        self.pooled = enabled;
        Ok(())
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// YUV values for the eight color bars:
/// White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
pub const COLOR_BARS_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Fill an NV21 frame of `size` with `pattern`.
pub fn fill_test_frame(data: &mut [u8], size: Size, pattern: TestPattern) {
    let width = size.width;
    let bar_width = (width / 8).max(1);

    let sample = |x: u32| -> (u8, u8, u8) {
        match pattern {
            TestPattern::ColorBars => COLOR_BARS_YUV
                .get((x / bar_width).min(7) as usize)
                .copied()
                .unwrap_or((16, 128, 128)),
            #[allow(clippy::cast_possible_truncation)]
            TestPattern::Gradient => (((x * 255) / width.max(1)) as u8, 128, 128),
            TestPattern::Solid(y, u, v) => (y, u, v),
        }
    };

    let row_len = width as usize;
    if row_len == 0 {
        return;
    }
    let pixels = (row_len * size.height as usize).min(data.len());
    let (luma, chroma) = data.split_at_mut(pixels);

    for row in luma.chunks_mut(row_len) {
        for (x, y) in (0..width).zip(row.iter_mut()) {
            *y = sample(x).0;
        }
    }
    for row in chroma.chunks_mut(row_len) {
        for (x, vu) in (0..width).step_by(2).zip(row.chunks_exact_mut(2)) {
            let (_, u, v) = sample(x);
            vu.copy_from_slice(&[v, u]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_defaults() {
        let device = MockDevice::new();
        let params = device.parameters().expect("parameters should succeed");
        assert_eq!(params.preview_size, Size::new(640, 480));
        assert_eq!(params.flash_mode, Some(FlashMode::Off));
        assert_eq!(device.opened_index(), None);
    }

    #[test]
    fn test_mock_rejects_unsupported_size() {
        let mut device = MockDevice::new();
        let mut params = device.parameters().expect("parameters should succeed");
        params.preview_size = Size::new(800, 600);

        let result = device.set_parameters(&params);
        assert!(matches!(result, Err(CameraError::ParameterRejected(_))));
        assert_eq!(device.set_parameter_calls(), 0);
    }

    #[test]
    fn test_mock_copied_capture() {
        let mut device = MockDevice::new();

        let frame1 = device.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert_eq!(frame1.bytes().len(), 640 * 480 * 3 / 2);
        assert!(!frame1.is_pooled());

        let frame2 = device.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
    }

    #[test]
    fn test_mock_pooled_capture_starves_without_buffers() {
        let mut device = MockDevice::new();
        device
            .set_pooled_delivery(true)
            .expect("set_pooled_delivery should succeed");

        let result = device.next_frame();
        assert!(matches!(result, Err(CameraError::NoBufferAvailable)));
    }

    #[test]
    fn test_color_bars_pattern() {
        let size = Size::new(640, 480);
        let mut data = vec![0u8; size.preview_buffer_len()];
        fill_test_frame(&mut data, size, TestPattern::ColorBars);

        // First bar should be white (Y=235), last bar black (Y=16)
        assert_eq!(data[0], 235);
        assert_eq!(data[639], 16);
        // Chroma plane starts with the white bar's V/U pair
        assert_eq!(&data[640 * 480..640 * 480 + 2], &[128, 128]);
    }

    #[test]
    fn test_gradient_pattern() {
        let size = Size::new(640, 480);
        let mut data = vec![0u8; size.preview_buffer_len()];
        fill_test_frame(&mut data, size, TestPattern::Gradient);

        // Left edge should be dark, right edge bright
        assert!(data[0] < 10);
        assert!(data[479 * 640 + 638] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let size = Size::new(64, 64);
        let mut data = vec![0u8; size.preview_buffer_len()];
        fill_test_frame(&mut data, size, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[64 * 64], 192); // V
        assert_eq!(data[64 * 64 + 1], 64); // U
    }
}
