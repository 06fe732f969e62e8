//! Core traits and types for the camera platform abstraction.
//!
//! A backend implements [`CameraPlatform`] to open devices and [`CameraDevice`]
//! for the per-device parameter block and frame delivery. Optional operations
//! are exposed through accessors returning `Option`, so capability detection
//! never has to attempt an operation to learn whether it exists.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::convert::{yuv_to_rgb, FrameError, Rgb};
use crate::pool::PreviewBuffer;

/// Frame or picture dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count.
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Sum of the per-dimension distances to `target`.
    pub fn l1_distance(self, target: Self) -> u64 {
        u64::from(self.width.abs_diff(target.width))
            + u64::from(self.height.abs_diff(target.height))
    }

    /// True when either dimension is zero.
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Byte length of a 4:2:0 preview frame at this size (12 bits per pixel).
    pub fn preview_buffer_len(self) -> usize {
        usize::try_from(self.area() * 3 / 2).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Flash mode as reported by the platform.
///
/// Values outside the four modes this crate reasons about are carried
/// through unchanged in [`FlashMode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlashMode {
    /// Flash disabled.
    Off,
    /// Flash fires on every capture.
    On,
    /// Flash fires when the driver decides it is needed.
    Auto,
    /// Flash held on continuously.
    Torch,
    /// Any other platform-specific mode.
    Other(String),
}

impl FlashMode {
    /// Platform string for this mode.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Auto => "auto",
            Self::Torch => "torch",
            Self::Other(mode) => mode,
        }
    }
}

impl From<&str> for FlashMode {
    fn from(mode: &str) -> Self {
        match mode {
            "off" => Self::Off,
            "on" => Self::On,
            "auto" => Self::Auto,
            "torch" => Self::Torch,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl FromStr for FlashMode {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a device's capture parameters.
///
/// Read with [`CameraDevice::parameters`], modify the requested field, and
/// write back with [`CameraDevice::set_parameters`]. List fields are `None`
/// when the platform cannot answer that query at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterBlock {
    /// Active preview size.
    pub preview_size: Size,
    /// Active still-picture size.
    pub picture_size: Size,
    /// Preview sizes the device accepts.
    pub supported_preview_sizes: Option<Vec<Size>>,
    /// Picture sizes the device accepts.
    pub supported_picture_sizes: Option<Vec<Size>>,
    /// Active flash mode.
    pub flash_mode: Option<FlashMode>,
    /// Flash modes the device accepts.
    pub supported_flash_modes: Option<Vec<FlashMode>>,
}

/// Metadata for a delivered frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes the producer wrote for this frame.
    pub bytes_used: u32,
}

/// Storage a frame was delivered in.
#[derive(Debug)]
pub enum FrameData {
    /// Registered preview buffer; must be recycled once consumed.
    Pooled(PreviewBuffer),
    /// One-off allocation from the copying preview path.
    Copied(Vec<u8>),
}

/// A preview frame in 4:2:0 layout: luma plane followed by interleaved V/U.
#[derive(Debug)]
pub struct Frame {
    /// Frame bytes.
    pub data: FrameData,
    /// Preview size the frame was captured at.
    pub size: Size,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Raw frame bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            FrameData::Pooled(buffer) => buffer.as_slice(),
            FrameData::Copied(data) => data,
        }
    }

    /// True if the frame occupies a pooled preview buffer.
    pub const fn is_pooled(&self) -> bool {
        matches!(self.data, FrameData::Pooled(_))
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Each 2x2 block of luma samples shares one V/U pair from the chroma
    /// plane. Returns `None` if the coordinates fall outside the frame.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<Rgb> {
        let Size { width, height } = self.size;
        if x >= width || y >= height {
            return None;
        }

        let width = width as usize;
        let luma_len = width * height as usize;
        let luma = *self.bytes().get(y as usize * width + x as usize)?;

        let chroma = luma_len + (y as usize / 2) * width + (x as usize & !1);
        let v = *self.bytes().get(chroma)?;
        let u = *self.bytes().get(chroma + 1)?;

        Some(yuv_to_rgb(luma, u, v))
    }
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// The platform does not provide an optional operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// A caller-supplied argument cannot be honoured.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The device refused a parameter write.
    #[error("parameters rejected: {0}")]
    ParameterRejected(String),
    /// Preview buffers could not be allocated or registered.
    #[error("preview buffers exhausted: {0}")]
    ResourceExhausted(String),
    /// No registered buffer was available for the next frame.
    #[error("no preview buffer available")]
    NoBufferAvailable,
    /// The device cannot produce a usable pixel format.
    #[error("format not supported: {0}")]
    FormatNotSupported(String),
    /// Error during streaming operation.
    #[error("stream error: {0}")]
    StreamError(String),
    /// Malformed frame data.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// A buffer the device refused, handed back so the caller keeps ownership.
#[derive(Debug, Error)]
#[error("buffer registration rejected: {reason}")]
pub struct RegistrationError {
    /// The rejected buffer.
    pub buffer: PreviewBuffer,
    /// Why the device refused it.
    pub reason: String,
}

/// Entry point into a camera stack.
pub trait CameraPlatform {
    /// Device handle type produced by `open`.
    type Device: CameraDevice;

    /// Number of cameras, or `Unsupported` if the platform cannot enumerate.
    fn number_of_cameras(&self) -> Result<u32>;

    /// Open the camera with the given index.
    fn open(&self, index: u32) -> Result<Self::Device>;

    /// Open the platform's primary camera.
    fn open_default(&self) -> Result<Self::Device>;
}

/// Abstraction over an open camera device.
pub trait CameraDevice {
    /// Read the current parameter block.
    fn parameters(&self) -> Result<ParameterBlock>;

    /// Write a parameter block back to the device.
    fn set_parameters(&mut self, params: &ParameterBlock) -> Result<()>;

    /// Buffer-backed preview delivery, if the device supports it.
    fn buffered_preview(&mut self) -> Option<&mut dyn BufferedPreview> {
        None
    }

    /// Block until the next preview frame is available.
    fn next_frame(&mut self) -> Result<Frame>;
}

/// Preview delivery into caller-registered buffers.
pub trait BufferedPreview {
    /// Queue a buffer to receive a future frame.
    fn add_callback_buffer(
        &mut self,
        buffer: PreviewBuffer,
    ) -> std::result::Result<(), RegistrationError>;

    /// Remove and return every buffer still queued with the device.
    fn drain_callback_buffers(&mut self) -> Vec<PreviewBuffer>;

    /// Switch between pooled delivery and per-frame copies.
    fn set_pooled_delivery(&mut self, enabled: bool) -> Result<()>;
}
