//! V4L2 backend using the v4l crate.
//!
//! Preview frames are delivered as NV21. Devices that cannot produce NV21
//! directly are driven in YUYV and repacked on the way out.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::control::{Control, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as _;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::convert::{self, FrameError};
use crate::params;
use crate::pool::PreviewBuffer;
use crate::traits::{
    BufferedPreview, CameraDevice, CameraError, CameraPlatform, FlashMode, Frame, FrameData,
    FrameMetadata, ParameterBlock, RegistrationError, Result, Size,
};

/// Highest `/dev/videoN` node scanned for cameras.
const MAX_NODES: u32 = 16;

/// Kernel buffers requested for the mmap stream.
const STREAM_BUFFERS: u32 = 4;

/// `V4L2_CID_FLASH_LED_MODE` from the flash control class.
const V4L2_CID_FLASH_LED_MODE: u32 = 0x009c_0901;

const FLASH_LED_MODE_NONE: i64 = 0;
const FLASH_LED_MODE_FLASH: i64 = 1;
const FLASH_LED_MODE_TORCH: i64 = 2;

/// Sizes offered for devices that report a stepwise or continuous range.
const STEPWISE_CANDIDATES: [Size; 3] = [
    Size::new(640, 480),
    Size::new(1280, 720),
    Size::new(1920, 1080),
];

fn nv21() -> FourCC {
    FourCC::new(b"NV21")
}

fn yuyv() -> FourCC {
    FourCC::new(b"YUYV")
}

/// Driver identification for an open device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// `/dev/videoN` node number.
    pub node: u32,
    /// Driver name (e.g. "vivid", "uvcvideo").
    pub driver: String,
    /// Card name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Device supports mmap streaming.
    pub can_stream: bool,
}

/// Pixel layout the device is driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Nv21,
    Yuyv,
}

impl SourceFormat {
    fn fourcc(self) -> FourCC {
        match self {
            Self::Nv21 => nv21(),
            Self::Yuyv => yuyv(),
        }
    }
}

/// The V4L2 capture nodes on this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4L2Platform;

impl V4L2Platform {
    /// Node numbers of every video capture device, in ascending order.
    pub fn capture_nodes() -> Vec<u32> {
        (0..MAX_NODES)
            .filter(|node| Path::new(&format!("/dev/video{node}")).exists())
            .filter(|&node| {
                Device::new(node as usize)
                    .and_then(|device| device.query_caps())
                    .is_ok_and(|caps| caps.capabilities.contains(Flags::VIDEO_CAPTURE))
            })
            .collect()
    }
}

impl CameraPlatform for V4L2Platform {
    type Device = V4L2Device;

    fn number_of_cameras(&self) -> Result<u32> {
        let count = Self::capture_nodes().len();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Open the `index`-th capture node.
    fn open(&self, index: u32) -> Result<V4L2Device> {
        let node = Self::capture_nodes()
            .get(index as usize)
            .copied()
            .ok_or(CameraError::DeviceNotFound(index))?;
        V4L2Device::open_node(node)
    }

    fn open_default(&self) -> Result<V4L2Device> {
        let node = Self::capture_nodes()
            .first()
            .copied()
            .ok_or(CameraError::DeviceNotFound(0))?;
        V4L2Device::open_node(node)
    }
}

/// An open V4L2 capture device.
pub struct V4L2Device {
    device: Device,
    info: DeviceInfo,
    source: SourceFormat,
    preview_size: Size,
    picture_size: Size,
    supported_sizes: Option<Vec<Size>>,
    flash_modes: Option<Vec<FlashMode>>,
    stream: Option<Stream<'static>>,
    queue: VecDeque<PreviewBuffer>,
    pooled: bool,
}

impl V4L2Device {
    /// Open `/dev/video{node}` and negotiate an NV21-compatible format.
    pub fn open_node(node: u32) -> Result<Self> {
        let device = Device::new(node as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("/dev/video{node}: {err}")))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceOpenFailed(format!(
                "/dev/video{node} is not a capture device"
            )));
        }

        let info = DeviceInfo {
            node,
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        };

        let current = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let requested = Size::new(current.width, current.height);
        let (source, preview_size) = negotiate(&device, requested)?;

        let supported_sizes = enumerate_sizes(&device, source.fourcc());
        let picture_size = params::best_picture_size(supported_sizes.as_deref());
        let picture_size = picture_size.unwrap_or(preview_size);
        let flash_modes = query_flash_modes(&device);

        tracing::info!(
            node,
            driver = %info.driver,
            card = %info.card,
            source = ?source,
            preview = %preview_size,
            picture = %picture_size,
            "opened camera"
        );

        Ok(Self {
            device,
            info,
            source,
            preview_size,
            picture_size,
            supported_sizes,
            flash_modes,
            stream: None,
            queue: VecDeque::new(),
            pooled: false,
        })
    }

    /// Driver identification.
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn set_preview_size(&mut self, size: Size) -> Result<()> {
        // The format is locked while buffers are mapped.
        self.stream = None;

        let negotiated = set_format(&self.device, size, self.source.fourcc())?;
        if negotiated != size {
            return Err(CameraError::ParameterRejected(format!(
                "requested preview {size}, driver chose {negotiated}"
            )));
        }
        self.preview_size = size;
        tracing::info!(preview = %size, "preview format applied");
        Ok(())
    }

    fn flash_mode(&self) -> Option<FlashMode> {
        self.flash_modes.as_ref()?;
        let control = self.device.control(V4L2_CID_FLASH_LED_MODE).ok()?;
        match control.value {
            Value::Integer(value) => flash_mode_from_control(value),
            _ => None,
        }
    }

    fn apply_flash_mode(&mut self, mode: &FlashMode) -> Result<()> {
        let value = flash_control_value(mode).ok_or_else(|| {
            CameraError::ParameterRejected(format!("flash mode {mode} has no V4L2 equivalent"))
        })?;
        self.device
            .set_control(Control {
                id: V4L2_CID_FLASH_LED_MODE,
                value: Value::Integer(value),
            })
            .map_err(|err| CameraError::ParameterRejected(format!("flash mode {mode}: {err}")))?;
        tracing::info!(%mode, "flash mode applied");
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut Stream<'static>> {
        if self.stream.is_none() {
            let stream = Stream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)
                .map_err(|err| CameraError::StreamError(err.to_string()))?;
            tracing::debug!(buffers = STREAM_BUFFERS, "mmap stream created");
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| CameraError::StreamError("stream unavailable".to_owned()))
    }
}

impl CameraDevice for V4L2Device {
    fn parameters(&self) -> Result<ParameterBlock> {
        Ok(ParameterBlock {
            preview_size: self.preview_size,
            picture_size: self.picture_size,
            supported_preview_sizes: self.supported_sizes.clone(),
            supported_picture_sizes: self.supported_sizes.clone(),
            flash_mode: self.flash_mode(),
            supported_flash_modes: self.flash_modes.clone(),
        })
    }

    fn set_parameters(&mut self, params: &ParameterBlock) -> Result<()> {
        check_picture_size(
            self.supported_sizes.as_deref(),
            self.picture_size,
            params.picture_size,
        )?;

        if params.preview_size != self.preview_size {
            self.set_preview_size(params.preview_size)?;
        }
        self.picture_size = params.picture_size;

        if let Some(mode) = &params.flash_mode {
            if self.flash_modes.is_some() && self.flash_mode().as_ref() != Some(mode) {
                self.apply_flash_mode(mode)?;
            }
        }
        Ok(())
    }

    fn buffered_preview(&mut self) -> Option<&mut dyn BufferedPreview> {
        Some(self)
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let size = self.preview_size;
        let source = self.source;
        let len = size.preview_buffer_len();

        let mut target = if self.pooled {
            FrameData::Pooled(take_queued(&mut self.queue, len)?)
        } else {
            FrameData::Copied(vec![0u8; len])
        };

        let (buf, meta) = match self.stream()?.next() {
            Ok(next) => next,
            Err(err) => {
                if let FrameData::Pooled(buffer) = target {
                    self.queue.push_front(buffer);
                }
                return Err(CameraError::StreamError(err.to_string()));
            }
        };

        let out = match &mut target {
            FrameData::Pooled(buffer) => buffer.as_mut_slice(),
            FrameData::Copied(data) => data.as_mut_slice(),
        };
        let used = buf.get(..meta.bytesused as usize).unwrap_or(buf);
        let filled = match source {
            SourceFormat::Nv21 => copy_nv21(used, out, len),
            SourceFormat::Yuyv => convert::yuyv_to_nv21(used, size.width, size.height, out),
        };

        let metadata = FrameMetadata {
            sequence: meta.sequence,
            timestamp: timestamp(meta.timestamp.sec, meta.timestamp.usec),
            bytes_used: meta.bytesused,
        };

        if let Err(err) = filled {
            if let FrameData::Pooled(buffer) = target {
                self.queue.push_front(buffer);
            }
            return Err(err.into());
        }

        Ok(Frame {
            data: target,
            size,
            metadata,
        })
    }
}

impl BufferedPreview for V4L2Device {
    fn add_callback_buffer(
        &mut self,
        buffer: PreviewBuffer,
    ) -> std::result::Result<(), RegistrationError> {
        let needed = self.preview_size.preview_buffer_len();
        if buffer.len() < needed {
            return Err(RegistrationError {
                reason: format!("buffer of {} bytes, preview needs {needed}", buffer.len()),
                buffer,
            });
        }
        self.queue.push_back(buffer);
        Ok(())
    }

    fn drain_callback_buffers(&mut self) -> Vec<PreviewBuffer> {
        self.queue.drain(..).collect()
    }

    fn set_pooled_delivery(&mut self, enabled: bool) -> Result<()> {
        self.pooled = enabled;
        tracing::debug!(enabled, "pooled delivery toggled");
        Ok(())
    }
}

/// Pop the next registered buffer if it can hold `len` bytes. A buffer that
/// is too short stays queued.
fn take_queued(queue: &mut VecDeque<PreviewBuffer>, len: usize) -> Result<PreviewBuffer> {
    let buffer = queue.pop_front().ok_or(CameraError::NoBufferAvailable)?;
    if buffer.len() < len {
        let actual = buffer.len();
        queue.push_front(buffer);
        return Err(FrameError::InvalidLength {
            expected: len,
            actual,
        }
        .into());
    }
    Ok(buffer)
}

/// A picture size the caller left unchanged is always accepted; a new one
/// must be in the enumerated list.
fn check_picture_size(supported: Option<&[Size]>, current: Size, requested: Size) -> Result<()> {
    let Some(sizes) = supported else {
        return Ok(());
    };
    if requested == current || sizes.contains(&requested) {
        return Ok(());
    }
    let reason = format!("picture size {requested} not supported");
    Err(CameraError::ParameterRejected(reason))
}

fn set_format(device: &Device, size: Size, fourcc: FourCC) -> Result<Size> {
    let mut fmt = device
        .format()
        .map_err(|err| CameraError::StreamError(err.to_string()))?;
    fmt.width = size.width;
    fmt.height = size.height;
    fmt.fourcc = fourcc;

    let fmt = device
        .set_format(&fmt)
        .map_err(|err| CameraError::StreamError(err.to_string()))?;
    if fmt.fourcc != fourcc {
        return Err(CameraError::FormatNotSupported(format!(
            "requested {fourcc}, driver chose {}",
            fmt.fourcc
        )));
    }
    Ok(Size::new(fmt.width, fmt.height))
}

fn negotiate(device: &Device, size: Size) -> Result<(SourceFormat, Size)> {
    for source in [SourceFormat::Nv21, SourceFormat::Yuyv] {
        match set_format(device, size, source.fourcc()) {
            Ok(negotiated) => return Ok((source, negotiated)),
            Err(CameraError::FormatNotSupported(reason)) => {
                tracing::debug!(?source, %reason, "pixel format refused");
            }
            Err(err) => return Err(err),
        }
    }
    Err(CameraError::FormatNotSupported(
        "device offers neither NV21 nor YUYV".to_owned(),
    ))
}

fn enumerate_sizes(device: &Device, fourcc: FourCC) -> Option<Vec<Size>> {
    let framesizes = match device.enum_framesizes(fourcc) {
        Ok(framesizes) => framesizes,
        Err(err) => {
            tracing::debug!(error = %err, "frame size enumeration unavailable");
            return None;
        }
    };

    let mut sizes = Vec::new();
    for framesize in framesizes {
        match framesize.size {
            FrameSizeEnum::Discrete(discrete) => {
                sizes.push(Size::new(discrete.width, discrete.height));
            }
            FrameSizeEnum::Stepwise(stepwise) => {
                sizes.extend(STEPWISE_CANDIDATES.iter().copied().filter(|size| {
                    (stepwise.min_width..=stepwise.max_width).contains(&size.width)
                        && (stepwise.min_height..=stepwise.max_height).contains(&size.height)
                }));
            }
        }
    }
    sizes.dedup();

    (!sizes.is_empty()).then_some(sizes)
}

fn query_flash_modes(device: &Device) -> Option<Vec<FlashMode>> {
    let controls = device.query_controls().ok()?;
    let description = controls
        .iter()
        .find(|description| description.id == V4L2_CID_FLASH_LED_MODE)?;

    let modes: Vec<FlashMode> = (description.minimum..=description.maximum)
        .filter_map(flash_mode_from_control)
        .collect();
    (!modes.is_empty()).then_some(modes)
}

fn flash_mode_from_control(value: i64) -> Option<FlashMode> {
    match value {
        FLASH_LED_MODE_NONE => Some(FlashMode::Off),
        FLASH_LED_MODE_FLASH => Some(FlashMode::On),
        FLASH_LED_MODE_TORCH => Some(FlashMode::Torch),
        _ => None,
    }
}

fn flash_control_value(mode: &FlashMode) -> Option<i64> {
    match mode {
        FlashMode::Off => Some(FLASH_LED_MODE_NONE),
        FlashMode::On => Some(FLASH_LED_MODE_FLASH),
        FlashMode::Torch => Some(FLASH_LED_MODE_TORCH),
        FlashMode::Auto | FlashMode::Other(_) => None,
    }
}

fn copy_nv21(src: &[u8], out: &mut [u8], len: usize) -> std::result::Result<(), FrameError> {
    let (Some(src), Some(dst)) = (src.get(..len), out.get_mut(..len)) else {
        return Err(FrameError::InvalidLength {
            expected: len,
            actual: src.len().min(out.len()),
        });
    };
    dst.copy_from_slice(src);
    Ok(())
}

// V4L2 timestamps are non-negative in practice.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn timestamp(sec: i64, usec: i64) -> Duration {
    let secs = sec.max(0) as u64;
    let nanos = (usec.max(0) as u32).saturating_mul(1000);
    Duration::new(secs, nanos)
}
