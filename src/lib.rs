//! Preview-Pipeline: camera preview capture with pooled buffers
//!
//! This library probes what an open camera can do, picks preview and picture
//! sizes, keeps a pool of reusable preview buffers registered with the
//! device, and converts NV21 preview frames to packed ARGB with a bit-exact
//! integer transform. Camera stacks plug in through the traits in
//! [`traits`]; [`device`] provides the V4L2 backend.

pub mod capabilities;
pub mod capture;
pub mod config;
pub mod convert;
pub mod device;
pub mod params;
pub mod pool;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capabilities::DeviceCapabilities;
pub use capture::{CaptureLoop, CaptureOutcome, CaptureStats};
pub use config::{CaptureConfig, ConfigError};
pub use convert::{
    grayscale_argb as convert_frame_to_rgb, yuv_to_rgb as convert_pixel_to_rgb, FrameError, Rgb,
};
pub use device::{V4L2Device, V4L2Platform};
pub use pool::{BufferId, BufferPool, PreviewBuffer};
pub use session::DeviceSession;
pub use traits::{
    BufferedPreview, CameraDevice, CameraError, CameraPlatform, FlashMode, Frame, FrameData,
    FrameMetadata, ParameterBlock, Size,
};
