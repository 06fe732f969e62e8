//! Background capture loop.
//!
//! A [`CaptureLoop`] moves a [`DeviceSession`] onto a producer thread and
//! feeds every frame to a handler. The handler only borrows the frame bytes;
//! the loop recycles pooled buffers as soon as the handler returns.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::session::DeviceSession;
use crate::traits::{CameraDevice, CameraError, FrameMetadata, Result, Size};

const STARVATION_BACKOFF: Duration = Duration::from_millis(5);

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames handed to the handler.
    pub frames: u64,
    /// Times the device had no registered buffer to fill.
    pub starved: u64,
}

/// What the producer thread hands back when it stops.
pub struct CaptureOutcome<D: CameraDevice> {
    /// The session, ready for reconfiguration or [`DeviceSession::close`].
    pub session: DeviceSession<D>,
    /// Counters for the run.
    pub stats: CaptureStats,
    /// The error that ended the run, if any.
    pub error: Option<CameraError>,
}

/// A capture loop running on its own thread.
pub struct CaptureLoop<D: CameraDevice> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<CaptureOutcome<D>>,
}

impl<D> CaptureLoop<D>
where
    D: CameraDevice + Send + 'static,
{
    /// Start capturing on a new thread.
    ///
    /// The loop runs until [`Self::stop`] is called, the handler returns
    /// [`ControlFlow::Break`], or the device reports an error other than
    /// buffer starvation.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the thread cannot be created.
    pub fn spawn<F>(session: DeviceSession<D>, handler: F) -> Result<Self>
    where
        F: FnMut(&[u8], Size, &FrameMetadata) -> ControlFlow<()> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("preview-capture".into())
            .spawn(move || run(session, handler, &flag))?;
        Ok(Self { stop, handle })
    }

    /// Ask the loop to stop after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once the producer thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit and take back the session.
    ///
    /// # Errors
    ///
    /// Returns `StreamError` if the producer thread panicked; the session is
    /// lost in that case.
    pub fn join(self) -> Result<CaptureOutcome<D>> {
        self.handle
            .join()
            .map_err(|_| CameraError::StreamError("capture thread panicked".to_owned()))
    }
}

fn run<D, F>(mut session: DeviceSession<D>, mut handler: F, stop: &AtomicBool) -> CaptureOutcome<D>
where
    D: CameraDevice,
    F: FnMut(&[u8], Size, &FrameMetadata) -> ControlFlow<()>,
{
    let mut stats = CaptureStats::default();
    let mut error = None;

    while !stop.load(Ordering::Acquire) {
        let frame = match session.next_frame() {
            Ok(frame) => frame,
            Err(CameraError::NoBufferAvailable) => {
                stats.starved += 1;
                tracing::warn!(
                    starved = stats.starved,
                    "no preview buffer registered, frame dropped"
                );
                thread::sleep(STARVATION_BACKOFF);
                continue;
            }
            Err(err) => {
                tracing::error!(error = %err, "capture stopped on device error");
                error = Some(err);
                break;
            }
        };

        stats.frames += 1;
        let flow = handler(frame.bytes(), frame.size, &frame.metadata);

        if let Err(err) = session.recycle_frame(frame) {
            tracing::error!(error = %err, "buffer recycle failed");
            error = Some(err);
            break;
        }
        if flow.is_break() {
            break;
        }
    }

    tracing::info!(
        frames = stats.frames,
        starved = stats.starved,
        "capture loop finished"
    );
    CaptureOutcome {
        session,
        stats,
        error,
    }
}
