//! Preview buffer pool.
//!
//! Buffers move through two disjoint states: *registered* (queued with the
//! device, eligible to receive the next frame) and *delivered* (handed to
//! the consumer with a frame). [`BufferPool::recycle`] is the only way back
//! from delivered to registered, and it consumes the [`PreviewBuffer`]
//! handle, so a buffer cannot be reused while the consumer still holds it.

use std::collections::HashSet;
use std::fmt;

use crate::traits::{BufferedPreview, CameraError, Result};

/// Identity of a pooled buffer.
///
/// The generation changes on every allocation, so handles from a previous
/// preview size are recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    generation: u32,
    index: usize,
}

impl BufferId {
    /// Allocation generation this buffer belongs to.
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Slot within its generation.
    pub const fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation, self.index)
    }
}

/// An owned preview buffer. Only a [`BufferPool`] can create one.
pub struct PreviewBuffer {
    id: BufferId,
    data: Box<[u8]>,
}

impl PreviewBuffer {
    /// Identity of this buffer.
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable buffer contents, for the producer writing a frame.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PreviewBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewBuffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

fn alloc_block(len: usize) -> Result<Box<[u8]>> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(len)
        .map_err(|err| CameraError::ResourceExhausted(format!("{len} byte buffer: {err}")))?;
    block.resize(len, 0);
    Ok(block.into_boxed_slice())
}

/// Bookkeeping for the preview buffers registered with one device.
#[derive(Debug, Default)]
pub struct BufferPool {
    generation: u32,
    buffer_len: usize,
    registered: HashSet<usize>,
    delivered: HashSet<usize>,
    fresh_allocations: usize,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `count` buffers of `buffer_len` bytes and register them all.
    ///
    /// Buffers of the previous generation are drained from the device first;
    /// drained blocks of exactly `buffer_len` bytes are reused. If any
    /// registration fails, everything registered by this call is drained
    /// back and dropped before the error is returned.
    ///
    /// With `device == None` the pool is a pass-through and returns no ids.
    pub fn allocate(
        &mut self,
        device: Option<&mut dyn BufferedPreview>,
        count: usize,
        buffer_len: usize,
    ) -> Result<Vec<BufferId>> {
        let Some(device) = device else {
            tracing::debug!("buffered preview unavailable, frames will be copied");
            self.forget();
            return Ok(Vec::new());
        };

        if count == 0 || buffer_len == 0 {
            return Err(CameraError::InvalidParameter(format!(
                "cannot allocate {count} buffers of {buffer_len} bytes"
            )));
        }

        let mut spare: Vec<Box<[u8]>> = device
            .drain_callback_buffers()
            .into_iter()
            .filter(|buffer| buffer.len() == buffer_len)
            .map(|buffer| buffer.data)
            .collect();

        self.forget();
        self.buffer_len = buffer_len;
        let reused = spare.len().min(count);

        match self.register_all(device, &mut spare, count) {
            Ok(ids) => {
                tracing::debug!(
                    generation = self.generation,
                    count,
                    buffer_len,
                    reused,
                    "registered preview buffers"
                );
                Ok(ids)
            }
            Err(err) => {
                let released = device.drain_callback_buffers().len();
                self.forget();
                tracing::warn!(
                    count,
                    buffer_len,
                    released,
                    error = %err,
                    "preview buffer allocation failed"
                );
                Err(err)
            }
        }
    }

    fn register_all(
        &mut self,
        device: &mut dyn BufferedPreview,
        spare: &mut Vec<Box<[u8]>>,
        count: usize,
    ) -> Result<Vec<BufferId>> {
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            let data = if let Some(block) = spare.pop() {
                block
            } else {
                let block = alloc_block(self.buffer_len)?;
                self.fresh_allocations += 1;
                block
            };

            let id = BufferId {
                generation: self.generation,
                index,
            };
            if let Err(err) = device.add_callback_buffer(PreviewBuffer { id, data }) {
                let reason = format!("buffer {} of {count}: {}", index + 1, err.reason);
                return Err(CameraError::ResourceExhausted(reason));
            }
            self.registered.insert(index);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Record that the device handed `buffer` to the consumer.
    pub fn mark_delivered(&mut self, buffer: &PreviewBuffer) -> Result<()> {
        let id = buffer.id;
        if id.generation != self.generation || !self.registered.remove(&id.index) {
            return Err(CameraError::StreamError(format!(
                "buffer {id} delivered without being registered"
            )));
        }
        self.delivered.insert(id.index);
        Ok(())
    }

    /// Return a consumed buffer to the device so it can receive another frame.
    ///
    /// Buffers from an earlier generation are dropped instead of being
    /// registered, since they were sized for a previous preview size.
    pub fn recycle(
        &mut self,
        device: Option<&mut dyn BufferedPreview>,
        buffer: PreviewBuffer,
    ) -> Result<()> {
        let id = buffer.id;
        if id.generation != self.generation {
            tracing::debug!(buffer = %id, "dropping stale preview buffer");
            return Ok(());
        }
        if !self.delivered.remove(&id.index) {
            return Err(CameraError::StreamError(format!(
                "buffer {id} recycled without being delivered"
            )));
        }

        let Some(device) = device else {
            return Err(CameraError::Unsupported("buffered preview"));
        };
        match device.add_callback_buffer(buffer) {
            Ok(()) => {
                self.registered.insert(id.index);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(buffer = %id, reason = %err.reason, "re-registration failed");
                let reason = format!("re-registering buffer {id}: {}", err.reason);
                Err(CameraError::ResourceExhausted(reason))
            }
        }
    }

    /// Drain every buffer from the device and forget all handles.
    ///
    /// Handles still held by the consumer become stale.
    pub fn release(&mut self, device: Option<&mut dyn BufferedPreview>) -> usize {
        let released = device.map_or(0, |device| device.drain_callback_buffers().len());
        self.forget();
        released
    }

    fn forget(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.buffer_len = 0;
        self.registered.clear();
        self.delivered.clear();
    }

    /// Buffers queued with the device.
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Buffers currently held by the consumer.
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// True if `id` is queued with the device.
    pub fn is_registered(&self, id: BufferId) -> bool {
        id.generation == self.generation && self.registered.contains(&id.index)
    }

    /// True if `id` is held by the consumer.
    pub fn is_delivered(&self, id: BufferId) -> bool {
        id.generation == self.generation && self.delivered.contains(&id.index)
    }

    /// Length of every buffer in the current generation, or 0 when empty.
    pub const fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Current allocation generation.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Total blocks allocated over the pool's lifetime.
    pub const fn fresh_allocations(&self) -> usize {
        self.fresh_allocations
    }
}
