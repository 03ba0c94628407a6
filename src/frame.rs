//! Frame buffers and the pool they are drawn from.
//!
//! - `Frame`: owned frame buffer plus metadata. Returns its buffer to the pool on drop.
//! - `FrameArchive`: bounded buffer pool with a limit on frames published but not
//!   yet released. Allocation under backpressure yields `None`, never an error.
//!
//! `FrameArchive::flush` blocks until every published frame has been released.
//! The archive lock is released while waiting, so the delivery path and
//! application threads can keep dropping frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::stream::{Format, StreamKind};

/// Default limit on simultaneously published, unreleased frames.
pub const DEFAULT_MAX_PUBLISH_LIST_SIZE: u32 = 16;

/// Default number of buffers the pool may hand out or keep for reuse.
pub const DEFAULT_FRAME_POOL_CAPACITY: usize = 32;

/// Metadata attached to every allocated frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameAdditionalData {
    /// Reconstructed device timestamp.
    pub timestamp: f64,
    pub frame_number: u64,
    /// Host wall-clock time in milliseconds at arrival.
    pub system_time: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub stream: StreamKind,
    pub format: Format,
}

impl Default for FrameAdditionalData {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            frame_number: 0,
            system_time: 0.0,
            width: 0,
            height: 0,
            fps: 0,
            stream: StreamKind::Any,
            format: Format::Any,
        }
    }
}

/// A published frame. Dropping it releases the buffer back to its archive.
pub struct Frame {
    data: Vec<u8>,
    additional_data: FrameAdditionalData,
    archive: Arc<FrameArchive>,
}

impl Frame {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn additional_data(&self) -> &FrameAdditionalData {
        &self.additional_data
    }

    pub fn timestamp(&self) -> f64 {
        self.additional_data.timestamp
    }

    pub fn frame_number(&self) -> u64 {
        self.additional_data.frame_number
    }

    pub fn stream(&self) -> StreamKind {
        self.additional_data.stream
    }

    pub fn format(&self) -> Format {
        self.additional_data.format
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("additional_data", &self.additional_data)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.archive.release(std::mem::take(&mut self.data));
    }
}

struct ArchiveState {
    /// Released buffers kept for reuse.
    free: VecDeque<Vec<u8>>,
    /// Frames handed out and not yet dropped.
    published: usize,
}

/// Bounded pool of frame buffers.
pub struct FrameArchive {
    state: Mutex<ArchiveState>,
    released: Condvar,
    capacity: usize,
    max_publish_list_size: AtomicU32,
}

impl FrameArchive {
    pub fn new(capacity: usize, max_publish_list_size: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ArchiveState {
                free: VecDeque::with_capacity(capacity),
                published: 0,
            }),
            released: Condvar::new(),
            capacity,
            max_publish_list_size: AtomicU32::new(max_publish_list_size),
        })
    }

    /// Allocate a zeroed frame of `size` bytes.
    ///
    /// Returns `None` when the pool is exhausted or the publish-list limit is
    /// reached; the caller is expected to drop the incoming frame.
    pub fn alloc(
        self: &Arc<Self>,
        size: usize,
        additional_data: FrameAdditionalData,
    ) -> Option<Frame> {
        let mut state = self.lock();
        let max_published = self.max_publish_list_size.load(Ordering::Acquire) as usize;
        if state.published >= max_published {
            log::debug!(
                "FrameArchive: publish list full ({} frames outstanding)",
                state.published
            );
            return None;
        }
        if state.published >= self.capacity {
            log::debug!("FrameArchive: pool exhausted ({} buffers)", self.capacity);
            return None;
        }

        let mut data = state.free.pop_front().unwrap_or_default();
        data.clear();
        data.resize(size, 0);
        state.published += 1;
        drop(state);

        Some(Frame {
            data,
            additional_data,
            archive: Arc::clone(self),
        })
    }

    /// Block until every published frame has been released.
    pub fn flush(&self) {
        let mut state = self.lock();
        while state.published > 0 {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Frames currently published and unreleased.
    pub fn published(&self) -> usize {
        self.lock().published
    }

    /// Released buffers held for reuse.
    pub fn pooled(&self) -> usize {
        self.lock().free.len()
    }

    pub fn max_publish_list_size(&self) -> u32 {
        self.max_publish_list_size.load(Ordering::Acquire)
    }

    pub fn set_max_publish_list_size(&self, size: u32) {
        self.max_publish_list_size.store(size, Ordering::Release);
    }

    fn release(&self, data: Vec<u8>) {
        let mut state = self.lock();
        state.published = state.published.saturating_sub(1);
        if state.free.len() < self.capacity {
            state.free.push_back(data);
        }
        drop(state);
        self.released.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, ArchiveState> {
        crate::lock(&self.state)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
