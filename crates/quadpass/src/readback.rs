//! Non-blocking GPU to CPU readback.
//!
//! A read copies pixels into a pooled pixel-pack buffer, drops a fence
//! behind it and returns immediately. The host loop calls
//! [`PassContext::poll_readbacks`](crate::PassContext::poll_readbacks);
//! once a fence signals, the buffer is copied out and the callback runs.
//!
//! ```ignore
//! target.read(Box::new(|pixels| println!("{:?}", pixels.as_u8())), None, None)?;
//! loop {
//!     ctx.poll_readbacks();
//!     if ctx.pending_readbacks() == 0 { break; }
//! }
//! ```
//!
//! # Pool
//!
//! Every target owns a [`PackBufferPool`]. Buffers are grown on demand and
//! returned to the pool after use; idle buffers beyond the pool limit are
//! deleted on acquisition. Freeing the target invalidates every buffer of
//! its pool, and in-flight reads against an invalid buffer are dropped at
//! their next poll without calling back.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use quadpass_core::profiling::profile_function;
use quadpass_test_utils::{GlBuffer, GlContext, GlFence, SyncStatus};

use crate::error::ReadbackError;
use crate::format::{CpuArrayKind, PixelData};

/// Receives the pixels of a completed read.
pub type ReadCallback = Box<dyn FnOnce(PixelData)>;

/// A pixel-pack buffer. Capacity 0 marks a deleted buffer.
#[derive(Debug)]
pub struct PackBuffer {
    buffer: GlBuffer,
    capacity: Cell<usize>,
}

impl PackBuffer {
    pub fn raw(&self) -> GlBuffer {
        self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn is_valid(&self) -> bool {
        self.capacity.get() > 0
    }
}

/// Pixel-pack buffers of one target.
pub struct PackBufferPool {
    gl: Rc<dyn GlContext>,
    tag: String,
    limit: usize,
    idle: RefCell<VecDeque<Rc<PackBuffer>>>,
    all: RefCell<Vec<Rc<PackBuffer>>>,
}

impl PackBufferPool {
    pub fn new(gl: Rc<dyn GlContext>, tag: impl Into<String>, limit: usize) -> Self {
        Self {
            gl,
            tag: tag.into(),
            limit,
            idle: RefCell::new(VecDeque::new()),
            all: RefCell::new(Vec::new()),
        }
    }

    /// Take a buffer of at least `bytes` bytes, creating or growing one as
    /// needed.
    pub fn acquire(&self, bytes: usize) -> Result<Rc<PackBuffer>, ReadbackError> {
        let mut idle = self.idle.borrow_mut();
        let buffer = match idle.pop_front() {
            Some(buffer) => buffer,
            None => {
                let raw = self.gl.create_buffer().map_err(ReadbackError::Gl)?;
                let buffer = Rc::new(PackBuffer {
                    buffer: raw,
                    capacity: Cell::new(0),
                });
                self.all.borrow_mut().push(buffer.clone());
                buffer
            }
        };
        while idle.len() > self.limit {
            if let Some(excess) = idle.pop_back() {
                self.delete(&excess);
            }
        }
        drop(idle);

        if buffer.capacity() < bytes {
            self.gl
                .buffer_reserve(glow::PIXEL_PACK_BUFFER, buffer.buffer, bytes, glow::STREAM_READ);
            buffer.capacity.set(bytes);
            tracing::debug!(tag = %self.tag, bytes, "created/resized async readback buffer");
        }
        Ok(buffer)
    }

    /// Return a buffer after its read completed. Invalid buffers are
    /// discarded.
    pub fn recycle(&self, buffer: Rc<PackBuffer>) {
        if buffer.is_valid() {
            self.idle.borrow_mut().push_back(buffer);
        }
    }

    fn delete(&self, buffer: &Rc<PackBuffer>) {
        buffer.capacity.set(0);
        self.gl.delete_buffer(buffer.buffer);
        self.all.borrow_mut().retain(|b| !Rc::ptr_eq(b, buffer));
    }

    /// Delete every buffer, idle or in flight.
    pub fn invalidate_all(&self) {
        self.idle.borrow_mut().clear();
        for buffer in self.all.borrow_mut().drain(..) {
            buffer.capacity.set(0);
            self.gl.delete_buffer(buffer.buffer);
        }
    }

    pub fn idle_len(&self) -> usize {
        self.idle.borrow().len()
    }

    /// Buffers alive, idle or in flight.
    pub fn len(&self) -> usize {
        self.all.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.borrow().is_empty()
    }
}

/// An in-flight read waiting for its fence.
pub struct PendingRead {
    pub(crate) tag: String,
    pub(crate) fence: GlFence,
    pub(crate) buffer: Rc<PackBuffer>,
    pub(crate) pool: Rc<PackBufferPool>,
    /// Bytes to copy out
    pub(crate) len: usize,
    pub(crate) kind: CpuArrayKind,
    pub(crate) destination: Option<PixelData>,
    pub(crate) callback: ReadCallback,
    pub(crate) next_poll: Instant,
}

enum Step {
    Waiting(PendingRead),
    Delivered,
    Dropped,
}

/// Fence-and-poll queue shared by every target of a context.
pub struct ReadbackScheduler {
    gl: Rc<dyn GlContext>,
    poll_interval: Duration,
    pending: RefCell<Vec<PendingRead>>,
}

impl ReadbackScheduler {
    pub fn new(gl: Rc<dyn GlContext>, poll_interval: Duration) -> Self {
        Self {
            gl,
            poll_interval,
            pending: RefCell::new(Vec::new()),
        }
    }

    /// Queue a read, polling it once right away. Returns whether the
    /// callback already ran.
    pub fn submit(&self, read: PendingRead) -> bool {
        match self.step(read, Instant::now()) {
            Step::Waiting(read) => {
                self.pending.borrow_mut().push(read);
                false
            }
            Step::Delivered => true,
            Step::Dropped => false,
        }
    }

    /// Poll every read whose next poll time has passed. Returns the number
    /// of callbacks invoked.
    pub fn poll(&self) -> usize {
        profile_function!();
        let now = Instant::now();
        let due: Vec<PendingRead> = {
            let mut pending = self.pending.borrow_mut();
            let (due, waiting) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|read| read.next_poll <= now);
            *pending = waiting;
            due
        };

        let mut delivered = 0;
        for read in due {
            match self.step(read, now) {
                Step::Waiting(read) => self.pending.borrow_mut().push(read),
                Step::Delivered => delivered += 1,
                Step::Dropped => {}
            }
        }
        delivered
    }

    fn step(&self, mut read: PendingRead, now: Instant) -> Step {
        let gl = &*self.gl;
        if !read.buffer.is_valid() {
            tracing::debug!(tag = %read.tag, "readback buffer was freed, dropping read");
            gl.delete_sync(read.fence);
            return Step::Dropped;
        }
        match gl.client_wait_sync(read.fence, 0) {
            SyncStatus::TimeoutExpired => {
                read.next_poll = now + self.poll_interval;
                Step::Waiting(read)
            }
            SyncStatus::WaitFailed => {
                tracing::warn!(tag = %read.tag, "async read failed");
                gl.delete_sync(read.fence);
                read.pool.recycle(read.buffer);
                Step::Dropped
            }
            SyncStatus::Signaled => {
                let elements = read.len / read.kind.byte_size();
                let mut data = read
                    .destination
                    .take()
                    .unwrap_or_else(|| PixelData::zeroed(read.kind, elements));
                gl.get_buffer_sub_data(
                    glow::PIXEL_PACK_BUFFER,
                    read.buffer.raw(),
                    0,
                    &mut data.as_bytes_mut()[..read.len],
                );
                (read.callback)(data);
                gl.delete_sync(read.fence);
                read.pool.recycle(read.buffer);
                Step::Delivered
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}
