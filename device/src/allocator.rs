use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;

/// Opaque handle to device memory.
pub enum RawBuffer {
    Cpu { data: Box<[u8]> },
}

impl RawBuffer {
    /// Get the size of the buffer in bytes.
    pub fn size(&self) -> usize {
        match self {
            RawBuffer::Cpu { data } => data.len(),
        }
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawBuffer::Cpu { data } => f.debug_struct("Cpu").field("size", &data.len()).finish(),
        }
    }
}

/// Options for buffer allocation.
#[derive(Debug, Clone, Default)]
pub struct BufferOptions {
    /// Whether to zero-initialize the buffer.
    pub zero_init: bool,
}

pub trait Allocator: Send + Sync + fmt::Debug {
    fn alloc(&self, size: usize, options: &BufferOptions) -> Result<RawBuffer>;
    fn free(&self, _buffer: RawBuffer) {}
    fn name(&self) -> &str;
}

/// CPU allocator using system memory.
#[derive(Debug, Clone)]
pub struct CpuAllocator;

impl Allocator for CpuAllocator {
    fn alloc(&self, size: usize, _options: &BufferOptions) -> Result<RawBuffer> {
        let data = vec![0u8; size].into_boxed_slice();
        Ok(RawBuffer::Cpu { data })
    }

    fn name(&self) -> &str {
        "CPU"
    }
}

/// Snapshot of a [`TrackingAllocator`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCounters {
    pub live_buffers: usize,
    pub live_bytes: usize,
    pub peak_buffers: usize,
    pub peak_bytes: usize,
    pub total_allocations: usize,
}

/// Allocator wrapper that records live and peak usage of the inner allocator.
///
/// Used to compare memory policies: the same program planned with buffer
/// handlers must never peak higher than the eagerly instantiated one.
#[derive(Debug)]
pub struct TrackingAllocator {
    inner: Arc<dyn Allocator>,
    live_buffers: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_buffers: AtomicUsize,
    peak_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
    name: String,
}

impl TrackingAllocator {
    pub fn new(inner: Arc<dyn Allocator>) -> Self {
        let name = format!("tracking({})", inner.name());
        Self {
            inner,
            live_buffers: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            peak_buffers: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
            name,
        }
    }

    pub fn counters(&self) -> MemoryCounters {
        MemoryCounters {
            live_buffers: self.live_buffers.load(Ordering::Acquire),
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            peak_buffers: self.peak_buffers.load(Ordering::Acquire),
            peak_bytes: self.peak_bytes.load(Ordering::Acquire),
            total_allocations: self.total_allocations.load(Ordering::Acquire),
        }
    }
}

impl Allocator for TrackingAllocator {
    fn alloc(&self, size: usize, options: &BufferOptions) -> Result<RawBuffer> {
        let buffer = self.inner.alloc(size, options)?;

        let buffers = self.live_buffers.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = self.live_bytes.fetch_add(size, Ordering::AcqRel) + size;
        self.peak_buffers.fetch_max(buffers, Ordering::AcqRel);
        self.peak_bytes.fetch_max(bytes, Ordering::AcqRel);
        self.total_allocations.fetch_add(1, Ordering::AcqRel);

        Ok(buffer)
    }

    fn free(&self, buffer: RawBuffer) {
        let size = buffer.size();
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
        self.inner.free(buffer);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
