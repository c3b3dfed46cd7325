use std::fmt;
use std::sync::Arc;

use kiln_dtype::DType;
use smallvec::SmallVec;

use crate::allocator::{Allocator, BufferOptions, RawBuffer};
use crate::error::Result;

/// Allocation state of a [`Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Described but never backed by memory.
    Unallocated,
    /// Backed by device memory.
    Allocated,
    /// Memory was released after its last use.
    Freed,
}

/// A variable's device storage.
///
/// Allocation is explicit: the descriptor (shape, dtype, byte size) exists
/// from the moment a variable enters the scope, memory only once
/// [`Buffer::allocate`] runs. A freed buffer may be allocated again, which
/// happens when a planned program is replayed.
pub struct Buffer {
    allocator: Arc<dyn Allocator>,
    raw: Option<RawBuffer>,
    state: BufferState,
    /// Size in bytes.
    size: usize,
    dtype: DType,
    /// Shape of the tensor (stack-allocated for 0-4D tensors).
    shape: SmallVec<[usize; 4]>,
    options: BufferOptions,
}

impl Buffer {
    /// Create an unallocated buffer descriptor.
    pub fn new(allocator: Arc<dyn Allocator>, dtype: DType, shape: &[usize], options: BufferOptions) -> Self {
        let size = dtype.size_of(shape.iter().product());
        Self {
            allocator,
            raw: None,
            state: BufferState::Unallocated,
            size,
            dtype,
            shape: SmallVec::from_slice(shape),
            options,
        }
    }

    /// Back the buffer with memory. No-op when already allocated.
    pub fn allocate(&mut self) -> Result<()> {
        if self.raw.is_some() {
            return Ok(());
        }
        let raw = self.allocator.alloc(self.size, &self.options)?;
        self.raw = Some(raw);
        self.state = BufferState::Allocated;
        Ok(())
    }

    /// Return the memory to the allocator. No-op unless allocated.
    pub fn free(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.allocator.free(raw);
            self.state = BufferState::Freed;
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn is_allocated(&self) -> bool {
        self.state == BufferState::Allocated
    }

    /// Get the size of this buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn allocator(&self) -> &dyn Allocator {
        &*self.allocator
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.free();
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("size", &self.size)
            .field("state", &self.state)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}
