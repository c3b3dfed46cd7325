//! Device memory primitives for kiln.
//!
//! The compiler never talks to a device directly. It asks an [`Allocator`]
//! for raw memory and tracks each variable's storage through a [`Buffer`],
//! whose [`BufferState`] moves between unallocated, allocated and freed as
//! buffer-handler instructions run.

pub mod allocator;
pub mod buffer;
pub mod error;
pub mod registry;


pub use allocator::{Allocator, BufferOptions, CpuAllocator, MemoryCounters, RawBuffer, TrackingAllocator};
pub use buffer::{Buffer, BufferState};
pub use error::*;
pub use registry::{DeviceRegistry, DeviceSpec, registry};
