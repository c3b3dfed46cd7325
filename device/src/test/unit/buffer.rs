use std::sync::Arc;

use kiln_dtype::DType;

use crate::{Buffer, BufferOptions, BufferState, CpuAllocator, TrackingAllocator};

fn tracking() -> Arc<TrackingAllocator> {
    Arc::new(TrackingAllocator::new(Arc::new(CpuAllocator)))
}

#[test]
fn test_new_buffer_is_unallocated() {
    let buffer = Buffer::new(Arc::new(CpuAllocator), DType::Float32, &[2, 3], BufferOptions::default());

    assert_eq!(buffer.state(), BufferState::Unallocated);
    assert_eq!(buffer.size(), 24);
    assert_eq!(buffer.shape(), &[2, 3]);
}

#[test]
fn test_allocate_free_cycle() {
    let alloc = tracking();
    let mut buffer = Buffer::new(alloc.clone(), DType::Int64, &[4], BufferOptions::default());

    buffer.allocate().unwrap();
    assert_eq!(buffer.state(), BufferState::Allocated);
    assert_eq!(alloc.counters().live_bytes, 32);

    // Second allocate must not hand out new memory.
    buffer.allocate().unwrap();
    assert_eq!(alloc.counters().total_allocations, 1);

    buffer.free();
    assert_eq!(buffer.state(), BufferState::Freed);
    assert_eq!(alloc.counters().live_bytes, 0);

    buffer.allocate().unwrap();
    assert_eq!(buffer.state(), BufferState::Allocated);
    assert_eq!(alloc.counters().total_allocations, 2);
}

#[test]
fn test_free_unallocated_keeps_state() {
    let mut buffer = Buffer::new(Arc::new(CpuAllocator), DType::Float32, &[1], BufferOptions::default());
    buffer.free();
    assert_eq!(buffer.state(), BufferState::Unallocated);
}

#[test]
fn test_drop_releases_memory() {
    let alloc = tracking();
    {
        let mut buffer = Buffer::new(alloc.clone(), DType::Float32, &[8], BufferOptions::default());
        buffer.allocate().unwrap();
        assert_eq!(alloc.counters().live_buffers, 1);
    }
    let counters = alloc.counters();
    assert_eq!(counters.live_buffers, 0);
    assert_eq!(counters.peak_buffers, 1);
    assert_eq!(counters.peak_bytes, 32);
}
