pub mod addr;
pub mod frame_allocator;
pub mod heap;
pub mod paging;

pub use addr::{PhysAddr, VirtAddr};

/// Brings up the memory stack in dependency order: frames, then paging,
/// then the heap that draws pages from both.
#[cfg(target_arch = "x86")]
pub fn init(memory_map: &crate::boot::MemoryMap) {
    frame_allocator::init(memory_map);
    paging::init();
    heap::init();
}
