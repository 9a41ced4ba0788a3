//! Two-level x86 paging.
//!
//! A 4 KiB page directory of 1024 entries, each covering 4 MiB through a
//! 1024-entry page table. Entries carry the target frame in the high 20 bits
//! and flags in the low 12. Tables are reached through their physical
//! addresses: valid before paging is enabled, and afterwards because the
//! directory and every table frame are identity-mapped during init.

use bitflags::bitflags;

use crate::memory::addr::{PhysAddr, VirtAddr};

#[cfg(target_arch = "x86")]
use core::arch::asm;
#[cfg(target_arch = "x86")]
use spin::Mutex;

#[cfg(target_arch = "x86")]
use crate::constants::idt::PAGE_FAULT_VECTOR;
#[cfg(target_arch = "x86")]
use crate::constants::memory::{IDENTITY_MAP_END, PAGE_SIZE};
#[cfg(target_arch = "x86")]
use crate::interrupts::{self, Registers};
#[cfg(target_arch = "x86")]
use crate::memory::frame_allocator;

bitflags! {
    /// Page-directory / page-table entry flags. FOUR_MIB is meaningful in
    /// directory entries only.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const FOUR_MIB = 1 << 7;
    }
}

pub const ENTRY_COUNT: usize = 1024;

/// One PDE or PTE.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Entry(u32);

impl Entry {
    pub const EMPTY: Entry = Entry(0);

    pub fn new(addr: PhysAddr, flags: PageFlags) -> Self {
        Entry((addr.as_u32() & !0xFFF) | (flags.bits() & 0xFFF))
    }

    pub fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    /// Physical address of the target page, or of the child table in a PDE.
    pub fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & 0xFFFF_F000)
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Index of the directory entry covering `virt` (bits 31..22).
pub fn pde_index(virt: VirtAddr) -> usize {
    ((virt.as_u32() >> 22) & 0x3FF) as usize
}

/// Index of the table entry covering `virt` (bits 21..12).
pub fn pte_index(virt: VirtAddr) -> usize {
    ((virt.as_u32() >> 12) & 0x3FF) as usize
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapError {
    /// The frame allocator had no frame left for a page table.
    FrameAllocationFailed,
    /// The kernel address space has not been built yet.
    NotInitialized,
}

/// The kernel address space, installed once by [`init`].
#[cfg(target_arch = "x86")]
pub static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);

#[cfg(target_arch = "x86")]
pub struct AddressSpace {
    directory: PhysAddr,
    active: bool,
}

#[cfg(target_arch = "x86")]
impl AddressSpace {
    /// Allocates and zeroes the page directory. None when the frame
    /// allocator is exhausted.
    pub fn new() -> Option<AddressSpace> {
        let directory = frame_allocator::alloc_frame()?;
        unsafe { zero_table(directory) };
        Some(AddressSpace {
            directory,
            active: false,
        })
    }

    pub fn directory_addr(&self) -> PhysAddr {
        self.directory
    }

    /// Installs `virt -> phys`. A missing page table is allocated, zeroed
    /// and entered into the directory as PRESENT | WRITABLE (| USER when the
    /// mapping is a user mapping). Once paging is active the modified entry
    /// is flushed from the TLB.
    pub fn map_page(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        unsafe {
            let dir = self.directory.as_u32() as *mut Entry;
            let pde = dir.add(pde_index(virt));
            if !pde.read_volatile().is_present() {
                let table_frame =
                    frame_allocator::alloc_frame().ok_or(MapError::FrameAllocationFailed)?;
                zero_table(table_frame);
                let mut table_flags = PageFlags::PRESENT | PageFlags::WRITABLE;
                if flags.contains(PageFlags::USER) {
                    table_flags |= PageFlags::USER;
                }
                pde.write_volatile(Entry::new(table_frame, table_flags));
            }
            let table = pde.read_volatile().addr().as_u32() as *mut Entry;
            table
                .add(pte_index(virt))
                .write_volatile(Entry::new(phys, flags));
            if self.active {
                invlpg(virt);
            }
        }
        Ok(())
    }

    /// Maps every page of `[start, end)` onto itself.
    ///
    /// # Safety
    /// The caller vouches that the range is real memory the kernel may own.
    pub unsafe fn identity_map_range(
        &mut self,
        start: u32,
        end: u32,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let mut addr = VirtAddr::new(start).align_down();
        let end = VirtAddr::new(end).align_up();
        while addr < end {
            self.map_page(addr, PhysAddr::new(addr.as_u32()), flags)?;
            addr = addr.add(PAGE_SIZE as u32);
        }
        Ok(())
    }

    /// Identity-maps the directory frame and every installed page-table
    /// frame. They came from the frame allocator above the first megabyte,
    /// so translation would lose them the moment paging turns on otherwise.
    ///
    /// # Safety
    /// Must run before [`enable`](Self::enable).
    pub unsafe fn map_table_frames(&mut self, flags: PageFlags) -> Result<(), MapError> {
        let directory = self.directory;
        self.map_page(VirtAddr::new(directory.as_u32()), directory, flags)?;

        let dir = self.directory.as_u32() as *const Entry;
        for i in 0..ENTRY_COUNT {
            let entry = dir.add(i).read_volatile();
            if entry.is_present() {
                let table = entry.addr();
                self.map_page(VirtAddr::new(table.as_u32()), table, flags)?;
            }
        }
        Ok(())
    }

    /// Loads the directory into CR3 and sets the CR0 paging bit.
    ///
    /// # Safety
    /// Every address the kernel touches from here on must be mapped.
    pub unsafe fn enable(&mut self) {
        asm!(
            "mov cr3, {dir}",
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            dir = in(reg) self.directory.as_u32(),
            tmp = out(reg) _,
            options(nostack),
        );
        self.active = true;
    }
}

#[cfg(target_arch = "x86")]
unsafe fn zero_table(frame: PhysAddr) {
    let table = frame.as_u32() as *mut Entry;
    for i in 0..ENTRY_COUNT {
        table.add(i).write_volatile(Entry::EMPTY);
    }
}

#[cfg(target_arch = "x86")]
unsafe fn invlpg(virt: VirtAddr) {
    asm!("invlpg [{}]", in(reg) virt.as_u32(), options(nostack, preserves_flags));
}

/// Builds the kernel address space: identity-map low memory and the page
/// tables themselves, hook the page-fault vector, then enable translation.
/// Out of frames here means the machine cannot run; panic and halt.
#[cfg(target_arch = "x86")]
pub fn init() {
    let mut space = match AddressSpace::new() {
        Some(space) => space,
        None => panic!("paging: no frame for the page directory"),
    };

    let kernel_flags = PageFlags::PRESENT | PageFlags::WRITABLE;
    unsafe {
        if space.identity_map_range(0, IDENTITY_MAP_END, kernel_flags).is_err() {
            panic!("paging: no frames for low-memory page tables");
        }
        if space.map_table_frames(kernel_flags).is_err() {
            panic!("paging: no frames while mapping the page tables");
        }
    }

    interrupts::register_handler(PAGE_FAULT_VECTOR, page_fault_handler);

    unsafe { space.enable() };
    log::info!(
        "paging enabled, directory at {:?}",
        space.directory_addr()
    );
    *KERNEL_SPACE.lock() = Some(space);
}

/// Installs a mapping in the kernel address space.
#[cfg(target_arch = "x86")]
pub fn map_page(virt: VirtAddr, phys: PhysAddr, flags: PageFlags) -> Result<(), MapError> {
    match KERNEL_SPACE.lock().as_mut() {
        Some(space) => space.map_page(virt, phys, flags),
        None => Err(MapError::NotInitialized),
    }
}

/// There is no demand paging and no copy-on-write, so every fault is fatal:
/// report and halt with interrupts masked.
#[cfg(target_arch = "x86")]
fn page_fault_handler(regs: &Registers) {
    let faulting_addr: u32;
    unsafe {
        asm!("mov {}, cr2", out(reg) faulting_addr, options(nostack, preserves_flags));
    }

    let err = regs.err_code;
    log::error!("PAGE FAULT at {:#010x} (error {:#x})", faulting_addr, err);
    log::error!(
        "  {}, {}, {}",
        if err & 1 != 0 {
            "protection violation"
        } else {
            "page not present"
        },
        if err & 2 != 0 { "write" } else { "read" },
        if err & 4 != 0 { "user mode" } else { "kernel mode" }
    );

    interrupts::disable();
    loop {
        unsafe { x86::halt() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_packs_address_and_flags() {
        let entry = Entry::new(
            PhysAddr::new(0x0010_3000),
            PageFlags::PRESENT | PageFlags::WRITABLE,
        );
        assert_eq!(entry.raw(), 0x0010_3003);
        assert!(entry.is_present());
        assert_eq!(entry.addr().as_u32(), 0x0010_3000);
        assert_eq!(entry.flags(), PageFlags::PRESENT | PageFlags::WRITABLE);
    }

    #[test]
    fn entry_masks_misaligned_address_and_high_flag_bits() {
        let entry = Entry::new(PhysAddr::new(0x0010_3FFF), PageFlags::PRESENT);
        assert_eq!(entry.addr().as_u32(), 0x0010_3000);

        let empty = Entry::EMPTY;
        assert!(!empty.is_present());
        assert_eq!(empty.flags(), PageFlags::empty());
    }

    #[test]
    fn flag_bits_match_the_hardware_layout() {
        assert_eq!(PageFlags::PRESENT.bits(), 0x001);
        assert_eq!(PageFlags::WRITABLE.bits(), 0x002);
        assert_eq!(PageFlags::USER.bits(), 0x004);
        assert_eq!(PageFlags::WRITE_THROUGH.bits(), 0x008);
        assert_eq!(PageFlags::NO_CACHE.bits(), 0x010);
        assert_eq!(PageFlags::ACCESSED.bits(), 0x020);
        assert_eq!(PageFlags::DIRTY.bits(), 0x040);
        assert_eq!(PageFlags::FOUR_MIB.bits(), 0x080);
    }

    #[test]
    fn index_extraction_splits_the_address() {
        let virt = VirtAddr::new(0x0040_1000);
        assert_eq!(pde_index(virt), 1);
        assert_eq!(pte_index(virt), 1);

        assert_eq!(pde_index(VirtAddr::new(0xFFFF_F000)), 1023);
        assert_eq!(pte_index(VirtAddr::new(0xFFFF_F000)), 1023);
        assert_eq!(pde_index(VirtAddr::new(0)), 0);

        // Every address below 4 MiB lands in directory entry 0.
        assert_eq!(pde_index(VirtAddr::new(0x003F_FFFF)), 0);
        assert_eq!(pde_index(VirtAddr::new(0x0040_0000)), 1);
    }
}
