//! Kernel bring-up.
//!
//! The boot stage drops the CPU here in protected mode with the firmware
//! memory map already stored at its fixed address. The subsystems come up
//! in dependency order: frames, paging, heap, disk, filesystem. External
//! collaborators (IDT stubs, PIC, display, keyboard, timer, shell) hook in
//! around this sequence through the interfaces the core exposes.

use alloc::boxed::Box;

use crate::boot::MemoryMap;
use crate::devices::ata::AtaDrive;
use crate::filesys::fat16::Fat16;
use crate::filesys::ROOT_FS;
use crate::{idle_loop, interrupts, logging, memory, serial_println};

/// Entry point the boot stub jumps to.
#[no_mangle]
pub extern "C" fn kmain() -> ! {
    // Touch the serial port early so panics have somewhere to go.
    serial_println!("minos booting");
    logging::init();

    let memory_map = unsafe { MemoryMap::from_bootloader() };
    memory::init(&memory_map);

    match AtaDrive::identify() {
        Ok(drive) => match Fat16::mount(Box::new(drive)) {
            Ok(fs) => {
                log::info!("fat16: mounted, {} sectors", fs.total_sectors());
                *ROOT_FS.lock() = Some(fs);
            }
            Err(err) => log::error!("fat16: mount failed: {:?}", err),
        },
        Err(err) => log::error!("ata: no usable drive: {:?}", err),
    }

    interrupts::enable();
    log::info!("boot complete");
    idle_loop();
}
