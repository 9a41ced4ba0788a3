//! Interrupt dispatch interface.
//!
//! The IDT, the PIC remap and the low-level stub entry points live outside
//! the core. The core consumes one seam: a handler registered per vector,
//! called by the stub path with a snapshot of the interrupted context. The
//! table is written during boot initialization only; reads from an ISR are
//! safe.

use spin::Mutex;

use crate::constants::idt::IDT_ENTRIES;

/// Register snapshot in stub push order: segment registers, the pusha
/// block, vector and error code, then the frame the CPU pushed itself.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Registers {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

pub type InterruptHandler = fn(&Registers);

static HANDLERS: Mutex<[Option<InterruptHandler>; IDT_ENTRIES]> =
    Mutex::new([None; IDT_ENTRIES]);

/// Installs `handler` for `vector`. Vectors past the table are ignored.
pub fn register_handler(vector: u8, handler: InterruptHandler) {
    let mut table = HANDLERS.lock();
    if let Some(slot) = table.get_mut(vector as usize) {
        *slot = Some(handler);
    }
}

/// Called by the external stub path for every vector.
#[no_mangle]
pub extern "C" fn interrupt_dispatch(regs: &Registers) {
    let handler = {
        let table = HANDLERS.lock();
        table.get(regs.int_no as usize).copied().flatten()
    };
    match handler {
        Some(handler) => handler(regs),
        None => log::warn!("unhandled interrupt {}", regs.int_no),
    }
}

#[cfg(target_arch = "x86")]
pub fn enable() {
    unsafe { x86::irq::enable() };
}

#[cfg(target_arch = "x86")]
pub fn disable() {
    unsafe { x86::irq::disable() };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static SEEN_ERR_CODE: AtomicU32 = AtomicU32::new(0);

    fn probe(regs: &Registers) {
        SEEN_ERR_CODE.store(regs.err_code, Ordering::SeqCst);
    }

    #[test]
    fn registered_handler_receives_the_frame() {
        register_handler(40, probe);
        let regs = Registers {
            int_no: 40,
            err_code: 0x7,
            ..Registers::default()
        };
        interrupt_dispatch(&regs);
        assert_eq!(SEEN_ERR_CODE.load(Ordering::SeqCst), 0x7);
    }

    #[test]
    fn unregistered_vectors_are_tolerated() {
        let regs = Registers {
            int_no: 41,
            ..Registers::default()
        };
        interrupt_dispatch(&regs);

        // Out-of-table vectors neither panic nor register.
        register_handler(200, probe);
        let regs = Registers {
            int_no: 200,
            ..Registers::default()
        };
        interrupt_dispatch(&regs);
    }
}
