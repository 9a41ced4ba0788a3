pub mod idt;
pub mod memory;
pub mod ports;
