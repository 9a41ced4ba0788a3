//! Serial port interface for the COM1 16550 UART.
//! Provides thread-safe access to write formatted text to the serial port.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use x86::io::{inb, outb};

use crate::constants::ports::SERIAL_PORT;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// Creates a handle to the UART at `base`.
    ///
    /// # Safety
    /// `base` must be a COM port and must not be driven from anywhere else.
    pub const unsafe fn new(base: u16) -> SerialPort {
        SerialPort { base }
    }

    /// Programs 38400 baud, 8 data bits, no parity, one stop bit, FIFOs on.
    pub fn init(&mut self) {
        unsafe {
            outb(self.base + 1, 0x00); // mask UART interrupts
            outb(self.base + 3, 0x80); // DLAB set to program the divisor
            outb(self.base, 0x03); // divisor low byte: 38400 baud
            outb(self.base + 1, 0x00); // divisor high byte
            outb(self.base + 3, 0x03); // 8N1
            outb(self.base + 2, 0xC7); // FIFO enabled and cleared
            outb(self.base + 4, 0x0B); // DTR | RTS | OUT2
        }
    }

    fn transmit_ready(&self) -> bool {
        unsafe { inb(self.base + 5) & 0x20 != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !self.transmit_ready() {}
        unsafe { outb(self.base, byte) };
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

lazy_static! {
    /// Thread-safe wrapper around the first serial port (COM1).
    /// Initializes the port on first access.
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(SERIAL_PORT) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;
    SERIAL1
        .lock()
        .write_fmt(args)
        .expect("Printing to serial failed");
}

/// Prints formatted text to the serial port.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Prints formatted text to the serial port, followed by a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
