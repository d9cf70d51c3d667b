//! Console output for the kernel.
//!
//! Provides text output for kernel status and debug messages. In a real
//! deployment this writes to a UART; under test it captures into a buffer
//! so suites can assert on emitted text.

use core::fmt::{self, Write};
use spin::Mutex;

// QEMU virt machine UART base
#[cfg_attr(test, allow(dead_code))]
const UART_BASE: usize = 0x0900_0000;

#[cfg_attr(test, allow(dead_code))]
struct Uart {
    base: usize,
}

#[cfg_attr(test, allow(dead_code))]
impl Uart {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    unsafe fn putc(&self, c: u8) {
        let ptr = self.base as *mut u8;
        ptr.write_volatile(c);
    }
}

/// Console writer interface
pub struct Console {
    #[cfg(test)]
    buffer: heapless::String<1024>,
}

impl Console {
    pub const fn new() -> Self {
        Console {
            #[cfg(test)]
            buffer: heapless::String::new(),
        }
    }

    /// Write a byte to the console
    pub fn write_byte(&mut self, byte: u8) {
        #[cfg(test)]
        {
            if byte.is_ascii() {
                let _ = self.buffer.push(byte as char);
            }
        }

        #[cfg(not(test))]
        {
            unsafe {
                Uart::new(UART_BASE).putc(byte);
            }
        }
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                // CRLF for serial output
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }

    pub fn clear(&mut self) {
        #[cfg(test)]
        self.buffer.clear();
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str(s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Initialize the console subsystem
pub fn init() {
    CONSOLE.lock().clear();
}

/// Print formatted text to the console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Emit a single raw byte, for terminal echo paths.
pub fn put_byte(byte: u8) {
    CONSOLE.lock().write_byte(byte);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };
    ($($arg:tt)*) => {
        $crate::console::print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

// ============================================================================
// Subsystem Debug Logging
// ============================================================================

/// Debug log areas, one bit each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DbgArea {
    Vm = 0x01,
    Fs = 0x02,
    Tty = 0x04,
    Proc = 0x08,
    Sched = 0x10,
}

impl DbgArea {
    pub const fn name(self) -> &'static str {
        match self {
            DbgArea::Vm => "vm",
            DbgArea::Fs => "fs",
            DbgArea::Tty => "tty",
            DbgArea::Proc => "proc",
            DbgArea::Sched => "sched",
        }
    }
}

/// Areas whose `klog!` lines are emitted. Zero silences everything.
pub const DBG_MASK: u32 = 0;

/// Whether a debug area is enabled.
pub const fn dbg_enabled(area: DbgArea) -> bool {
    DBG_MASK & area as u32 != 0
}

/// Subsystem-tagged debug logging. Compiles to nothing for areas outside
/// `DBG_MASK`.
#[macro_export]
macro_rules! klog {
    ($area:expr, $($arg:tt)*) => {
        if $crate::console::dbg_enabled($area) {
            $crate::console::print(format_args!(
                "[{}] {}\n",
                $area.name(),
                format_args!($($arg)*)
            ));
        }
    };
}
