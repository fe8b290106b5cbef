//! Kernel console and log backend
//!
//! Text output for kernel diagnostics. The `log` facade is routed here by
//! [`ConsoleLogger`], so subsystems use `log::trace!` .. `log::error!` and
//! the console decides where bytes go: a UART on bare metal, stderr with
//! the `std` feature, an in-memory buffer under test. A hosted build
//! without `std` discards output.

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

// QEMU virt machine UART base
#[cfg(all(target_os = "none", not(any(test, feature = "std"))))]
const UART_BASE: usize = 0x0900_0000;

#[cfg(all(target_os = "none", not(any(test, feature = "std"))))]
struct Uart {
    base: usize,
}

#[cfg(all(target_os = "none", not(any(test, feature = "std"))))]
impl Uart {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    unsafe fn putc(&self, c: u8) {
        let ptr = self.base as *mut u8;
        ptr.write_volatile(c);
    }
}

/// Console writer
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

        #[cfg(all(not(test), feature = "std"))]
        {
            use std::io::Write as _;
            let _ = std::io::stderr().write_all(&[byte]);
        }

        #[cfg(all(target_os = "none", not(any(test, feature = "std"))))]
        unsafe {
            Uart::new(UART_BASE).putc(byte);
        }

        // Hosted build without `std`: there is nowhere to write.
        #[cfg(not(any(test, feature = "std", target_os = "none")))]
        let _ = byte;
    }

    /// Write a string, expanding `\n` to `\r\n` for serial lines
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }

    pub fn clear(&mut self) {
        #[cfg(test)]
        self.buffer.clear();
    }

    #[cfg(test)]
    pub fn contents(&self) -> &str {
        self.buffer.as_str()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Initialize the console subsystem
pub fn init() {
    CONSOLE.lock().clear();
}

/// Print formatted text to console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Print macro for kernel use
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

/// Print with newline macro
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
// Log backend
// ============================================================================

/// `log::Log` implementation writing through the kernel console
pub struct ConsoleLogger;

impl ConsoleLogger {
    fn write_record<W: Write>(out: &mut W, record: &Record) -> fmt::Result {
        let level = match record.level() {
            log::Level::Error => "ERROR",
            log::Level::Warn => "WARN ",
            log::Level::Info => "INFO ",
            log::Level::Debug => "DEBUG",
            log::Level::Trace => "TRACE",
        };
        writeln!(out, "[{}] {}: {}", level, record.target(), record.args())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = Self::write_record(&mut *CONSOLE.lock(), record);
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Route the `log` facade to the console
///
/// Fails if another logger was installed first.
pub fn init_logging(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
