//! Diagnostic console output.
//!
//! Wraps [`Firmware::put_character`] in a [`core::fmt::Write`] implementation so the rest of
//! the crate can report warnings and fatal errors with `write!`/`writeln!`, mirroring the
//! original firmware's `Writer` over its own character-output primitive. The formatting
//! itself is `core::fmt`'s; only the byte sink is ours.

use core::fmt::Write;

use crate::firmware::Firmware;

pub struct Console<'a> {
    firmware: &'a dyn Firmware,
}

impl<'a> Console<'a> {
    #[must_use]
    pub fn new(firmware: &'a dyn Firmware) -> Self {
        Self { firmware }
    }
}

impl Write for Console<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.firmware.put_character(byte);
        }
        Ok(())
    }
}

/// Prints a plain progress line, mirroring the original firmware's `BlPrint`.
#[macro_export]
macro_rules! info {
    ($firmware:expr, $($arg:tt)*) => {{
        let _ = writeln!($crate::diag::Console::new($firmware), "{}", format_args!($($arg)*));
    }};
}

/// Prints a `warning: ...` line and continues. Used for recoverable conditions, e.g. an
/// unrecognised configuration option.
#[macro_export]
macro_rules! warn {
    ($firmware:expr, $($arg:tt)*) => {{
        let _ = writeln!($crate::diag::Console::new($firmware), "warning: {}", format_args!($($arg)*));
    }};
}

/// Prints a `fatal: ...` line and returns control to firmware. Never returns.
#[macro_export]
macro_rules! crash {
    ($firmware:expr, $($arg:tt)*) => {{
        let _ = writeln!($crate::diag::Console::new($firmware), "fatal: {}", format_args!($($arg)*));
        $firmware.return_to_firmware()
    }};
}
