//! Configuration file option table.
//!
//! The line grammar itself (splitting `Name: Value # comment` and trimming whitespace) is an
//! external collaborator's concern; this module owns the recognised option table and what
//! happens when a line is well-formed but its name isn't one we know.

use alloc::string::String;
use core::fmt::Write;

use crate::errors::ConfigError;
use crate::firmware::Firmware;

pub const CONFIG_FILE_NAME: &str = "/xrlinux.cfg";

const WHITESPACE: [char; 3] = [' ', '\t', '\r'];

/// The subset of the configuration file this bootloader understands.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub kernel_path: Option<String>,
    pub stdout_path: Option<String>,
}

/// Parses `buffer` as the configuration file's contents and fills a [`Config`].
///
/// Unrecognised option names are warned about via `firmware` and otherwise ignored. Fails if
/// `KernelPath` was never set by the end of the buffer.
pub fn load(firmware: &dyn Firmware, buffer: &str) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    for raw_line in buffer.lines() {
        let line = raw_line.trim_start_matches(WHITESPACE);
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        };
        let line = line.trim_matches(WHITESPACE);

        if line.is_empty() {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim_matches(WHITESPACE);
        let value = value.trim_matches(WHITESPACE);

        match name {
            "KernelPath" => config.kernel_path = Some(String::from(value)),
            "StdoutPath" => config.stdout_path = Some(String::from(value)),
            other => {
                let _ = writeln!(
                    crate::diag::Console::new(firmware),
                    "warning: unrecognised configuration option {other:?}"
                );
            }
        }
    }

    if config.kernel_path.is_none() {
        return Err(ConfigError::MissingRequiredOption("KernelPath"));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{CpuInfo, DiskHandle, DiskInfo, MachineType, RamBankInfo};

    struct NullFirmware;

    impl Firmware for NullFirmware {
        fn put_character(&self, _byte: u8) {}
        fn read_disk(&self, _disk: DiskHandle, _buffer: &mut [u8], _s: u64, _c: u32) -> u32 {
            0
        }
        fn kick_processor(
            &self,
            _cpu: crate::firmware::CpuId,
            _trampoline: crate::firmware::KickCallback,
            _ctx: *mut core::ffi::c_void,
        ) {
        }
        fn return_to_firmware(&self) -> ! {
            loop {}
        }
        fn machine_type(&self) -> MachineType {
            MachineType::Station
        }
        fn ram_banks(&self) -> &[RamBankInfo] {
            &[]
        }
        fn cpus(&self) -> &[CpuInfo] {
            &[]
        }
        fn disks(&self) -> &[DiskInfo] {
            &[]
        }
        fn boards(&self) -> &[crate::firmware::BoardInfo] {
            &[]
        }
    }

    #[test]
    fn parses_kernel_path_and_optional_stdout_path() {
        let cfg = load(&NullFirmware, "KernelPath: /boot/kernel\nStdoutPath: /dev/ttyS0\n").unwrap();
        assert_eq!(cfg.kernel_path.as_deref(), Some("/boot/kernel"));
        assert_eq!(cfg.stdout_path.as_deref(), Some("/dev/ttyS0"));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let cfg = load(&NullFirmware, "# a comment\n\n  \nKernelPath: /boot/kernel # trailing\n").unwrap();
        assert_eq!(cfg.kernel_path.as_deref(), Some("/boot/kernel"));
    }

    #[test]
    fn unknown_option_is_ignored_after_warning() {
        let cfg = load(&NullFirmware, "Bogus: 1\nKernelPath: /boot/kernel\n").unwrap();
        assert_eq!(cfg.kernel_path.as_deref(), Some("/boot/kernel"));
    }

    #[test]
    fn missing_kernel_path_is_fatal() {
        let err = load(&NullFirmware, "StdoutPath: /dev/ttyS0\n").unwrap_err();
        assert_eq!(err, ConfigError::MissingRequiredOption("KernelPath"));
    }
}
