//! Multi-processor rendezvous at kernel handoff.
//!
//! Grounded on the `a4x` platform's `BxRunOnOtherCpus`: every present processor other than the
//! caller is kicked onto a trampoline that does a release-ordered increment of a shared
//! counter before jumping to the kernel; the bootstrap processor spins with an acquire load on
//! that counter until every application processor has checked in, then jumps itself. The
//! original does the increment by hand in inline assembly because its compiler lacked a
//! release-ordered atomic add; `core::sync::atomic` makes that unnecessary here.

use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::firmware::{CpuId, Firmware, KickCallback, TransitionFn};

struct KickData {
    entry_physical: u32,
    dtb_pointer: u32,
    num_cpus: u32,
    protocol_minor: u16,
    transition: TransitionFn,
    finished: AtomicUsize,
}

extern "C" fn trampoline(_index: u32, ctx: *mut c_void) {
    // SAFETY: `ctx` points at the `KickData` built on `run_on_other_cpus`'s stack, which
    // outlives every kicked processor: that function never returns until the transition has
    // happened on every CPU.
    let data = unsafe { &*ctx.cast::<KickData>() };
    data.finished.fetch_add(1, Ordering::Release);
    (data.transition)(data.entry_physical, data.dtb_pointer, data.num_cpus, data.protocol_minor);
}

#[cfg(feature = "alloc")]
fn present_other_cpus(firmware: &dyn Firmware, self_id: CpuId) -> (u32, Vec<CpuId>) {
    let present: Vec<CpuId> = firmware
        .cpus()
        .iter()
        .filter(|cpu| cpu.present)
        .map(|cpu| cpu.id)
        .collect();
    let num_cpus = present.len() as u32;
    let others = present.into_iter().filter(|&id| id != self_id).collect();
    (num_cpus, others)
}

/// Kicks every present processor other than `self_id` onto `transition` and waits for them all
/// to check in. Does not call `transition` for `self_id`; the caller does that once this
/// returns, so every processor (including the caller) ends up running with an identical view
/// of `num_cpus`.
#[cfg(feature = "alloc")]
pub fn run_on_other_cpus(
    firmware: &dyn Firmware,
    self_id: CpuId,
    entry_physical: u32,
    dtb_pointer: u32,
    protocol_minor: u16,
    transition: TransitionFn,
) -> u32 {
    let (num_cpus, others) = present_other_cpus(firmware, self_id);
    if others.is_empty() {
        return num_cpus;
    }

    let data = KickData {
        entry_physical,
        dtb_pointer,
        num_cpus,
        protocol_minor,
        transition,
        finished: AtomicUsize::new(0),
    };

    for cpu_id in &others {
        firmware.kick_processor(*cpu_id, trampoline, core::ptr::addr_of!(data) as *mut c_void);
    }

    while data.finished.load(Ordering::Acquire) < others.len() {
        core::hint::spin_loop();
    }

    num_cpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{CpuInfo, DiskHandle, DiskInfo, MachineType, RamBankInfo};

    struct FakeFirmware {
        cpus: Vec<CpuInfo>,
    }

    impl Firmware for FakeFirmware {
        fn put_character(&self, _byte: u8) {}
        fn read_disk(&self, _disk: DiskHandle, _buffer: &mut [u8], _s: u64, _c: u32) -> u32 {
            0
        }
        fn kick_processor(&self, _cpu: CpuId, _trampoline: KickCallback, _ctx: *mut c_void) {
            panic!("kick_processor should not be called when no other CPU is present");
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
            &self.cpus
        }
        fn disks(&self) -> &[DiskInfo] {
            &[]
        }
        fn boards(&self) -> &[crate::firmware::BoardInfo] {
            &[]
        }
    }

    extern "C" fn unreachable_transition(_: u32, _: u32, _: u32, _: u16) -> ! {
        panic!("transition should never be invoked on the caller by run_on_other_cpus")
    }

    #[test]
    fn single_cpu_system_returns_without_kicking_anyone() {
        let firmware = FakeFirmware {
            cpus: alloc::vec![CpuInfo { id: CpuId(0), present: true }],
        };

        let num_cpus =
            run_on_other_cpus(&firmware, CpuId(0), 0x1000, 0x2000, 0, unreachable_transition);
        assert_eq!(num_cpus, 1);
    }

    #[test]
    fn absent_processors_are_excluded_from_the_candidate_list() {
        let firmware = FakeFirmware {
            cpus: alloc::vec![
                CpuInfo { id: CpuId(0), present: true },
                CpuInfo { id: CpuId(1), present: false },
            ],
        };

        let (num_cpus, others) = present_other_cpus(&firmware, CpuId(0));
        assert_eq!(num_cpus, 1);
        assert!(others.is_empty());
    }

    #[test]
    fn present_processors_other_than_self_are_candidates() {
        let firmware = FakeFirmware {
            cpus: alloc::vec![
                CpuInfo { id: CpuId(0), present: true },
                CpuInfo { id: CpuId(1), present: true },
                CpuInfo { id: CpuId(2), present: true },
            ],
        };

        let (num_cpus, others) = present_other_cpus(&firmware, CpuId(1));
        assert_eq!(num_cpus, 3);
        assert_eq!(others, alloc::vec![CpuId(0), CpuId(2)]);
    }
}
