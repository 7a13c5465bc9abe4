//! Top-level boot sequence: firmware pointers in, kernel running on every CPU out.
//!
//! Grounded on the original firmware's `BlMain`/`BiProcessConfig`/`BiDoTransition` plus the
//! `a4x` platform's `BxMain`/`BxAddMemoryRanges`: a single straight-line sequence with no
//! recovery path. Every fallible step either succeeds or crashes into firmware via
//! [`crate::crash!`] — there is no caller above this to propagate an error to.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{self, Config};
use crate::devicetree::{self, DeviceTree};
use crate::firmware::{CpuId, Firmware, RamBankInfo, TransitionFn};
use crate::fs::ext2::Ext2Fs;
use crate::fs::partitions::{self, Partition};
use crate::io::block_cache::BlockCache;
use crate::kernel_load;
use crate::mem::heap::LockedFirstFitAllocator;
use crate::mem::paging::PageTableBuilder;
use crate::mem::{PhyAddr, PAGE_SIZE};
use crate::mp;

/// Encapsulates the setup-phase state that would otherwise live in file-scope statics: the
/// block cache bound to the boot disk, the mounted root filesystem, and the device tree being
/// built up as hardware is discovered. Constructed once by [`BootContext::new`] and consumed by
/// [`BootContext::boot`], which never returns.
pub struct BootContext<'fw> {
    firmware: &'fw dyn Firmware,
    cache: BlockCache,
    partition: Partition,
    fs: Ext2Fs,
    device_tree: DeviceTree,
}

extern "C" {
    static _image_end: u8;
}

/// Address of the first byte past the bootloader's own loaded image, provided by the linker
/// script. Nothing below this address may be handed to the heap.
fn bootloader_image_end() -> PhyAddr {
    // SAFETY: `_image_end` is a linker-provided symbol; only its address is taken, never its
    // value.
    PhyAddr::new(core::ptr::addr_of!(_image_end) as u32)
}

/// Computes the `(base, length)` heap ranges firmware's RAM banks yield once everything below
/// `floor` (the bootloader's own image) is carved out. Banks with no usable frames, or that lie
/// entirely below `floor`, contribute nothing.
fn heap_ranges(ram_banks: &[RamBankInfo], floor: u32) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();

    for bank in ram_banks {
        if bank.frame_count == 0 {
            continue;
        }

        let mut base = bank.base;
        let end = bank.base + bank.frame_count * PAGE_SIZE;
        if base < floor {
            base = floor;
        }
        if base >= end {
            continue;
        }

        ranges.push((base, end - base));
    }

    ranges
}

fn init_heap_above(firmware: &dyn Firmware, allocator: &LockedFirstFitAllocator, floor: u32) {
    for (base, len) in heap_ranges(firmware.ram_banks(), floor) {
        // SAFETY: firmware reports `[base, base + len)` as free, populated RAM, and this runs
        // once before any other allocation, so nothing else can already be using it.
        unsafe {
            allocator.add_range(base as *mut u8, len as usize);
        }
    }
}

impl<'fw> BootContext<'fw> {
    /// Brings up the heap, populates the device tree from the firmware device database, and
    /// locates and mounts the root filesystem. Crashes into firmware on any failure, since boot
    /// cannot meaningfully continue without a heap or a root filesystem.
    pub fn new(firmware: &'fw dyn Firmware, allocator: &LockedFirstFitAllocator) -> Self {
        init_heap_above(firmware, allocator, bootloader_image_end().as_u32());

        let mut device_tree = DeviceTree::new();
        devicetree::populate::populate(&mut device_tree, firmware);

        let disk = firmware
            .disks()
            .first()
            .unwrap_or_else(|| crate::crash!(firmware, "no boot disk reported by firmware"))
            .handle;
        let mut cache = BlockCache::new(disk);

        let (partition, fs) = partitions::find_root_partition(firmware, &mut cache)
            .unwrap_or_else(|_| crate::crash!(firmware, "failed to find root partition"));

        Self {
            firmware,
            cache,
            partition,
            fs,
            device_tree,
        }
    }

    /// Reads and parses the configuration file, folding `StdoutPath` (if present) into a
    /// `/chosen` device-tree node the way `BiProcessConfig` does.
    fn load_config(&mut self) -> Config {
        let handle = self
            .fs
            .find(self.firmware, &mut self.cache, &self.partition, config::CONFIG_FILE_NAME)
            .unwrap_or_else(|_| crate::crash!(self.firmware, "failed to open configuration file"));

        let mut buffer = vec![0u8; handle.size() as usize];
        self.fs
            .read(self.firmware, &mut self.cache, &self.partition, &handle, &mut buffer, 0)
            .unwrap_or_else(|_| crate::crash!(self.firmware, "failed to read configuration file"));

        let text = core::str::from_utf8(&buffer)
            .unwrap_or_else(|_| crate::crash!(self.firmware, "configuration file is not valid UTF-8"));

        let config = config::load(self.firmware, text)
            .unwrap_or_else(|e| crate::crash!(self.firmware, "bad configuration: {e:?}"));

        if let Some(stdout_path) = &config.stdout_path {
            let chosen = self.device_tree.create_node(None, "chosen");
            self.device_tree
                .add_property_strings(Some(chosen), "stdout-path", &[stdout_path.as_str()]);
        }

        config
    }

    /// Loads the kernel named by the configuration file, builds the device tree blob, kicks
    /// every other present CPU onto `transition`, and finally jumps there itself. Never
    /// returns.
    pub fn boot(mut self, transition: TransitionFn) -> ! {
        let config = self.load_config();
        let kernel_path: String =
            config.kernel_path.expect("config::load only returns Ok when KernelPath was set");

        crate::info!(self.firmware, "Loading kernel from {kernel_path}");

        let mut page_table = PageTableBuilder::new();
        let loaded = kernel_load::load(
            self.firmware,
            &mut self.cache,
            &self.partition,
            &self.fs,
            &mut page_table,
            &kernel_path,
        )
        .unwrap_or_else(|e| crate::crash!(self.firmware, "failed to load kernel: {e:?}"));

        let blob = devicetree::fdt::build_blob(&self.device_tree, 0)
            .unwrap_or_else(|_| crate::crash!(self.firmware, "device tree blob assembly failed"));
        let dtb_pointer = blob.as_ptr() as u32;
        // The blob must outlive this function, which never returns, so it is deliberately
        // never freed.
        core::mem::forget(blob);

        crate::info!(self.firmware, "Starting kernel");

        let num_cpus = mp::run_on_other_cpus(
            self.firmware,
            CpuId(0),
            loaded.entry_physical.as_u32(),
            dtb_pointer,
            0,
            transition,
        );

        transition(loaded.entry_physical.as_u32(), dtb_pointer, num_cpus, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_below_the_image_floor_are_clipped() {
        let banks = [RamBankInfo { base: 0, frame_count: 4 }];
        let ranges = heap_ranges(&banks, 2 * PAGE_SIZE);
        assert_eq!(ranges, alloc::vec![(2 * PAGE_SIZE, 2 * PAGE_SIZE)]);
    }

    #[test]
    fn a_bank_entirely_below_the_floor_contributes_nothing() {
        let banks = [RamBankInfo { base: 0, frame_count: 1 }];
        let ranges = heap_ranges(&banks, 4 * PAGE_SIZE);
        assert!(ranges.is_empty());
    }

    #[test]
    fn empty_banks_are_skipped() {
        let banks = [
            RamBankInfo { base: 0, frame_count: 0 },
            RamBankInfo { base: 0x2000_0000, frame_count: 4 },
        ];
        let ranges = heap_ranges(&banks, 0);
        assert_eq!(ranges, alloc::vec![(0x2000_0000, 4 * PAGE_SIZE)]);
    }
}
