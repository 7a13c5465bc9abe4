//! Fixed-size LRU cache sitting between the firmware's raw sector reads and everything else
//! that needs to read the disk (the partition reader, the filesystem reader).
//!
//! Grounded on the direct-mapped buffer cache in the original firmware's partition reader:
//! a fixed pool of block-sized slots, filled on demand from firmware, with a most-recently-used
//! slot list so a hot block doesn't cost another firmware read. Unlike the original's
//! direct-mapped-with-sets scheme, eviction here is plain LRU over the whole pool — simpler to
//! reason about and the pool is small enough (16 slots) that a linear scan is free.

use crate::errors::CacheError;
use crate::firmware::{DiskHandle, Firmware, SECTOR_SIZE};

/// Cache unit size. Must be a power of two no smaller than [`SECTOR_SIZE`].
pub const BLOCK_SIZE: u32 = 4096;

const SECTORS_PER_BLOCK: u32 = BLOCK_SIZE / SECTOR_SIZE;
const SLOTS: usize = 16;

#[derive(Clone, Copy)]
struct Slot {
    block: Option<u64>,
    data: [u8; BLOCK_SIZE as usize],
}

impl Slot {
    const fn empty() -> Self {
        Self {
            block: None,
            data: [0; BLOCK_SIZE as usize],
        }
    }
}

/// A block cache over a single disk.
pub struct BlockCache {
    disk: DiskHandle,
    slots: [Slot; SLOTS],
    /// Slot indices ordered most- to least-recently-used.
    order: [u8; SLOTS],
}

impl BlockCache {
    #[must_use]
    pub fn disk(&self) -> DiskHandle {
        self.disk
    }

    #[must_use]
    pub const fn new(disk: DiskHandle) -> Self {
        let mut order = [0u8; SLOTS];
        let mut i = 0;
        while i < SLOTS {
            order[i] = i as u8;
            i += 1;
        }
        Self {
            disk,
            slots: [Slot::empty(); SLOTS],
            order,
        }
    }

    /// Copies `buffer.len()` bytes starting at `byte_offset` from the disk into `buffer`.
    ///
    /// When `bypass_cache` is set, `byte_offset` and `buffer.len()` must both be sector
    /// aligned; the read goes straight to firmware and the cache is left untouched.
    pub fn read(
        &mut self,
        firmware: &dyn Firmware,
        buffer: &mut [u8],
        byte_offset: u64,
        bypass_cache: bool,
    ) -> Result<(), CacheError> {
        if bypass_cache {
            return self.read_bypassing_cache(firmware, buffer, byte_offset);
        }

        let mut done = 0usize;
        while done < buffer.len() {
            let pos = byte_offset + done as u64;
            let block_index = pos / u64::from(BLOCK_SIZE);
            let block_offset = (pos % u64::from(BLOCK_SIZE)) as usize;
            let take = (BLOCK_SIZE as usize - block_offset).min(buffer.len() - done);

            let data = self.slot_for(firmware, block_index)?;
            buffer[done..done + take].copy_from_slice(&data[block_offset..block_offset + take]);
            done += take;
        }

        Ok(())
    }

    fn read_bypassing_cache(
        &self,
        firmware: &dyn Firmware,
        buffer: &mut [u8],
        byte_offset: u64,
    ) -> Result<(), CacheError> {
        if byte_offset % u64::from(SECTOR_SIZE) != 0 || buffer.len() as u32 % SECTOR_SIZE != 0 {
            return Err(CacheError::Unaligned);
        }

        let start_sector = byte_offset / u64::from(SECTOR_SIZE);
        let sector_count = buffer.len() as u32 / SECTOR_SIZE;
        let read = firmware.read_disk(self.disk, buffer, start_sector, sector_count);
        if read != sector_count {
            return Err(CacheError::FirmwareReadFailed);
        }
        Ok(())
    }

    /// Returns the cached block's data, fetching it from firmware on a miss and marking it
    /// most recently used either way.
    fn slot_for(
        &mut self,
        firmware: &dyn Firmware,
        block_index: u64,
    ) -> Result<&[u8; BLOCK_SIZE as usize], CacheError> {
        if let Some(pos) = self
            .order
            .iter()
            .position(|&slot| self.slots[slot as usize].block == Some(block_index))
        {
            let slot = self.order[pos];
            self.touch(pos);
            return Ok(&self.slots[slot as usize].data);
        }

        let evict_pos = SLOTS - 1;
        let slot = self.order[evict_pos];

        let start_sector = block_index * u64::from(SECTORS_PER_BLOCK);
        let data = &mut self.slots[slot as usize].data;
        let read = firmware.read_disk(self.disk, data, start_sector, SECTORS_PER_BLOCK);
        if read != SECTORS_PER_BLOCK {
            self.slots[slot as usize].block = None;
            return Err(CacheError::FirmwareReadFailed);
        }
        self.slots[slot as usize].block = Some(block_index);

        self.touch(evict_pos);
        Ok(&self.slots[slot as usize].data)
    }

    /// Moves the slot currently at `pos` in `order` to the front (most-recently-used end).
    fn touch(&mut self, pos: usize) {
        let slot = self.order[pos];
        self.order.copy_within(0..pos, 1);
        self.order[0] = slot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    struct FakeFirmware {
        disk: Vec<u8>,
        reads: RefCell<u32>,
    }

    impl FakeFirmware {
        fn new(size: usize) -> Self {
            let disk = (0..size).map(|i| (i % 251) as u8).collect();
            Self {
                disk,
                reads: RefCell::new(0),
            }
        }
    }

    impl Firmware for FakeFirmware {
        fn put_character(&self, _byte: u8) {}

        fn read_disk(
            &self,
            _disk: DiskHandle,
            buffer: &mut [u8],
            start_sector: u64,
            sector_count: u32,
        ) -> u32 {
            *self.reads.borrow_mut() += 1;
            let start = start_sector as usize * SECTOR_SIZE as usize;
            let len = sector_count as usize * SECTOR_SIZE as usize;
            if start + len > self.disk.len() {
                return 0;
            }
            buffer[..len].copy_from_slice(&self.disk[start..start + len]);
            sector_count
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

        fn machine_type(&self) -> crate::firmware::MachineType {
            crate::firmware::MachineType::Station
        }

        fn ram_banks(&self) -> &[crate::firmware::RamBankInfo] {
            &[]
        }

        fn cpus(&self) -> &[crate::firmware::CpuInfo] {
            &[]
        }

        fn disks(&self) -> &[crate::firmware::DiskInfo] {
            &[]
        }
        fn boards(&self) -> &[crate::firmware::BoardInfo] {
            &[]
        }
    }

    #[test]
    fn read_matches_underlying_disk() {
        let fw = FakeFirmware::new(BLOCK_SIZE as usize * 4);
        let mut cache = BlockCache::new(DiskHandle(0));
        let mut buffer = std::vec![0u8; 200];

        cache.read(&fw, &mut buffer, 300, false).unwrap();
        assert_eq!(buffer.as_slice(), &fw.disk[300..500]);
    }

    #[test]
    fn repeated_reads_do_not_refetch_a_cached_block() {
        let fw = FakeFirmware::new(BLOCK_SIZE as usize * 2);
        let mut cache = BlockCache::new(DiskHandle(0));
        let mut buffer = std::vec![0u8; 16];

        cache.read(&fw, &mut buffer, 0, false).unwrap();
        let reads_after_first = *fw.reads.borrow();
        cache.read(&fw, &mut buffer, 16, false).unwrap();
        assert_eq!(*fw.reads.borrow(), reads_after_first);
    }

    #[test]
    fn bypass_cache_requires_sector_alignment() {
        let fw = FakeFirmware::new(BLOCK_SIZE as usize);
        let mut cache = BlockCache::new(DiskHandle(0));
        let mut buffer = std::vec![0u8; 10];

        assert_eq!(
            cache.read(&fw, &mut buffer, 1, true),
            Err(CacheError::Unaligned)
        );
    }

    #[test]
    fn read_spanning_multiple_blocks_reassembles_correctly() {
        let fw = FakeFirmware::new(BLOCK_SIZE as usize * 3);
        let mut cache = BlockCache::new(DiskHandle(0));
        let offset = BLOCK_SIZE as u64 - 10;
        let mut buffer = std::vec![0u8; 20];

        cache.read(&fw, &mut buffer, offset, false).unwrap();
        assert_eq!(
            buffer.as_slice(),
            &fw.disk[offset as usize..offset as usize + 20]
        );
    }
}
