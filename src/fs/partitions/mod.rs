//! MBR scanning and root-partition selection.
//!
//! The raw 512-byte MBR layout is an external collaborator's concern (just four fixed-size
//! entries at a fixed offset); what belongs here is the scan-and-mount loop that walks those
//! entries looking for a partition that both mounts as the supported filesystem and carries a
//! configuration file at its root.

use crate::config::CONFIG_FILE_NAME;
use crate::errors::{CacheError, PartitionError};
use crate::firmware::{DiskHandle, Firmware, SECTOR_SIZE};
use crate::fs::ext2::Ext2Fs;
use crate::io::block_cache::BlockCache;

const MBR_SIGNATURE_OFFSET: usize = 510;
const MBR_SIGNATURE: u16 = 0xAA55;
const MBR_ENTRIES_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const MBR_ENTRY_COUNT: usize = 4;

/// A byte-addressed window on the boot disk. Every read against a partition is bounds-checked
/// against `size_bytes` before being translated to a disk-relative offset.
#[derive(Clone, Copy, Debug)]
pub struct Partition {
    disk: DiskHandle,
    start_byte_offset: u64,
    size_bytes: u64,
}

impl Partition {
    #[must_use]
    pub fn disk(&self) -> DiskHandle {
        self.disk
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Translates a partition-relative byte offset to a disk-relative one. Does not itself
    /// bounds-check the read length; reads should go through [`Partition::read`], which does.
    #[must_use]
    pub fn disk_offset(&self, partition_relative: u64) -> u64 {
        self.start_byte_offset + partition_relative
    }

    /// Like [`Partition::disk_offset`], but fails if `[partition_relative, partition_relative +
    /// len)` would run past the end of the partition.
    pub fn checked_disk_offset(&self, partition_relative: u64, len: u64) -> Option<u64> {
        let end = partition_relative.checked_add(len)?;
        if end > self.size_bytes {
            return None;
        }
        Some(self.disk_offset(partition_relative))
    }

    /// Reads `buffer.len()` bytes starting at partition-relative offset `position`, the way
    /// `BlReadFromPartition` wraps every disk read in the original: bounds-checked against the
    /// partition's size first. A read that would run past the end of the partition is not a
    /// recoverable error — it means the filesystem structures led somewhere they shouldn't
    /// have — so it crashes into firmware rather than returning one.
    pub fn read(
        &self,
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        buffer: &mut [u8],
        position: u64,
        bypass_cache: bool,
    ) -> Result<(), CacheError> {
        let Some(offset) = self.checked_disk_offset(position, buffer.len() as u64) else {
            crate::crash!(firmware, "tried to read beyond partition bounds");
        };
        cache.read(firmware, buffer, offset, bypass_cache)
    }

    #[cfg(test)]
    fn for_test(start_byte_offset: u64, size_bytes: u64) -> Self {
        Self {
            disk: DiskHandle(0),
            start_byte_offset,
            size_bytes,
        }
    }
}

struct MbrEntry {
    boot_indicator: u8,
    partition_type: u8,
    start_lba: u32,
    size_in_lba: u32,
}

impl MbrEntry {
    fn parse(raw: &[u8]) -> Self {
        Self {
            boot_indicator: raw[0],
            partition_type: raw[4],
            start_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            size_in_lba: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    fn is_present(&self) -> bool {
        self.partition_type != 0 && self.size_in_lba != 0
    }
}

/// Scans the MBR at the start of the disk backing `cache` and returns every non-empty
/// partition entry, in on-disk order.
pub fn scan(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
) -> Result<alloc::vec::Vec<Partition>, PartitionError> {
    let disk = cache.disk();
    let mut sector = [0u8; SECTOR_SIZE as usize];
    cache
        .read(firmware, &mut sector, 0, true)
        .map_err(|_| PartitionError::BadSignature)?;

    let signature = u16::from_le_bytes([
        sector[MBR_SIGNATURE_OFFSET],
        sector[MBR_SIGNATURE_OFFSET + 1],
    ]);
    if signature != MBR_SIGNATURE {
        return Err(PartitionError::BadSignature);
    }

    let mut partitions = alloc::vec::Vec::new();
    for i in 0..MBR_ENTRY_COUNT {
        let raw = &sector[MBR_ENTRIES_OFFSET + i * MBR_ENTRY_SIZE
            ..MBR_ENTRIES_OFFSET + (i + 1) * MBR_ENTRY_SIZE];
        let entry = MbrEntry::parse(raw);

        if entry.boot_indicator != 0x00 && entry.boot_indicator != 0x80 {
            return Err(PartitionError::BadBootIndicator);
        }

        if !entry.is_present() {
            continue;
        }

        partitions.push(Partition {
            disk,
            start_byte_offset: u64::from(entry.start_lba) * u64::from(SECTOR_SIZE),
            size_bytes: u64::from(entry.size_in_lba) * u64::from(SECTOR_SIZE),
        });
    }

    Ok(partitions)
}

/// Walks the MBR entries on `disk` in order, mounting each as the supported filesystem and
/// checking for a root-level configuration file. Returns the first partition/filesystem pair
/// that satisfies both; a mount or lookup failure on one entry is a soft skip to the next.
pub fn find_root_partition(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
) -> Result<(Partition, Ext2Fs), PartitionError> {
    let candidates = scan(firmware, cache)?;

    for partition in candidates {
        let Ok(fs) = Ext2Fs::mount(firmware, cache, &partition) else {
            continue;
        };

        if fs
            .find(firmware, cache, &partition, CONFIG_FILE_NAME)
            .is_ok()
        {
            return Ok((partition, fs));
        }
    }

    Err(PartitionError::NoRootPartition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_within_bounds_is_accepted() {
        let partition = Partition::for_test(0x1000, 0x2000);
        assert_eq!(partition.checked_disk_offset(0x100, 0x10), Some(0x1100));
    }

    #[test]
    fn offset_ending_exactly_at_partition_size_is_accepted() {
        let partition = Partition::for_test(0x1000, 0x2000);
        assert_eq!(
            partition.checked_disk_offset(0x1ff0, 0x10),
            Some(partition.disk_offset(0x1ff0))
        );
    }

    #[test]
    fn read_running_past_partition_size_is_rejected() {
        let partition = Partition::for_test(0x1000, 0x2000);
        assert_eq!(partition.checked_disk_offset(0x1ff0, 0x11), None);
    }

    #[test]
    fn overflowing_offset_plus_length_is_rejected() {
        let partition = Partition::for_test(0, u64::MAX);
        assert_eq!(partition.checked_disk_offset(u64::MAX, 1), None);
    }
}
