//! Directory entry iteration.
//!
//! Entries are walked using their physical record size (`rec_len`), not their minimal size,
//! so a reader has to follow the stored length to reach the next entry rather than computing
//! one from the name length alone — matching the original firmware's directory scan.

use alloc::vec;
use bytemuck::{Pod, Zeroable};

use crate::errors::FsError;
use crate::firmware::Firmware;
use crate::fs::ext2::inode::{resolve_block, RawInode};
use crate::fs::ext2::superblock::RawSuperblock;
use crate::fs::partitions::Partition;
use crate::io::block_cache::BlockCache;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawDirEntryHeader {
    inode: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
}

/// Looks up `name` among `dir`'s entries, returning the matching inode number.
///
/// `name` is compared byte-for-byte against each entry's `name_len` bytes; an entry whose
/// `inode` field is zero is a deleted slot and never matches.
pub fn find_entry(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
    partition: &Partition,
    sb: &RawSuperblock,
    dir: &RawInode,
    name: &str,
) -> Result<u32, FsError> {
    let block_size = sb.block_size();
    let size = dir.file_size(sb.has_64bit_size());
    let name_bytes = name.as_bytes();

    let mut block_buf = alloc::vec![0u8; block_size as usize];
    let block_count = size.div_ceil(u64::from(block_size));

    for logical_block in 0..block_count as u32 {
        let phys_block = resolve_block(firmware, cache, partition, block_size, dir, logical_block)?;
        if phys_block == 0 {
            continue;
        }

        let offset = u64::from(phys_block) * u64::from(block_size);
        partition.read(firmware, cache, &mut block_buf, offset, false)?;

        let mut pos = 0usize;
        while pos + 8 <= block_buf.len() {
            let header: RawDirEntryHeader =
                *bytemuck::from_bytes(&block_buf[pos..pos + 8]);
            if header.rec_len < 8 {
                break;
            }

            if header.inode != 0 {
                let name_start = pos + 8;
                let name_end = name_start + header.name_len as usize;
                if name_end <= block_buf.len() && &block_buf[name_start..name_end] == name_bytes {
                    return Ok(header.inode);
                }
            }

            pos += header.rec_len as usize;
        }
    }

    Err(FsError::NotFound)
}
