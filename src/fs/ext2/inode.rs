//! Inode representation and logical-to-physical block resolution.
//!
//! The resolution algorithm walks 12 direct pointers, then three independent indirection
//! levels (single, double, triple), matching the original firmware's inode block-base
//! lookup rather than an ext4-style extent tree.

use bytemuck::{Pod, Zeroable};

use crate::errors::FsError;
use crate::firmware::Firmware;
use crate::fs::partitions::Partition;
use crate::io::block_cache::BlockCache;

const S_IFMT: u16 = 0xF000;
const S_IFREG: u16 = 0x8000;
const S_IFDIR: u16 = 0x4000;
const S_IFLNK: u16 = 0xA000;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawInode {
    pub mode: u16,
    pub uid: u16,
    pub size_lo: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub direct_blocks: [u32; 12],
    pub indirect_blocks: [u32; 3],
    pub generation: u32,
    pub file_acl: u32,
    pub size_high: u32,
    pub faddr: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl RawInode {
    #[must_use]
    pub fn kind(&self) -> InodeKind {
        match self.mode & S_IFMT {
            S_IFREG => InodeKind::Regular,
            S_IFDIR => InodeKind::Directory,
            S_IFLNK => InodeKind::Symlink,
            _ => InodeKind::Other,
        }
    }

    /// The inode's file size, extended with `size_high` only when `64BIT` is enabled and
    /// the inode is not a directory (directories reuse that field for an ACL block).
    #[must_use]
    pub fn file_size(&self, has_64bit: bool) -> u64 {
        if has_64bit && self.kind() != InodeKind::Directory {
            u64::from(self.size_lo) | (u64::from(self.size_high) << 32)
        } else {
            u64::from(self.size_lo)
        }
    }
}

/// Reads the block-group descriptor and inode table entry for inode number `inum` (1-based).
pub fn read_inode(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
    partition: &Partition,
    sb: &super::superblock::RawSuperblock,
    inum: u32,
) -> Result<RawInode, FsError> {
    let index0 = inum - 1;
    let group = index0 / sb.inodes_per_group;
    let index_in_group = index0 % sb.inodes_per_group;

    let gdt_offset = sb.block_size() as u64 * (sb.first_data_block as u64 + 1)
        + u64::from(group) * core::mem::size_of::<super::superblock::BlockGroupDescriptor>() as u64;
    let mut gdt_bytes = [0u8; core::mem::size_of::<super::superblock::BlockGroupDescriptor>()];
    partition.read(firmware, cache, &mut gdt_bytes, gdt_offset, false)?;
    let gdt: super::superblock::BlockGroupDescriptor = *bytemuck::from_bytes(&gdt_bytes);

    let inode_size = u64::from(sb.effective_inode_size());
    let inode_offset = u64::from(gdt.inode_table) * u64::from(sb.block_size())
        + u64::from(index_in_group) * inode_size;

    let mut inode_bytes = [0u8; core::mem::size_of::<RawInode>()];
    partition.read(firmware, cache, &mut inode_bytes, inode_offset, false)?;
    Ok(*bytemuck::from_bytes(&inode_bytes))
}

/// Resolves logical block `logical_block` of `inode` to a physical (volume-relative) block
/// number, or `Ok(0)` for a hole.
pub fn resolve_block(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
    partition: &Partition,
    block_size: u32,
    inode: &RawInode,
    logical_block: u32,
) -> Result<u32, FsError> {
    if logical_block < 12 {
        return Ok(inode.direct_blocks[logical_block as usize]);
    }

    let ptrs_per_block = u64::from(block_size / 4);
    let mut b = u64::from(logical_block - 12);

    for level in 0..3u32 {
        let count = ptrs_per_block.pow(level + 1);
        if b < count {
            let mut ptr = inode.indirect_blocks[level as usize];
            let mut step = level as i64;
            while step >= 0 {
                if ptr == 0 {
                    return Ok(0);
                }
                let divisor = ptrs_per_block.pow(step as u32);
                let index = (b / divisor) % ptrs_per_block;
                ptr = read_pointer(firmware, cache, partition, block_size, ptr, index as u32)?;
                step -= 1;
            }
            return Ok(ptr);
        }
        b -= count;
    }

    Ok(0)
}

fn read_pointer(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
    partition: &Partition,
    block_size: u32,
    block: u32,
    index: u32,
) -> Result<u32, FsError> {
    let mut bytes = [0u8; 4];
    let offset = u64::from(block) * u64::from(block_size) + u64::from(index) * 4;
    partition.read(firmware, cache, &mut bytes, offset, false)?;
    Ok(u32::from_le_bytes(bytes))
}
