//! The ext2-compatible superblock.
//!
//! Field layout and validation rules are grounded on the original firmware's filesystem
//! reader: the superblock sits 1024 bytes into the partition, is validated by its magic
//! number alone (no checksum), and pre-v1 volumes fall back to a fixed 128-byte inode size
//! with no feature flags at all.

use bytemuck::{Pod, Zeroable};

use crate::errors::MountError;

pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const MAGIC: u16 = 0xEF53;

/// `FILETYPE`: directory entries carry an authoritative `file_type` byte.
pub const INCOMPAT_FILETYPE: u32 = 1 << 1;

/// The set of required-feature bits this reader understands. Any required bit outside this
/// mask makes the volume unmountable.
pub const SUPPORTED_REQUIRED_FEATURES: u32 = INCOMPAT_FILETYPE;

/// `64BIT`: regular-file inodes store the upper 32 bits of their size in `size_high`.
pub const RO_COMPAT_64BIT: u32 = 1 << 0;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawSuperblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
}

impl RawSuperblock {
    #[must_use]
    pub fn block_size(&self) -> u32 {
        1024 << self.log_block_size
    }

    #[must_use]
    pub fn is_pre_v1(&self) -> bool {
        self.rev_level < 1
    }

    #[must_use]
    pub fn effective_inode_size(&self) -> u16 {
        if self.is_pre_v1() {
            128
        } else {
            self.inode_size
        }
    }

    #[must_use]
    pub fn required_features(&self) -> u32 {
        if self.is_pre_v1() {
            0
        } else {
            self.feature_incompat
        }
    }

    #[must_use]
    pub fn has_filetype(&self) -> bool {
        self.required_features() & INCOMPAT_FILETYPE != 0
    }

    #[must_use]
    pub fn has_64bit_size(&self) -> bool {
        !self.is_pre_v1() && self.feature_ro_compat & RO_COMPAT_64BIT != 0
    }

    pub fn validate(&self) -> Result<(), MountError> {
        if self.magic != MAGIC {
            return Err(MountError::BadSuperblock);
        }

        let unsupported = self.required_features() & !SUPPORTED_REQUIRED_FEATURES;
        if unsupported != 0 {
            return Err(MountError::UnsupportedFeature(unsupported));
        }

        if !self.effective_inode_size().is_power_of_two() {
            return Err(MountError::InvalidInodeSize);
        }

        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BlockGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pub pad: u16,
    pub reserved: [u8; 12],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> RawSuperblock {
        RawSuperblock::zeroed()
    }

    #[test]
    fn rejects_bad_magic() {
        let sb = blank();
        assert_eq!(sb.validate(), Err(MountError::BadSuperblock));
    }

    #[test]
    fn pre_v1_forces_128_byte_inodes_and_no_features() {
        let mut sb = blank();
        sb.magic = MAGIC;
        sb.rev_level = 0;
        sb.inode_size = 256;
        sb.feature_incompat = 0xFFFF_FFFF;
        assert_eq!(sb.effective_inode_size(), 128);
        assert!(sb.validate().is_ok());
    }

    #[test]
    fn unsupported_required_feature_fails_mount() {
        let mut sb = blank();
        sb.magic = MAGIC;
        sb.rev_level = 1;
        sb.inode_size = 128;
        sb.feature_incompat = 0x4;
        assert_eq!(
            sb.validate(),
            Err(MountError::UnsupportedFeature(0x4))
        );
    }

    #[test]
    fn block_size_follows_log_shift() {
        let mut sb = blank();
        sb.log_block_size = 2;
        assert_eq!(sb.block_size(), 4096);
    }
}
