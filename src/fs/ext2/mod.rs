//! Read-only ext2-compatible filesystem reader.
//!
//! Grounded on the original firmware's filesystem reader (`BlFsInitialize`/`BiFindInode`/
//! `BlFsFind`/`BlFsFileRead`), reshaped into the Rust idiom of `fzboot`'s `src/fs/ext4`
//! (a `Fs`-shaped struct owning the superblock, free functions per concern, `#[repr(C)]` +
//! `bytemuck` on-disk structs) with an ext4 extent tree rather than ext2's direct/indirect
//! blocks.

pub mod dir;
pub mod inode;
pub mod superblock;

use alloc::vec;

use crate::errors::{FsError, MountError};
use crate::firmware::Firmware;
use crate::fs::ext2::inode::{InodeKind, RawInode};
use crate::fs::ext2::superblock::RawSuperblock;
use crate::fs::partitions::Partition;
use crate::io::block_cache::BlockCache;

pub const ROOT_INODE: u32 = 2;
const MAX_SYMLINKS: u32 = 5;

/// A mounted ext2-compatible volume. Holds only the superblock; every read goes back through
/// the caller-supplied block cache and firmware handle, matching the rest of the crate's
/// style of passing collaborators explicitly instead of stashing them in the filesystem.
pub struct Ext2Fs {
    superblock: RawSuperblock,
}

/// A resolved regular file, ready for [`Ext2Fs::read`].
#[derive(Clone, Copy, Debug)]
pub struct FileHandle {
    inode: u32,
    size: u64,
}

impl FileHandle {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Ext2Fs {
    /// Reads and validates the superblock at partition offset 1024.
    pub fn mount(
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        partition: &Partition,
    ) -> Result<Self, MountError> {
        let mut bytes = [0u8; core::mem::size_of::<RawSuperblock>()];
        partition
            .read(firmware, cache, &mut bytes, superblock::SUPERBLOCK_OFFSET, false)
            .map_err(|_| MountError::BadSuperblock)?;

        let superblock: RawSuperblock = *bytemuck::from_bytes(&bytes);
        superblock.validate()?;

        Ok(Self { superblock })
    }

    /// Resolves `path` (absolute, or relative to the root if it doesn't start with `/`) to a
    /// regular file. Fails if any component is missing, a non-terminal component is not a
    /// directory, or the final component isn't a regular file.
    pub fn find(
        &self,
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        partition: &Partition,
        path: &str,
    ) -> Result<FileHandle, FsError> {
        let inum = self.resolve_path(firmware, cache, partition, ROOT_INODE, path, 0)?;
        let inode = inode::read_inode(firmware, cache, partition, &self.superblock, inum)?;

        if inode.kind() != InodeKind::Regular {
            return Err(FsError::NotAFile);
        }

        Ok(FileHandle {
            inode: inum,
            size: inode.file_size(self.superblock.has_64bit_size()),
        })
    }

    fn resolve_path(
        &self,
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        partition: &Partition,
        start_inode: u32,
        path: &str,
        symlinks_followed: u32,
    ) -> Result<u32, FsError> {
        let mut current = if path.starts_with('/') {
            ROOT_INODE
        } else {
            start_inode
        };

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let dir = inode::read_inode(firmware, cache, partition, &self.superblock, current)?;
            if dir.kind() != InodeKind::Directory {
                return Err(FsError::NotADirectory);
            }

            let matched = dir::find_entry(firmware, cache, partition, &self.superblock, &dir, component)?;
            let matched_inode =
                inode::read_inode(firmware, cache, partition, &self.superblock, matched)?;

            current = if matched_inode.kind() == InodeKind::Symlink {
                if symlinks_followed >= MAX_SYMLINKS {
                    return Err(FsError::TooManySymlinks);
                }
                let target =
                    self.read_symlink_target(firmware, cache, partition, &matched_inode)?;
                self.resolve_path(
                    firmware,
                    cache,
                    partition,
                    current,
                    core::str::from_utf8(&target).map_err(|_| FsError::NotFound)?,
                    symlinks_followed + 1,
                )?
            } else {
                matched
            };
        }

        Ok(current)
    }

    fn read_symlink_target(
        &self,
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        partition: &Partition,
        link: &RawInode,
    ) -> Result<alloc::vec::Vec<u8>, FsError> {
        let size = link.file_size(self.superblock.has_64bit_size()) as usize;
        let mut buf = vec![0u8; size];
        self.read_inode_bytes(firmware, cache, partition, link, &mut buf, 0)?;
        Ok(buf)
    }

    /// Copies `buffer.len()` bytes of `handle`'s content starting at `position`. A silent
    /// no-op (buffer left untouched, `Ok(())` returned) when the request falls outside the
    /// file, per the resolved bounds-check design decision.
    pub fn read(
        &self,
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        partition: &Partition,
        handle: &FileHandle,
        buffer: &mut [u8],
        position: u64,
    ) -> Result<(), FsError> {
        let count = buffer.len() as u64;
        if position > handle.size || count > handle.size - position {
            return Ok(());
        }

        let inode = inode::read_inode(firmware, cache, partition, &self.superblock, handle.inode)?;
        self.read_inode_bytes(firmware, cache, partition, &inode, buffer, position)
    }

    fn read_inode_bytes(
        &self,
        firmware: &dyn Firmware,
        cache: &mut BlockCache,
        partition: &Partition,
        inode: &RawInode,
        buffer: &mut [u8],
        position: u64,
    ) -> Result<(), FsError> {
        let block_size = self.superblock.block_size();
        let mut done = 0usize;

        while done < buffer.len() {
            let pos = position + done as u64;
            let logical_block = (pos / u64::from(block_size)) as u32;
            let block_offset = (pos % u64::from(block_size)) as usize;
            let take = (block_size as usize - block_offset).min(buffer.len() - done);

            let phys_block = inode::resolve_block(
                firmware,
                cache,
                partition,
                block_size,
                inode,
                logical_block,
            )?;

            if phys_block == 0 {
                buffer[done..done + take].fill(0);
            } else {
                let offset = u64::from(phys_block) * u64::from(block_size) + block_offset as u64;
                partition.read(firmware, cache, &mut buffer[done..done + take], offset, false)?;
            }

            done += take;
        }

        Ok(())
    }
}
