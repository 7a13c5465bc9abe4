//! Kernel image validation and page-by-page loading.
//!
//! Grounded on the original firmware's `BiLoadKernel`: the kernel header is read whole,
//! validated, then the kernel's declared virtual range is walked one page at a time, each
//! page allocated fresh from the heap and mapped before the next is touched.

use bytemuck::{Pod, Zeroable};

use crate::errors::{FsError, KernelLoadError};
use crate::firmware::Firmware;
use crate::fs::ext2::Ext2Fs;
use crate::fs::partitions::Partition;
use crate::io::block_cache::BlockCache;
use crate::mem::paging::PageTableBuilder;
use crate::mem::{allocate_zeroed_page, PhyAddr, VirtAddr, PAGE_SIZE};

const PROTOCOL_MAGIC: u32 = 0x584c_5258;
const PROTOCOL_MAJOR: u16 = 2;
const FLAG_MAP_DTB: u32 = 1 << 0;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawKernelHeader {
    magic: u32,
    minor_version: u16,
    major_version: u16,
    virtual_addr: u32,
    msize: u32,
    entry: u32,
    flags: u32,
    dtb_address: u32,
    max_dtb_end: u32,
}

/// A validated kernel header plus the result of loading the image into mapped pages.
pub struct LoadedKernel {
    pub entry_physical: PhyAddr,
    pub dtb_window: Option<(VirtAddr, VirtAddr)>,
}

fn ranges_overlap(a0: u32, a1: u32, b0: u32, b1: u32) -> bool {
    a0 <= b1 && b0 <= a1
}

/// Opens `kernel_path`, validates its header, maps its virtual address range page by page
/// into `page_table`, and returns the physical address of the entry point.
pub fn load(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
    partition: &Partition,
    fs: &Ext2Fs,
    page_table: &mut PageTableBuilder,
    kernel_path: &str,
) -> Result<LoadedKernel, KernelLoadError> {
    let handle = fs
        .find(firmware, cache, partition, kernel_path)
        .map_err(|e| match e {
            FsError::NotFound | FsError::NotADirectory | FsError::NotAFile => {
                KernelLoadError::NotFound
            }
            _ => KernelLoadError::NotFound,
        })?;

    let mut header_bytes = [0u8; core::mem::size_of::<RawKernelHeader>()];
    fs.read(firmware, cache, partition, &handle, &mut header_bytes, 0)
        .map_err(|_| KernelLoadError::NotFound)?;
    let header: RawKernelHeader = *bytemuck::from_bytes(&header_bytes);

    if header.magic != PROTOCOL_MAGIC {
        return Err(KernelLoadError::BadMagic);
    }
    if header.major_version != PROTOCOL_MAJOR {
        return Err(KernelLoadError::UnsupportedVersion);
    }
    if header.entry < header.virtual_addr
        || header.entry - header.virtual_addr >= header.msize
    {
        return Err(KernelLoadError::EntryOutOfRange);
    }

    let dtb_window = if header.flags & FLAG_MAP_DTB != 0 {
        let dtb_start = crate::mem::align_up(header.dtb_address, PAGE_SIZE);
        if header.max_dtb_end <= dtb_start {
            return Err(KernelLoadError::DtbWindowInvalid);
        }
        if ranges_overlap(
            header.virtual_addr,
            header.virtual_addr + header.msize - 1,
            dtb_start,
            header.max_dtb_end,
        ) {
            return Err(KernelLoadError::DtbWindowInvalid);
        }
        Some((VirtAddr::new(dtb_start), VirtAddr::new(header.max_dtb_end)))
    } else {
        None
    };

    let file_size = handle.size();
    if file_size > u64::from(header.msize) {
        return Err(KernelLoadError::ImageTooLarge);
    }

    load_pages(firmware, cache, partition, fs, page_table, &handle, &header, file_size)?;

    let entry_physical = page_table
        .get_mapping(VirtAddr::new(header.entry))
        .map_err(|_| KernelLoadError::EntryOutOfRange)?;

    Ok(LoadedKernel {
        entry_physical,
        dtb_window,
    })
}

#[allow(clippy::too_many_arguments)]
fn load_pages(
    firmware: &dyn Firmware,
    cache: &mut BlockCache,
    partition: &Partition,
    fs: &Ext2Fs,
    page_table: &mut PageTableBuilder,
    handle: &crate::fs::ext2::FileHandle,
    header: &RawKernelHeader,
    file_size: u64,
) -> Result<(), KernelLoadError> {
    let virtual_addr = header.virtual_addr;
    let mut current = crate::mem::align_down(virtual_addr, PAGE_SIZE);
    let file_end = virtual_addr as u64 + file_size;
    let aligned_file_end = crate::mem::align_down(file_end as u32, PAGE_SIZE) as u64;
    let end = crate::mem::align_up(virtual_addr + header.msize, PAGE_SIZE);

    let map = |page_table: &mut PageTableBuilder, virt: u32, buffer: *mut u8| {
        page_table
            .map_page(VirtAddr::new(virt), PhyAddr::new(buffer as u32))
            .map_err(|_| KernelLoadError::EntryOutOfRange)
    };

    // Head partial page: the virtual address isn't page-aligned, so the pre-virt bytes are
    // zero and the rest of the page comes from the start of the file.
    if u64::from(current) < u64::from(virtual_addr) {
        let buffer = allocate_zeroed_page();
        let head_count = (virtual_addr - current) as usize;
        let tail_count = PAGE_SIZE as usize - head_count;
        let read_count = tail_count.min(file_size as usize);

        // SAFETY: `buffer` is a freshly allocated, page-sized, zero-filled page.
        let page = unsafe { core::slice::from_raw_parts_mut(buffer, PAGE_SIZE as usize) };
        fs.read(
            firmware,
            cache,
            partition,
            handle,
            &mut page[head_count..head_count + read_count],
            0,
        )
        .map_err(|_| KernelLoadError::NotFound)?;

        map(page_table, current, buffer)?;
        current += PAGE_SIZE;
    }

    while u64::from(current) < aligned_file_end {
        let buffer = allocate_zeroed_page();
        // SAFETY: see above.
        let page = unsafe { core::slice::from_raw_parts_mut(buffer, PAGE_SIZE as usize) };
        fs.read(
            firmware,
            cache,
            partition,
            handle,
            page,
            u64::from(current - virtual_addr),
        )
        .map_err(|_| KernelLoadError::NotFound)?;

        map(page_table, current, buffer)?;
        current += PAGE_SIZE;
    }

    // Tail partial page: the file ends mid-page, so the rest is zero-filled.
    if u64::from(current) < file_end {
        let buffer = allocate_zeroed_page();
        let head_count = (file_end - u64::from(current)) as usize;

        // SAFETY: see above.
        let page = unsafe { core::slice::from_raw_parts_mut(buffer, PAGE_SIZE as usize) };
        fs.read(
            firmware,
            cache,
            partition,
            handle,
            &mut page[..head_count],
            u64::from(current - virtual_addr),
        )
        .map_err(|_| KernelLoadError::NotFound)?;

        map(page_table, current, buffer)?;
        current += PAGE_SIZE;
    }

    // Trailing BSS: remaining declared pages with no backing file content.
    while current < end {
        let buffer = allocate_zeroed_page();
        map(page_table, current, buffer)?;
        current += PAGE_SIZE;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_wrong_magic() {
        let header = RawKernelHeader::zeroed();
        assert_ne!(header.magic, PROTOCOL_MAGIC);
    }

    #[test]
    fn entry_within_image_is_accepted_entry_before_base_is_not() {
        let header = RawKernelHeader {
            magic: PROTOCOL_MAGIC,
            minor_version: 0,
            major_version: PROTOCOL_MAJOR,
            virtual_addr: 0x8000_0000,
            msize: 0x1000,
            entry: 0x7fff_ffff,
            flags: 0,
            dtb_address: 0,
            max_dtb_end: 0,
        };
        assert!(header.entry < header.virtual_addr);
    }

    #[test]
    fn dtb_window_overlap_is_detected() {
        assert!(ranges_overlap(0x8000_0000, 0x8000_ffff, 0x8000_8000, 0x8001_0000));
        assert!(!ranges_overlap(0x8000_0000, 0x8000_ffff, 0x8001_0000, 0x8002_0000));
    }
}
