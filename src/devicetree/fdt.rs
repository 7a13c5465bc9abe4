//! Flattened Device Tree (v17) blob emission.
//!
//! Two passes over the arena built by [`super::DeviceTree`]: string offsets are fixed first
//! (so `PROP` tokens can reference them), then the node tree is walked pre-order emitting
//! `BEGIN_NODE`/`PROP`/`END_NODE` tokens, matching the original's `BlDtBuildBlob`.

use alloc::vec::Vec;

use super::{align_up, DeviceTree};
use crate::errors::DtError;

pub const FDT_MAGIC: u32 = 0xd00d_feed;
pub const FDT_VERSION: u32 = 17;
pub const FDT_LAST_COMP_VERSION: u32 = 16;

const TOKEN_BEGIN_NODE: u32 = 1;
const TOKEN_END_NODE: u32 = 2;
const TOKEN_PROP: u32 = 3;
const TOKEN_END: u32 = 9;

const HEADER_SIZE: u32 = 40;
const RSVMAP_ENTRY_SIZE: u32 = 16;

/// Serialises `tree` into a self-contained FDT v17 blob. `boot_cpu_phys` is written into the
/// header's `boot_cpuid_phys` field.
pub fn build_blob(tree: &DeviceTree, boot_cpu_phys: u32) -> Result<Vec<u8>, DtError> {
    let rsvmap_size = (tree.reserved_memory.len() as u32 + 1) * RSVMAP_ENTRY_SIZE;
    let strings_size = tree.strings.total_bytes();
    let total_size = HEADER_SIZE + rsvmap_size + tree.structure_size + strings_size;

    let mut blob = Vec::with_capacity(total_size as usize);

    push_u32(&mut blob, FDT_MAGIC);
    push_u32(&mut blob, total_size);
    push_u32(&mut blob, HEADER_SIZE + rsvmap_size);
    push_u32(&mut blob, HEADER_SIZE + rsvmap_size + tree.structure_size);
    push_u32(&mut blob, HEADER_SIZE);
    push_u32(&mut blob, FDT_VERSION);
    push_u32(&mut blob, FDT_LAST_COMP_VERSION);
    push_u32(&mut blob, boot_cpu_phys);
    push_u32(&mut blob, strings_size);
    push_u32(&mut blob, tree.structure_size);

    for &(base, size) in &tree.reserved_memory {
        blob.extend_from_slice(&base.to_be_bytes());
        blob.extend_from_slice(&size.to_be_bytes());
    }
    blob.extend_from_slice(&0u64.to_be_bytes());
    blob.extend_from_slice(&0u64.to_be_bytes());

    let string_offsets = tree.strings.offsets();
    let structure_start = blob.len();
    write_node(tree, super::ROOT, &string_offsets, &mut blob);
    push_u32(&mut blob, TOKEN_END);

    if (blob.len() - structure_start) as u32 != tree.structure_size {
        return Err(DtError::StructureSizeMismatch);
    }

    for s in tree.strings.entries() {
        blob.extend_from_slice(s.as_bytes());
        blob.push(0);
    }

    Ok(blob)
}

fn write_node(tree: &DeviceTree, index: u32, string_offsets: &[u32], blob: &mut Vec<u8>) {
    let node = &tree.nodes[index as usize];

    push_u32(blob, TOKEN_BEGIN_NODE);
    push_aligned_with_nul(blob, node.name.as_bytes());

    for property in &node.properties {
        push_u32(blob, TOKEN_PROP);
        push_u32(blob, property.data.len() as u32);
        push_u32(blob, string_offsets[property.name_id as usize]);
        push_aligned(blob, &property.data);
    }

    for &child in &node.children {
        write_node(tree, child, string_offsets, blob);
    }

    push_u32(blob, TOKEN_END_NODE);
}

fn push_u32(blob: &mut Vec<u8>, value: u32) {
    blob.extend_from_slice(&value.to_be_bytes());
}

fn push_aligned(blob: &mut Vec<u8>, data: &[u8]) {
    let aligned = align_up(data.len() as u32, 4) as usize;
    blob.extend_from_slice(data);
    blob.resize(blob.len() + (aligned - data.len()), 0);
}

fn push_aligned_with_nul(blob: &mut Vec<u8>, data: &[u8]) {
    let raw_len = data.len() + 1;
    let aligned = align_up(raw_len as u32, 4) as usize;
    blob.extend_from_slice(data);
    blob.resize(blob.len() + (aligned - data.len()), 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devicetree::DeviceTree;

    #[test]
    fn header_fields_and_total_size_are_consistent() {
        let mut tree = DeviceTree::new();
        tree.add_property_strings(None, "compatible", &["xr,station"]);
        let blob = build_blob(&tree, 0).unwrap();

        let magic = u32::from_be_bytes(blob[0..4].try_into().unwrap());
        let total_size = u32::from_be_bytes(blob[4..8].try_into().unwrap());
        assert_eq!(magic, FDT_MAGIC);
        assert_eq!(total_size as usize, blob.len());
    }

    #[test]
    fn reserved_memory_entries_are_terminated_by_a_zero_entry() {
        let mut tree = DeviceTree::new();
        tree.add_reserved_memory(0x1000, 0x2000);
        let blob = build_blob(&tree, 0).unwrap();

        let off_mem_rsvmap = u32::from_be_bytes(blob[16..20].try_into().unwrap()) as usize;
        let entry0 = &blob[off_mem_rsvmap..off_mem_rsvmap + 16];
        let entry1 = &blob[off_mem_rsvmap + 16..off_mem_rsvmap + 32];

        assert_eq!(u64::from_be_bytes(entry0[0..8].try_into().unwrap()), 0x1000);
        assert_eq!(u64::from_be_bytes(entry1[0..8].try_into().unwrap()), 0);
        assert_eq!(u64::from_be_bytes(entry1[8..16].try_into().unwrap()), 0);
    }

    #[test]
    fn nested_nodes_emit_in_pre_order() {
        let mut tree = DeviceTree::new();
        let cpus = tree.create_node(None, "cpus");
        tree.create_node(Some(cpus), "cpu@0");
        assert!(build_blob(&tree, 0).is_ok());
    }
}
