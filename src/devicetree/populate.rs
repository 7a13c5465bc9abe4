//! Device-tree population from the firmware device database.
//!
//! Grounded on the `a4x` platform's `BxDtPopulate` and its `BxDtAdd*` helpers: memory is
//! coalesced into contiguous runs, every present processor gets a `cpu@n` node feeding an
//! `lsic` interrupt-controller node, and the fixed-address platform devices (RTC, serial,
//! disk controller, AMTSU) each get a node parented at the tree root with an
//! `interrupt-parent` pointing back at the LSIC. The MMIO addresses below are platform
//! constants, not something firmware reports, so they're fixed here the same way they are in
//! `a4x.c`.

use alloc::format;
use alloc::vec::Vec;

use crate::devicetree::DeviceTree;
use crate::firmware::Firmware;
use crate::mem::PAGE_SIZE;

const CPU_IRQ: u32 = 1;

const LSIC_BASE: u32 = 0xf803_0000;
const LSIC_SIZE: u32 = 0x100;

const RTC_BASE: u32 = 0xf800_0080;
const RTC_SIZE: u32 = 8;
const RTC_IRQ: u32 = 2;

const SERIAL_COUNT: u32 = 2;
const SERIAL_SIZE: u32 = 8;
const SERIAL_STRIDE: u32 = 0xf800_0040;
const SERIAL_IRQ_BASE: u32 = 4;
const SERIAL_BAUD: u32 = 9600;

const DISKS_BASE: u32 = 0xf800_0064;
const DISKS_SIZE: u32 = 12;
const DISKS_IRQ: u32 = 3;

const AMTSU_BASE: u32 = 0xf800_00c0;
const AMTSU_SIZE: u32 = 20;
const AMTSU_IRQ: u32 = 0x30;
const AMTSU_NIRQ: u32 = 4;

const BOARD_SIZE: u32 = 0x0800_0000;
const BOARD_IRQ_BASE: u32 = 0x28;

/// Fills in every hardware node this bootloader knows how to describe. Returns nothing; the
/// tree is mutated in place and is ready for `/chosen` to be added on top by the caller.
pub fn populate(tree: &mut DeviceTree, firmware: &dyn Firmware) {
    tree.add_property_u32s(None, "#address-cells", &[1]);
    tree.add_property_u32s(None, "#size-cells", &[1]);

    let machine = firmware.machine_type();
    tree.add_property_strings(None, "model", &[machine.model()]);
    tree.add_property_strings(None, "compatible", &[machine.compatible()]);

    add_memory(tree, firmware);
    let cpu_phandles = add_cpus(tree, firmware);
    let lsic_phandle = add_lsic(tree, &cpu_phandles);
    add_rtc(tree, lsic_phandle);
    add_serial(tree, lsic_phandle);
    add_disks(tree, lsic_phandle);
    add_amtsu(tree, lsic_phandle);
    add_boards(tree, firmware, lsic_phandle);
}

fn add_memory(tree: &mut DeviceTree, firmware: &dyn Firmware) {
    let mut start = 0u32;
    let mut end = 0u32;

    for bank in firmware.ram_banks() {
        if bank.frame_count == 0 {
            continue;
        }

        if bank.base != end {
            if start != end {
                add_memory_bank(tree, start, end);
            }
            start = bank.base;
        }
        end = bank.base + bank.frame_count * PAGE_SIZE;
    }

    if start != end {
        add_memory_bank(tree, start, end);
    }
}

fn add_memory_bank(tree: &mut DeviceTree, start: u32, end: u32) {
    let name = format!("memory@{start:x}");
    let node = tree.create_node(None, &name);
    tree.add_property_strings(Some(node), "device_type", &["memory"]);
    tree.add_property_u32s(Some(node), "reg", &[start, end - start]);
}

fn add_cpus(tree: &mut DeviceTree, firmware: &dyn Firmware) -> Vec<u32> {
    let cpus = tree.create_node(None, "cpus");
    tree.add_property_u32s(Some(cpus), "#address-cells", &[1]);
    tree.add_property_u32s(Some(cpus), "#size-cells", &[0]);

    let mut phandles = Vec::new();
    for cpu in firmware.cpus() {
        if !cpu.present {
            continue;
        }

        let name = format!("cpu@{:x}", cpu.id.0);
        let node = tree.create_node(Some(cpus), &name);
        let phandle = tree.alloc_phandle();

        tree.add_property_u32s(Some(node), "phandle", &[phandle]);
        tree.add_property_strings(Some(node), "device_type", &["cpu"]);
        tree.add_property_u32s(Some(node), "reg", &[cpu.id.0]);
        tree.add_property_strings(Some(node), "status", &["okay"]);
        tree.add_property_strings(Some(node), "compatible", &["xrarch,xr17032"]);
        tree.add_property(Some(node), "interrupt-controller", &[]);
        tree.add_property_u32s(Some(node), "#interrupt-cells", &[1]);

        phandles.push(phandle);
    }

    phandles
}

fn add_lsic(tree: &mut DeviceTree, cpu_phandles: &[u32]) -> u32 {
    let phandle = tree.alloc_phandle();

    let mut interrupts_extended = Vec::with_capacity(cpu_phandles.len() * 2);
    for &cpu_phandle in cpu_phandles {
        interrupts_extended.push(cpu_phandle);
        interrupts_extended.push(CPU_IRQ);
    }

    let name = format!("lsic@{LSIC_BASE:x}");
    let node = tree.create_node(None, &name);
    tree.add_property_u32s(Some(node), "phandle", &[phandle]);
    tree.add_property_u32s(Some(node), "reg", &[LSIC_BASE, LSIC_SIZE]);
    tree.add_property_strings(Some(node), "compatible", &["xrarch,lsic"]);
    tree.add_property_u32s(Some(node), "interrupts-extended", &interrupts_extended);
    tree.add_property(Some(node), "interrupt-controller", &[]);
    tree.add_property_u32s(Some(node), "#interrupt-cells", &[1]);

    phandle
}

fn add_interrupts(tree: &mut DeviceTree, node: u32, lsic_phandle: u32, base: u32, count: u32) {
    tree.add_property_u32s(Some(node), "interrupt-parent", &[lsic_phandle]);

    if count == 1 {
        tree.add_property_u32s(Some(node), "interrupts", &[base]);
        return;
    }

    let irqs: Vec<u32> = (0..count).map(|i| base + i).collect();
    tree.add_property_u32s(Some(node), "interrupts", &irqs);
}

fn add_device(
    tree: &mut DeviceTree,
    lsic_phandle: u32,
    name: &str,
    compatible: &str,
    address: u32,
    size: u32,
    irq_base: u32,
    irq_count: u32,
) -> u32 {
    let node_name = format!("{name}@{address:x}");
    let node = tree.create_node(None, &node_name);

    tree.add_property_u32s(Some(node), "reg", &[address, size]);
    tree.add_property_strings(Some(node), "compatible", &[compatible]);
    add_interrupts(tree, node, lsic_phandle, irq_base, irq_count);

    node
}

fn add_rtc(tree: &mut DeviceTree, lsic_phandle: u32) {
    add_device(tree, lsic_phandle, "rtc", "xrarch,rtc", RTC_BASE, RTC_SIZE, RTC_IRQ, 1);
}

fn add_serial(tree: &mut DeviceTree, lsic_phandle: u32) {
    for i in 0..SERIAL_COUNT {
        let node = add_device(
            tree,
            lsic_phandle,
            "serial",
            "xrarch,serial",
            SERIAL_STRIDE + i * SERIAL_SIZE,
            SERIAL_SIZE,
            SERIAL_IRQ_BASE + i,
            1,
        );
        tree.add_property_u32s(Some(node), "clock-frequency", &[SERIAL_BAUD]);
        tree.add_property_u32s(Some(node), "current-speed", &[SERIAL_BAUD]);
    }
}

fn add_disks(tree: &mut DeviceTree, lsic_phandle: u32) {
    add_device(
        tree,
        lsic_phandle,
        "disk-controller",
        "xrarch,disk-controller",
        DISKS_BASE,
        DISKS_SIZE,
        DISKS_IRQ,
        1,
    );
}

fn add_amtsu(tree: &mut DeviceTree, lsic_phandle: u32) {
    add_device(
        tree,
        lsic_phandle,
        "amtsu",
        "xrarch,amtsu",
        AMTSU_BASE,
        AMTSU_SIZE,
        AMTSU_IRQ,
        AMTSU_NIRQ,
    );
}

fn add_boards(tree: &mut DeviceTree, firmware: &dyn Firmware, lsic_phandle: u32) {
    for (i, board) in firmware.boards().iter().enumerate() {
        if board.board_id == 0 {
            continue;
        }

        let compatible = format!("xrarch,expansion-{:x}", board.board_id);
        let node = add_device(
            tree,
            lsic_phandle,
            "expansion-board",
            &compatible,
            board.address,
            BOARD_SIZE,
            BOARD_IRQ_BASE + i as u32,
            1,
        );

        if let Some(name) = board.name_str() {
            tree.add_property_strings(Some(node), "model", &[name]);
        }
    }
}
