//! Dirty-flag check and clean (spec §4.10).
//!
//! FAT32 and FAT16 each carry a "volume was not cleanly unmounted" bit:
//! FAT16 in the high bit of FAT entry 1 ([`ClusterMarkers::dirty_bit_mask`]),
//! FAT32 in the same bit position plus a parallel bit in the boot
//! sector's reserved byte. FAT12 carries no such bit at all. Clearing it
//! is always the very last write of a clean run, and is written straight
//! through the device rather than through the change log so that a
//! crash mid-repair can never leave a dirty volume looking clean.

use crate::context::EngineContext;
use crate::error::CheckError;
use crate::fat::FatTable;
use crate::geometry::{FatVariant, Geometry};
use crate::io::Device;
use crate::structures::boot_sector::{RawBpbExtended16, RawBpbExtended32};

/// Bits within `BS_DrvNum` real DOS media repurpose to carry mount
/// state: bit 0 means cleanly unmounted, bit 1 means no I/O errors were
/// seen (both captured by [`Geometry::mount_state`]).
const DIRTY_BIT: u8 = 0x01;
const HARD_ERROR_BIT: u8 = 0x02;

/// Whether the filesystem is currently marked dirty, consulting both
/// the boot-sector reserved byte and (for FAT16/32) the FAT[1] high
/// bit, since real-world images are sometimes inconsistent between the
/// two.
pub fn is_dirty(geo: &Geometry, fat: &FatTable) -> bool {
    let boot_dirty = geo.mount_state & DIRTY_BIT == 0 && geo.variant != FatVariant::Fat12;
    let fat_dirty = match geo.markers.dirty_bit_mask() {
        Some(mask) => fat.raw_fat_get(1) & mask == 0,
        None => false,
    };
    boot_dirty || fat_dirty
}

/// Report the dirty flag without writing anything. Used both by a
/// standalone `-C` check and as step 2 of a full run, ahead of whatever
/// repairs the rest of the pass makes; [`clean`] is called separately,
/// only once the whole run is otherwise finished.
pub fn check(geo: &Geometry, fat: &FatTable, ctx: &mut EngineContext) -> bool {
    let dirty = is_dirty(geo, fat);
    if dirty {
        ctx.reporter
            .warn("the filesystem was not cleanly unmounted (dirty bit set)");
    }
    ctx.counters.remain_dirty = dirty;
    dirty
}

/// Clear the dirty bit in every location it is stored, writing straight
/// through the change log (the driver calls this only once it is
/// otherwise done repairing and about to exit cleanly).
pub fn clean(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
) -> Result<(), CheckError> {
    if geo.variant == FatVariant::Fat12 {
        return Ok(());
    }

    if let Some(mask) = geo.markers.dirty_bit_mask() {
        let current = fat.raw_fat_get(1);
        if current & mask == 0 {
            let cleaned = current | mask;
            fat.set_fat_immediate(device, 1, cleaned)?;
        }
    }

    let boot_offset = mount_state_offset(geo);
    let current = device.read(boot_offset, 1)?[0];
    let cleaned = current | DIRTY_BIT | HARD_ERROR_BIT;
    if cleaned != current {
        device.write_immed(boot_offset, &[cleaned])?;
        if geo.variant == FatVariant::Fat32 && geo.backup_boot_start != 0 {
            device.write_immed(geo.backup_boot_start + boot_offset, &[cleaned])?;
        }
    }

    ctx.counters.remain_dirty = false;
    Ok(())
}

/// Absolute byte offset of `BS_DrvNum`, which sits at a different
/// relative position in the FAT32 extended BPB than in the FAT12/16
/// one (FAT32's extended BPB carries extra fields ahead of it).
fn mount_state_offset(geo: &Geometry) -> u64 {
    use core::mem::offset_of;
    const EXT_BASE: u64 = 36;
    match geo.variant {
        FatVariant::Fat32 => EXT_BASE + offset_of!(RawBpbExtended32, drive_number) as u64,
        _ => EXT_BASE + offset_of!(RawBpbExtended16, drive_number) as u64,
    }
}
