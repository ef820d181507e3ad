//! Top-level orchestration (spec §9): open the device, run every check
//! in order, optionally re-verify, and commit or discard the result.

use std::path::Path;

use crate::context::{Counters, EngineContext};
use crate::dirty;
use crate::error::{CheckError, ExitStatus};
use crate::fat::{Bitmap, FatTable};
use crate::geometry::{FatVariant, Geometry};
use crate::io::Device;
use crate::label;
use crate::orphan;
use crate::structures::boot_sector::{RawBpbExtended16, RawBpbExtended32};
use crate::structures::fat_entry::ClusterValue;
use crate::walker;

/// What a completed run found and did.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub counters: Counters,
    pub exit_status: ExitStatus,
    pub device_changed: bool,
}

/// Owns the device across a run.
pub struct Driver {
    device: Device,
}

impl Driver {
    pub fn open(path: &Path, read_write: bool) -> Result<Self, CheckError> {
        Ok(Self {
            device: Device::open(path, read_write)?,
        })
    }

    pub fn from_memory(data: Vec<u8>) -> Self {
        Self {
            device: Device::from_memory(data),
        }
    }

    /// Read back the whole device as it stands right now (including any
    /// writes already committed by a prior [`Driver::run`]).
    pub fn snapshot(&mut self) -> Vec<u8> {
        self.device.snapshot().expect("in-memory device read")
    }

    /// Run a full check-and-repair pass, per the step order in spec §9:
    /// read the boot sector, load the FAT, handle `-C` dirty-only mode,
    /// walk the tree (restarting as many times as a cross-link forces),
    /// reconcile the volume label, reclaim orphans, test bad blocks if
    /// asked, re-verify if asked, then clean the dirty flag and commit.
    pub fn run(&mut self, ctx: &mut EngineContext) -> Result<RunSummary, CheckError> {
        ctx.reset_counters();
        self.device.set_write_through(ctx.write_immediate);
        let geo = Geometry::read(&mut self.device, ctx.atari_format)?;
        let mut fat = FatTable::load(&mut self.device, &geo, ctx)?;

        let dirty = dirty::check(&geo, &fat, ctx);

        if ctx.dirty_only {
            return Ok(RunSummary {
                counters: ctx.counters,
                exit_status: if dirty {
                    ExitStatus::UNCORRECTED
                } else {
                    ExitStatus::CLEAN
                },
                device_changed: false,
            });
        }

        let mut walk = loop {
            fat.reachable = Bitmap::new(fat.max_cluster() as usize);
            let walk = walker::scan_root(&mut self.device, &geo, &mut fat, ctx)?;
            if !walk.restart_required {
                break walk;
            }
            ctx.reporter
                .info("restarting the directory walk after a cross-link repair");
        };

        ctx.counters.n_files = walk.tree.len().saturating_sub(1) as u32;
        ctx.counters.alloc_clusters = fat.alloc_count;
        ctx.counters.bad_clusters = fat.bad_count;

        if ctx.read_test {
            test_unread_clusters(&mut self.device, &geo, &mut fat);
        }

        let boot_label_offset = label_offset(&geo);
        label::reconcile(
            &mut self.device,
            &geo,
            ctx,
            boot_label_offset,
            &walk.root_labels,
            walk.new_root_slot,
        )?;

        orphan::reclaim(&mut self.device, &geo, &mut fat, ctx, walk.new_root_slot)?;

        update_fsinfo(&mut self.device, &geo, &fat, ctx)?;

        if ctx.verify_pass {
            fat.reachable = Bitmap::new(fat.max_cluster() as usize);
            walk = walker::scan_root(&mut self.device, &geo, &mut fat, ctx)?;
            if !orphan::find_orphan_heads(&fat).is_empty() {
                ctx.reporter
                    .warn("anomalies remain after the verification pass");
            }
        }
        let _ = walk;

        for path in ctx.force_drop.drain().collect::<Vec<_>>() {
            ctx.reporter
                .warn(&format!("path hint '{path}' (-d) never matched an entry"));
        }
        for path in ctx.force_undelete.drain().collect::<Vec<_>>() {
            ctx.reporter
                .warn(&format!("path hint '{path}' (-u) never matched a deleted entry"));
        }

        let had_changes = self.device.changed();
        let commit = ctx.may_write();

        if commit {
            dirty::clean(&mut self.device, &geo, &mut fat, ctx)?;
        }
        self.device.flush(commit)?;

        let exit_status = if had_changes && commit {
            ExitStatus::CORRECTED
        } else if had_changes {
            ExitStatus::UNCORRECTED
        } else {
            ExitStatus::CLEAN
        };

        Ok(RunSummary {
            counters: ctx.counters,
            exit_status,
            device_changed: had_changes,
        })
    }
}

/// Probe every cluster not already known bad with a read, marking any
/// that fails as bad (spec §4.3's `-t` read test).
fn test_unread_clusters(device: &mut Device, geo: &Geometry, fat: &mut FatTable) {
    for cluster in 2..fat.max_cluster() {
        if matches!(fat.get_fat(cluster), ClusterValue::Bad) {
            continue;
        }
        let offset = geo.cluster_start(cluster);
        if !device.test(offset, geo.cluster_size as usize) {
            fat.mark_bad(device, cluster);
        }
    }
}

/// Recompute the FAT32 `fsinfo` free-cluster count and next-free hint
/// from the authoritative bitmaps, and rewrite the sector only if it
/// disagrees. No-op for FAT12/16, which carry no `fsinfo` sector.
fn update_fsinfo(
    device: &mut Device,
    geo: &Geometry,
    fat: &FatTable,
    ctx: &mut EngineContext,
) -> Result<(), CheckError> {
    use crate::structures::fs_info::{RawFsInfo, LEAD_SIGNATURE, STRUCT_SIGNATURE, TRAIL_SIGNATURE};

    if geo.variant != FatVariant::Fat32 || geo.fsinfo_start == 0 {
        return Ok(());
    }

    let raw = device.read(geo.fsinfo_start, 512)?;
    let mut info: RawFsInfo = *bytemuck::from_bytes(&raw);
    if info.lead_signature() != LEAD_SIGNATURE || info.struct_signature() != STRUCT_SIGNATURE {
        return Ok(());
    }

    let free = fat.max_cluster() - 2 - fat.alloc_count;
    let next_free = (2..fat.max_cluster())
        .find(|&c| matches!(fat.get_fat(c), ClusterValue::Free))
        .unwrap_or(0xFFFF_FFFF);

    if info.free_clusters() != free || info.next_free_cluster() != next_free {
        info.set_free_clusters(free);
        info.set_next_free_cluster(next_free);
        info.set_trail_signature(TRAIL_SIGNATURE);
        if ctx.may_write() {
            device.write(geo.fsinfo_start, bytemuck::bytes_of(&info));
        }
    }

    Ok(())
}

/// Absolute byte offset of the volume-label field within the boot
/// sector, which sits at a different relative offset in the FAT32
/// extended BPB than in the FAT12/16 one.
fn label_offset(geo: &Geometry) -> u64 {
    use core::mem::offset_of;
    const EXT_BASE: u64 = 36;
    match geo.variant {
        FatVariant::Fat32 => EXT_BASE + offset_of!(RawBpbExtended32, volume_label) as u64,
        _ => EXT_BASE + offset_of!(RawBpbExtended16, volume_label) as u64,
    }
}
