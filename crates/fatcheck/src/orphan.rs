//! Orphan cluster reclamation (spec §4.8): clusters the FAT marks
//! allocated but that no entry in the tree ever reached.
//!
//! A chain is orphaned iff its head cluster is `disk_observed` but not
//! `reachable` once the whole tree has been walked and every live
//! file's chain validated — the XOR of the two bitmaps, restricted to
//! chain heads, is exactly the reclaimable set.

use crate::context::EngineContext;
use crate::error::CheckError;
use crate::fat::FatTable;
use crate::geometry::Geometry;
use crate::io::Device;
use crate::structures::directory_entry::{FileAttributes, RawShortEntry};
use crate::structures::fat_entry::ClusterValue;
use crate::structures::time::now;

/// One orphaned chain found by [`find_orphan_heads`].
#[derive(Debug, Clone, Copy)]
pub struct OrphanChain {
    pub head: u32,
    pub cluster_count: u32,
    pub byte_len: u64,
}

/// Identify every orphaned chain's head cluster. A cluster is a *head*
/// iff it is orphaned (observed but unreachable) and no other orphaned
/// cluster's FAT entry points to it — chasing every orphan chain this
/// way visits each exactly once regardless of the order clusters are
/// scanned in.
pub fn find_orphan_heads(fat: &FatTable) -> Vec<OrphanChain> {
    let orphaned = fat.disk_observed.xor(&fat.reachable);
    let mut pointed_to = vec![false; fat.max_cluster() as usize];
    for cluster in 2..fat.max_cluster() {
        if orphaned.get(cluster) {
            if let ClusterValue::Next(next) = fat.get_fat(cluster) {
                if (next as usize) < pointed_to.len() {
                    pointed_to[next as usize] = true;
                }
            }
        }
    }

    let mut heads = Vec::new();
    for cluster in 2..fat.max_cluster() {
        if !orphaned.get(cluster) || pointed_to[cluster as usize] {
            continue;
        }
        let mut count = 0u32;
        let mut curr = cluster;
        loop {
            count += 1;
            match fat.get_fat(curr) {
                ClusterValue::Next(next) if orphaned.get(next) => curr = next,
                _ => break,
            }
        }
        heads.push(OrphanChain {
            head: cluster,
            cluster_count: count,
            byte_len: 0,
        });
    }
    heads
}

/// Either free every orphaned chain outright, or (with `-f`) splice a
/// synthetic `FSCKnnnnREC` entry into the root directory for each one
/// so the data can be recovered by the user. `root_free_slot` is a
/// free-or-appendable root-directory offset the walker already located;
/// if recovery is requested and none remains, reclamation falls back to
/// freeing that chain instead and a warning is reported.
pub fn reclaim(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
    mut root_free_slot: Option<u64>,
) -> Result<(), CheckError> {
    let heads = find_orphan_heads(fat);
    if heads.is_empty() {
        return Ok(());
    }

    for (index, chain) in heads.iter().enumerate() {
        if !ctx.salvage_orphans {
            ctx.reporter.warn(&format!(
                "{} orphaned cluster(s) starting at {}; freeing",
                chain.cluster_count, chain.head
            ));
            if ctx.may_write() {
                fat.free_chain_from(device, chain.head);
            }
            continue;
        }

        match root_free_slot {
            Some(offset) => {
                ctx.reporter.warn(&format!(
                    "{} orphaned cluster(s) starting at {}; recovered as FSCK{:04}REC",
                    chain.cluster_count, chain.head, index
                ));
                if ctx.may_write() {
                    reclaim_file(device, geo, offset, chain, index as u32)?;
                }
                root_free_slot = next_root_slot(geo, offset);
            }
            None => {
                ctx.reporter.warn(&format!(
                    "no free root directory slot to recover {} orphaned cluster(s) at {}; freeing instead",
                    chain.cluster_count, chain.head
                ));
                if ctx.may_write() {
                    fat.free_chain_from(device, chain.head);
                }
            }
        }
    }

    Ok(())
}

/// The next 32-byte slot after `offset` within the fixed-size FAT12/16
/// root; for a FAT32 root (cluster-chained) the caller cannot know
/// ahead of time whether this crosses a cluster boundary, so recovery
/// beyond the first orphan in that case is left to the next pass.
fn next_root_slot(geo: &Geometry, offset: u64) -> Option<u64> {
    if geo.variant == crate::geometry::FatVariant::Fat32 {
        return None;
    }
    let next = offset + 32;
    if next < geo.root_start + geo.root_entry_count as u64 * 32 {
        Some(next)
    } else {
        None
    }
}

/// Write a `FSCKnnnnREC` short entry at `offset` pointing at `chain`'s
/// head, with a size matching its recovered length.
fn reclaim_file(
    device: &mut Device,
    geo: &Geometry,
    offset: u64,
    chain: &OrphanChain,
    index: u32,
) -> Result<(), CheckError> {
    let digits = format!("{:04}", index % 10000);
    let mut name = *b"FSCK0000REC";
    name[4..8].copy_from_slice(digits.as_bytes());

    let (date, time) = now();
    let size = chain.cluster_count as u64 * geo.cluster_size as u64;
    let mut entry = RawShortEntry {
        name,
        attributes: FileAttributes::ARCHIVE.bits(),
        case_info: 0,
        creation_time_tenths: 0,
        creation_time: time.0.to_le_bytes(),
        creation_date: date.0.to_le_bytes(),
        last_access_date: date.0.to_le_bytes(),
        first_cluster_hi: [0; 2],
        write_time: time.0.to_le_bytes(),
        write_date: date.0.to_le_bytes(),
        first_cluster_lo: [0; 2],
        size: (size.min(u32::MAX as u64) as u32).to_le_bytes(),
    };
    entry.set_cluster(chain.head);
    device.write(offset, bytemuck::bytes_of(&entry));
    Ok(())
}
