//! Cluster chain validation (`check_file`, spec §4.6): directory
//! sanity, cross-link/cycle detection, and size reconciliation.

use std::collections::HashSet;

use crate::context::EngineContext;
use crate::error::CheckError;
use crate::fat::FatTable;
use crate::geometry::Geometry;
use crate::io::Device;
use crate::structures::fat_entry::ClusterValue;
use crate::tree::{NodeId, Tree};

/// What the driver loop must do after validating one node's chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainOutcome {
    /// A cross-link truncated a directory whose subtree the current
    /// tree already reflects; the whole pass must restart from a fresh
    /// walk once this directory is re-read.
    pub restart: bool,
}

impl ChainOutcome {
    fn restart() -> Self {
        Self { restart: true }
    }
}

fn node_name(tree: &Tree, id: NodeId) -> String {
    tree.get(id).display_name()
}

/// Validate and, where necessary, repair node `id`'s directory sanity,
/// cluster chain, and size.
pub fn check_file(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    tree: &mut Tree,
    id: NodeId,
    ctx: &mut EngineContext,
) -> Result<ChainOutcome, CheckError> {
    let is_directory = tree.get(id).is_directory();
    let is_volume_label = tree.get(id).is_volume_label();
    let start = tree.get(id).start_cluster();
    let offset = tree.get(id).offset;
    let name = tree.get(id).short_name_trimmed();

    // 1. Directory sanity.
    if is_directory && !tree.get(id).is_synthetic_root {
        if tree.get(id).entry.size() != 0 {
            set_size(device, tree, id, offset, 0);
        }

        let parent = tree.parent_of(id);
        let parent_start = parent.map(|p| tree.get(p).start_cluster()).unwrap_or(0);
        let grandparent_start = tree.grandparent_start(id);

        if name == "." {
            if start != parent_start {
                set_start(device, tree, id, offset, parent_start);
            }
        } else if name == ".." {
            if start != grandparent_start {
                set_start(device, tree, id, offset, grandparent_start);
            }
        } else if start == parent_start || start == grandparent_start || start == 0 {
            ctx.reporter.warn(&format!(
                "'{name}' is a directory whose start cluster aliases its own ancestry; deleting"
            ));
            delete_entry(device, tree, id, offset);
            return Ok(ChainOutcome::default());
        }
    }

    // 2. Volume label with non-zero start.
    if is_volume_label && start != 0 {
        ctx.reporter.warn(&format!("volume label '{name}' has a non-zero start cluster; resetting"));
        set_start(device, tree, id, offset, 0);
    }

    let start = tree.get(id).start_cluster();

    // 3. Start beyond max_cluster.
    if start != 0 && start >= fat.max_cluster() {
        if tree.get(id).is_synthetic_root {
            return Err(CheckError::Corrupt(
                "FAT32 root directory start cluster is out of range".into(),
            ));
        }
        ctx.reporter.warn(&format!("'{name}' starts beyond the last valid cluster"));
        if is_directory {
            delete_entry(device, tree, id, offset);
        } else {
            set_start(device, tree, id, offset, 0);
            set_size(device, tree, id, offset, 0);
        }
        return Ok(ChainOutcome::default());
    }

    if start == 0 || is_volume_label {
        return Ok(ChainOutcome::default());
    }

    // 4. Chain walk.
    let mut clusters: u32 = 0;
    let mut prev: u32 = 0;
    let mut curr = start;
    let mut outcome = ChainOutcome::default();
    // Clusters already visited by this node's own walk since the last
    // restart. A repeat here is the node looping back on itself, which
    // is a cycle, not a cross-link with some other file, and must never
    // be routed through `find_owner`/`resolve_cross_link` (there is no
    // other owner to negotiate with).
    let mut own = HashSet::new();

    loop {
        let raw_next = fat.get_fat(curr);
        let next = match raw_next {
            ClusterValue::Next(n) => n,
            ClusterValue::Free | ClusterValue::Bad => {
                ctx.reporter.warn(&format!("'{name}' contains a bad or free cluster; truncating"));
                detach(device, fat, tree, id, offset, prev, start);
                break;
            }
            ClusterValue::Eoc => {
                // Walked onto the terminator itself without a gap: treat
                // `curr` as the last data cluster and stop normally.
                if fat.reachable.get(curr) {
                    let winner = find_owner(tree, curr, id);
                    outcome = resolve_cross_link(device, geo, fat, tree, id, winner, curr, ctx)?;
                    if outcome.restart {
                        return Ok(outcome);
                    }
                    curr = tree.get(id).start_cluster();
                    if curr == 0 {
                        break;
                    }
                    clusters = 0;
                    prev = 0;
                    own.clear();
                    continue;
                }
                fat.reachable.set(curr, true);
                clusters += 1;
                break;
            }
        };

        if own.contains(&curr) {
            ctx.reporter
                .warn(&format!("'{name}' contains a cyclic cluster chain; truncating"));
            fat.set_fat(device, prev, ClusterValue::Eoc);
            break;
        }

        if fat.reachable.get(curr) {
            let winner = find_owner(tree, curr, id);
            outcome = resolve_cross_link(device, geo, fat, tree, id, winner, curr, ctx)?;
            if outcome.restart {
                return Ok(outcome);
            }
            // The loser was truncated (possibly `id` itself); restart
            // the walk over whatever remains of `id`'s own chain.
            curr = tree.get(id).start_cluster();
            if curr == 0 {
                break;
            }
            clusters = 0;
            prev = 0;
            own.clear();
            continue;
        }

        own.insert(curr);
        fat.reachable.set(curr, true);
        clusters += 1;
        prev = curr;
        curr = next;
    }

    // 5. Size reconciliation (regular files only).
    if !is_directory && !is_volume_label {
        let declared_size = tree.get(id).entry.size();
        let cluster_size = geo.cluster_size as u64;
        let min_ok = if clusters == 0 { 0 } else { (clusters as u64 - 1) * cluster_size + 1 };
        let max_ok = clusters as u64 * cluster_size;
        if (declared_size as u64) < min_ok || declared_size as u64 > max_ok {
            let new_size = (clusters as u64 * cluster_size) as u32;
            set_size(device, tree, id, offset, new_size);
        }
    }

    Ok(outcome)
}

fn find_owner(tree: &Tree, cluster: u32, exclude: NodeId) -> NodeId {
    let mut candidates = tree.walk_from(root_of(tree, exclude));
    candidates.retain(|&n| n != exclude);
    for &n in &candidates {
        // A coarse but adequate search: any node whose own start equals
        // the shared cluster is an immediate match; otherwise the owner
        // is whichever other node's chain was walked earlier and set
        // the reachable bit first, which this function cannot recover
        // without re-walking. We fall back to the node with the
        // matching start cluster, and otherwise to the tree root, which
        // is always a safe (if imprecise) victim per the policy table.
        if tree.get(n).start_cluster() == cluster {
            return n;
        }
    }
    root_of(tree, exclude)
}

fn root_of(tree: &Tree, mut id: NodeId) -> NodeId {
    while let Some(p) = tree.parent_of(id) {
        id = p;
    }
    id
}

/// Apply the cross-link negotiation policy of spec §4.6 step 4, then
/// truncate whichever side loses.
fn resolve_cross_link(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    tree: &mut Tree,
    current: NodeId,
    owner: NodeId,
    shared_cluster: u32,
    ctx: &mut EngineContext,
) -> Result<ChainOutcome, CheckError> {
    let owner_is_root = tree.get(owner).is_synthetic_root;
    let current_is_root = tree.get(current).is_synthetic_root;

    let truncate_current = if owner_is_root {
        true
    } else if current_is_root {
        false
    } else if ctx.mode.is_interactive() {
        let choices = ["truncate this file", "truncate the other file"];
        ctx.reporter.prompt("cross-linked cluster found", &choices, 1) == 0
    } else {
        true
    };

    let victim = if truncate_current { current } else { owner };
    truncate_chain_at(device, geo, fat, tree, victim, shared_cluster, ctx)
}

/// Truncate `victim`'s chain at the cluster immediately before
/// `shared_cluster`, and report whether a restart is required (true iff
/// `victim` is a directory, since the tree may already reference
/// clusters being freed). The shared cluster and everything the other
/// owner still chains from it are left untouched: they remain the
/// owner's live data, not reclaimable space.
fn truncate_chain_at(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    tree: &mut Tree,
    victim: NodeId,
    shared_cluster: u32,
    ctx: &mut EngineContext,
) -> Result<ChainOutcome, CheckError> {
    let start = tree.get(victim).start_cluster();
    let was_directory = tree.get(victim).is_directory();
    let offset = tree.get(victim).offset;

    if start == shared_cluster {
        // The shared cluster is the victim's very first, and it still
        // belongs to the owner: just detach the victim from it.
        set_start(device, tree, victim, offset, 0);
        set_size(device, tree, victim, offset, 0);
        return Ok(if was_directory { ChainOutcome::restart() } else { ChainOutcome::default() });
    }

    let mut count = 0u64;
    let mut prev = start;
    loop {
        match fat.get_fat(prev) {
            ClusterValue::Next(n) if n == shared_cluster => break,
            ClusterValue::Next(n) => {
                count += 1;
                prev = n;
            }
            _ => break,
        }
    }
    fat.set_fat(device, prev, ClusterValue::Eoc);

    let new_size = ((count + 1) * geo.cluster_size as u64) as u32;
    set_size(device, tree, victim, offset, new_size);
    ctx.reporter.info(&format!(
        "truncated '{}' to {count} cluster(s) after a cross-link",
        tree.get(victim).display_name()
    ));

    Ok(if was_directory { ChainOutcome::restart() } else { ChainOutcome::default() })
}

/// Mark every cluster in the FAT32 root directory's own chain
/// reachable, without running it through [`check_file`]'s directory
/// sanity or cross-link negotiation (the root has no parent entry to
/// repair and nothing to truncate it against). Without this, the
/// root's clusters would never be marked reachable at all — `check_file`
/// is only ever called on a directory's *children* — and orphan
/// reclamation would see them as abandoned and free the root out from
/// under the volume. Stops defensively on a cycle rather than looping.
pub fn mark_root_chain_reachable(fat: &mut FatTable, start: u32) {
    let mut seen = HashSet::new();
    let mut curr = start;
    while curr != 0 && seen.insert(curr) {
        fat.reachable.set(curr, true);
        match fat.get_fat(curr) {
            ClusterValue::Next(next) => curr = next,
            _ => break,
        }
    }
}

fn detach(
    device: &mut Device,
    fat: &mut FatTable,
    tree: &mut Tree,
    id: NodeId,
    offset: u64,
    prev: u32,
    start: u32,
) {
    if prev == 0 {
        set_start(device, tree, id, offset, 0);
        set_size(device, tree, id, offset, 0);
        let _ = start;
    } else {
        fat.set_fat(device, prev, ClusterValue::Eoc);
    }
}

fn set_start(device: &mut Device, tree: &mut Tree, id: NodeId, offset: u64, cluster: u32) {
    tree.get_mut(id).entry.set_cluster(cluster);
    let entry = tree.get(id).entry;
    device.write(offset, bytemuck::bytes_of(&entry));
}

fn set_size(device: &mut Device, tree: &mut Tree, id: NodeId, offset: u64, size: u32) {
    tree.get_mut(id).entry.set_size(size);
    let entry = tree.get(id).entry;
    device.write(offset, bytemuck::bytes_of(&entry));
}

pub(crate) fn delete_entry(device: &mut Device, tree: &mut Tree, id: NodeId, offset: u64) {
    use crate::structures::directory_entry::NAME_DELETED;
    tree.get_mut(id).entry.name[0] = NAME_DELETED;
    device.write(offset, &[NAME_DELETED]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{InteractivityMode, SilentReporter};
    use crate::structures::directory_entry::{FileAttributes, RawShortEntry};
    use bytemuck::Zeroable;

    fn setup() -> (Device, Geometry, FatTable, EngineContext) {
        let mut img = vec![0u8; 1474560];
        let common = crate::structures::boot_sector::RawBootSectorCommon {
            jump: [0xEB, 0x3C, 0x90],
            oem_name: crate::structures::FatStr::new_truncate("MSDOS5.0"),
            bytes_per_sector: 512u16.to_le_bytes(),
            sectors_per_cluster: 1,
            reserved_sector_count: 1u16.to_le_bytes(),
            fat_count: 2,
            root_entry_count: 224u16.to_le_bytes(),
            total_sectors_16: 2880u16.to_le_bytes(),
            media_type: crate::structures::boot_sector::MediaType::HighDensityFloppy as u8,
            sectors_per_fat_16: 9u16.to_le_bytes(),
            sectors_per_track: 18u16.to_le_bytes(),
            num_heads: 2u16.to_le_bytes(),
            hidden_sector_count: 0u32.to_le_bytes(),
            total_sectors_32: 0u32.to_le_bytes(),
        };
        img[0..36].copy_from_slice(bytemuck::bytes_of(&common));
        let ext = crate::structures::boot_sector::RawBpbExtended16 {
            drive_number: 0,
            reserved1: 0,
            ext_boot_signature: 0x29,
            volume_id: 1u32.to_le_bytes(),
            volume_label: crate::structures::FatStr::new_truncate("NO NAME"),
            fs_type: crate::structures::FatStr::new_truncate("FAT12   "),
            boot_code: [0; 448],
            signature_word: 0u16.to_le_bytes(),
        };
        img[36..512].copy_from_slice(bytemuck::bytes_of(&ext));
        img[510] = 0x55;
        img[511] = 0xAA;
        for copy in 0..2u64 {
            let base = (512 + copy * 9 * 512) as usize;
            img[base] = 0xF0;
            img[base + 1] = 0xFF;
            img[base + 2] = 0xFF;
        }

        let mut dev = Device::from_memory(img);
        let geo = Geometry::read(&mut dev, false).unwrap();
        let mut ctx = EngineContext::new(InteractivityMode::Auto, Box::new(SilentReporter::default()));
        let fat = FatTable::load(&mut dev, &geo, &mut ctx).unwrap();
        (dev, geo, fat, ctx)
    }

    #[test]
    fn directory_size_is_forced_to_zero() {
        let (mut dev, geo, mut fat, mut ctx) = setup();
        let mut tree = Tree::new();
        let root = tree.alloc_fat32_root(0);
        let entry = RawShortEntry {
            name: *b"SUBDIR     ",
            attributes: FileAttributes::DIRECTORY.bits(),
            size: 123u32.to_le_bytes(),
            ..RawShortEntry::zeroed()
        };
        let child = tree.alloc_child(root, entry, 1024, None);
        tree.get_mut(child).entry.set_cluster(0);
        check_file(&mut dev, &geo, &mut fat, &mut tree, child, &mut ctx).unwrap();
        assert_eq!(tree.get(child).entry.size(), 0);
    }
}
