//! Directory tree walk (spec §4.5, §4.7): builds the in-memory [`Tree`],
//! reassembles VFAT long names, repairs bad or duplicate short names,
//! enforces the `.`/`..` convention, and hands every live entry to
//! [`crate::chain::check_file`] before recursing into subdirectories.

use std::collections::HashSet;

use crate::chain;
use crate::context::EngineContext;
use crate::error::CheckError;
use crate::fat::FatTable;
use crate::geometry::Geometry;
use crate::io::Device;
use crate::label::RootLabel;
use crate::lfn::LfnAccumulator;
use crate::structures::directory_entry::{
    FileAttributes, RawShortEntry, LFN_ATTR_MASK, NAME_DELETED, NAME_ESCAPE_E5,
};
use crate::structures::fat_entry::ClusterValue;
use crate::tree::{NodeId, Tree};

/// A non-fatal, repairable condition found during the walk. Each is
/// reported through [`crate::context::Reporter::warn`] as it is found
/// and fixed; nothing here aborts the run.
#[derive(Debug, Clone)]
pub enum Anomaly {
    BadShortName { name: String },
    DuplicateShortName { name: String, renamed_to: String },
    OrphanLfnSlots { count: usize },
    MissingDotEntry { directory: String, which: &'static str },
    BadDotEntry { directory: String, which: &'static str },
}

impl Anomaly {
    pub fn describe(&self) -> String {
        match self {
            Anomaly::BadShortName { name } => format!("'{name}' has an invalid short name"),
            Anomaly::DuplicateShortName { name, renamed_to } => {
                format!("duplicate short name '{name}', renamed to '{renamed_to}'")
            }
            Anomaly::OrphanLfnSlots { count } => {
                format!("{count} long-name slot(s) without a matching short entry")
            }
            Anomaly::MissingDotEntry { directory, which } => {
                format!("'{directory}' is missing its '{which}' entry")
            }
            Anomaly::BadDotEntry { directory, which } => {
                format!("'{directory}' has an invalid '{which}' entry")
            }
        }
    }
}

/// Everything the driver needs out of one full walk.
pub struct WalkResult {
    pub tree: Tree,
    pub root: NodeId,
    /// A free (or just-extended) root-directory slot, usable by the
    /// label reconciler or the orphan reclaimer if they need to append
    /// an entry.
    pub new_root_slot: Option<u64>,
    pub root_labels: Vec<RootLabel>,
    /// Set if a cross-link truncated a directory already reflected in
    /// the tree; the driver must restart the whole walk once this
    /// happens, since everything below that point may be stale.
    pub restart_required: bool,
}

/// Walk the whole tree starting at the root directory.
pub fn scan_root(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
) -> Result<WalkResult, CheckError> {
    let mut tree = Tree::new();
    let root = if geo.variant == crate::geometry::FatVariant::Fat32 {
        let id = tree.alloc_fat32_root(geo.root_cluster);
        chain::mark_root_chain_reachable(fat, geo.root_cluster);
        id
    } else {
        tree.alloc_fixed_root()
    };

    let mut root_labels = Vec::new();
    let mut new_root_slot = None;
    let mut restart_required = false;

    scan_directory(
        device,
        geo,
        fat,
        ctx,
        &mut tree,
        root,
        "",
        &mut root_labels,
        &mut new_root_slot,
        &mut restart_required,
    )?;

    Ok(WalkResult {
        tree,
        root,
        new_root_slot,
        root_labels,
        restart_required,
    })
}

/// The 32-byte slot offsets backing one directory's contents, in order.
/// For the FAT12/16 fixed root this is a flat range; otherwise it walks
/// the directory's own cluster chain. Cycles are cut defensively (the
/// owning node's chain may not yet have been validated by
/// [`chain::check_file`] when this is the root itself).
fn dir_slot_offsets(fat: &FatTable, geo: &Geometry, tree: &Tree, dir: NodeId) -> Vec<u64> {
    if tree.get(dir).is_synthetic_root && geo.variant != crate::geometry::FatVariant::Fat32 {
        let count = geo.root_entry_count as u64;
        return (0..count).map(|i| geo.root_start + i * 32).collect();
    }

    let start = tree.get(dir).start_cluster();
    if start == 0 {
        return Vec::new();
    }

    let mut offsets = Vec::new();
    let mut seen = HashSet::new();
    let mut cluster = start;
    loop {
        if !seen.insert(cluster) {
            break;
        }
        let base = geo.cluster_start(cluster);
        let slots_per_cluster = geo.cluster_size as u64 / 32;
        for i in 0..slots_per_cluster {
            offsets.push(base + i * 32);
        }
        match fat.get_fat(cluster) {
            ClusterValue::Next(next) => cluster = next,
            _ => break,
        }
    }
    offsets
}

/// Bytes that OS/2 extended-attribute stubs are allowed to use as a
/// literal short name, even though they fail the normal character rule.
const EA_EXCEPTION_NAMES: [&[u8; 11]; 2] = [b"EA DATA  SF", b"WP ROOT  SF"];

/// Whether `name` (the raw 11-byte short-name field) passes the
/// character rules of spec §4.5, given the current interactivity mode
/// (the high-bit-byte-count rule only applies when a human can be
/// asked to confirm it).
fn is_bad_short_name(name: &[u8; 11], interactive: bool) -> bool {
    if EA_EXCEPTION_NAMES.contains(&name) {
        return false;
    }

    let mut high_bit_count = 0usize;
    for (i, &b) in name.iter().enumerate() {
        let is_escape = i == 0 && b == NAME_ESCAPE_E5;
        if !is_escape && (b < 0x20 || b == 0x7F) {
            return true;
        }
        if b >= 0x80 {
            high_bit_count += 1;
        }
        let disallowed = b"\"*+,./:;<=>?[\\]|";
        if disallowed.contains(&b) {
            return true;
        }
    }
    if interactive && high_bit_count > 6 {
        return true;
    }

    // A space may not be followed by a non-space within either the base
    // (0..8) or the extension (8..11) half.
    for half in [&name[0..8], &name[8..11]] {
        let mut seen_space = false;
        for &b in half {
            if b == b' ' {
                seen_space = true;
            } else if seen_space {
                return true;
            }
        }
    }
    false
}

/// Generate the next `FSCKnnnnmmm` fallback short name for an entry
/// whose real name collided or was rejected; `attempt` counts upward
/// from 0 and must stay below ten million per spec §4.5.
fn fallback_short_name(attempt: u32) -> [u8; 11] {
    let digits = format!("{attempt:07}");
    let mut out = *b"FSCK0000000";
    out[4..11].copy_from_slice(&digits.as_bytes()[..7]);
    out
}

/// Encode a plain `NAME.EXT` string into an 11-byte 8.3 short-name
/// field: uppercased, split at the last `.`, each half truncated and
/// space-padded. Used only to turn a `-u PATH` hint's basename into the
/// bytes a recovered deleted entry's last 10 bytes must match.
fn encode_short_name(name: &str) -> [u8; 11] {
    let upper = name.to_ascii_uppercase();
    let (base, ext) = match upper.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (upper.as_str(), ""),
    };
    let mut out = [b' '; 11];
    for (i, b) in base.bytes().take(8).enumerate() {
        out[i] = b;
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        out[8 + i] = b;
    }
    out
}

/// The basename (final path component) of a `/`-separated force-drop or
/// force-undelete path hint.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether any still-pending `-u` hint names an entry inside `dir_path`
/// whose basename's last 10 bytes (everything but the deletion-marker
/// byte, which overwrote and lost the real first character) match
/// `stored`. Returns the matched hint so the caller can consume it.
fn find_undelete_match(
    hints: &HashSet<String>,
    dir_path: &str,
    stored: &[u8; 11],
) -> Option<String> {
    for hint in hints {
        let (hint_dir, hint_base) = match hint.rsplit_once('/') {
            Some((d, b)) => (d, b),
            None => ("", hint.as_str()),
        };
        if hint_dir != dir_path {
            continue;
        }
        let candidate = encode_short_name(hint_base);
        if candidate[1..11] == stored[1..11] {
            return Some(hint.clone());
        }
    }
    None
}

fn process_directory_entries(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
    tree: &mut Tree,
    dir: NodeId,
    path: &str,
    root_labels: &mut Vec<RootLabel>,
    new_root_slot: &mut Option<u64>,
) -> Result<Vec<NodeId>, CheckError> {
    let offsets = dir_slot_offsets(fat, geo, tree, dir);
    let is_root_dir = tree.get(dir).is_synthetic_root;

    let mut lfn = LfnAccumulator::new();
    let mut children = Vec::new();
    let mut seen_names: HashSet<[u8; 11]> = HashSet::new();
    let mut free_slot: Option<u64> = None;
    let mut reached_end = false;

    for offset in offsets {
        if reached_end {
            if free_slot.is_none() {
                free_slot = Some(offset);
            }
            continue;
        }

        let raw = device.read(offset, 32)?;
        let entry: RawShortEntry = *bytemuck::from_bytes(&raw);

        if entry.is_end_of_dir() {
            reached_end = true;
            free_slot = Some(offset);
            continue;
        }

        if entry.attrs().bits() == LFN_ATTR_MASK.bits() {
            let lfn_entry = *bytemuck::from_bytes::<crate::structures::directory_entry::RawLfnEntry>(&raw);
            if let crate::lfn::FeedResult::Rejected { had_orphan } = lfn.push(&lfn_entry, offset) {
                if had_orphan {
                    ctx.reporter
                        .warn(&Anomaly::OrphanLfnSlots { count: 1 }.describe());
                }
            }
            continue;
        }

        if entry.name[0] == NAME_DELETED {
            lfn.reset();
            if let Some(matched_path) = find_undelete_match(&ctx.force_undelete, path, &entry.name) {
                let restored = encode_short_name(basename(&matched_path));
                let mut revived = entry;
                revived.name = restored;
                ctx.reporter.warn(&format!("force-undeleting '{matched_path}'"));
                if ctx.may_write() {
                    device.write(offset, bytemuck::bytes_of(&revived));
                }
                ctx.force_undelete.remove(&matched_path);
                let long_name = lfn.take(revived.checksum());
                seen_names.insert(restored);
                let id = tree.alloc_child(dir, revived, offset, long_name);
                children.push(id);
                continue;
            }
            if free_slot.is_none() {
                free_slot = Some(offset);
            }
            continue;
        }

        let long_name = lfn.take(entry.checksum());

        if entry.attrs().contains(FileAttributes::VOLUME_LABEL) && is_root_dir {
            root_labels.push(RootLabel {
                offset,
                text: entry.short_name(),
            });
            continue;
        }

        let mut name = entry.name;
        let short_name_trimmed = entry.short_name().trimmed().to_string();
        let bad = is_bad_short_name(&name, ctx.mode.is_interactive());
        let dup = seen_names.contains(&name);

        let mut final_entry = entry;
        if bad || dup {
            let mut attempt = 0u32;
            loop {
                if attempt >= 10_000_000 {
                    return Err(CheckError::Internal(
                        "exhausted FSCK fallback short names".into(),
                    ));
                }
                let candidate = fallback_short_name(attempt);
                if !seen_names.contains(&candidate) {
                    name = candidate;
                    break;
                }
                attempt += 1;
            }
            final_entry.name = name;
            if ctx.may_write() {
                device.write(offset, &final_entry.name);
            }
            let new_name = final_entry.short_name().trimmed().to_string();
            if bad {
                ctx.reporter.warn(
                    &Anomaly::BadShortName {
                        name: short_name_trimmed.clone(),
                    }
                    .describe(),
                );
            } else {
                ctx.reporter.warn(
                    &Anomaly::DuplicateShortName {
                        name: short_name_trimmed.clone(),
                        renamed_to: new_name,
                    }
                    .describe(),
                );
            }
        }
        seen_names.insert(name);

        let id = tree.alloc_child(dir, final_entry, offset, long_name);
        children.push(id);
    }

    if free_slot.is_some() && is_root_dir && new_root_slot.is_none() {
        *new_root_slot = free_slot;
    }

    Ok(children)
}

fn scan_directory(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
    tree: &mut Tree,
    dir: NodeId,
    path: &str,
    root_labels: &mut Vec<RootLabel>,
    new_root_slot: &mut Option<u64>,
    restart_required: &mut bool,
) -> Result<(), CheckError> {
    let children = process_directory_entries(
        device,
        geo,
        fat,
        ctx,
        tree,
        dir,
        path,
        root_labels,
        new_root_slot,
    )?;

    if !tree.get(dir).is_synthetic_root {
        check_dots(device, geo, fat, ctx, tree, dir, &children)?;
    }

    for &child in &children {
        let name = tree.get(child).short_name_trimmed();
        if name == "." || name == ".." {
            continue;
        }

        let child_path = format!("{path}/{}", tree.get(child).display_name());
        if ctx.list_paths {
            ctx.reporter.info(&child_path);
        }

        if ctx.force_drop.remove(&child_path) {
            ctx.reporter.warn(&format!("force-dropping '{child_path}'"));
            if ctx.may_write() {
                let offset = tree.get(child).offset;
                chain::delete_entry(device, tree, child, offset);
            }
            continue;
        }

        let outcome = chain::check_file(device, geo, fat, tree, child, ctx)?;
        if outcome.restart {
            *restart_required = true;
            return Ok(());
        }

        if tree.get(child).is_directory() && !tree.get(child).is_volume_label() {
            scan_directory(
                device, geo, fat, ctx, tree, child, &child_path, root_labels, new_root_slot,
                restart_required,
            )?;
            if *restart_required {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Verify (and, where necessary, repair or create) `dir`'s `.` and `..`
/// entries, per spec §4.7. `children` is the set already materialized
/// by [`process_directory_entries`], which includes any literal `.`/`..`
/// slots found on disk.
fn check_dots(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
    tree: &mut Tree,
    dir: NodeId,
    children: &[NodeId],
) -> Result<(), CheckError> {
    let parent = tree.parent_of(dir);
    let parent_start = parent.map(|p| tree.get(p).start_cluster()).unwrap_or(0);
    let grandparent_start = tree.grandparent_start(dir);
    let dir_name = tree.get(dir).display_name();

    // The Dot law binds slot indices, not just presence: `.` must sit
    // at slot 0 and `..` at slot 1, whatever else is in the directory.
    let offsets = dir_slot_offsets(fat, geo, tree, dir);
    let slot0 = offsets.first().copied();
    let slot1 = offsets.get(1).copied();

    ensure_dot_entry(
        device, geo, fat, ctx, tree, dir, children, slot0, ".", parent_start, &dir_name,
    )?;
    ensure_dot_entry(
        device, geo, fat, ctx, tree, dir, children, slot1, "..", grandparent_start, &dir_name,
    )?;

    Ok(())
}

/// Verify (and, where necessary, repair, evict, or create) the entry
/// bound to `which`'s reserved slot. `slot` is that slot's absolute
/// offset, taken from the directory's own slots (`None` only when the
/// directory currently has no clusters at all).
#[allow(clippy::too_many_arguments)]
fn ensure_dot_entry(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    ctx: &mut EngineContext,
    tree: &mut Tree,
    dir: NodeId,
    children: &[NodeId],
    slot: Option<u64>,
    which: &'static str,
    target_cluster: u32,
    dir_name: &str,
) -> Result<(), CheckError> {
    let occupant = slot.and_then(|offset| {
        children.iter().copied().find(|&id| tree.get(id).offset == offset)
    });
    let holds_dot_entry = occupant.is_some_and(|id| tree.get(id).short_name_trimmed() == which);

    if holds_dot_entry {
        let id = occupant.expect("holds_dot_entry implies occupant");
        if tree.get(id).start_cluster() != target_cluster {
            ctx.reporter.warn(
                &Anomaly::BadDotEntry {
                    directory: dir_name.to_string(),
                    which,
                }
                .describe(),
            );
            if ctx.may_write() {
                let offset = tree.get(id).offset;
                tree.get_mut(id).entry.set_cluster(target_cluster);
                let entry = tree.get(id).entry;
                device.write(offset, bytemuck::bytes_of(&entry));
            }
        }
        return Ok(());
    }

    ctx.reporter.warn(
        &Anomaly::MissingDotEntry {
            directory: dir_name.to_string(),
            which,
        }
        .describe(),
    );

    if !ctx.may_write() {
        return Ok(());
    }

    // Whatever occupies the reserved slot (if anything) isn't `.`/`..`
    // and has to go before a fresh entry can take its place.
    if let Some(id) = occupant {
        let offset = tree.get(id).offset;
        chain::delete_entry(device, tree, id, offset);
    }

    let offset = match slot {
        Some(offset) => offset,
        None => allocate_dir_cluster(device, geo, fat, tree, dir)?,
    };

    let mut entry = <RawShortEntry as bytemuck::Zeroable>::zeroed();
    entry.name = dot_entry_name(which);
    entry.attributes = FileAttributes::DIRECTORY.bits();
    entry.set_cluster(target_cluster);
    device.write(offset, bytemuck::bytes_of(&entry));
    Ok(())
}

/// `.`/`..`, left-justified and space-padded to the 11-byte short-name
/// field.
fn dot_entry_name(which: &str) -> [u8; 11] {
    let mut name = [b' '; 11];
    name[..which.len()].copy_from_slice(which.as_bytes());
    name
}

/// Grow `dir`'s own cluster chain by one cluster, zero it, and return
/// the offset of its first slot — used when neither `.` nor `..` has
/// anywhere left to go because the directory is out of slots (or has
/// no clusters at all yet).
fn allocate_dir_cluster(
    device: &mut Device,
    geo: &Geometry,
    fat: &mut FatTable,
    tree: &mut Tree,
    dir: NodeId,
) -> Result<u64, CheckError> {
    let new_cluster = fat
        .allocate_cluster(device)
        .ok_or_else(|| CheckError::Corrupt("no free cluster left to extend a directory".into()))?;

    let zeros = vec![0u8; geo.cluster_size as usize];
    device.write(geo.cluster_start(new_cluster), &zeros);

    let start = tree.get(dir).start_cluster();
    if start == 0 {
        let offset = tree.get(dir).offset;
        tree.get_mut(dir).entry.set_cluster(new_cluster);
        let entry = tree.get(dir).entry;
        device.write(offset, bytemuck::bytes_of(&entry));
    } else {
        let mut last = start;
        while let ClusterValue::Next(next) = fat.get_fat(last) {
            last = next;
        }
        fat.set_fat(device, last, ClusterValue::Next(new_cluster));
    }

    Ok(geo.cluster_start(new_cluster))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_short_name_rejects_control_bytes() {
        let name: [u8; 11] = *b"FO\x01  TXT   ";
        assert!(is_bad_short_name(&name, false));
    }

    #[test]
    fn ea_exception_name_is_always_accepted() {
        assert!(!is_bad_short_name(b"EA DATA  SF", true));
    }

    #[test]
    fn space_then_non_space_is_rejected() {
        assert!(is_bad_short_name(b"A B     TXT", false));
    }

    #[test]
    fn ordinary_name_is_accepted() {
        assert!(!is_bad_short_name(b"README  TXT", false));
    }

    #[test]
    fn fallback_names_are_unique_and_well_formed() {
        let a = fallback_short_name(0);
        let b = fallback_short_name(1);
        assert_ne!(a, b);
        assert!(a.starts_with(b"FSCK"));
    }
}
