//! Volume-label syntax and boot-sector/root reconciliation (spec §4.9).

use crate::context::EngineContext;
use crate::error::CheckError;
use crate::geometry::Geometry;
use crate::io::Device;
use crate::structures::directory_entry::{FileAttributes, RawShortEntry};
use crate::structures::time::now;
use crate::structures::FatStr;

/// The label text FAT uses to mean "no label set".
pub const NO_NAME: &str = "NO NAME    ";

/// Bytes never allowed in a label, beyond the general `< 0x20` rule.
const DISALLOWED: &[u8] = b"\"*./:<>?\\|";

/// Whether `label` passes the character rules of §4.9 (independent of
/// whether it means "no label").
pub fn syntax_ok(label: &FatStr<11>) -> bool {
    label
        .as_bytes()
        .iter()
        .all(|&b| b >= 0x20 && !DISALLOWED.contains(&b))
}

/// A label is valid iff it is syntactically sound, non-empty, not all
/// spaces, and not the "no label" sentinel.
pub fn is_valid(label: &FatStr<11>) -> bool {
    let trimmed = label.trimmed();
    !trimmed.is_empty() && label.as_bytes() != NO_NAME.as_bytes() && syntax_ok(label)
}

/// One label entry found in the root directory during the walk.
#[derive(Debug, Clone)]
pub struct RootLabel {
    pub offset: u64,
    pub text: FatStr<11>,
}

/// A decision the reconciliation table can reach; `Prompt` variants
/// carry the choices shown to the user (index 0 is always the default
/// taken in auto mode).
enum Decision {
    Nothing,
    RemoveBoot,
    SetBootFromRoot(FatStr<11>),
    CopyBootToRoot(FatStr<11>),
    CopyRootToBoot(FatStr<11>),
    RemoveRoot(u64),
    RemoveAllRootButFirst(Vec<u64>),
}

/// Reconcile the boot-sector label against whatever was found in the
/// root directory. `boot_label_offset` is the field inside the boot
/// sector itself. `new_root_slot` is a free-or-end root directory
/// offset the walker already found during its scan, used only if the
/// reconciliation decides to write a label into the root and none
/// exists yet; if `None` and that happens, the copy is reported but
/// skipped.
pub fn reconcile(
    device: &mut Device,
    geo: &Geometry,
    ctx: &mut EngineContext,
    boot_label_offset: u64,
    root_labels: &[RootLabel],
    new_root_slot: Option<u64>,
) -> Result<(), CheckError> {
    let boot_label = geo.label;
    let boot_valid = is_valid(&boot_label);
    let boot_is_no_name = boot_label.as_bytes() == NO_NAME.as_bytes();

    let decision = if root_labels.len() > 1 {
        let choices = ["remove all", "keep first label, remove the rest", "select one"];
        let pick = if ctx.mode.is_interactive() {
            ctx.reporter.prompt("multiple volume labels found in root", &choices, 0)
        } else {
            1
        };
        match pick {
            0 => Decision::RemoveAllRootButFirst(root_labels.iter().map(|l| l.offset).collect()),
            _ => Decision::RemoveAllRootButFirst(
                root_labels.iter().skip(1).map(|l| l.offset).collect(),
            ),
        }
    } else if let Some(root) = root_labels.first() {
        let root_valid = is_valid(&root.text);
        if !root_valid {
            let choices = ["remove the root label", "set a new label"];
            let pick = if ctx.mode.is_interactive() {
                ctx.reporter.prompt("root volume label is invalid", &choices, 0)
            } else {
                0
            };
            match pick {
                1 => Decision::SetBootFromRoot(boot_label),
                _ => Decision::RemoveRoot(root.offset),
            }
        } else if boot_is_no_name {
            let choices = ["remove the root label", "copy it to the boot sector"];
            let pick = if ctx.mode.is_interactive() {
                ctx.reporter.prompt("boot sector has no label but root does", &choices, 0)
            } else {
                0
            };
            match pick {
                1 => Decision::CopyRootToBoot(root.text),
                _ => Decision::RemoveRoot(root.offset),
            }
        } else if !boot_valid {
            let choices = ["copy root label to boot sector", "set a new label"];
            let pick = if ctx.mode.is_interactive() {
                ctx.reporter.prompt("boot sector label is invalid", &choices, 0)
            } else {
                0
            };
            match pick {
                1 => Decision::SetBootFromRoot(boot_label),
                _ => Decision::CopyRootToBoot(root.text),
            }
        } else if root.text.as_bytes() != boot_label.as_bytes() {
            let choices = ["copy boot label to root", "copy root label to boot (default)"];
            let pick = if ctx.mode.is_interactive() {
                ctx.reporter.prompt("boot and root labels differ", &choices, 0)
            } else {
                1
            };
            match pick {
                0 => Decision::CopyBootToRoot(boot_label),
                _ => Decision::CopyRootToBoot(root.text),
            }
        } else {
            Decision::Nothing
        }
    } else if boot_is_no_name {
        Decision::Nothing
    } else if !boot_valid {
        let choices = ["remove the boot label", "set a new label"];
        let pick = if ctx.mode.is_interactive() {
            ctx.reporter.prompt("boot sector label is invalid", &choices, 0)
        } else {
            0
        };
        match pick {
            1 => Decision::SetBootFromRoot(boot_label),
            _ => Decision::RemoveBoot,
        }
    } else {
        let choices = ["remove the boot label", "copy it to the root directory"];
        let pick = if ctx.mode.is_interactive() {
            ctx.reporter.prompt("boot sector has a label but root has none", &choices, 0)
        } else {
            0
        };
        match pick {
            1 => Decision::CopyBootToRoot(boot_label),
            _ => Decision::RemoveBoot,
        }
    };

    apply(device, ctx, boot_label_offset, new_root_slot, &decision)
}

fn apply(
    device: &mut Device,
    ctx: &mut EngineContext,
    boot_label_offset: u64,
    new_root_slot: Option<u64>,
    decision: &Decision,
) -> Result<(), CheckError> {
    if !ctx.may_write() {
        return Ok(());
    }
    match decision {
        Decision::Nothing => {}
        Decision::RemoveBoot => write_boot_label(device, boot_label_offset, &FatStr::new_truncate(NO_NAME.trim_end())),
        Decision::SetBootFromRoot(text) | Decision::CopyRootToBoot(text) => {
            write_boot_label(device, boot_label_offset, text)
        }
        Decision::CopyBootToRoot(text) => match new_root_slot {
            Some(offset) => write_root_label(device, offset, *text),
            None => ctx.reporter.warn("no free root directory slot for the volume label"),
        },
        Decision::RemoveRoot(offset) => delete_root_entry(device, *offset),
        Decision::RemoveAllRootButFirst(offsets) => {
            for offset in offsets {
                delete_root_entry(device, *offset);
            }
        }
    }
    Ok(())
}

fn write_boot_label(device: &mut Device, offset: u64, text: &FatStr<11>) {
    device.write(offset, text.as_bytes());
}

fn delete_root_entry(device: &mut Device, offset: u64) {
    device.write(offset, &[crate::structures::directory_entry::NAME_DELETED]);
}

/// Write (or overwrite) the root directory's volume-label entry at
/// `offset` with `text`, stamping the current time.
fn write_root_label(device: &mut Device, offset: u64, text: FatStr<11>) {
    let (date, time) = now();
    let entry = RawShortEntry {
        name: *text.as_bytes(),
        attributes: FileAttributes::VOLUME_LABEL.bits(),
        case_info: 0,
        creation_time_tenths: 0,
        creation_time: time.0.to_le_bytes(),
        creation_date: date.0.to_le_bytes(),
        last_access_date: date.0.to_le_bytes(),
        first_cluster_hi: [0; 2],
        write_time: time.0.to_le_bytes(),
        write_date: date.0.to_le_bytes(),
        first_cluster_lo: [0; 2],
        size: [0; 4],
    };
    device.write(offset, bytemuck::bytes_of(&entry));
}
