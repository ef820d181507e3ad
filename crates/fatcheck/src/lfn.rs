//! VFAT long-filename reassembly (spec §4.4).
//!
//! Slots are stored on disk in descending sequence order immediately
//! before the short entry they name, with the slot closest to the short
//! entry carrying the "last" bit and the highest sequence number — so a
//! forward directory scan meets them highest-sequence-first, counting
//! down to 1.

use crate::structures::directory_entry::{RawLfnEntry, LFN_CHARS_PER_SLOT};

/// Accumulates an in-progress long name across consecutive LFN slots.
#[derive(Debug, Default)]
pub struct LfnAccumulator {
    slots: Vec<Option<[u16; LFN_CHARS_PER_SLOT]>>,
    checksum: u8,
    /// The sequence index the next slot fed in must carry; counts down
    /// from the total slot count to 1.
    expected_next: u8,
    offsets: Vec<u64>,
}

/// What happened to a slot fed into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    /// Accepted as part of the (possibly just-started) sequence.
    Continued,
    /// Rejected; any prior partial sequence was discarded as an orphan.
    /// `had_orphan` is true iff there was something to discard.
    Rejected { had_orphan: bool },
}

impl LfnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.offsets.clear();
        self.expected_next = 0;
        self.checksum = 0;
    }

    /// Feed one LFN-attributed slot at `offset`.
    pub fn push(&mut self, entry: &RawLfnEntry, offset: u64) -> FeedResult {
        if entry.is_deleted() {
            let had_orphan = self.is_active();
            self.reset();
            return FeedResult::Rejected { had_orphan };
        }

        let idx = entry.sequence_index();
        if idx == 0 {
            let had_orphan = self.is_active();
            self.reset();
            return FeedResult::Rejected { had_orphan };
        }

        if entry.is_last() {
            let had_orphan = self.is_active();
            self.slots = vec![None; idx as usize];
            self.checksum = entry.checksum;
            self.expected_next = idx;
            self.offsets.clear();
            let _ = had_orphan; // a fresh "last" slot always starts clean
        }

        if self.slots.is_empty() || idx != self.expected_next || entry.checksum != self.checksum {
            let had_orphan = self.is_active();
            self.reset();
            return FeedResult::Rejected { had_orphan };
        }

        self.slots[(idx - 1) as usize] = Some(entry.chars());
        self.offsets.push(offset);
        self.expected_next = idx - 1;
        FeedResult::Continued
    }

    /// Attempt to bind the accumulated name to a short entry carrying
    /// `short_checksum`. Returns the assembled name on success; `None`
    /// if the accumulator is empty, incomplete, or checksum-mismatched
    /// (in which case it is still consumed — the caller should warn
    /// about an orphaned sequence when `is_active()` was true).
    pub fn take(&mut self, short_checksum: u8) -> Option<String> {
        if !self.is_active() {
            return None;
        }
        let complete = self.expected_next == 0 && self.slots.iter().all(Option::is_some);
        let result = if complete && self.checksum == short_checksum {
            Some(decode_name(&self.slots))
        } else {
            None
        };
        self.reset();
        result
    }

    /// Byte offsets of every slot consumed by the sequence currently
    /// held (used by `remove_lfn` once the owning short entry is
    /// identified).
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}

fn decode_name(slots: &[Option<[u16; LFN_CHARS_PER_SLOT]>]) -> String {
    let mut units = Vec::with_capacity(slots.len() * LFN_CHARS_PER_SLOT);
    for slot in slots {
        let chars = slot.expect("completeness checked by caller");
        for unit in chars {
            match unit {
                0x0000 => return String::from_utf16_lossy(&units),
                0xFFFF => continue, // padding after the terminator
                _ => units.push(unit),
            }
        }
    }
    String::from_utf16_lossy(&units)
}
