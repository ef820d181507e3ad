//! FAT date/time encoding.
//!
//! A FAT date packs `(year-1980) << 9 | month << 5 | day`; a FAT time
//! packs `hour << 11 | minute << 5 | (second / 2)`. The checker only
//! needs to *stamp* timestamps when it creates `.`/`..` entries or a new
//! volume-label entry, so this module is a thin wrapper rather than a
//! full calendar library.

#[cfg(feature = "std")]
use chrono::{Datelike, Timelike};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FatDate(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FatTime(pub u16);

impl FatDate {
    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self((year.saturating_sub(1980) << 9) | ((month as u16) << 5) | day as u16)
    }
}

impl FatTime {
    pub fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self(((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2))
    }
}

/// The current wall-clock time, encoded as a FAT date/time pair. Used
/// when the engine fabricates `.`/`..` entries, a recovered-file entry,
/// or a new volume-label entry.
#[cfg(feature = "std")]
pub fn now() -> (FatDate, FatTime) {
    let now = chrono::Local::now();
    (
        FatDate::new(now.year() as u16, now.month() as u8, now.day() as u8),
        FatTime::new(now.hour() as u8, now.minute() as u8, now.second() as u8),
    )
}

#[cfg(not(feature = "std"))]
pub fn now() -> (FatDate, FatTime) {
    (FatDate::default(), FatTime::default())
}
