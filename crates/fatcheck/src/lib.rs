//! A consistency checker and repair engine for MS-DOS / Windows FAT
//! volumes (FAT12, FAT16, FAT32, including the VFAT long-filename
//! extension).
//!
//! This crate does not mount the filesystem and does not offer a POSIX
//! file API; it loads the redundant FATs into an authoritative in-memory
//! view, walks the directory tree, validates cluster chains, and can
//! repair the anomalies it finds through a pending [`io::ChangeLog`]
//! that is only committed to the backing device on request.
//!
//! ## Cargo features
//!
//! - **std** (default): pulls in `chrono` clock support and the
//!   `memmap2`-backed FAT32 cache window. Disabling it restricts the
//!   crate to in-memory devices with no wall-clock timestamps.

pub mod context;
pub mod error;
pub mod io;
pub mod structures;

pub mod chain;
pub mod dirty;
pub mod driver;
pub mod fat;
pub mod geometry;
pub mod label;
pub mod lfn;
pub mod orphan;
pub mod tree;
pub mod walker;

pub use context::EngineContext;
pub use driver::{Driver, RunSummary};
pub use error::CheckError;
pub use geometry::{FatVariant, Geometry};
