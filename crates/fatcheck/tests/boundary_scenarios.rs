//! End-to-end boundary scenarios run through the whole [`Driver`]
//! pipeline against hand-built FAT12 images, one per repair menu this
//! engine implements.

mod common;

use common::*;
use fatcheck::context::{EngineContext, InteractivityMode, SilentReporter};
use fatcheck::error::ExitStatus;
use fatcheck::Driver;

fn ctx(mode: InteractivityMode) -> EngineContext {
    EngineContext::new(mode, Box::new(SilentReporter::default()))
}

/// Two files cross-linked on the same start cluster: the second entry
/// in the root directory loses the cluster, ending up empty, while the
/// first keeps it untouched.
#[test]
fn cross_linked_files_sharing_a_start_cluster_are_separated() {
    let mut img = blank_fat12_image();
    set_fat12(&mut img, 4, 0xFFF); // EOC: a single-cluster file

    write_file(&mut img, root_slot(0), b"FIRST   TXT", 4, 512);
    write_file(&mut img, root_slot(1), b"SECOND  TXT", 4, 512);

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    let summary = driver.run(&mut c).unwrap();

    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);
    assert_eq!(summary.counters.n_files, 2);
}

/// Two files cross-linked mid-chain, on a cluster that is neither
/// file's start: `FIRST` (5 -> 6 -> 7) is walked first and keeps the
/// cluster; `SECOND` (9 -> 6, diverted away from 6 since the FAT only
/// has one link for it) is truncated at the point it ran into already-
/// claimed territory.
#[test]
fn cross_linked_files_sharing_a_mid_chain_cluster_are_separated() {
    let mut img = blank_fat12_image();
    set_fat12(&mut img, 5, 6);
    set_fat12(&mut img, 6, 7);
    set_fat12(&mut img, 7, 0xFFF);
    set_fat12(&mut img, 9, 6);

    write_file(&mut img, root_slot(0), b"FIRST   TXT", 5, 3 * CLUSTER_SIZE as u32);
    write_file(&mut img, root_slot(1), b"SECOND  TXT", 9, 3 * CLUSTER_SIZE as u32);

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    let summary = driver.run(&mut c).unwrap();

    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);
    assert_eq!(summary.counters.n_files, 2);

    let img2 = driver.snapshot();
    assert_eq!(read_fat12(&img2, 5), 6, "FIRST's chain must survive untouched");
    assert_eq!(read_fat12(&img2, 6), 7, "FIRST's chain must survive untouched");
    assert_eq!(read_fat12(&img2, 7), 0xFFF, "FIRST's chain must survive untouched");
    assert_eq!(read_fat12(&img2, 9), 0xFFF, "SECOND must be truncated to a single cluster");
}

/// A file whose own chain cycles back on itself: the loop must be cut
/// rather than followed forever.
#[test]
fn a_cyclic_chain_is_truncated_instead_of_looping() {
    let mut img = blank_fat12_image();
    set_fat12(&mut img, 4, 5);
    set_fat12(&mut img, 5, 4); // 4 -> 5 -> 4 -> ...

    write_file(&mut img, root_slot(0), b"LOOP    TXT", 4, 1024);

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    let summary = driver.run(&mut c).unwrap();

    assert_eq!(summary.counters.n_files, 1);
    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);
}

/// A directory entry with a non-zero declared size is always forced
/// back to zero, regardless of what was on disk.
#[test]
fn directory_with_nonzero_size_is_corrected() {
    let mut img = blank_fat12_image();
    set_fat12(&mut img, 4, 0xFFF);
    write_dir(&mut img, root_slot(0), b"SUBDIR     ", 4);
    // Directory entries store a size field even though it is meaningless.
    img[root_slot(0) + 28] = 0x34;
    img[root_slot(0) + 29] = 0x12;

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    let summary = driver.run(&mut c).unwrap();
    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);
}

/// An allocated cluster chain with no directory entry pointing at it
/// (an orphan) is recovered as a `FSCKnnnnREC` file under `-f`.
#[test]
fn orphan_chain_is_salvaged_as_a_recovered_file() {
    let mut img = blank_fat12_image();
    set_fat12(&mut img, 4, 0xFFF); // allocated, but nothing references it

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    c.salvage_orphans = true;
    let summary = driver.run(&mut c).unwrap();

    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);
    assert_eq!(summary.counters.n_files, 1);
    assert_eq!(summary.counters.alloc_clusters, 1);
}

/// The same orphan, without `-f`, is simply freed instead of recovered.
#[test]
fn orphan_chain_is_freed_without_salvage() {
    let mut img = blank_fat12_image();
    set_fat12(&mut img, 4, 0xFFF);

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    let summary = driver.run(&mut c).unwrap();

    assert_eq!(summary.counters.n_files, 0);
    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);
}

/// Boot label `MYDISK`, single root label `OLDDISK`, both valid: with
/// `-a` the default is root-to-boot, so the boot sector ends up holding
/// `OLDDISK` and the root entry is untouched.
#[test]
fn mismatched_volume_labels_default_to_copying_root_to_boot() {
    let mut img = blank_fat12_image();
    img[43..54].copy_from_slice(b"MYDISK     ");
    write_volume_label(&mut img, root_slot(0), b"OLDDISK    ");

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    let summary = driver.run(&mut c).unwrap();
    assert_eq!(summary.exit_status, ExitStatus::CORRECTED);

    // Re-open the (now committed) image and confirm the boot label.
    let img2 = redrive_and_capture(&mut driver);
    assert_eq!(&img2[43..54], b"OLDDISK    ");
}

/// `-C` only reports the dirty bit; it must never write, even when the
/// volume is dirty. FAT12 carries no dirty bit at all, so this needs a
/// genuine FAT16 volume.
#[test]
fn dirty_only_mode_reports_without_writing() {
    let mut img = blank_fat16_image();
    img[36] = 0; // clear BS_DrvNum's clean-shutdown / no-errors bits

    let mut driver = Driver::from_memory(img);
    let mut c = ctx(InteractivityMode::Auto);
    c.dirty_only = true;
    let summary = driver.run(&mut c).unwrap();
    assert!(!summary.device_changed);
    assert_eq!(summary.exit_status, ExitStatus::UNCORRECTED);
    assert!(c.counters.remain_dirty);
}

/// Helper: drive a second pass over the same in-memory device and
/// return the raw bytes, to inspect what the first pass actually
/// committed. `Driver` owns the device, so this reaches in through a
/// throwaway `-n` run that cannot itself mutate anything further.
fn redrive_and_capture(driver: &mut Driver) -> Vec<u8> {
    let mut c = EngineContext::new(InteractivityMode::ReadOnly, Box::new(SilentReporter::default()));
    driver.run(&mut c).unwrap();
    driver.snapshot()
}
