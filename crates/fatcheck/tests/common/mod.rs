//! Shared FAT12 image-construction helpers for the integration suite.
//!
//! Builds the same 1.44MB floppy layout the engine's own unit tests use
//! (512-byte sectors, 2 FATs of 9 sectors each, a 224-entry fixed root),
//! but exposes the raw byte offsets so a test can splice in directory
//! entries and FAT chains by hand before handing the image to
//! [`fatcheck::Driver`].

use bytemuck::Zeroable;
use fatcheck::structures::boot_sector::{MediaType, RawBootSectorCommon, RawBpbExtended16, RawBpbExtended32};
use fatcheck::structures::directory_entry::{FileAttributes, RawShortEntry};
use fatcheck::structures::FatStr;

pub const SECTOR: usize = 512;
pub const IMAGE_SIZE: usize = 1_474_560;
pub const FAT_START: usize = SECTOR;
pub const FAT_SIZE: usize = 9 * SECTOR;
pub const ROOT_ENTRIES: usize = 224;
pub const ROOT_START: usize = FAT_START + 2 * FAT_SIZE;
pub const DATA_START: usize = ROOT_START + ROOT_ENTRIES * 32;
pub const CLUSTER_SIZE: usize = SECTOR;

/// Byte offset of the `n`th root-directory slot.
pub fn root_slot(n: usize) -> usize {
    ROOT_START + n * 32
}

/// Byte offset of the first byte of `cluster`'s data.
pub fn cluster_offset(cluster: u32) -> usize {
    DATA_START + (cluster as usize - 2) * CLUSTER_SIZE
}

/// A blank, clean 1.44MB FAT12 image: valid boot sector, `NO NAME`
/// label, both FAT copies agreeing on the media-descriptor pattern, and
/// an otherwise all-zero (empty) root directory and data area.
pub fn blank_fat12_image() -> Vec<u8> {
    let mut img = vec![0u8; IMAGE_SIZE];
    let common = RawBootSectorCommon {
        jump: [0xEB, 0x3C, 0x90],
        oem_name: FatStr::new_truncate("MSDOS5.0"),
        bytes_per_sector: (SECTOR as u16).to_le_bytes(),
        sectors_per_cluster: 1,
        reserved_sector_count: 1u16.to_le_bytes(),
        fat_count: 2,
        root_entry_count: (ROOT_ENTRIES as u16).to_le_bytes(),
        total_sectors_16: 2880u16.to_le_bytes(),
        media_type: MediaType::HighDensityFloppy as u8,
        sectors_per_fat_16: 9u16.to_le_bytes(),
        sectors_per_track: 18u16.to_le_bytes(),
        num_heads: 2u16.to_le_bytes(),
        hidden_sector_count: 0u32.to_le_bytes(),
        total_sectors_32: 0u32.to_le_bytes(),
    };
    img[0..36].copy_from_slice(bytemuck::bytes_of(&common));
    let ext = RawBpbExtended16 {
        drive_number: 0,
        reserved1: 0,
        ext_boot_signature: 0x29,
        volume_id: 0x1234_5678u32.to_le_bytes(),
        volume_label: FatStr::new_truncate("NO NAME"),
        fs_type: FatStr::new_truncate("FAT12   "),
        boot_code: [0; 448],
        signature_word: 0u16.to_le_bytes(),
    };
    img[36..512].copy_from_slice(bytemuck::bytes_of(&ext));
    img[510] = 0x55;
    img[511] = 0xAA;

    for copy in 0..2usize {
        let base = FAT_START + copy * FAT_SIZE;
        set_fat12_raw(&mut img, base, 0, 0xF00 | 0xFF0);
        set_fat12_raw(&mut img, base, 1, 0xFFF);
    }
    img
}

/// Mirrors the crate's own FAT12 bit-packing (two 12-bit entries folded
/// into three bytes, nibble-swapped on odd indices), writing into both
/// FAT copies of `img` at once so they never disagree unless a test
/// deliberately corrupts one afterward.
pub fn set_fat12(img: &mut [u8], index: u32, value: u16) {
    for copy in 0..2usize {
        let base = FAT_START + copy * FAT_SIZE;
        set_fat12_raw(img, base, index, value);
    }
}

/// Read back a 12-bit FAT entry from the first FAT copy, mirroring the
/// crate's own nibble-swapped packing.
pub fn read_fat12(img: &[u8], index: u32) -> u16 {
    let index = index as usize;
    let byte_off = FAT_START + index + index / 2;
    if index % 2 == 0 {
        u16::from(img[byte_off]) | (u16::from(img[byte_off + 1] & 0x0F) << 8)
    } else {
        (u16::from(img[byte_off] & 0xF0) >> 4) | (u16::from(img[byte_off + 1]) << 4)
    }
}

fn set_fat12_raw(img: &mut [u8], fat_base: usize, index: u32, value: u16) {
    let index = index as usize;
    let byte_off = fat_base + index + index / 2;
    let value = value & 0x0FFF;
    if index % 2 == 0 {
        let existing_hi = img[byte_off + 1] & 0xF0;
        img[byte_off] = (value & 0xFF) as u8;
        img[byte_off + 1] = existing_hi | ((value >> 8) as u8);
    } else {
        let existing_lo = img[byte_off] & 0x0F;
        img[byte_off] = existing_lo | ((value << 4) as u8 & 0xF0);
        img[byte_off + 1] = (value >> 4) as u8;
    }
}

/// Write a short directory entry at absolute byte `offset`.
#[allow(clippy::too_many_arguments)]
pub fn write_entry(
    img: &mut [u8],
    offset: usize,
    name: &[u8; 11],
    attrs: FileAttributes,
    cluster: u32,
    size: u32,
) {
    let mut entry = RawShortEntry::zeroed();
    entry.name = *name;
    entry.attributes = attrs.bits();
    entry.set_cluster(cluster);
    entry.set_size(size);
    img[offset..offset + 32].copy_from_slice(bytemuck::bytes_of(&entry));
}

pub fn write_file(img: &mut [u8], offset: usize, name: &[u8; 11], cluster: u32, size: u32) {
    write_entry(img, offset, name, FileAttributes::ARCHIVE, cluster, size);
}

pub fn write_dir(img: &mut [u8], offset: usize, name: &[u8; 11], cluster: u32) {
    write_entry(img, offset, name, FileAttributes::DIRECTORY, cluster, 0);
}

pub fn write_volume_label(img: &mut [u8], offset: usize, name: &[u8; 11]) {
    write_entry(img, offset, name, FileAttributes::VOLUME_LABEL, 0, 0);
}

/// A true FAT16 volume (5,000 data clusters, well above the
/// 4,085-cluster FAT12/16 boundary) with a dirty dirty-bit/mount-state
/// pair, for tests that need a genuine FAT16 dirty flag to exist at all
/// (FAT12 carries none).
pub const FAT16_FAT_START: usize = SECTOR;
pub const FAT16_FAT_SIZE: usize = 20 * SECTOR;
pub const FAT16_ROOT_ENTRIES: usize = 512;
pub const FAT16_ROOT_START: usize = FAT16_FAT_START + 2 * FAT16_FAT_SIZE;
pub const FAT16_DATA_START: usize = FAT16_ROOT_START + FAT16_ROOT_ENTRIES * 32;
pub const FAT16_IMAGE_SIZE: usize = 5073 * SECTOR;

pub fn blank_fat16_image() -> Vec<u8> {
    let mut img = vec![0u8; FAT16_IMAGE_SIZE];
    let common = RawBootSectorCommon {
        jump: [0xEB, 0x3C, 0x90],
        oem_name: FatStr::new_truncate("MSDOS5.0"),
        bytes_per_sector: (SECTOR as u16).to_le_bytes(),
        sectors_per_cluster: 1,
        reserved_sector_count: 1u16.to_le_bytes(),
        fat_count: 2,
        root_entry_count: (FAT16_ROOT_ENTRIES as u16).to_le_bytes(),
        total_sectors_16: 5073u16.to_le_bytes(),
        media_type: MediaType::HardDisk as u8,
        sectors_per_fat_16: 20u16.to_le_bytes(),
        sectors_per_track: 18u16.to_le_bytes(),
        num_heads: 2u16.to_le_bytes(),
        hidden_sector_count: 0u32.to_le_bytes(),
        total_sectors_32: 0u32.to_le_bytes(),
    };
    img[0..36].copy_from_slice(bytemuck::bytes_of(&common));
    let ext = RawBpbExtended16 {
        drive_number: 0x01 | 0x02,
        reserved1: 0,
        ext_boot_signature: 0x29,
        volume_id: 0x1234_5678u32.to_le_bytes(),
        volume_label: FatStr::new_truncate("NO NAME"),
        fs_type: FatStr::new_truncate("FAT16   "),
        boot_code: [0; 448],
        signature_word: 0u16.to_le_bytes(),
    };
    img[36..512].copy_from_slice(bytemuck::bytes_of(&ext));
    img[510] = 0x55;
    img[511] = 0xAA;
    for copy in 0..2usize {
        let base = FAT16_FAT_START + copy * FAT16_FAT_SIZE;
        img[base] = 0xF8;
        img[base + 1] = 0xFF;
        img[base + 2] = 0xFF;
        img[base + 3] = 0xFF;
    }
    img
}

/// A minimal FAT32 volume: one reserved area, two one-sector FATs, and
/// a one-cluster root directory, with 32 data clusters behind it
/// (cluster 2 is the root; 3 and up are free unless a test allocates
/// them).
pub const FAT32_SECTOR: usize = 512;
pub const FAT32_RESERVED_SECTORS: u64 = 32;
pub const FAT32_SECTORS_PER_FAT: u64 = 1;
pub const FAT32_FAT_START: u64 = FAT32_RESERVED_SECTORS * FAT32_SECTOR as u64;
pub const FAT32_FAT_SIZE: u64 = FAT32_SECTORS_PER_FAT * FAT32_SECTOR as u64;
pub const FAT32_DATA_START: u64 = FAT32_FAT_START + 2 * FAT32_FAT_SIZE;
pub const FAT32_TOTAL_SECTORS: u32 = 32 + 2 + 32; // reserved + FATs + 32 data sectors
pub const FAT32_IMAGE_SIZE: usize = FAT32_TOTAL_SECTORS as usize * FAT32_SECTOR;
pub const FAT32_ROOT_CLUSTER: u32 = 2;

/// Raw 28-bit EOC marker for a non-Atari FAT32 volume, top nibble zero.
pub const FAT32_EOC: u32 = 0x0FFF_FFF8;

pub fn blank_fat32_image() -> Vec<u8> {
    let mut img = vec![0u8; FAT32_IMAGE_SIZE];
    let common = RawBootSectorCommon {
        jump: [0xEB, 0x3C, 0x90],
        oem_name: FatStr::new_truncate("MSDOS5.0"),
        bytes_per_sector: (FAT32_SECTOR as u16).to_le_bytes(),
        sectors_per_cluster: 1,
        reserved_sector_count: (FAT32_RESERVED_SECTORS as u16).to_le_bytes(),
        fat_count: 2,
        root_entry_count: 0u16.to_le_bytes(),
        total_sectors_16: 0u16.to_le_bytes(),
        media_type: MediaType::HardDisk as u8,
        sectors_per_fat_16: 0u16.to_le_bytes(), // signals FAT32 to Geometry::read
        sectors_per_track: 18u16.to_le_bytes(),
        num_heads: 2u16.to_le_bytes(),
        hidden_sector_count: 0u32.to_le_bytes(),
        total_sectors_32: FAT32_TOTAL_SECTORS.to_le_bytes(),
    };
    img[0..36].copy_from_slice(bytemuck::bytes_of(&common));
    let ext = RawBpbExtended32 {
        sectors_per_fat_32: (FAT32_SECTORS_PER_FAT as u32).to_le_bytes(),
        ext_flags: 0u16.to_le_bytes(),
        version: 0u16.to_le_bytes(),
        root_cluster: FAT32_ROOT_CLUSTER.to_le_bytes(),
        fs_info_sector: 1u16.to_le_bytes(),
        backup_boot_sector: 6u16.to_le_bytes(),
        reserved: [0; 12],
        drive_number: 0x01 | 0x02,
        reserved1: 0,
        ext_boot_signature: 0x29,
        volume_id: 0x1234_5678u32.to_le_bytes(),
        volume_label: FatStr::new_truncate("NO NAME"),
        fs_type: FatStr::new_truncate("FAT32   "),
        boot_code: [0; 420],
        signature_word: 0u16.to_le_bytes(),
    };
    img[36..512].copy_from_slice(bytemuck::bytes_of(&ext));
    img[510] = 0x55;
    img[511] = 0xAA;

    set_fat32_raw(&mut img, 0, 0x0FFF_FFF8);
    set_fat32_raw(&mut img, 1, 0x0FFF_FFFF);
    set_fat32_raw(&mut img, FAT32_ROOT_CLUSTER, FAT32_EOC);
    img
}

/// Write a raw 32-bit FAT32 entry (including any reserved top-nibble
/// bits a test wants to plant) into both FAT copies.
pub fn set_fat32_raw(img: &mut [u8], index: u32, value: u32) {
    for copy in 0..2u64 {
        let base = FAT32_FAT_START + copy * FAT32_FAT_SIZE + index as u64 * 4;
        img[base as usize..base as usize + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Absolute byte offset of the first FAT copy's entry for `index`, for
/// tests that need to inspect exactly what a run wrote back.
pub fn fat32_entry_offset(index: u32) -> u64 {
    FAT32_FAT_START + index as u64 * 4
}

/// Byte offset of cluster `cluster`'s data within the FAT32 image.
pub fn fat32_cluster_offset(cluster: u32) -> usize {
    (FAT32_DATA_START + (cluster as u64 - 2) * FAT32_SECTOR as u64) as usize
}
