//! Boot-sector parsing: derive the volume geometry and select the FAT
//! variant, per spec §4.2.

use crate::error::CheckError;
use crate::io::Device;
use crate::structures::boot_sector::{
    RawBootSectorCommon, RawBpbExtended16, RawBpbExtended32, BOOT_SECTOR_SIGNATURE,
};
use crate::structures::fat_entry::ClusterMarkers;
use crate::structures::FatStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

impl FatVariant {
    /// Significant bits per FAT entry on disk.
    pub fn fat_bits(self) -> u32 {
        match self {
            FatVariant::Fat12 => 12,
            FatVariant::Fat16 => 16,
            FatVariant::Fat32 => 32,
        }
    }

    /// Effective bits (FAT32 entries reserve their top 4 bits).
    pub fn eff_fat_bits(self) -> u32 {
        match self {
            FatVariant::Fat32 => 28,
            other => other.fat_bits(),
        }
    }
}

/// Derived volume geometry: everything downstream modules need to
/// locate the FATs, the root directory, and the data area.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub variant: FatVariant,
    pub atari_format: bool,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u32,
    pub num_fats: u32,
    pub fat_start: u64,
    pub fat_size_bytes: u64,
    /// FAT12/16 only: byte offset of the fixed-size root directory.
    pub root_start: u64,
    /// FAT12/16 only: number of 32-byte slots in the root directory.
    pub root_entry_count: u32,
    /// FAT32 only: first cluster of the root directory.
    pub root_cluster: u32,
    pub data_start: u64,
    /// Total usable clusters (`C` in spec §4.2).
    pub cluster_count: u32,
    /// `C + 2`: highest valid cluster number plus one.
    pub max_cluster: u32,
    /// 0 if absent (FAT12/16).
    pub fsinfo_start: u64,
    /// 0 if absent.
    pub backup_boot_start: u64,
    /// The boot-sector "mount state" byte (drive_number position in
    /// `volume_info`, repurposed on real DOS media to carry a dirty
    /// bit for FAT16; FAT12 carries no such bit).
    pub mount_state: u8,
    pub label: FatStr<11>,
    pub markers: ClusterMarkers,
    pub media_type: u8,
}

impl Geometry {
    pub fn read(device: &mut Device, atari_format: bool) -> Result<Self, CheckError> {
        let sector = device.read(0, 512)?;
        if sector.len() < 512 {
            return Err(CheckError::Corrupt("boot sector truncated".into()));
        }
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != BOOT_SECTOR_SIGNATURE {
            return Err(CheckError::Corrupt("missing boot sector signature".into()));
        }

        let common: RawBootSectorCommon = *bytemuck::from_bytes(&sector[0..36]);

        let bytes_per_sector = common.bytes_per_sector() as u32;
        if bytes_per_sector == 0
            || bytes_per_sector % 512 != 0
            || !bytes_per_sector.is_power_of_two()
        {
            return Err(CheckError::Corrupt(format!(
                "invalid bytes per sector: {bytes_per_sector}"
            )));
        }
        if common.fat_count == 0 {
            return Err(CheckError::Corrupt("zero FAT count".into()));
        }
        let media_valid = common.media_type == 0xF0 || common.media_type >= 0xF8;
        if !media_valid {
            return Err(CheckError::Corrupt(format!(
                "invalid media byte: {:#x}",
                common.media_type
            )));
        }

        let sectors_per_cluster = common.sectors_per_cluster as u32;
        let total_sectors = if common.total_sectors_16() != 0 {
            common.total_sectors_16() as u32
        } else {
            common.total_sectors_32()
        };

        let root_dir_sectors = ((common.root_entry_count() as u32 * 32) + bytes_per_sector - 1)
            / bytes_per_sector;
        let is_fat32 = common.sectors_per_fat_16() == 0;

        let (sectors_per_fat, root_cluster, fsinfo_sector, backup_boot_sector) = if is_fat32 {
            let ext: RawBpbExtended32 = *bytemuck::from_bytes(&sector[36..512]);
            (
                ext.sectors_per_fat_32(),
                ext.root_cluster(),
                ext.fs_info_sector() as u32,
                ext.backup_boot_sector() as u32,
            )
        } else {
            (common.sectors_per_fat_16() as u32, 0, 0, 0)
        };

        let fat_start_sectors = common.reserved_sector_count() as u32;
        let fat_sectors = common.fat_count as u32 * sectors_per_fat;
        let root_start_sectors = fat_start_sectors + fat_sectors;
        let data_start_sectors = root_start_sectors + root_dir_sectors;

        if sectors_per_cluster == 0 {
            return Err(CheckError::Corrupt("zero sectors per cluster".into()));
        }
        let data_sectors = total_sectors.saturating_sub(data_start_sectors);
        let cluster_count = data_sectors / sectors_per_cluster;

        let variant = if is_fat32 {
            FatVariant::Fat32
        } else if atari_format {
            // Atari mode: floppies are always FAT12, hard disks FAT16.
            if total_sectors <= 2880 {
                FatVariant::Fat12
            } else {
                FatVariant::Fat16
            }
        } else if cluster_count < 4085 {
            FatVariant::Fat12
        } else {
            FatVariant::Fat16
        };

        if !is_fat32 {
            let expect_fat12 = cluster_count < 4085;
            let got_fat12 = variant == FatVariant::Fat12;
            if !atari_format && expect_fat12 != got_fat12 {
                return Err(CheckError::Corrupt(
                    "cluster count disagrees with the FAT width rule".into(),
                ));
            }
        }

        let (mount_state, label) = if is_fat32 {
            let ext: RawBpbExtended32 = *bytemuck::from_bytes(&sector[36..512]);
            (ext.drive_number, ext.volume_label)
        } else {
            let ext: RawBpbExtended16 = *bytemuck::from_bytes(&sector[36..512]);
            (ext.drive_number, ext.volume_label)
        };

        let markers = ClusterMarkers::new(variant.eff_fat_bits(), atari_format);

        Ok(Self {
            variant,
            atari_format,
            bytes_per_sector,
            sectors_per_cluster,
            cluster_size: bytes_per_sector * sectors_per_cluster,
            num_fats: common.fat_count as u32,
            fat_start: fat_start_sectors as u64 * bytes_per_sector as u64,
            fat_size_bytes: sectors_per_fat as u64 * bytes_per_sector as u64,
            root_start: root_start_sectors as u64 * bytes_per_sector as u64,
            root_entry_count: common.root_entry_count() as u32,
            root_cluster,
            data_start: data_start_sectors as u64 * bytes_per_sector as u64,
            cluster_count,
            max_cluster: cluster_count + 2,
            fsinfo_start: fsinfo_sector as u64 * bytes_per_sector as u64,
            backup_boot_start: backup_boot_sector as u64 * bytes_per_sector as u64,
            mount_state,
            label,
            markers,
            media_type: common.media_type,
        })
    }

    /// Byte offset of the start of `cluster`'s data.
    pub fn cluster_start(&self, cluster: u32) -> u64 {
        self.data_start + (cluster as u64 - 2) * self.cluster_size as u64
    }
}
