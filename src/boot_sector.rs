//! Sector 0 masking for remote boot
//!
//! A boot loader started from the virtual floppy expects floppy-relative
//! geometry in the BPB, not the partition-relative values an image cut from
//! a hard disk carries. Reads of sector 0 therefore present a masked view;
//! writes of sector 0 put the on-disk values back before committing.
//!
//! The masked field set ([`BootFields`]) is:
//!
//! | Field              | FAT12/16 | FAT32 | Masked value          |
//! |--------------------|----------|-------|-----------------------|
//! | sectors per track  | 0x18     | 0x18  | canonical sectors/trk |
//! | heads              | 0x1A     | 0x1A  | canonical heads       |
//! | hidden sectors     | 0x1C     | 0x1C  | 0                     |
//! | drive number       | 0x24     | 0x40  | 0                     |
//!
//! All fields are little-endian on disk regardless of the session's wire
//! order.

use crate::capacity::{bpb, is_fat16, is_fat32, BOOT_SECTOR_SIZE};
use byteorder::{ByteOrder, LittleEndian};

/// FAT boot sector layout, which decides where the drive number lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatLayout {
    /// FAT12 and FAT16 share the short extended BPB
    Fat16,
    Fat32,
}

impl FatLayout {
    pub fn detect(sector: &[u8]) -> Option<Self> {
        if sector.len() < BOOT_SECTOR_SIZE {
            None
        } else if is_fat32(sector) {
            Some(FatLayout::Fat32)
        } else if is_fat16(sector) {
            Some(FatLayout::Fat16)
        } else {
            None
        }
    }

    fn drive_number_offset(self) -> usize {
        match self {
            FatLayout::Fat16 => bpb::FAT16_DRIVE_NUMBER,
            FatLayout::Fat32 => bpb::FAT32_DRIVE_NUMBER,
        }
    }
}

/// The boot sector fields rewritten for the host's view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootFields {
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub drive_number: u8,
}

impl BootFields {
    pub fn read(sector: &[u8], layout: FatLayout) -> Self {
        BootFields {
            sectors_per_track: LittleEndian::read_u16(&sector[bpb::SECTORS_PER_TRACK..]),
            heads: LittleEndian::read_u16(&sector[bpb::HEADS..]),
            hidden_sectors: LittleEndian::read_u32(&sector[bpb::HIDDEN_SECTORS..]),
            drive_number: sector[layout.drive_number_offset()],
        }
    }

    pub fn write(&self, sector: &mut [u8], layout: FatLayout) {
        LittleEndian::write_u16(&mut sector[bpb::SECTORS_PER_TRACK..], self.sectors_per_track);
        LittleEndian::write_u16(&mut sector[bpb::HEADS..], self.heads);
        LittleEndian::write_u32(&mut sector[bpb::HIDDEN_SECTORS..], self.hidden_sectors);
        sector[layout.drive_number_offset()] = self.drive_number;
    }
}

/// Canonical geometry presented to the host for large virtual floppies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalGeometry {
    pub sectors_per_track: u16,
    pub heads: u16,
}

impl Default for CanonicalGeometry {
    /// 63 sectors per track, 255 heads: what a BIOS expects of a device
    /// larger than 8MB
    fn default() -> Self {
        CanonicalGeometry {
            sectors_per_track: 0x3F,
            heads: 0xFF,
        }
    }
}

impl CanonicalGeometry {
    /// Media smaller than one full canonical cylinder are served untouched
    pub fn qualifies(&self, total_sectors: u32) -> bool {
        total_sectors >= self.sectors_per_track as u32 * self.heads as u32
    }
}

/// Applies and reverts the sector 0 mask
#[derive(Debug, Clone, Copy, Default)]
pub struct BootSectorPatcher {
    geometry: CanonicalGeometry,
}

impl BootSectorPatcher {
    pub fn new(geometry: CanonicalGeometry) -> Self {
        BootSectorPatcher { geometry }
    }

    pub fn geometry(&self) -> CanonicalGeometry {
        self.geometry
    }

    /// Field values the host sees after masking
    pub fn masked_fields(&self) -> BootFields {
        BootFields {
            sectors_per_track: self.geometry.sectors_per_track,
            heads: self.geometry.heads,
            hidden_sectors: 0,
            drive_number: 0,
        }
    }

    /// Mask sector 0 as read from the image
    ///
    /// Returns the original field values when a mask was applied.
    pub fn mask(&self, sector: &mut [u8], total_sectors: u32) -> Option<BootFields> {
        if !self.geometry.qualifies(total_sectors) {
            return None;
        }
        let layout = FatLayout::detect(sector)?;
        let original = BootFields::read(sector, layout);
        self.masked_fields().write(sector, layout);
        log::debug!("Masked boot sector ({:?}), original {:?}", layout, original);
        Some(original)
    }

    /// Put the on-disk field values back into a host-supplied sector 0
    ///
    /// The layout is taken from the host's sector, the values from
    /// `on_disk`. Returns the restored values when anything was changed.
    pub fn restore(&self, outgoing: &mut [u8], on_disk: &[u8], total_sectors: u32) -> Option<BootFields> {
        if !self.geometry.qualifies(total_sectors) || on_disk.len() < BOOT_SECTOR_SIZE {
            return None;
        }
        let layout = FatLayout::detect(outgoing)?;
        let original = BootFields::read(on_disk, layout);
        original.write(outgoing, layout);
        log::debug!("Restored boot sector fields ({:?}) {:?}", layout, original);
        Some(original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fat_sector(layout: FatLayout) -> Vec<u8> {
        let mut sector: Vec<u8> = (0..BOOT_SECTOR_SIZE).map(|i| (i * 7) as u8).collect();
        sector[bpb::FAT16_BOOT_SIGNATURE] = 0;
        sector[bpb::FAT32_BOOT_SIGNATURE] = 0;
        match layout {
            FatLayout::Fat16 => sector[bpb::FAT16_BOOT_SIGNATURE] = 0x29,
            FatLayout::Fat32 => sector[bpb::FAT32_BOOT_SIGNATURE] = 0x29,
        }
        BootFields {
            sectors_per_track: 18,
            heads: 2,
            hidden_sectors: 2048,
            drive_number: 0x80,
        }
        .write(&mut sector, layout);
        sector
    }

    #[test]
    fn test_mask_fat16() {
        let patcher = BootSectorPatcher::default();
        let mut sector = fat_sector(FatLayout::Fat16);
        let original = patcher.mask(&mut sector, 1_000_000).unwrap();
        assert_eq!(original.hidden_sectors, 2048);
        assert_eq!(original.drive_number, 0x80);

        let masked = BootFields::read(&sector, FatLayout::Fat16);
        assert_eq!(masked, patcher.masked_fields());
        assert_eq!(masked.sectors_per_track, 63);
        assert_eq!(masked.heads, 255);
    }

    #[test]
    fn test_mask_fat32_uses_fat32_drive_number() {
        let patcher = BootSectorPatcher::default();
        let mut sector = fat_sector(FatLayout::Fat32);
        let fat16_slot = sector[bpb::FAT16_DRIVE_NUMBER];
        patcher.mask(&mut sector, 1_000_000).unwrap();
        assert_eq!(sector[bpb::FAT32_DRIVE_NUMBER], 0);
        assert_eq!(sector[bpb::FAT16_DRIVE_NUMBER], fat16_slot);
    }

    #[test]
    fn test_mask_is_stable() {
        let patcher = BootSectorPatcher::default();
        let mut once = fat_sector(FatLayout::Fat16);
        patcher.mask(&mut once, 20_000);
        let mut twice = once.clone();
        patcher.mask(&mut twice, 20_000);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_small_media_untouched() {
        let patcher = BootSectorPatcher::default();
        let mut sector = fat_sector(FatLayout::Fat16);
        let before = sector.clone();
        assert!(patcher.mask(&mut sector, 2880).is_none());
        assert_eq!(sector, before);
    }

    #[test]
    fn test_unknown_layout_untouched() {
        let patcher = BootSectorPatcher::default();
        let mut sector = vec![0u8; BOOT_SECTOR_SIZE];
        assert!(patcher.mask(&mut sector, 1_000_000).is_none());
        assert!(sector.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_restore_reverts_mask() {
        let patcher = BootSectorPatcher::default();
        let on_disk = fat_sector(FatLayout::Fat32);
        let mut host_view = on_disk.clone();
        patcher.mask(&mut host_view, 1_000_000).unwrap();

        // the host edits an unrelated byte and writes the sector back
        host_view[0x1FD] ^= 0xFF;
        let mut outgoing = host_view.clone();
        patcher.restore(&mut outgoing, &on_disk, 1_000_000).unwrap();

        let mut expected = on_disk.clone();
        expected[0x1FD] ^= 0xFF;
        assert_eq!(outgoing, expected);
    }

    #[test]
    fn test_canonical_threshold() {
        let geometry = CanonicalGeometry::default();
        assert!(!geometry.qualifies(63 * 255 - 1));
        assert!(geometry.qualifies(63 * 255));

        let floppy = CanonicalGeometry {
            sectors_per_track: 18,
            heads: 2,
        };
        assert!(floppy.qualifies(2880));
    }
}
