//! Capacity probing from the image's boot sector
//!
//! The image carries no out-of-band geometry, so the only source of truth is
//! the MS-DOS BIOS Parameter Block in sector 0. It is read again for every
//! command that needs geometry because the file may have been swapped since
//! the last one.

use crate::error::{FloppyError, FloppyResult};
use crate::image::{read_full, Geometry};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Seek, SeekFrom};

/// Size of the boot sector read by the probe, independent of logical block size
pub const BOOT_SECTOR_SIZE: usize = 512;

/// BIOS Parameter Block field offsets (all little-endian on disk)
pub mod bpb {
    pub const BYTES_PER_SECTOR: usize = 0x0B;
    pub const SECTORS: usize = 0x13;
    pub const MEDIA: usize = 0x15;
    pub const SECTORS_PER_TRACK: usize = 0x18;
    pub const HEADS: usize = 0x1A;
    pub const HIDDEN_SECTORS: usize = 0x1C;
    pub const HUGE_SECTORS: usize = 0x20;

    /// FAT12/16 extended BPB
    pub const FAT16_DRIVE_NUMBER: usize = 0x24;
    pub const FAT16_BOOT_SIGNATURE: usize = 0x26;

    /// FAT32 extended BPB
    pub const FAT32_DRIVE_NUMBER: usize = 0x40;
    pub const FAT32_BOOT_SIGNATURE: usize = 0x42;

    /// Lowest media descriptor that marks an MS-DOS formatted medium
    pub const MEDIA_DESCRIPTOR_MIN: u8 = 0xF0;
}

fn has_boot_signature(sector: &[u8], offset: usize) -> bool {
    matches!(sector.get(offset), Some(0x28) | Some(0x29))
}

/// True if the sector carries a FAT32 extended boot signature
pub fn is_fat32(sector: &[u8]) -> bool {
    has_boot_signature(sector, bpb::FAT32_BOOT_SIGNATURE)
}

/// True if the sector carries a FAT12/16 extended boot signature and is not FAT32
pub fn is_fat16(sector: &[u8]) -> bool {
    !is_fat32(sector) && has_boot_signature(sector, bpb::FAT16_BOOT_SIGNATURE)
}

/// Derive geometry from a boot sector already in memory
pub fn parse_boot_sector(sector: &[u8]) -> FloppyResult<Geometry> {
    if sector.len() < BOOT_SECTOR_SIZE {
        return Err(FloppyError::UnreadableMedia);
    }
    if sector[bpb::MEDIA] < bpb::MEDIA_DESCRIPTOR_MIN {
        return Err(FloppyError::Media);
    }

    let block_size = LittleEndian::read_u16(&sector[bpb::BYTES_PER_SECTOR..]) as u32;
    let sectors = LittleEndian::read_u16(&sector[bpb::SECTORS..]);
    let total_sectors = if sectors == 0 {
        LittleEndian::read_u32(&sector[bpb::HUGE_SECTORS..])
    } else {
        sectors as u32
    };

    Ok(Geometry::new(block_size, total_sectors))
}

/// Read sector 0 through `handle` and derive the image geometry
pub fn probe<H: Read + Seek>(handle: &mut H) -> FloppyResult<Geometry> {
    handle.seek(SeekFrom::Start(0)).map_err(|_| FloppyError::Media)?;

    let mut sector = [0u8; BOOT_SECTOR_SIZE];
    match read_full(handle, &mut sector) {
        Ok(BOOT_SECTOR_SIZE) => parse_boot_sector(&sector),
        _ => Err(FloppyError::UnreadableMedia),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    fn boot_sector(bytes_per_sector: u16, sectors: u16, huge: u32, media: u8) -> Vec<u8> {
        let mut sector = vec![0u8; BOOT_SECTOR_SIZE];
        LittleEndian::write_u16(&mut sector[bpb::BYTES_PER_SECTOR..], bytes_per_sector);
        LittleEndian::write_u16(&mut sector[bpb::SECTORS..], sectors);
        LittleEndian::write_u32(&mut sector[bpb::HUGE_SECTORS..], huge);
        sector[bpb::MEDIA] = media;
        sector
    }

    #[test]
    fn test_probe_16bit_sector_count() {
        let mut image = Cursor::new(boot_sector(512, 2880, 0xDEAD_BEEF, 0xF0));
        assert_eq!(probe(&mut image), Ok(Geometry::new(512, 2880)));
    }

    #[test]
    fn test_probe_huge_sector_count() {
        let mut image = Cursor::new(boot_sector(2048, 0, 131_072, 0xF8));
        assert_eq!(probe(&mut image), Ok(Geometry::new(2048, 131_072)));
    }

    #[test]
    fn test_every_media_descriptor_accepted() {
        for media in 0xF0..=0xFF {
            let sector = boot_sector(512, 100, 0, media);
            assert_eq!(parse_boot_sector(&sector), Ok(Geometry::new(512, 100)));
        }
    }

    #[test]
    fn test_probe_rejects_non_dos_media() {
        let mut image = Cursor::new(boot_sector(512, 2880, 0, 0xEF));
        assert_eq!(probe(&mut image), Err(FloppyError::Media));
    }

    #[test]
    fn test_probe_short_image() {
        let mut image = Cursor::new(vec![0xF0u8; 100]);
        assert_eq!(probe(&mut image), Err(FloppyError::UnreadableMedia));
    }

    #[test]
    fn test_probe_rewinds() {
        let mut image = Cursor::new(boot_sector(512, 2880, 0, 0xF0));
        image.set_position(300);
        assert!(probe(&mut image).is_ok());
    }

    #[test]
    fn test_fat_discrimination() {
        let mut sector = vec![0u8; BOOT_SECTOR_SIZE];
        assert!(!is_fat32(&sector));
        assert!(!is_fat16(&sector));

        sector[bpb::FAT16_BOOT_SIGNATURE] = 0x29;
        assert!(is_fat16(&sector));
        assert!(!is_fat32(&sector));

        sector[bpb::FAT32_BOOT_SIGNATURE] = 0x28;
        assert!(is_fat32(&sector));
        assert!(!is_fat16(&sector));
    }

    #[test]
    fn test_probe_image_larger_than_boot_sector() {
        let mut data = boot_sector(512, 8, 0, 0xF9);
        data.resize(8 * 512, 0);
        let mut cursor = Cursor::new(data);
        cursor.set_position(512);
        cursor.write_u8(0xAA).unwrap();
        assert_eq!(probe(&mut cursor), Ok(Geometry::new(512, 8)));
    }
}
