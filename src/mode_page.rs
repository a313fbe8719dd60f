//! MODE SENSE response structures
//!
//! Mode data is defined by SCSI as big-endian, so these fields ignore the
//! session's wire order.

use crate::image::Geometry;
use byteorder::{BigEndian, ByteOrder};

/// Flexible Disk mode page code
pub const FLEXIBLE_DISK_PAGE_CODE: u8 = 0x05;
/// Length of the Flexible Disk page including its two header bytes
pub const FLEXIBLE_DISK_PAGE_LEN: usize = 32;
pub const MODE_SENSE_10_HEADER_LEN: usize = 8;
pub const MODE_SENSE_6_HEADER_LEN: usize = 4;

/// Medium type code for a 1.44MB floppy
pub const MEDIUM_TYPE_144_MB: u8 = 0x94;
pub const MEDIUM_TYPE_DEFAULT: u8 = 0x00;

/// Write-protect bit in the device-specific parameter byte
pub const WRITE_PROTECT_BIT: u8 = 0x80;

fn medium_type(geometry: Geometry) -> u8 {
    if geometry.is_144mb_floppy() {
        MEDIUM_TYPE_144_MB
    } else {
        MEDIUM_TYPE_DEFAULT
    }
}

/// Flexible Disk page (0x05)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlexibleDiskPage {
    /// Transfer rate in kbit/s
    pub transfer_rate: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub bytes_per_sector: u16,
    pub cylinders: u16,
    /// Tenths of a second
    pub motor_on_delay: u8,
    /// Tenths of a second
    pub motor_off_delay: u8,
    /// Revolutions per minute
    pub rotation_rate: u16,
}

impl FlexibleDiskPage {
    /// Describe `geometry` with the given heads and sectors per track
    ///
    /// Zero heads or sectors per track are treated as one.
    pub fn new(geometry: Geometry, heads: u8, sectors_per_track: u8) -> Self {
        let heads = heads.max(1);
        let sectors_per_track = sectors_per_track.max(1);
        let cylinders = geometry.total_sectors / (heads as u32 * sectors_per_track as u32);

        let mut page = FlexibleDiskPage {
            transfer_rate: 0xF000,
            heads,
            sectors_per_track,
            bytes_per_sector: geometry.block_size as u16,
            cylinders: cylinders as u16,
            ..Default::default()
        };

        if geometry.is_144mb_floppy() {
            page.transfer_rate = 0x01F4;
            page.motor_on_delay = 0x05;
            page.motor_off_delay = 0x1E;
            page.rotation_rate = 0x012C;
        }

        page
    }

    pub fn to_bytes(&self) -> [u8; FLEXIBLE_DISK_PAGE_LEN] {
        let mut data = [0u8; FLEXIBLE_DISK_PAGE_LEN];
        data[0] = FLEXIBLE_DISK_PAGE_CODE;
        data[1] = (FLEXIBLE_DISK_PAGE_LEN - 2) as u8;
        BigEndian::write_u16(&mut data[2..4], self.transfer_rate);
        data[4] = self.heads;
        data[5] = self.sectors_per_track;
        BigEndian::write_u16(&mut data[6..8], self.bytes_per_sector);
        BigEndian::write_u16(&mut data[8..10], self.cylinders);
        // write precompensation, step rate, head settle: unused
        data[19] = self.motor_on_delay;
        data[20] = self.motor_off_delay;
        BigEndian::write_u16(&mut data[28..30], self.rotation_rate);
        data
    }
}

/// MODE SENSE(10) response: 8-byte header followed by the Flexible Disk page
pub fn mode_sense_10(geometry: Geometry, page: &FlexibleDiskPage) -> Vec<u8> {
    let mut data = vec![0u8; MODE_SENSE_10_HEADER_LEN];
    // mode data length excludes the length field itself
    let mode_data_len = (FLEXIBLE_DISK_PAGE_LEN + MODE_SENSE_10_HEADER_LEN - 2) as u16;
    BigEndian::write_u16(&mut data[0..2], mode_data_len);
    data[2] = medium_type(geometry);
    data.extend_from_slice(&page.to_bytes());
    data
}

/// MODE SENSE(6) response: header only
pub fn mode_sense_6(geometry: Geometry, write_protected: bool) -> Vec<u8> {
    let mut data = vec![0u8; MODE_SENSE_6_HEADER_LEN];
    data[0] = (MODE_SENSE_6_HEADER_LEN - 1) as u8;
    data[1] = medium_type(geometry);
    if write_protected {
        data[2] = WRITE_PROTECT_BIT;
    }
    data
}
