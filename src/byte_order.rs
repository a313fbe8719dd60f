//! Wire byte order handling
//!
//! The remote side of a session announces whether it talks big-endian or
//! little-endian. Capacity fields, CDB addresses and the response length
//! header are all encoded in that order.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order used on the wire for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireOrder {
    /// Network order; the default for a freshly opened image
    #[default]
    Big,
    Little,
}

impl WireOrder {
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            WireOrder::Big => BigEndian::read_u16(buf),
            WireOrder::Little => LittleEndian::read_u16(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            WireOrder::Big => BigEndian::read_u32(buf),
            WireOrder::Little => LittleEndian::read_u32(buf),
        }
    }

    pub fn write_u16(self, buf: &mut [u8], value: u16) {
        match self {
            WireOrder::Big => BigEndian::write_u16(buf, value),
            WireOrder::Little => LittleEndian::write_u16(buf, value),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            WireOrder::Big => BigEndian::write_u32(buf, value),
            WireOrder::Little => LittleEndian::write_u32(buf, value),
        }
    }
}
