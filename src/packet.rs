//! SCSI request/response packet layout
//!
//! The transport hands the target one fixed-layout packet per command and
//! takes back a packet of the same shape. The response starts life as a
//! copy of the request so transport bookkeeping (tag, direction, header)
//! flows back unchanged.
//!
//! ```text
//! Offset  Size  Field
//!      0    32  Transport header (opaque, echoed back)
//!     32     4  Read length        (wire order)
//!     36     4  Tag number         (wire order)
//!     40     1  Data direction
//!     41    12  Command descriptor block
//!     53     1  Overall status
//!     54     1  Sense key
//!     55     1  Additional sense code
//!     56     1  Additional sense code qualifier
//!     57     4  Data length        (wire order)
//!     61     -  Data area
//! ```

use crate::byte_order::WireOrder;
use crate::error::{TargetError, TargetResult};

pub const HEADER_SIZE: usize = 32;
pub const CDB_SIZE: usize = 12;

const READ_LEN_OFFSET: usize = HEADER_SIZE;
const TAG_OFFSET: usize = READ_LEN_OFFSET + 4;
const DATA_DIR_OFFSET: usize = TAG_OFFSET + 4;
const CDB_OFFSET: usize = DATA_DIR_OFFSET + 1;
const STATUS_OFFSET: usize = CDB_OFFSET + CDB_SIZE;
const DATA_LEN_OFFSET: usize = STATUS_OFFSET + 4;

/// Offset of the data area; also the size of a packet with no data
pub const DATA_OFFSET: usize = DATA_LEN_OFFSET + 4;

/// Status block carried in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusPacket {
    /// 0 for success, 1 for check condition
    pub overall_status: u8,
    pub sense_key: u8,
    pub sense_code: u8,
    pub sense_code_qualifier: u8,
}

/// One request or response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScsiPacket {
    pub header: [u8; HEADER_SIZE],
    pub read_len: u32,
    pub tag: u32,
    pub data_dir: u8,
    pub cdb: [u8; CDB_SIZE],
    pub status: StatusPacket,
    /// Data length header; for responses, the payload length
    pub data_len: u32,
    pub data: Vec<u8>,
}

impl Default for ScsiPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl ScsiPacket {
    pub fn new() -> Self {
        ScsiPacket {
            header: [0u8; HEADER_SIZE],
            read_len: 0,
            tag: 0,
            data_dir: 0,
            cdb: [0u8; CDB_SIZE],
            status: StatusPacket::default(),
            data_len: 0,
            data: Vec::new(),
        }
    }

    /// Build a request around a CDB (shorter CDBs are zero padded)
    pub fn with_cdb(cdb: &[u8]) -> Self {
        let mut packet = Self::new();
        let len = cdb.len().min(CDB_SIZE);
        packet.cdb[..len].copy_from_slice(&cdb[..len]);
        packet
    }

    /// Attach a data-out payload and set the length header to match
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data_len = data.len() as u32;
        self.data = data;
        self
    }

    pub fn opcode(&self) -> u8 {
        self.cdb[0]
    }

    /// Parse a packet from a transport buffer
    ///
    /// The data area is everything after the fixed fields; the transport
    /// sizes the buffer, so the data length header is not trusted to bound it.
    pub fn from_bytes(buf: &[u8], order: WireOrder) -> TargetResult<Self> {
        if buf.len() < DATA_OFFSET {
            return Err(TargetError::InvalidPacket(format!(
                "packet too short: {} bytes, need at least {}",
                buf.len(),
                DATA_OFFSET
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&buf[..HEADER_SIZE]);
        let mut cdb = [0u8; CDB_SIZE];
        cdb.copy_from_slice(&buf[CDB_OFFSET..STATUS_OFFSET]);

        Ok(ScsiPacket {
            header,
            read_len: order.read_u32(&buf[READ_LEN_OFFSET..]),
            tag: order.read_u32(&buf[TAG_OFFSET..]),
            data_dir: buf[DATA_DIR_OFFSET],
            cdb,
            status: StatusPacket {
                overall_status: buf[STATUS_OFFSET],
                sense_key: buf[STATUS_OFFSET + 1],
                sense_code: buf[STATUS_OFFSET + 2],
                sense_code_qualifier: buf[STATUS_OFFSET + 3],
            },
            data_len: order.read_u32(&buf[DATA_LEN_OFFSET..]),
            data: buf[DATA_OFFSET..].to_vec(),
        })
    }

    /// Serialize the packet for the transport
    pub fn to_bytes(&self, order: WireOrder) -> Vec<u8> {
        let mut buf = vec![0u8; DATA_OFFSET];
        buf[..HEADER_SIZE].copy_from_slice(&self.header);
        order.write_u32(&mut buf[READ_LEN_OFFSET..], self.read_len);
        order.write_u32(&mut buf[TAG_OFFSET..], self.tag);
        buf[DATA_DIR_OFFSET] = self.data_dir;
        buf[CDB_OFFSET..STATUS_OFFSET].copy_from_slice(&self.cdb);
        buf[STATUS_OFFSET] = self.status.overall_status;
        buf[STATUS_OFFSET + 1] = self.status.sense_key;
        buf[STATUS_OFFSET + 2] = self.status.sense_code;
        buf[STATUS_OFFSET + 3] = self.status.sense_code_qualifier;
        order.write_u32(&mut buf[DATA_LEN_OFFSET..], self.data_len);
        buf.extend_from_slice(&self.data);
        buf
    }
}
