//! SCSI command dispatch for the virtual floppy
//!
//! Every command runs against a freshly opened image handle that is closed
//! again when the command completes, and every result is reported through
//! the response's status block.

use crate::byte_order::WireOrder;
use crate::capacity::{bpb, BOOT_SECTOR_SIZE};
use crate::error::{FloppyError, FloppyResult};
use crate::image::MediaProvider;
use crate::mode_page::{self, FlexibleDiskPage, FLEXIBLE_DISK_PAGE_CODE};
use crate::packet::{ScsiPacket, StatusPacket};
use crate::session::FloppySession;
use byteorder::{ByteOrder, LittleEndian};

/// SCSI command opcodes understood by the floppy target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScsiOpcode {
    TestUnitReady = 0x00,
    FormatUnit = 0x04,
    ModeSense6 = 0x1A,
    StartStopUnit = 0x1B,
    PreventAllowMediumRemoval = 0x1E,
    ReadFormatCapacities = 0x23,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2A,
    ModeSense10 = 0x5A,
    Read12 = 0xA8,
}

impl ScsiOpcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(ScsiOpcode::TestUnitReady),
            0x04 => Some(ScsiOpcode::FormatUnit),
            0x1A => Some(ScsiOpcode::ModeSense6),
            0x1B => Some(ScsiOpcode::StartStopUnit),
            0x1E => Some(ScsiOpcode::PreventAllowMediumRemoval),
            0x23 => Some(ScsiOpcode::ReadFormatCapacities),
            0x25 => Some(ScsiOpcode::ReadCapacity10),
            0x28 => Some(ScsiOpcode::Read10),
            0x2A => Some(ScsiOpcode::Write10),
            0x5A => Some(ScsiOpcode::ModeSense10),
            0xA8 => Some(ScsiOpcode::Read12),
            _ => None,
        }
    }
}

/// Overall status byte of the response status block
pub mod overall_status {
    pub const PASSED: u8 = 0x00;
    pub const FAILED: u8 = 0x01;
}

/// SCSI sense key codes
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
}

/// Additional Sense Code (ASC) values
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: u8 = 0x00;
    pub const UNRECOVERED_READ_ERROR: u8 = 0x11;
    pub const INVALID_COMMAND_OPERATION_CODE: u8 = 0x20;
    pub const LBA_OUT_OF_RANGE: u8 = 0x21;
    pub const INVALID_FIELD_IN_PARAMETER_LIST: u8 = 0x26;
    pub const WRITE_PROTECTED: u8 = 0x27;
    pub const MEDIUM_MAY_HAVE_CHANGED: u8 = 0x28;
    pub const INCOMPATIBLE_MEDIUM: u8 = 0x30;
    pub const MEDIUM_NOT_PRESENT: u8 = 0x3A;
    pub const MEDIA_LOAD_OR_EJECT_FAILED: u8 = 0x53;
}

/// Additional Sense Code Qualifier values paired with [`asc`]
pub mod ascq {
    pub const NONE: u8 = 0x00;
    /// With INCOMPATIBLE_MEDIUM: cannot read medium, unknown format
    pub const UNKNOWN_FORMAT: u8 = 0x01;
    /// With INCOMPATIBLE_MEDIUM: cannot read medium, incompatible format
    pub const INCOMPATIBLE_FORMAT: u8 = 0x02;
    /// With MEDIA_LOAD_OR_EJECT_FAILED: removal prevented
    pub const REMOVAL_PREVENTED: u8 = 0x02;
}

/// READ FORMAT CAPACITIES descriptor types (top byte of the block length field)
pub mod descriptor {
    pub const FORMATTED_MEDIA: u32 = 0x0200_0000;
    pub const NO_MEDIA_PRESENT: u32 = 0x0300_0000;
}

/// Capacity reported by READ FORMAT CAPACITIES when the image cannot be probed
const FALLBACK_FORMAT_CAPACITY: (u32, u32) = (512, 2880);
const CAPACITY_LIST_LENGTH: u8 = 8;

impl StatusPacket {
    fn new(overall_status: u8, sense_key: u8, sense_code: u8, sense_code_qualifier: u8) -> Self {
        StatusPacket {
            overall_status,
            sense_key,
            sense_code,
            sense_code_qualifier,
        }
    }

    /// Translate a command result into the status block the host sees
    pub fn from_result(result: FloppyResult<()>) -> Self {
        use FloppyError::*;

        let Err(err) = result else {
            return Self::new(overall_status::PASSED, sense_key::NO_SENSE, asc::NO_ADDITIONAL_SENSE, ascq::NONE);
        };

        match err {
            SectorRange => Self::new(overall_status::FAILED, sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE, ascq::NONE),
            WrongMedia => Self::new(overall_status::PASSED, sense_key::MEDIUM_ERROR, asc::INCOMPATIBLE_MEDIUM, ascq::UNKNOWN_FORMAT),
            MediumChange => Self::new(overall_status::FAILED, sense_key::UNIT_ATTENTION, asc::MEDIUM_MAY_HAVE_CHANGED, ascq::NONE),
            Media => Self::new(overall_status::FAILED, sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR, ascq::NONE),
            MediaInUse | NoMedia => Self::new(overall_status::FAILED, sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, ascq::NONE),
            InvalidParams => Self::new(
                overall_status::FAILED,
                sense_key::ILLEGAL_REQUEST,
                asc::INVALID_FIELD_IN_PARAMETER_LIST,
                ascq::NONE,
            ),
            UnreadableMedia => Self::new(
                overall_status::FAILED,
                sense_key::MEDIUM_ERROR,
                asc::INCOMPATIBLE_MEDIUM,
                ascq::INCOMPATIBLE_FORMAT,
            ),
            RemovalPrevented => Self::new(
                overall_status::FAILED,
                sense_key::ILLEGAL_REQUEST,
                asc::MEDIA_LOAD_OR_EJECT_FAILED,
                ascq::REMOVAL_PREVENTED,
            ),
            WriteProtect => Self::new(overall_status::FAILED, sense_key::DATA_PROTECT, asc::WRITE_PROTECTED, ascq::NONE),
            UnsupportedCommand | DeviceAlreadyOpen | DevicePathTooLong => Self::new(
                overall_status::FAILED,
                sense_key::ILLEGAL_REQUEST,
                asc::INVALID_COMMAND_OPERATION_CODE,
                ascq::NONE,
            ),
        }
    }
}

/// What a command produced, besides the response packet itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub result: FloppyResult<()>,
    /// Bytes placed in the response data area
    pub data_len: u32,
}

/// SCSI command handler
pub struct ScsiHandler;

impl ScsiHandler {
    /// Execute `request` against `session`, filling in `response`
    ///
    /// The response starts as a copy of the request. Its status block and
    /// data area are then replaced with the command's result and payload.
    pub fn execute<P: MediaProvider>(
        session: &mut FloppySession<P>,
        request: &ScsiPacket,
        response: &mut ScsiPacket,
    ) -> CommandOutcome {
        log::debug!("SCSI command {:02x}: cdb={}", request.opcode(), hex::encode(request.cdb));

        response.clone_from(request);
        let mut payload = Vec::new();

        let result = match session.begin_command() {
            Ok(()) => {
                let result = Self::dispatch(session, request, &mut payload);
                session.store_mut().close();
                result
            }
            Err(e) => Err(e),
        };

        let data_len = payload.len() as u32;
        response.status = StatusPacket::from_result(result);
        response.data_len = data_len;
        response.data = payload;

        log::debug!(
            "SCSI command {:02x} completed: {:?}, {} bytes",
            request.opcode(),
            result,
            data_len
        );
        CommandOutcome { result, data_len }
    }

    fn dispatch<P: MediaProvider>(
        session: &mut FloppySession<P>,
        request: &ScsiPacket,
        payload: &mut Vec<u8>,
    ) -> FloppyResult<()> {
        let cdb = &request.cdb;

        match ScsiOpcode::from_u8(cdb[0]) {
            Some(ScsiOpcode::FormatUnit)
            | Some(ScsiOpcode::StartStopUnit)
            | Some(ScsiOpcode::PreventAllowMediumRemoval) => Ok(()),
            Some(ScsiOpcode::TestUnitReady) => session.probe_geometry().map(drop),
            Some(ScsiOpcode::ReadFormatCapacities) => Self::handle_read_format_capacities(session, payload),
            Some(ScsiOpcode::ReadCapacity10) => Self::handle_read_capacity_10(session, payload),
            Some(op @ ScsiOpcode::Read10) | Some(op @ ScsiOpcode::Read12) => {
                Self::handle_read(session, op, cdb, payload)
            }
            Some(ScsiOpcode::Write10) => Self::handle_write_10(session, cdb, &request.data),
            Some(ScsiOpcode::ModeSense10) => Self::handle_mode_sense_10(session, cdb, payload),
            Some(ScsiOpcode::ModeSense6) => Self::handle_mode_sense_6(session, payload),
            None => {
                log::debug!("Unsupported SCSI opcode {:02x}", cdb[0]);
                Err(FloppyError::UnsupportedCommand)
            }
        }
    }

    /// Handle READ FORMAT CAPACITIES (0x23)
    ///
    /// The capacity list is produced even when the probe fails; the host then
    /// sees a "no media" descriptor for a standard 1.44MB floppy.
    fn handle_read_format_capacities<P: MediaProvider>(
        session: &mut FloppySession<P>,
        payload: &mut Vec<u8>,
    ) -> FloppyResult<()> {
        let order = session.byte_order();
        let probed = session.probe_geometry();

        let (block_field, total_sectors) = match probed {
            Ok(geometry) => (geometry.block_size | descriptor::FORMATTED_MEDIA, geometry.total_sectors),
            Err(_) => {
                let (block_size, total_sectors) = FALLBACK_FORMAT_CAPACITY;
                (block_size | descriptor::NO_MEDIA_PRESENT, total_sectors)
            }
        };

        let mut data = vec![0u8; 12];
        data[3] = CAPACITY_LIST_LENGTH;
        order.write_u32(&mut data[4..8], total_sectors);
        order.write_u32(&mut data[8..12], block_field);
        *payload = data;

        probed.map(drop)
    }

    /// Handle READ CAPACITY (10) (0x25)
    fn handle_read_capacity_10<P: MediaProvider>(
        session: &mut FloppySession<P>,
        payload: &mut Vec<u8>,
    ) -> FloppyResult<()> {
        let order = session.byte_order();
        let geometry = session.probe_geometry()?;

        let mut data = vec![0u8; 8];
        // last addressable block, not the block count
        order.write_u32(&mut data[0..4], geometry.total_sectors.wrapping_sub(1));
        order.write_u32(&mut data[4..8], geometry.block_size);
        *payload = data;
        Ok(())
    }

    /// Handle READ (10) (0x28) and READ (12) (0xA8)
    fn handle_read<P: MediaProvider>(
        session: &mut FloppySession<P>,
        opcode: ScsiOpcode,
        cdb: &[u8],
        payload: &mut Vec<u8>,
    ) -> FloppyResult<()> {
        let (start, count) = match opcode {
            ScsiOpcode::Read12 => Self::parse_rw12_cdb(cdb, session.byte_order()),
            _ => Self::parse_rw10_cdb(cdb, session.byte_order()),
        };

        if count > session.config().max_transfer_sectors {
            log::debug!("READ of {} sectors exceeds transfer limit", count);
            return Err(FloppyError::InvalidParams);
        }

        let geometry = session.probe_geometry()?;
        let mut data = session.store_mut().read_sectors(geometry, start, count)?;
        if start == 0 {
            session.patcher().mask(&mut data, geometry.total_sectors);
        }
        *payload = data;
        Ok(())
    }

    /// Handle WRITE (10) (0x2A)
    fn handle_write_10<P: MediaProvider>(
        session: &mut FloppySession<P>,
        cdb: &[u8],
        write_data: &[u8],
    ) -> FloppyResult<()> {
        let store = session.store_mut();
        store.close();
        store.open_writable()?;

        let (start, count) = Self::parse_rw10_cdb(cdb, session.byte_order());
        if count > session.config().max_transfer_sectors {
            log::debug!("WRITE of {} sectors exceeds transfer limit", count);
            return Err(FloppyError::InvalidParams);
        }

        let geometry = session.probe_geometry()?;
        let len = count as usize * geometry.block_size as usize;
        if write_data.len() < len {
            log::debug!("WRITE payload of {} bytes, expected {}", write_data.len(), len);
            return Err(FloppyError::InvalidParams);
        }

        let mut outgoing = write_data[..len].to_vec();
        if start == 0 {
            // the host saw a masked sector 0; put the real values back
            if let Ok(on_disk) = session.store_mut().read_sectors(geometry, 0, 1) {
                session.patcher().restore(&mut outgoing, &on_disk, geometry.total_sectors);
            }
        }

        session.store_mut().write_sectors(geometry, start, count, &outgoing)
    }

    /// Handle MODE SENSE (10) (0x5A)
    fn handle_mode_sense_10<P: MediaProvider>(
        session: &mut FloppySession<P>,
        cdb: &[u8],
        payload: &mut Vec<u8>,
    ) -> FloppyResult<()> {
        let page_code = cdb[2] & 0x3F;
        if page_code != FLEXIBLE_DISK_PAGE_CODE {
            log::debug!("MODE SENSE page {:02x} not supported", page_code);
            return Err(FloppyError::UnsupportedCommand);
        }

        let geometry = session.probe_geometry()?;
        let boot_sector = session.store_mut().read_sectors(geometry, 0, 1)?;

        let canonical = session.patcher().geometry();
        let (heads, sectors_per_track) = if canonical.qualifies(geometry.total_sectors) {
            (canonical.heads as u8, canonical.sectors_per_track as u8)
        } else {
            Self::bpb_track_geometry(&boot_sector)
        };

        let page = FlexibleDiskPage::new(geometry, heads, sectors_per_track);
        *payload = mode_page::mode_sense_10(geometry, &page);
        Ok(())
    }

    /// Handle MODE SENSE (6) (0x1A)
    fn handle_mode_sense_6<P: MediaProvider>(
        session: &mut FloppySession<P>,
        payload: &mut Vec<u8>,
    ) -> FloppyResult<()> {
        let geometry = session
            .probe_geometry()
            .map_err(|_| FloppyError::UnsupportedCommand)?;
        let write_protected = session.store_mut().probe_writable() == Err(FloppyError::WriteProtect);

        *payload = mode_page::mode_sense_6(geometry, write_protected);
        Ok(())
    }

    /// Heads and sectors per track as stored in the BPB, truncated to a byte
    fn bpb_track_geometry(sector: &[u8]) -> (u8, u8) {
        if sector.len() < BOOT_SECTOR_SIZE {
            return (0, 0);
        }
        let heads = LittleEndian::read_u16(&sector[bpb::HEADS..]);
        let sectors_per_track = LittleEndian::read_u16(&sector[bpb::SECTORS_PER_TRACK..]);
        (heads as u8, sectors_per_track as u8)
    }

    /// Parse LBA and transfer length from a READ/WRITE 10 CDB
    pub fn parse_rw10_cdb(cdb: &[u8], order: WireOrder) -> (u32, u32) {
        let lba = order.read_u32(&cdb[2..6]);
        let length = order.read_u16(&cdb[7..9]) as u32;
        (lba, length)
    }

    /// Parse LBA and transfer length from a READ 12 CDB
    pub fn parse_rw12_cdb(cdb: &[u8], order: WireOrder) -> (u32, u32) {
        let lba = order.read_u32(&cdb[2..6]);
        let length = order.read_u32(&cdb[6..10]);
        (lba, length)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
