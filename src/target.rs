//! Virtual floppy target
//!
//! This module provides the configured target and its builder. A target owns
//! one session and speaks the raw packet format to the transport.

use crate::boot_sector::CanonicalGeometry;
use crate::byte_order::WireOrder;
use crate::error::{FloppyResult, TargetError, TargetResult};
use crate::image::{FsMedia, MediaProvider};
use crate::packet::ScsiPacket;
use crate::scsi::CommandOutcome;
use crate::session::{FloppyConfig, FloppySession};
use std::path::Path;

/// Virtual floppy target
pub struct FloppyTarget<P: MediaProvider = FsMedia> {
    name: String,
    session: FloppySession<P>,
}

impl FloppyTarget {
    /// Create a new builder for configuring the target
    pub fn builder() -> FloppyTargetBuilder {
        FloppyTargetBuilder::new()
    }
}

impl<P: MediaProvider> FloppyTarget<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &FloppySession<P> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut FloppySession<P> {
        &mut self.session
    }

    pub fn open_floppy_image(&mut self, path: impl AsRef<Path>) -> FloppyResult<()> {
        self.session.open_floppy_image(path)
    }

    pub fn close_floppy_image(&mut self) -> FloppyResult<()> {
        self.session.close_floppy_image()
    }

    pub fn set_floppy_byte_order(&mut self, order: WireOrder) {
        self.session.set_floppy_byte_order(order)
    }

    pub fn set_image_read_only(&mut self, status: bool) {
        self.session.set_image_read_only(status)
    }

    pub fn execute_scsi_cmd(&mut self, request: &ScsiPacket, response: &mut ScsiPacket) -> CommandOutcome {
        self.session.execute_scsi_cmd(request, response)
    }

    /// Process one raw request packet and return the raw response
    ///
    /// Both packets use the session's current wire order. Only a malformed
    /// request is an error here; command failures travel in the response's
    /// status block.
    pub fn handle_packet(&mut self, buf: &[u8]) -> TargetResult<Vec<u8>> {
        let order = self.session.byte_order();
        let request = ScsiPacket::from_bytes(buf, order)?;

        let mut response = ScsiPacket::new();
        self.session.execute_scsi_cmd(&request, &mut response);
        Ok(response.to_bytes(order))
    }
}

/// Builder for configuring a floppy target
pub struct FloppyTargetBuilder {
    name: Option<String>,
    config: FloppyConfig,
}

impl FloppyTargetBuilder {
    fn new() -> Self {
        Self {
            name: None,
            config: FloppyConfig::default(),
        }
    }

    /// Set the device name used in log messages (default: "floppy")
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the longest accepted image path in bytes (default: 256)
    pub fn max_path_len(mut self, len: usize) -> Self {
        self.config.max_path_len = len;
        self
    }

    /// Set the largest READ/WRITE transfer in sectors (default: 64)
    pub fn max_transfer_sectors(mut self, sectors: u32) -> Self {
        self.config.max_transfer_sectors = sectors;
        self
    }

    /// Set the geometry presented for large media (default: 63 sectors, 255 heads)
    pub fn canonical_geometry(mut self, sectors_per_track: u16, heads: u16) -> Self {
        self.config.canonical_geometry = CanonicalGeometry {
            sectors_per_track,
            heads,
        };
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: FloppyConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the target on top of the given media provider
    pub fn build<P: MediaProvider>(self, provider: P) -> TargetResult<FloppyTarget<P>> {
        let name = self.name.unwrap_or_else(|| "floppy".to_string());
        let config = self.config;

        if config.max_path_len == 0 {
            return Err(TargetError::Config("max_path_len must be non-zero".to_string()));
        }
        if config.max_transfer_sectors == 0 {
            return Err(TargetError::Config("max_transfer_sectors must be non-zero".to_string()));
        }
        let geometry = config.canonical_geometry;
        if !(1..=0xFF).contains(&geometry.sectors_per_track) || !(1..=0xFF).contains(&geometry.heads) {
            return Err(TargetError::Config(
                "canonical geometry must have 1-255 sectors per track and heads".to_string(),
            ));
        }

        log::debug!("Built floppy target {} with {:?}", name, config);
        Ok(FloppyTarget {
            name,
            session: FloppySession::with_provider(provider, config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::bpb;
    use crate::error::FloppyError;
    use crate::image::MemoryMedia;
    use crate::packet::DATA_OFFSET;
    use byteorder::{ByteOrder, LittleEndian};

    const PATH: &str = "/media/boot.img";

    fn floppy_image() -> Vec<u8> {
        let mut data = vec![0u8; 2880 * 512];
        LittleEndian::write_u16(&mut data[bpb::BYTES_PER_SECTOR..], 512);
        LittleEndian::write_u16(&mut data[bpb::SECTORS..], 2880);
        data[bpb::MEDIA] = 0xF0;
        data
    }

    fn target() -> FloppyTarget<MemoryMedia> {
        let media = MemoryMedia::new();
        media.insert(PATH, floppy_image());
        FloppyTarget::builder().name("fd0").build(media).unwrap()
    }

    fn raw_request(cdb: &[u8], order: WireOrder) -> Vec<u8> {
        ScsiPacket::with_cdb(cdb).to_bytes(order)
    }

    #[test]
    fn test_builder_defaults() {
        let target = target();
        assert_eq!(target.name(), "fd0");
        assert_eq!(*target.session().config(), FloppyConfig::default());
    }

    #[test]
    fn test_builder_validation() {
        let result = FloppyTarget::builder().max_path_len(0).build(MemoryMedia::new());
        assert!(matches!(result, Err(TargetError::Config(_))));

        let result = FloppyTarget::builder().max_transfer_sectors(0).build(MemoryMedia::new());
        assert!(matches!(result, Err(TargetError::Config(_))));

        let result = FloppyTarget::builder().canonical_geometry(0, 255).build(MemoryMedia::new());
        assert!(matches!(result, Err(TargetError::Config(_))));

        let result = FloppyTarget::builder().canonical_geometry(63, 256).build(MemoryMedia::new());
        assert!(matches!(result, Err(TargetError::Config(_))));

        let target = FloppyTarget::builder()
            .max_transfer_sectors(128)
            .canonical_geometry(32, 64)
            .build(MemoryMedia::new())
            .unwrap();
        assert_eq!(target.session().config().max_transfer_sectors, 128);
        assert_eq!(target.session().config().canonical_geometry.heads, 64);
    }

    #[test]
    fn test_custom_path_limit() {
        let media = MemoryMedia::new();
        let mut target = FloppyTarget::builder().max_path_len(8).build(media).unwrap();
        assert_eq!(target.open_floppy_image(PATH), Err(FloppyError::DevicePathTooLong));
    }

    #[test]
    fn test_handle_packet_read_capacity() {
        let mut target = target();
        target.open_floppy_image(PATH).unwrap();

        let response = target.handle_packet(&raw_request(&[0x00], WireOrder::Big)).unwrap();
        let response = ScsiPacket::from_bytes(&response, WireOrder::Big).unwrap();
        assert_eq!(response.status.overall_status, 1);

        let response = target.handle_packet(&raw_request(&[0x25], WireOrder::Big)).unwrap();
        assert_eq!(response.len(), DATA_OFFSET + 8);
        let response = ScsiPacket::from_bytes(&response, WireOrder::Big).unwrap();
        assert_eq!(response.status.overall_status, 0);
        assert_eq!(response.data_len, 8);
        assert_eq!(response.data, vec![0, 0, 0x0B, 0x3F, 0, 0, 0x02, 0]);
    }

    #[test]
    fn test_handle_packet_little_endian() {
        let mut target = target();
        target.open_floppy_image(PATH).unwrap();
        target.set_floppy_byte_order(WireOrder::Little);
        target.handle_packet(&raw_request(&[0x00], WireOrder::Little)).unwrap();

        let raw = target.handle_packet(&raw_request(&[0x25], WireOrder::Little)).unwrap();
        assert_eq!(&raw[DATA_OFFSET - 4..DATA_OFFSET], &[8, 0, 0, 0]);
        assert_eq!(&raw[DATA_OFFSET..], &[0x3F, 0x0B, 0, 0, 0, 0x02, 0, 0]);
    }

    #[test]
    fn test_handle_packet_rejects_short_buffer() {
        let mut target = target();
        let result = target.handle_packet(&[0u8; 16]);
        assert!(matches!(result, Err(TargetError::InvalidPacket(_))));
    }
}
