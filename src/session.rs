//! Virtual floppy session management
//!
//! A session ties one image path to the state the host has observed: whether
//! a medium is loaded, whether the medium change has been reported yet, and
//! which byte order the remote side speaks.

use crate::boot_sector::{BootSectorPatcher, CanonicalGeometry};
use crate::byte_order::WireOrder;
use crate::capacity;
use crate::error::{FloppyError, FloppyResult};
use crate::image::{FsMedia, Geometry, ImageStore, MediaProvider};
use crate::packet::ScsiPacket;
use crate::scsi::{CommandOutcome, ScsiHandler};
use std::path::Path;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No image loaded
    #[default]
    Closed,
    /// Image loaded; the next command reports a medium change
    MediumChangePending,
    /// Image loaded and announced; commands run normally
    Ready,
}

/// Tunable session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloppyConfig {
    /// Longest accepted image path, in bytes (default: 256)
    pub max_path_len: usize,
    /// Largest READ/WRITE transfer in sectors (default: 64)
    pub max_transfer_sectors: u32,
    /// Geometry presented in sector 0 and MODE SENSE for large media
    pub canonical_geometry: CanonicalGeometry,
}

impl Default for FloppyConfig {
    fn default() -> Self {
        FloppyConfig {
            max_path_len: 256,
            max_transfer_sectors: 64,
            canonical_geometry: CanonicalGeometry::default(),
        }
    }
}

/// One virtual floppy device
pub struct FloppySession<P: MediaProvider = FsMedia> {
    params: FloppyConfig,
    store: ImageStore<P>,
    patcher: BootSectorPatcher,
    state: SessionState,
    byte_order: WireOrder,
    geometry: Option<Geometry>,
}

impl Default for FloppySession {
    fn default() -> Self {
        Self::new()
    }
}

impl FloppySession {
    /// Create a session backed by the local file system
    pub fn new() -> Self {
        Self::with_provider(FsMedia, FloppyConfig::default())
    }
}

impl<P: MediaProvider> FloppySession<P> {
    pub fn with_provider(provider: P, params: FloppyConfig) -> Self {
        FloppySession {
            params,
            store: ImageStore::new(provider),
            patcher: BootSectorPatcher::new(params.canonical_geometry),
            state: SessionState::Closed,
            byte_order: WireOrder::Big,
            geometry: None,
        }
    }

    pub fn config(&self) -> &FloppyConfig {
        &self.params
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn image_path(&self) -> &Path {
        self.store.path()
    }

    pub fn byte_order(&self) -> WireOrder {
        self.byte_order
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    /// Geometry from the most recent probe
    ///
    /// Informational only; every command that needs geometry probes again.
    pub fn last_geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn media(&self) -> &P {
        self.store.provider()
    }

    pub(crate) fn store_mut(&mut self) -> &mut ImageStore<P> {
        &mut self.store
    }

    pub(crate) fn patcher(&self) -> BootSectorPatcher {
        self.patcher
    }

    /// Load the image at `path`
    ///
    /// The image must open and carry a valid BPB. The file is closed again
    /// before returning; each command reopens it.
    pub fn open_floppy_image(&mut self, path: impl AsRef<Path>) -> FloppyResult<()> {
        if self.is_open() {
            log::warn!("Image {} is still open", self.store.path().display());
            return Err(FloppyError::DeviceAlreadyOpen);
        }

        let path = path.as_ref();
        if path.as_os_str().len() > self.params.max_path_len {
            log::warn!("Image file path is too long ({} bytes)", path.as_os_str().len());
            return Err(FloppyError::DevicePathTooLong);
        }

        self.store.set_path(path.to_path_buf());
        self.store.open_read_only()?;
        let probed = self.probe_geometry();
        self.store.close();
        let geometry = probed?;

        self.byte_order = WireOrder::Big;
        self.store.set_read_only(false);
        self.state = SessionState::MediumChangePending;
        log::info!(
            "Opened floppy image {} ({} x {} bytes)",
            path.display(),
            geometry.total_sectors,
            geometry.block_size
        );
        Ok(())
    }

    /// Unload the image; always succeeds
    pub fn close_floppy_image(&mut self) -> FloppyResult<()> {
        if self.is_open() {
            log::info!("Closed floppy image {}", self.store.path().display());
        }
        self.store.close();
        self.state = SessionState::Closed;
        Ok(())
    }

    pub fn set_floppy_byte_order(&mut self, order: WireOrder) {
        self.byte_order = order;
    }

    /// Mark the image read-only until it is reopened
    ///
    /// The flag argument is accepted for interface compatibility and ignored:
    /// the image always becomes read-only.
    pub fn set_image_read_only(&mut self, _status: bool) {
        self.store.set_read_only(true);
    }

    /// Execute one command packet; see [`ScsiHandler::execute`]
    pub fn execute_scsi_cmd(&mut self, request: &ScsiPacket, response: &mut ScsiPacket) -> CommandOutcome {
        ScsiHandler::execute(self, request, response)
    }

    /// Gate every command: no media, pending medium change, or reopen
    pub(crate) fn begin_command(&mut self) -> FloppyResult<()> {
        match self.state {
            SessionState::Closed => {
                log::warn!("SCSI command received with no image open");
                Err(FloppyError::NoMedia)
            }
            SessionState::MediumChangePending => {
                log::debug!("Reporting medium change for first access");
                self.state = SessionState::Ready;
                Err(FloppyError::MediumChange)
            }
            SessionState::Ready => self.store.open_read_only(),
        }
    }

    /// Re-derive geometry from the currently open handle
    pub(crate) fn probe_geometry(&mut self) -> FloppyResult<Geometry> {
        let geometry = capacity::probe(self.store.handle_mut()?)?;
        self.geometry = Some(geometry);
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryMedia;
    use byteorder::{ByteOrder, LittleEndian};

    const PATH: &str = "/media/a.img";

    fn floppy_image() -> Vec<u8> {
        let mut data = vec![0u8; 2880 * 512];
        LittleEndian::write_u16(&mut data[capacity::bpb::BYTES_PER_SECTOR..], 512);
        LittleEndian::write_u16(&mut data[capacity::bpb::SECTORS..], 2880);
        data[capacity::bpb::MEDIA] = 0xF0;
        data
    }

    fn session() -> FloppySession<MemoryMedia> {
        let media = MemoryMedia::new();
        media.insert(PATH, floppy_image());
        FloppySession::with_provider(media, FloppyConfig::default())
    }

    #[test]
    fn test_open_sets_initial_state() {
        let mut session = session();
        session.set_floppy_byte_order(WireOrder::Little);
        session.open_floppy_image(PATH).unwrap();
        assert_eq!(session.state(), SessionState::MediumChangePending);
        assert_eq!(session.byte_order(), WireOrder::Big);
        assert!(!session.is_read_only());
        assert_eq!(session.image_path(), Path::new(PATH));
        assert_eq!(session.last_geometry(), Some(Geometry::new(512, 2880)));
        assert!(!session.store.is_open());
    }

    #[test]
    fn test_open_twice() {
        let mut session = session();
        session.open_floppy_image(PATH).unwrap();
        assert_eq!(session.open_floppy_image(PATH), Err(FloppyError::DeviceAlreadyOpen));
    }

    #[test]
    fn test_open_path_too_long() {
        let mut session = session();
        let path = format!("/{}", "a".repeat(256));
        assert_eq!(session.open_floppy_image(&path), Err(FloppyError::DevicePathTooLong));

        // exactly the limit is still accepted as a path
        let path = format!("/{}", "a".repeat(255));
        assert_eq!(session.open_floppy_image(&path), Err(FloppyError::NoMedia));
    }

    #[test]
    fn test_open_invalid_media() {
        let media = MemoryMedia::new();
        media.insert(PATH, vec![0u8; 4096]);
        let mut session = FloppySession::with_provider(media, FloppyConfig::default());
        assert_eq!(session.open_floppy_image(PATH), Err(FloppyError::Media));
        assert!(!session.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = session();
        assert_eq!(session.close_floppy_image(), Ok(()));
        session.open_floppy_image(PATH).unwrap();
        assert_eq!(session.close_floppy_image(), Ok(()));
        assert_eq!(session.close_floppy_image(), Ok(()));
        assert!(!session.is_open());
        session.open_floppy_image(PATH).unwrap();
    }

    #[test]
    fn test_read_only_ignores_flag_and_resets_on_open() {
        let mut session = session();
        session.open_floppy_image(PATH).unwrap();
        session.set_image_read_only(false);
        assert!(session.is_read_only());

        session.close_floppy_image().unwrap();
        session.open_floppy_image(PATH).unwrap();
        assert!(!session.is_read_only());
    }

    #[test]
    fn test_begin_command_sequence() {
        let mut session = session();
        assert_eq!(session.begin_command(), Err(FloppyError::NoMedia));

        session.open_floppy_image(PATH).unwrap();
        assert_eq!(session.begin_command(), Err(FloppyError::MediumChange));
        assert_eq!(session.begin_command(), Ok(()));
        assert!(session.store.is_open());
    }
}
