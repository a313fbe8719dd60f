//! A software SCSI target that serves a disk image as a virtual floppy
//!
//! The target takes one SCSI command packet at a time from a transport,
//! executes it against an MS-DOS formatted image file and hands back a
//! response packet carrying status, sense data and any payload. Geometry is
//! read from the image's BIOS Parameter Block on every command, and sector 0
//! is presented with floppy-relative boot geometry so remote boot works from
//! images cut out of hard disks.
//!
//! # Example
//!
//! ```no_run
//! use floppy_target::{FloppyTarget, FsMedia, ScsiPacket, TargetResult, WireOrder};
//!
//! # fn main() -> TargetResult<()> {
//! let mut target = FloppyTarget::builder()
//!     .name("fd0")
//!     .max_transfer_sectors(64)
//!     .build(FsMedia)?;
//! target.open_floppy_image("/srv/images/boot.img")?;
//!
//! // READ CAPACITY, as a transport would deliver it
//! let request = ScsiPacket::with_cdb(&[0x25]).to_bytes(WireOrder::Big);
//! let response = target.handle_packet(&request)?;
//! let response = ScsiPacket::from_bytes(&response, WireOrder::Big)?;
//! println!("status {} data {:02x?}", response.status.overall_status, response.data);
//! # Ok(())
//! # }
//! ```

pub mod boot_sector;
pub mod byte_order;
pub mod capacity;
pub mod error;
pub mod image;
pub mod mode_page;
pub mod packet;
pub mod registry;
pub mod scsi;
pub mod session;
pub mod target;

pub use boot_sector::{BootSectorPatcher, CanonicalGeometry};
pub use byte_order::WireOrder;
pub use error::{FloppyError, FloppyResult, TargetError, TargetResult};
pub use image::{FsMedia, Geometry, ImageStore, MediaProvider, MemoryMedia};
pub use packet::{ScsiPacket, StatusPacket};
pub use registry::DeviceRegistry;
pub use scsi::{CommandOutcome, ScsiHandler};
pub use session::{FloppyConfig, FloppySession};
pub use target::{FloppyTarget, FloppyTargetBuilder};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
