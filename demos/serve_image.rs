//! Serve a disk image as a virtual floppy
//!
//! Opens the image named on the command line (or a blank in-memory 1.44MB
//! floppy when none is given) and runs the command sequence a host issues
//! when the medium is first attached.
//!
//! ```text
//! RUST_LOG=debug cargo run --example serve_image -- /path/to/boot.img
//! ```

use floppy_target::{
    FloppyTarget, FsMedia, MediaProvider, MemoryMedia, ScsiPacket, TargetResult, WireOrder,
};

const BLANK_IMAGE: &str = "/virtual/blank.img";

/// Blank FAT12 1.44MB floppy: just enough BPB for the target to accept it
fn blank_floppy() -> Vec<u8> {
    let mut data = vec![0u8; 2880 * 512];
    data[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    data[3..11].copy_from_slice(b"MSDOS5.0");
    data[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
    data[0x13..0x15].copy_from_slice(&2880u16.to_le_bytes());
    data[0x15] = 0xF0;
    data[0x18..0x1A].copy_from_slice(&18u16.to_le_bytes());
    data[0x1A..0x1C].copy_from_slice(&2u16.to_le_bytes());
    data[0x26] = 0x29;
    data[0x1FE..0x200].copy_from_slice(&[0x55, 0xAA]);
    data
}

fn send<P: MediaProvider>(target: &mut FloppyTarget<P>, label: &str, cdb: &[u8]) -> TargetResult<ScsiPacket> {
    let request = ScsiPacket::with_cdb(cdb).to_bytes(WireOrder::Big);
    let raw = target.handle_packet(&request)?;
    let response = ScsiPacket::from_bytes(&raw, WireOrder::Big)?;

    let status = response.status;
    println!(
        "{:<24} status={} sense={:02x}/{:02x}/{:02x} data={} bytes",
        label,
        status.overall_status,
        status.sense_key,
        status.sense_code,
        status.sense_code_qualifier,
        response.data_len
    );
    Ok(response)
}

fn attach<P: MediaProvider>(target: &mut FloppyTarget<P>) -> TargetResult<()> {
    send(target, "TEST UNIT READY", &[0x00])?;
    send(target, "TEST UNIT READY", &[0x00])?;
    send(target, "READ FORMAT CAPACITIES", &[0x23, 0, 0, 0, 0, 0, 0, 0, 12, 0])?;

    let capacity = send(target, "READ CAPACITY", &[0x25])?;
    if capacity.data.len() == 8 {
        let last_lba = u32::from_be_bytes([capacity.data[0], capacity.data[1], capacity.data[2], capacity.data[3]]);
        let block_size = u32::from_be_bytes([capacity.data[4], capacity.data[5], capacity.data[6], capacity.data[7]]);
        println!("  {} sectors of {} bytes", last_lba as u64 + 1, block_size);
    }

    send(target, "MODE SENSE(10) page 05", &[0x5A, 0, 0x05, 0, 0, 0, 0, 0, 40, 0])?;
    send(target, "MODE SENSE(6)", &[0x1A, 0, 0x3F, 0, 4, 0])?;

    let boot = send(target, "READ(10) sector 0", &[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0])?;
    if boot.data.len() >= 64 {
        println!("  boot sector: {}", hex::encode(&boot.data[..64]));
    }
    Ok(())
}

fn main() -> TargetResult<()> {
    env_logger::init();

    match std::env::args().nth(1) {
        Some(path) => {
            let mut target = FloppyTarget::builder().name("fd0").build(FsMedia)?;
            target.open_floppy_image(&path)?;
            println!("Serving {} as a virtual floppy\n", path);
            attach(&mut target)?;
            target.close_floppy_image()?;
        }
        None => {
            let media = MemoryMedia::new();
            media.insert(BLANK_IMAGE, blank_floppy());
            let mut target = FloppyTarget::builder().name("fd0").build(media)?;
            target.open_floppy_image(BLANK_IMAGE)?;
            println!("No image given; serving a blank 1.44MB floppy\n");
            attach(&mut target)?;
            target.close_floppy_image()?;
        }
    }

    Ok(())
}
