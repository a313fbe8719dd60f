//! Backing image storage
//!
//! The image file is reached through the [`MediaProvider`] trait so the
//! target can run against the real file system or against in-memory media.
//! [`ImageStore`] owns at most one open handle and applies the sector
//! addressing rules on top of it.

use crate::error::{FloppyError, FloppyResult};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Geometry derived from the image's BIOS Parameter Block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Bytes per logical sector
    pub block_size: u32,
    /// Number of logical sectors on the medium
    pub total_sectors: u32,
}

impl Geometry {
    pub fn new(block_size: u32, total_sectors: u32) -> Self {
        Geometry {
            block_size,
            total_sectors,
        }
    }

    /// True for the classic 1.44MB floppy shape (512 x 2880)
    pub fn is_144mb_floppy(&self) -> bool {
        self.block_size == 512 && self.total_sectors == 2880
    }
}

/// Source of image handles
///
/// Implement this trait to serve images from something other than the local
/// file system. Closing a handle is dropping it.
pub trait MediaProvider {
    type Handle: Read + Write + Seek;

    /// Check that the path can currently be opened for reading
    ///
    /// Runs before every real open so that media pulled out from under the
    /// target shows up as an open failure rather than a half-open handle.
    fn probe(&self, path: &Path) -> io::Result<()>;

    /// Open the image for reading
    fn open_read(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Open the image for reading and writing
    fn open_write(&self, path: &Path) -> io::Result<Self::Handle>;
}

/// Local file system media
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMedia;

impl MediaProvider for FsMedia {
    type Handle = File;

    fn probe(&self, path: &Path) -> io::Result<()> {
        File::open(path).map(drop)
    }

    fn open_read(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn open_write(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }
}

#[derive(Debug, Default)]
struct Shelf {
    images: HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>,
    locked: HashSet<PathBuf>,
}

/// In-memory media
///
/// Cloning shares the underlying images, so a test can keep one clone to
/// inspect or swap media while the target holds another.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedia {
    shelf: Arc<Mutex<Shelf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the image stored under `path`
    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        lock(&self.shelf)
            .images
            .insert(path.into(), Arc::new(Mutex::new(data)));
    }

    /// Remove the image stored under `path`, as if the media was ejected
    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.shelf)
            .images
            .remove(path.as_ref())
            .map(|data| lock(&data).clone())
    }

    /// Refuse writable opens of `path`, like a read-only file system
    pub fn lock_writes(&self, path: impl Into<PathBuf>) {
        lock(&self.shelf).locked.insert(path.into());
    }

    /// Snapshot of the bytes stored under `path`
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.shelf)
            .images
            .get(path.as_ref())
            .map(|data| lock(data).clone())
    }

    fn image(&self, path: &Path) -> io::Result<Arc<Mutex<Vec<u8>>>> {
        lock(&self.shelf)
            .images
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

impl MediaProvider for MemoryMedia {
    type Handle = MemoryHandle;

    fn probe(&self, path: &Path) -> io::Result<()> {
        self.image(path).map(drop)
    }

    fn open_read(&self, path: &Path) -> io::Result<MemoryHandle> {
        Ok(MemoryHandle {
            data: self.image(path)?,
            pos: 0,
            writable: false,
        })
    }

    fn open_write(&self, path: &Path) -> io::Result<MemoryHandle> {
        let data = self.image(path)?;
        if lock(&self.shelf).locked.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                path.display().to_string(),
            ));
        }
        Ok(MemoryHandle {
            data,
            pos: 0,
            writable: true,
        })
    }
}

/// Open handle onto a [`MemoryMedia`] image
#[derive(Debug)]
pub struct MemoryHandle {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    writable: bool,
}

impl Read for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = lock(&self.data);
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "handle is read-only"));
        }
        let mut data = lock(&self.data);
        let start = self.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = lock(&self.data).len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset as i64),
            SeekFrom::End(delta) => len.checked_add(delta),
            SeekFrom::Current(delta) => (self.pos as i64).checked_add(delta),
        };
        match target {
            Some(offset) if offset >= 0 => {
                self.pos = offset as u64;
                Ok(self.pos)
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid seek")),
        }
    }
}

/// Read until `buf` is full or the source runs dry, returning the count
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn write_full<W: Write>(writer: &mut W, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

/// Map a short transfer onto the sense the host expects
fn check_transfer(done: usize, wanted: usize) -> FloppyResult<()> {
    if done == wanted {
        Ok(())
    } else if done == 0 {
        Err(FloppyError::SectorRange)
    } else {
        Err(FloppyError::Media)
    }
}

/// The image file behind one session
///
/// Holds the image path and, while a command is executing, the open handle.
pub struct ImageStore<P: MediaProvider = FsMedia> {
    provider: P,
    path: PathBuf,
    handle: Option<P::Handle>,
    read_only: bool,
}

impl<P: MediaProvider> ImageStore<P> {
    pub fn new(provider: P) -> Self {
        ImageStore {
            provider,
            path: PathBuf::new(),
            handle: None,
            read_only: false,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Open the image for reading, replacing any current handle
    pub fn open_read_only(&mut self) -> FloppyResult<()> {
        self.close();
        if let Err(e) = self.provider.probe(&self.path) {
            log::debug!("Image probe failed for {}: {}", self.path.display(), e);
            return Err(FloppyError::NoMedia);
        }
        match self.provider.open_read(&self.path) {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::warn!("Unable to open image file {}: {}", self.path.display(), e);
                Err(FloppyError::NoMedia)
            }
        }
    }

    /// Open the image for reading and writing, replacing any current handle
    pub fn open_writable(&mut self) -> FloppyResult<()> {
        self.close();
        let handle = self.writable_handle()?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Report whether a writable open would currently succeed
    ///
    /// The handle opened for the check is dropped straight away; the store's
    /// current handle is left untouched.
    pub fn probe_writable(&self) -> FloppyResult<()> {
        self.writable_handle().map(drop)
    }

    fn writable_handle(&self) -> FloppyResult<P::Handle> {
        if self.read_only {
            log::debug!("Attempted to modify read-only image {}", self.path.display());
            return Err(FloppyError::WriteProtect);
        }
        if self.provider.probe(&self.path).is_err() {
            return Err(FloppyError::NoMedia);
        }
        self.provider.open_write(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                FloppyError::WriteProtect
            }
            _ => {
                log::warn!("Unable to open image file {}: {}", self.path.display(), e);
                FloppyError::NoMedia
            }
        })
    }

    /// Release the handle; harmless when nothing is open
    pub fn close(&mut self) {
        self.handle = None;
    }

    pub(crate) fn handle_mut(&mut self) -> FloppyResult<&mut P::Handle> {
        self.handle.as_mut().ok_or(FloppyError::NoMedia)
    }

    /// Read `count` sectors starting at `start`
    ///
    /// A start sector past `total_sectors` is refused before any I/O. The
    /// comparison is `>` rather than `>=`, so the sector just past the end
    /// reaches the file and fails there as a zero-length read.
    pub fn read_sectors(&mut self, geometry: Geometry, start: u32, count: u32) -> FloppyResult<Vec<u8>> {
        if start > geometry.total_sectors {
            return Err(FloppyError::SectorRange);
        }

        let offset = start as u64 * geometry.block_size as u64;
        let len = count as usize * geometry.block_size as usize;
        let handle = self.handle_mut()?;

        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|_| FloppyError::SectorRange)?;

        let mut data = vec![0u8; len];
        let done = read_full(&mut *handle, &mut data).map_err(|_| FloppyError::Media)?;
        check_transfer(done, len)?;
        Ok(data)
    }

    /// Write `count` sectors from `data` starting at `start`
    ///
    /// Only the first `count * block_size` bytes of `data` are written. The
    /// range check compares the transfer length, not the start sector,
    /// against the medium size.
    pub fn write_sectors(&mut self, geometry: Geometry, start: u32, count: u32, data: &[u8]) -> FloppyResult<()> {
        if count > geometry.total_sectors {
            return Err(FloppyError::SectorRange);
        }

        let offset = start as u64 * geometry.block_size as u64;
        let len = count as usize * geometry.block_size as usize;
        if data.len() < len {
            return Err(FloppyError::InvalidParams);
        }
        let handle = self.handle_mut()?;

        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|_| FloppyError::SectorRange)?;

        let done = write_full(&mut *handle, &data[..len]).map_err(|_| FloppyError::Media)?;
        check_transfer(done, len)?;
        handle.flush().map_err(|_| FloppyError::Media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/media/floppy.img";

    fn store_with(data: Vec<u8>) -> (MemoryMedia, ImageStore<MemoryMedia>) {
        let media = MemoryMedia::new();
        media.insert(PATH, data);
        let mut store = ImageStore::new(media.clone());
        store.set_path(PathBuf::from(PATH));
        (media, store)
    }

    fn patterned(sectors: usize) -> Vec<u8> {
        (0..sectors * 512).map(|i| (i / 512) as u8).collect()
    }

    #[test]
    fn test_open_missing_image() {
        let (media, mut store) = store_with(Vec::new());
        media.remove(PATH);
        assert_eq!(store.open_read_only(), Err(FloppyError::NoMedia));
        assert_eq!(store.open_writable(), Err(FloppyError::NoMedia));
        assert!(!store.is_open());
    }

    #[test]
    fn test_open_writable_read_only_flag() {
        let (_media, mut store) = store_with(patterned(4));
        store.set_read_only(true);
        assert_eq!(store.open_writable(), Err(FloppyError::WriteProtect));
        assert_eq!(store.probe_writable(), Err(FloppyError::WriteProtect));
        assert!(store.open_read_only().is_ok());
    }

    #[test]
    fn test_open_writable_denied_by_media() {
        let (media, mut store) = store_with(patterned(4));
        media.lock_writes(PATH);
        assert_eq!(store.open_writable(), Err(FloppyError::WriteProtect));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_media, mut store) = store_with(patterned(1));
        store.open_read_only().unwrap();
        store.close();
        store.close();
        assert!(!store.is_open());
    }

    #[test]
    fn test_read_sectors() {
        let (_media, mut store) = store_with(patterned(8));
        store.open_read_only().unwrap();
        let geometry = Geometry::new(512, 8);
        let data = store.read_sectors(geometry, 2, 3).unwrap();
        assert_eq!(data.len(), 3 * 512);
        assert_eq!(data[0], 2);
        assert_eq!(data[512 * 2], 4);
    }

    #[test]
    fn test_read_past_end() {
        let (_media, mut store) = store_with(patterned(8));
        store.open_read_only().unwrap();
        let geometry = Geometry::new(512, 8);
        // start == total passes the range check and hits EOF
        assert_eq!(store.read_sectors(geometry, 8, 1), Err(FloppyError::SectorRange));
        assert_eq!(store.read_sectors(geometry, 9, 1), Err(FloppyError::SectorRange));
        // straddling the end is a short read
        assert_eq!(store.read_sectors(geometry, 7, 2), Err(FloppyError::Media));
    }

    #[test]
    fn test_read_without_handle() {
        let (_media, mut store) = store_with(patterned(1));
        assert_eq!(
            store.read_sectors(Geometry::new(512, 1), 0, 1),
            Err(FloppyError::NoMedia)
        );
    }

    #[test]
    fn test_write_sectors() {
        let (media, mut store) = store_with(patterned(8));
        store.open_writable().unwrap();
        let geometry = Geometry::new(512, 8);
        store.write_sectors(geometry, 5, 1, &[0xAB; 512]).unwrap();
        store.close();

        let contents = media.contents(PATH).unwrap();
        assert!(contents[5 * 512..6 * 512].iter().all(|&b| b == 0xAB));
        assert_eq!(contents[4 * 512], 4);
        assert_eq!(contents[6 * 512], 6);
    }

    #[test]
    fn test_write_count_range_check() {
        let (_media, mut store) = store_with(patterned(4));
        store.open_writable().unwrap();
        let geometry = Geometry::new(512, 4);
        let data = vec![0u8; 5 * 512];
        assert_eq!(store.write_sectors(geometry, 0, 5, &data), Err(FloppyError::SectorRange));
    }

    #[test]
    fn test_write_short_payload() {
        let (_media, mut store) = store_with(patterned(4));
        store.open_writable().unwrap();
        let geometry = Geometry::new(512, 4);
        assert_eq!(
            store.write_sectors(geometry, 0, 2, &[0u8; 512]),
            Err(FloppyError::InvalidParams)
        );
    }

    #[test]
    fn test_write_on_read_only_handle() {
        let (_media, mut store) = store_with(patterned(4));
        store.open_read_only().unwrap();
        assert_eq!(
            store.write_sectors(Geometry::new(512, 4), 0, 1, &[0u8; 512]),
            Err(FloppyError::Media)
        );
    }

    #[test]
    fn test_geometry_shape() {
        assert!(Geometry::new(512, 2880).is_144mb_floppy());
        assert!(!Geometry::new(512, 2881).is_144mb_floppy());
    }
}
