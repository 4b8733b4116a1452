//! Named, file-backed shared memory regions.
//!
//! A region is a file in the shared-memory directory mapped with `memmap2`.
//! The first [`CONTROL_SIZE`] bytes form a control block holding the
//! cross-process lock word; the rest is the data area handed out through
//! [`RegionGuard`]. The lock word lives in the mapping itself, so a holder
//! that crashed leaves it set and only a timeout reveals it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use memmap2::MmapMut;

use crate::wait::{wait_until, WaitResult};
use crate::{TransportError, TransportResult};

/// Bytes reserved in front of the data area.
pub const CONTROL_SIZE: usize = 16;

const REGION_MAGIC: u32 = 0x5247_4E31;
const OPEN_READY_TIMEOUT: Duration = Duration::from_millis(100);

#[repr(C, align(8))]
struct RegionControl {
    lock: AtomicU32,
    magic: AtomicU32,
    data_len: AtomicU64,
}

/// Directory used for regions and events when none is configured.
pub fn default_shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Shared mapping addressed by name.
pub struct NamedRegion {
    name: String,
    path: PathBuf,
    // Keeps the mapping alive; all access goes through `ptr`.
    _map: MmapMut,
    ptr: NonNull<u8>,
    data_len: usize,
}

// SAFETY: the data area is only mutated through `RegionGuard`, which requires
// holding the lock word; the control block is accessed through atomics.
unsafe impl Send for NamedRegion {}
// SAFETY: as above.
unsafe impl Sync for NamedRegion {}

impl NamedRegion {
    /// Creates (or truncates) the region file and maps `data_len` bytes of data.
    pub fn create(dir: &Path, name: &str, data_len: usize) -> TransportResult<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| TransportError::io(format!("create region {}", path.display()), err))?;
        Self::initialise(name, path, file, data_len)
    }

    /// Creates the region only if no file of that name exists yet.
    ///
    /// Returns `Ok(None)` when another process won the race.
    pub fn create_new(dir: &Path, name: &str, data_len: usize) -> TransportResult<Option<Self>> {
        let path = dir.join(name);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => {
                return Err(TransportError::io(
                    format!("create region {}", path.display()),
                    err,
                ))
            }
        };
        Self::initialise(name, path, file, data_len).map(Some)
    }

    /// Maps an existing region created by another handle or process.
    pub fn open(dir: &Path, name: &str) -> TransportResult<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| TransportError::io(format!("open region {}", path.display()), err))?;
        let file_len = file
            .metadata()
            .map_err(|err| TransportError::io(format!("stat region {}", path.display()), err))?
            .len() as usize;
        if file_len < CONTROL_SIZE {
            return Err(TransportError::InvalidLayout("region smaller than control block"));
        }
        let map = map_file(&file, file_len, &path)?;
        let mut region = Self::from_map(name, path, map, file_len - CONTROL_SIZE);

        let ready = wait_until(OPEN_READY_TIMEOUT, || {
            region.control().magic.load(Ordering::Acquire) == REGION_MAGIC
        });
        if ready == WaitResult::TimedOut {
            return Err(TransportError::InvalidLayout("region was never initialised"));
        }
        let advertised = region.control().data_len.load(Ordering::Acquire) as usize;
        if advertised > region.data_len {
            return Err(TransportError::InvalidLayout("region truncated"));
        }
        region.data_len = advertised;
        Ok(region)
    }

    fn initialise(name: &str, path: PathBuf, file: File, data_len: usize) -> TransportResult<Self> {
        let total = CONTROL_SIZE + data_len;
        file.set_len(total as u64)
            .map_err(|err| TransportError::io(format!("size region {}", path.display()), err))?;
        let map = map_file(&file, total, &path)?;
        let region = Self::from_map(name, path, map, data_len);
        let control = region.control();
        control.lock.store(0, Ordering::Relaxed);
        control.data_len.store(data_len as u64, Ordering::Relaxed);
        control.magic.store(REGION_MAGIC, Ordering::Release);
        Ok(region)
    }

    fn from_map(name: &str, path: PathBuf, mut map: MmapMut, data_len: usize) -> Self {
        let ptr = NonNull::new(map.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            name: name.to_string(),
            path,
            _map: map,
            ptr,
            data_len,
        }
    }

    fn control(&self) -> &RegionControl {
        // SAFETY: every mapping is at least CONTROL_SIZE bytes and page aligned.
        unsafe { &*(self.ptr.as_ptr() as *const RegionControl) }
    }

    /// Name the region was created or opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the data area in bytes.
    pub fn len(&self) -> usize {
        self.data_len
    }

    pub fn is_empty(&self) -> bool {
        self.data_len == 0
    }

    /// Acquires the region lock, giving up after `timeout`.
    pub fn lock(&self, timeout: Duration) -> Option<RegionGuard<'_>> {
        let lock = &self.control().lock;
        let holder = std::process::id().max(1);
        let acquired = wait_until(timeout, || {
            lock.compare_exchange(0, holder, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        });
        match acquired {
            WaitResult::Ok => Some(RegionGuard { region: self }),
            WaitResult::TimedOut => None,
        }
    }

    /// Process id of the current lock holder, if any.
    pub fn lock_holder(&self) -> Option<u32> {
        match self.control().lock.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Removes the backing file. Existing mappings stay valid until dropped.
    pub fn unlink(&self) -> TransportResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TransportError::io(
                format!("remove region {}", self.path.display()),
                err,
            )),
        }
    }
}

impl std::fmt::Debug for NamedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedRegion")
            .field("name", &self.name)
            .field("data_len", &self.data_len)
            .finish()
    }
}

fn map_file(file: &File, len: usize, path: &Path) -> TransportResult<MmapMut> {
    // SAFETY: the file is sized to `len` before mapping; concurrent writers are
    // coordinated through the control block lock.
    unsafe { memmap2::MmapOptions::new().len(len).map_mut(file) }
        .map_err(|err| TransportError::io(format!("map region {}", path.display()), err))
}

/// Exclusive access to the data area; the lock is released on drop.
pub struct RegionGuard<'a> {
    region: &'a NamedRegion,
}

impl RegionGuard<'_> {
    /// Data area as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the guard holds the lock word, so no other guard aliases the data.
        unsafe {
            std::slice::from_raw_parts(
                self.region.ptr.as_ptr().add(CONTROL_SIZE),
                self.region.data_len,
            )
        }
    }

    /// Data area as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` prevents overlapping borrows through this guard.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.ptr.as_ptr().add(CONTROL_SIZE),
                self.region.data_len,
            )
        }
    }

    /// Copies `bytes` into the data area at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> TransportResult<()> {
        let capacity = self.region.data_len;
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= capacity)
            .ok_or(TransportError::PayloadTooLarge {
                requested: offset.saturating_add(bytes.len()),
                capacity,
            })?;
        self.as_mut_slice()[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrows `len` bytes of the data area starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> TransportResult<&[u8]> {
        let capacity = self.region.data_len;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= capacity)
            .ok_or(TransportError::InvalidLayout("read past end of region"))?;
        Ok(&self.as_slice()[offset..end])
    }
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.region.control().lock.store(0, Ordering::Release);
    }
}
