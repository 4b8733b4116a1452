//! Named binary events and the per-reader signal/ack pair.
//!
//! An event is a small file in the shared-memory directory holding one
//! atomic flag. Opening an event by name either creates the file or maps the
//! existing one, so writer and reader can open in any order.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use memmap2::MmapMut;

use crate::wait::{raise_flag, take_flag, WaitResult};
use crate::{TransportError, TransportResult};

const EVENT_FILE_LEN: u64 = 8;

/// A named, file-backed binary event.
pub struct SyncEvent {
    name: String,
    path: PathBuf,
    _map: MmapMut,
    flag: NonNull<AtomicU32>,
}

// SAFETY: the mapped flag is only accessed atomically.
unsafe impl Send for SyncEvent {}
// SAFETY: as above.
unsafe impl Sync for SyncEvent {}

impl SyncEvent {
    /// Opens the event `name` in `dir`, creating it when missing.
    pub fn open(dir: &Path, name: &str) -> TransportResult<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| TransportError::io(format!("open event {}", path.display()), err))?;
        let len = file
            .metadata()
            .map_err(|err| TransportError::io(format!("stat event {}", path.display()), err))?
            .len();
        if len < EVENT_FILE_LEN {
            file.set_len(EVENT_FILE_LEN)
                .map_err(|err| TransportError::io(format!("size event {}", path.display()), err))?;
        }
        // SAFETY: the file holds at least EVENT_FILE_LEN bytes.
        let mut map = unsafe {
            memmap2::MmapOptions::new()
                .len(EVENT_FILE_LEN as usize)
                .map_mut(&file)
        }
        .map_err(|err| TransportError::io(format!("map event {}", path.display()), err))?;
        let flag = NonNull::new(map.as_mut_ptr() as *mut AtomicU32)
            .ok_or(TransportError::InvalidLayout("event mapped at null"))?;
        Ok(Self {
            name: name.to_string(),
            path,
            _map: map,
            flag,
        })
    }

    fn flag(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned and outlives `self`.
        unsafe { self.flag.as_ref() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raises the event. Raising an already raised event is a no-op.
    pub fn set(&self) {
        raise_flag(self.flag());
    }

    /// Waits up to `timeout` for the event and consumes it.
    pub fn wait(&self, timeout: Duration) -> bool {
        take_flag(self.flag(), timeout) == WaitResult::Ok
    }

    /// Consumes the event if it is raised, without blocking.
    pub fn try_take(&self) -> bool {
        self.wait(Duration::ZERO)
    }

    /// Removes the backing file; other holders keep their mapping.
    pub fn unlink(&self) -> TransportResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TransportError::io(
                format!("remove event {}", self.path.display()),
                err,
            )),
        }
    }
}

impl std::fmt::Debug for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEvent").field("name", &self.name).finish()
    }
}

/// One half of a [`SyncEventPair`].
///
/// `Invalidated` remembers that the handle was closed on purpose (an
/// acknowledge timeout) and must be reopened before use.
#[derive(Debug, Default)]
pub enum EventSlot {
    #[default]
    Absent,
    Valid(SyncEvent),
    Invalidated,
}

impl EventSlot {
    pub fn is_valid(&self) -> bool {
        matches!(self, EventSlot::Valid(_))
    }

    pub fn event(&self) -> Option<&SyncEvent> {
        match self {
            EventSlot::Valid(event) => Some(event),
            EventSlot::Absent | EventSlot::Invalidated => None,
        }
    }

    /// Closes the handle, leaving the slot invalidated.
    pub fn invalidate(&mut self) -> Option<SyncEvent> {
        match std::mem::replace(self, EventSlot::Invalidated) {
            EventSlot::Valid(event) => Some(event),
            EventSlot::Absent | EventSlot::Invalidated => None,
        }
    }

    /// Raises the event if the handle is open.
    pub fn set(&self) {
        if let Some(event) = self.event() {
            event.set();
        }
    }
}

/// Signal and acknowledge events shared by one channel and one reader.
#[derive(Debug)]
pub struct SyncEventPair {
    dir: PathBuf,
    signal_name: String,
    ack_name: String,
    /// Writer to reader: new data is available.
    pub signal: EventSlot,
    /// Reader to writer: the data was consumed.
    pub ack: EventSlot,
}

impl SyncEventPair {
    /// Opens both events.
    pub fn open(dir: &Path, signal_name: &str, ack_name: &str) -> TransportResult<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            signal_name: signal_name.to_string(),
            ack_name: ack_name.to_string(),
            signal: EventSlot::Valid(SyncEvent::open(dir, signal_name)?),
            ack: EventSlot::Valid(SyncEvent::open(dir, ack_name)?),
        })
    }

    /// Reopens the acknowledge half in place, leaving the signal untouched.
    pub fn reopen_ack(&mut self) -> TransportResult<()> {
        self.ack = EventSlot::Valid(SyncEvent::open(&self.dir, &self.ack_name)?);
        Ok(())
    }

    /// Closes both handles and removes their backing files.
    pub fn close(&mut self) {
        self.signal.invalidate();
        self.ack.invalidate();
        for name in [&self.signal_name, &self.ack_name] {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => log::debug!("removing event {}: {err}", path.display()),
            }
        }
    }
}
