//! Async-buffered backend, built on `ReadDirectoryChangesW`
//!
//! One overlapped read is outstanding at any time. Its completion signals an
//! event object; a second, per-watch event object is the cancellation
//! channel. The watch thread waits on both, so a stop request wakes exactly
//! one watch.

use std::{
    ffi::OsString,
    fmt,
    io,
    mem,
    os::windows::{
        ffi::{OsStrExt, OsStringExt},
        io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle},
    },
    path::{
        Path,
        PathBuf,
    },
    ptr,
    slice,
    sync::Arc,
};

use tracing::{
    debug,
    trace,
    warn,
};
use windows_sys::Win32::{
    Foundation::{
        CloseHandle,
        ERROR_ACCESS_DENIED,
        ERROR_IO_PENDING,
        ERROR_NOTIFY_ENUM_DIR,
        HANDLE,
        INVALID_HANDLE_VALUE,
        WAIT_OBJECT_0,
        WAIT_TIMEOUT,
    },
    Storage::FileSystem::{
        CreateFileW,
        ReadDirectoryChangesW,
        FILE_FLAG_BACKUP_SEMANTICS,
        FILE_FLAG_OVERLAPPED,
        FILE_LIST_DIRECTORY,
        FILE_NOTIFY_CHANGE_DIR_NAME,
        FILE_NOTIFY_CHANGE_FILE_NAME,
        FILE_NOTIFY_CHANGE_LAST_WRITE,
        FILE_SHARE_DELETE,
        FILE_SHARE_READ,
        FILE_SHARE_WRITE,
        OPEN_EXISTING,
    },
    System::{
        Threading::{
            CreateEventW,
            ResetEvent,
            SetEvent,
            WaitForMultipleObjects,
        },
        WindowsProgramming::INFINITE,
        IO::{
            CancelIoEx,
            GetOverlappedResult,
            OVERLAPPED,
        },
    },
};

use crate::{
    config::WatchConfig,
    error::{Error, Result},
    event::ChangeEvent,
    state::Control,
};

use super::file_notify::{
    self,
    NotifyRecords,
};


pub(crate) const MIN_BUFFER_SIZE: usize = file_notify::MIN_RECORD_BUFFER;

const NOTIFY_FILTER: u32 = FILE_NOTIFY_CHANGE_LAST_WRITE
    | FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME;

const COMPLETED: u32 = WAIT_OBJECT_0;
const STOPPED: u32 = WAIT_OBJECT_0 + 1;


/// An event object, closed on drop
#[derive(Debug)]
struct Event(HANDLE);

impl Event {
    /// A manual-reset event, initially not signaled
    fn new() -> io::Result<Self> {
        let handle = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        match handle {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(Event(handle)),
        }
    }

    fn set(&self) -> io::Result<()> {
        match unsafe { SetEvent(self.0) } {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    fn reset(&self) -> io::Result<()> {
        match unsafe { ResetEvent(self.0) } {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0); }
    }
}


/// Signals the stop event of one watch
#[derive(Clone, Debug)]
pub(crate) struct Waker(Arc<Event>);

impl Waker {
    pub(crate) fn wake(&self) -> io::Result<()> {
        self.0.set()
    }
}


/// The `ReadDirectoryChangesW` side of one directory watch
pub(crate) struct Backend {
    root: PathBuf,
    recursive: bool,
    directory: OwnedHandle,
    completion: Event,
    stop: Arc<Event>,

    // The kernel writes to both while a read is pending, so both live on the
    // heap and are only freed after the read was cancelled.
    overlapped: Box<OVERLAPPED>,
    buffer: Vec<u32>,
    pending: bool,
}

// The raw pointers inside `OVERLAPPED` are owned by this backend alone.
unsafe impl Send for Backend {}

impl Backend {
    /// Open the directory and issue the first read
    ///
    /// Changes that happen after this returns are not lost, even if the
    /// watch thread has not started waiting yet.
    pub(crate) fn open(root: &Path, config: &WatchConfig) -> Result<Self> {
        let directory = open_directory(root)
            .map_err(|error| Error::setup(root, error))?;
        let completion = Event::new()
            .map_err(|error| Error::setup(root, error))?;
        let stop = Event::new()
            .map(Arc::new)
            .map_err(|error| Error::setup(root, error))?;

        let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { mem::zeroed() });
        overlapped.hEvent = completion.0;

        // `Vec<u32>` keeps the buffer DWORD-aligned, as the records require.
        let words = (config.buffer_size + 3) / 4;

        let mut backend = Backend {
            root: root.to_path_buf(),
            recursive: config.recursive,
            directory,
            completion,
            stop,
            overlapped,
            buffer: vec![0; words],
            pending: false,
        };
        backend.arm()
            .map_err(|error| Error::setup(root, error))?;
        debug!(
            root = %root.display(),
            recursive = config.recursive,
            "issued first directory read"
        );

        Ok(backend)
    }

    pub(crate) fn waker(&self) -> Waker {
        Waker(self.stop.clone())
    }

    /// Wait for completed reads and deliver their records until stopped or
    /// failed
    pub(crate) fn run(
        &mut self,
        control: &Control,
        emit   : &mut dyn FnMut(ChangeEvent),
    )
        -> Result<()>
    {
        let handles = [self.completion.0, self.stop.0];

        while !control.stop_requested() {
            if !self.pending {
                self.arm().map_err(|error| Error::io(&self.root, error))?;
            }

            let status = unsafe {
                WaitForMultipleObjects(
                    handles.len() as u32,
                    handles.as_ptr(),
                    0,
                    INFINITE,
                )
            };

            match status {
                COMPLETED => {
                    let len = self.complete()?;
                    self.completion.reset()
                        .map_err(|error| Error::io(&self.root, error))?;

                    let bytes = unsafe {
                        slice::from_raw_parts(self.buffer.as_ptr() as *const u8, len)
                    };
                    dispatch(&self.root, bytes, control, emit)?;
                }
                STOPPED => {
                    debug!("woken up to stop");
                }
                WAIT_TIMEOUT => {
                    warn!("wait timed out");
                }
                _ => {
                    return Err(Error::io(&self.root, io::Error::last_os_error()));
                }
            }
        }

        Ok(())
    }

    /// Issue the next overlapped read
    fn arm(&mut self) -> io::Result<()> {
        let ok = unsafe {
            ReadDirectoryChangesW(
                self.directory.as_raw_handle() as HANDLE,
                self.buffer.as_mut_ptr().cast(),
                (self.buffer.len() * 4) as u32,
                self.recursive as i32,
                NOTIFY_FILTER,
                ptr::null_mut(),
                &mut *self.overlapped,
                None,
            )
        };

        if ok == 0 {
            let error = io::Error::last_os_error();
            if error.raw_os_error() != Some(ERROR_IO_PENDING as i32) {
                return Err(error);
            }
        }

        self.pending = true;
        Ok(())
    }

    /// Collect the result of the read that signaled completion
    ///
    /// Returns the number of bytes the kernel wrote into the buffer.
    fn complete(&mut self) -> Result<usize> {
        let mut len = 0u32;
        let ok = unsafe {
            GetOverlappedResult(
                self.directory.as_raw_handle() as HANDLE,
                &*self.overlapped,
                &mut len,
                0,
            )
        };
        self.pending = false;

        if ok == 0 {
            let error = io::Error::last_os_error();
            return Err(match error.raw_os_error() {
                Some(code) if code == ERROR_NOTIFY_ENUM_DIR as i32 => {
                    Error::Overflow { path: self.root.clone() }
                }
                Some(code) if code == ERROR_ACCESS_DENIED as i32
                    && !self.root.exists() =>
                {
                    Error::WatchRemoved { path: self.root.clone() }
                }
                _ => Error::io(&self.root, error),
            });
        }

        // The kernel reports a buffer overflow as a successful, empty read.
        if len == 0 {
            return Err(Error::Overflow { path: self.root.clone() });
        }

        Ok(len as usize)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("pending", &self.pending)
            .finish()
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }

        let handle = self.directory.as_raw_handle() as HANDLE;
        let mut len = 0u32;
        unsafe {
            CancelIoEx(handle, &*self.overlapped);

            // Wait until the kernel is done with the buffer.
            GetOverlappedResult(handle, &*self.overlapped, &mut len, 1);
        }
        trace!(root = %self.root.display(), "cancelled pending read");
    }
}


/// Turn the records of one completed read into events
fn dispatch(
    root   : &Path,
    buffer : &[u8],
    control: &Control,
    emit   : &mut dyn FnMut(ChangeEvent),
)
    -> Result<()>
{
    for record in NotifyRecords::new(buffer) {
        let record = record.map_err(|error| Error::Framing {
            path: root.to_path_buf(),
            offset: error.offset,
            len: error.len,
        })?;

        let action = match file_notify::action(record.action) {
            Some(action) => action,
            None => {
                trace!(action = record.action, "skipping unknown action");
                continue;
            }
        };
        let relative = PathBuf::from(OsString::from_wide(&record.name));
        let event = match ChangeEvent::from_relative(root, &relative, action) {
            Some(event) => event,
            None => continue,
        };

        if control.stop_requested() {
            return Ok(());
        }
        trace!(%event, "delivering");
        emit(event);
    }

    Ok(())
}

fn open_directory(path: &Path) -> io::Result<OwnedHandle> {
    let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
    wide.push(0);

    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            FILE_LIST_DIRECTORY,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
            0,
        )
    };

    if handle == INVALID_HANDLE_VALUE {
        Err(io::Error::last_os_error())
    } else {
        Ok(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) })
    }
}
