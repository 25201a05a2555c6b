//! Kernel-queue backend, built on inotify
//!
//! One inotify instance per watch. The instance descriptor is non-blocking
//! and registered with a `mio::Poll`, next to a `mio::Waker` that serves as
//! the watch's cancellation channel. The watch thread blocks in
//! `Poll::poll` until either the kernel has records or a stop is requested.

mod events;
mod fd_guard;
mod watches;

use std::{
    collections::HashMap,
    io,
    mem,
    os::unix::io::RawFd,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use inotify_sys as ffi;
use libc::{
    c_void,
    size_t,
};
use mio::{
    unix::SourceFd,
    Events,
    Interest,
    Poll,
    Token,
};
use tracing::{
    debug,
    trace,
    warn,
};
use walkdir::WalkDir;

use crate::{
    config::WatchConfig,
    error::{Error, Result},
    event::ChangeEvent,
    state::Control,
};

use self::{
    events::{
        EventMask,
        Record,
        Records,
    },
    fd_guard::FdGuard,
    watches::{
        WatchMask,
        Watches,
    },
};


/// One `inotify_event` with the longest possible name
pub(crate) const MIN_BUFFER_SIZE: usize =
    mem::size_of::<ffi::inotify_event>() + libc::NAME_MAX as usize + 1;

const INOTIFY: Token = Token(0);
const WAKE: Token = Token(1);


/// Wakes a watch thread blocked in `Poll::poll`
#[derive(Clone, Debug)]
pub(crate) struct Waker(Arc<mio::Waker>);

impl Waker {
    pub(crate) fn wake(&self) -> io::Result<()> {
        self.0.wake()
    }
}


/// The inotify side of one directory watch
#[derive(Debug)]
pub(crate) struct Backend {
    root: PathBuf,
    fd: Arc<FdGuard>,
    watches: Watches,
    poll: Poll,
    waker: Waker,
    buffer: Vec<u8>,
}

impl Backend {
    /// Create the inotify instance and register the directory
    ///
    /// With `config.recursive`, every subdirectory that exists now is
    /// registered too. Subdirectories that cannot be registered are skipped
    /// with a warning; failing to register `root` itself is an error.
    pub(crate) fn open(root: &Path, config: &WatchConfig) -> Result<Self> {
        let fd = FdGuard::init()
            .map(Arc::new)
            .map_err(|error| Error::setup(root, error))?;

        let mut watches = Watches::new(fd.clone());
        watches.add(root, WatchMask::DIRECTORY)
            .map_err(|error| Error::setup(root, error))?;

        if config.recursive {
            add_subdirectories(&mut watches, root);
        }
        debug!(
            root = %root.display(),
            directories = watches.len(),
            "registered inotify watches"
        );

        let poll = Poll::new()
            .map_err(|error| Error::setup(root, error))?;
        let waker = mio::Waker::new(poll.registry(), WAKE)
            .map(|waker| Waker(Arc::new(waker)))
            .map_err(|error| Error::setup(root, error))?;
        poll.registry()
            .register(&mut SourceFd(&**fd), INOTIFY, Interest::READABLE)
            .map_err(|error| Error::setup(root, error))?;

        Ok(Backend {
            root: root.to_path_buf(),
            fd,
            watches,
            poll,
            waker,
            buffer: vec![0; config.buffer_size],
        })
    }

    pub(crate) fn waker(&self) -> Waker {
        self.waker.clone()
    }

    /// Block on the queue and deliver records until stopped or failed
    pub(crate) fn run(
        &mut self,
        control: &Control,
        emit   : &mut dyn FnMut(ChangeEvent),
    )
        -> Result<()>
    {
        let mut events = Events::with_capacity(4);

        while !control.stop_requested() {
            if let Err(error) = self.poll.poll(&mut events, None) {
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::io(&self.root, error));
            }

            for event in events.iter() {
                match event.token() {
                    INOTIFY => self.drain(control, emit)?,
                    WAKE    => debug!("woken up to stop"),
                    token   => warn!(?token, "unexpected poll token"),
                }
            }
        }

        Ok(())
    }

    /// Read until the kernel queue is empty
    ///
    /// The descriptor is registered edge-triggered, so everything that is
    /// available has to be read before waiting again.
    fn drain(
        &mut self,
        control: &Control,
        emit   : &mut dyn FnMut(ChangeEvent),
    )
        -> Result<()>
    {
        while !control.stop_requested() {
            let len = match read_into_buffer(**self.fd, &mut self.buffer) {
                0 => {
                    return Err(Error::EmptyRead { path: self.root.clone() });
                }
                len if len > 0 => len as usize,
                _ => {
                    let error = io::Error::last_os_error();
                    match error.kind() {
                        io::ErrorKind::WouldBlock  => return Ok(()),
                        io::ErrorKind::Interrupted => continue,
                        _ => return Err(Error::io(&self.root, error)),
                    }
                }
            };

            dispatch(
                &self.root,
                &mut self.watches,
                &self.buffer[..len],
                control,
                emit,
            )?;
        }

        Ok(())
    }
}


/// Turn the records of one read into events
///
/// Also keeps the watches of renamed subdirectories up to date. A watched
/// subdirectory whose `MOVED_FROM` has no matching `MOVED_TO` in the same
/// read has left the watched tree, and its watches are removed.
fn dispatch(
    root   : &Path,
    watches: &mut Watches,
    buffer : &[u8],
    control: &Control,
    emit   : &mut dyn FnMut(ChangeEvent),
)
    -> Result<()>
{
    let mut moving = HashMap::new();
    let result = deliver(root, watches, &mut moving, buffer, control, emit);

    for (_, dir) in moving {
        for removed in watches.remove_tree(&dir) {
            debug!(dir = %removed.display(), "subdirectory left the watched tree");
        }
    }

    result
}

fn deliver(
    root   : &Path,
    watches: &mut Watches,
    moving : &mut HashMap<u32, PathBuf>,
    buffer : &[u8],
    control: &Control,
    emit   : &mut dyn FnMut(ChangeEvent),
)
    -> Result<()>
{
    for record in Records::new(buffer) {
        let record = record.map_err(|error| Error::Framing {
            path: root.to_path_buf(),
            offset: error.offset,
            len: error.len,
        })?;

        if record.mask.contains(EventMask::Q_OVERFLOW) {
            return Err(Error::Overflow { path: root.to_path_buf() });
        }

        if record.mask.contains(EventMask::IGNORED) {
            match watches.forget(record.wd) {
                Some(dir) if dir == root => {
                    return Err(Error::WatchRemoved { path: dir });
                }
                Some(dir) => {
                    debug!(dir = %dir.display(), "subdirectory is gone");
                }
                None => {}
            }
            continue;
        }

        let action = match record.mask.action() {
            Some(action) => action,
            None => {
                trace!(mask = ?record.mask, "skipping record without action");
                continue;
            }
        };
        let dir = match watches.dir(record.wd) {
            Some(dir) => dir.to_path_buf(),
            None => {
                trace!(wd = ?record.wd, "skipping record of a removed watch");
                continue;
            }
        };
        if record.mask.contains(EventMask::ISDIR) {
            track_move(watches, moving, &record, &dir);
        }
        let event = match ChangeEvent::new(root, dir, record.name, action) {
            Some(event) => event,
            None => {
                trace!(mask = ?record.mask, "skipping record without a name");
                continue;
            }
        };

        if control.stop_requested() {
            return Ok(());
        }
        trace!(%event, cookie = record.cookie, "delivering");
        emit(event);
    }

    Ok(())
}

/// Remember a watched subdirectory that is renamed away, and move its
/// watches once its new name shows up
fn track_move(
    watches: &mut Watches,
    moving : &mut HashMap<u32, PathBuf>,
    record : &Record,
    dir    : &Path,
) {
    let path = dir.join(record.name);

    if record.mask.contains(EventMask::MOVED_FROM) {
        if watches.contains(&path) {
            moving.insert(record.cookie, path);
        }
    } else if record.mask.contains(EventMask::MOVED_TO) {
        if let Some(from) = moving.remove(&record.cookie) {
            let moved = watches.rename(&from, &path);
            debug!(
                from = %from.display(),
                to = %path.display(),
                watches = moved,
                "following renamed subdirectory"
            );
        }
    }
}

fn add_subdirectories(watches: &mut Watches, root: &Path) {
    let subdirectories = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(%error, "cannot list subdirectory");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir());

    for entry in subdirectories {
        if let Err(error) = watches.add(entry.path(), WatchMask::DIRECTORY) {
            warn!(
                dir = %entry.path().display(),
                %error,
                "cannot watch subdirectory"
            );
        }
    }
}

fn read_into_buffer(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe {
        libc::read(
            fd,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len() as size_t,
        )
    }
}
