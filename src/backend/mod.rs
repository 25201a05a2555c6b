//! The platform backends, and the blocking watch built on top of them
//!
//! Exactly one backend is compiled in: inotify on Linux,
//! `ReadDirectoryChangesW` on Windows. Other platforms get a backend that
//! fails to start.

#[cfg(target_os = "linux")]
mod inotify;
#[cfg(target_os = "linux")]
use self::inotify as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as platform;

#[cfg(any(windows, test))]
mod file_notify;

#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;
#[cfg(not(any(target_os = "linux", windows)))]
use self::unsupported as platform;

use std::{
    env,
    fmt,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use tracing::{
    debug,
    error,
    info,
    info_span,
    trace,
    warn,
};
use walkdir::WalkDir;

use crate::{
    config::WatchConfig,
    error::{Error, Result},
    event::{Action, ChangeEvent},
    handler::EventHandler,
    state::{Control, SessionState},
};


pub(crate) const MIN_BUFFER_SIZE: usize = platform::MIN_BUFFER_SIZE;


/// A watch on one directory, run on the calling thread
///
/// Opening the watch acquires every OS resource it needs, so any setup
/// failure is reported by [`DirectoryWatch::open`]. [`DirectoryWatch::run`]
/// then blocks until a stop is requested through a [`StopHandle`], or until
/// a fatal error occurs.
///
/// [`WatchSession`](crate::WatchSession) runs a `DirectoryWatch` on a
/// dedicated thread; use this type directly to supply the thread yourself.
///
/// ```no_run
/// use std::thread;
/// use dirwatch::{ChangeEvent, DirectoryWatch, WatchConfig};
///
/// let watch = DirectoryWatch::open("/tmp/d", WatchConfig::default())?;
/// let stop = watch.stop_handle();
///
/// thread::spawn(move || {
///     // ... later
///     stop.request_stop()
/// });
///
/// watch.run(|event: ChangeEvent| println!("{}", event))?;
/// # Ok::<(), dirwatch::Error>(())
/// ```
pub struct DirectoryWatch {
    root: PathBuf,
    config: WatchConfig,
    backend: platform::Backend,
    control: Arc<Control>,
    stop: StopHandle,
}

impl DirectoryWatch {
    /// Acquire the OS resources for watching `directory`
    ///
    /// A relative `directory` is resolved against the current directory.
    /// Symbolic links are not resolved, so events report the path the way
    /// it was requested.
    pub fn open(directory: impl AsRef<Path>, config: WatchConfig) -> Result<Self> {
        config.validate()?;

        let root = absolute(directory.as_ref())?;
        if !root.is_dir() {
            return Err(Error::NotADirectory { path: root });
        }

        let backend = platform::Backend::open(&root, &config)?;
        let control = Arc::new(Control::new());
        let stop = StopHandle {
            root: root.clone(),
            control: control.clone(),
            waker: backend.waker(),
        };
        debug!(root = %root.display(), "opened watch");

        Ok(DirectoryWatch {
            root,
            config,
            backend,
            control,
            stop,
        })
    }

    /// The watched directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The configuration the watch was opened with
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// A handle that stops this watch from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub(crate) fn control(&self) -> &Arc<Control> {
        &self.control
    }

    /// Deliver changes to `handler` until stopped
    ///
    /// Returns `Ok(())` after a stop was requested, or the error that ended
    /// the watch. Either way the watch is [`SessionState::Stopped`] when this
    /// returns and `handler` is not called again.
    pub fn run<H: EventHandler>(self, mut handler: H) -> Result<()> {
        let span = info_span!("watch", root = %self.root.display());
        let _enter = span.enter();

        let DirectoryWatch { root, config, backend, control, .. } = self;
        let mut running = Running {
            backend: Some(backend),
            control: control.clone(),
        };

        if !control.begin() {
            debug!("stopped before running");
            return Ok(());
        }
        info!("watching");

        let mut emit = |event: ChangeEvent| {
            if config.accepts(&event) {
                handler.handle_event(event);
            } else {
                trace!(%event, "filtered");
            }
        };

        let mut result = Ok(());
        if config.rescan {
            result = scan_existing(&root, config.recursive, &control, &mut emit);
        }
        if result.is_ok() {
            if let Some(backend) = running.backend.as_mut() {
                result = backend.run(&control, &mut emit);
            }
        }
        drop(running);

        match &result {
            Ok(())     => info!("stopped"),
            Err(error) => error!(%error, "watch failed"),
        }
        result
    }
}

impl fmt::Debug for DirectoryWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWatch")
            .field("root", &self.root)
            .field("state", &self.state())
            .finish()
    }
}


/// Moves a watch to `Stopped` when it leaves `run`, even by panic
///
/// OS resources are released before the state changes.
struct Running {
    backend: Option<platform::Backend>,
    control: Arc<Control>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.backend.take();
        self.control.finish();
    }
}


/// Stops a watch from another thread
///
/// Each watch has its own handle; stopping one watch never wakes another.
/// Requesting a stop more than once is harmless.
#[derive(Clone)]
pub struct StopHandle {
    root: PathBuf,
    control: Arc<Control>,
    waker: platform::Waker,
}

impl StopHandle {
    /// Ask the watch to stop, and wake it up if it is waiting
    ///
    /// Returns as soon as the request is recorded; the watch thread leaves
    /// its loop shortly after. A handler call that was about to start may
    /// still happen. Once the watch is [`SessionState::Stopped`], for
    /// example when [`WatchSession::stop`](crate::WatchSession::stop) has
    /// returned, the handler is not called again.
    pub fn request_stop(&self) -> Result<()> {
        if !self.control.request_stop() {
            return Ok(());
        }
        debug!(root = %self.root.display(), "stop requested");

        self.waker.wake()
            .map_err(|error| Error::io(&self.root, error))
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.control.stop_requested()
    }

    /// The directory of the watch this handle stops
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("root", &self.root)
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}


/// Report every file that already exists as created
fn scan_existing(
    root     : &Path,
    recursive: bool,
    control  : &Control,
    emit     : &mut dyn FnMut(ChangeEvent),
)
    -> Result<()>
{
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut count = 0usize;

    for entry in WalkDir::new(root).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "skipping entry during rescan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if let Some(event) = ChangeEvent::from_relative(root, relative, Action::Created) {
            if control.stop_requested() {
                return Ok(());
            }
            emit(event);
            count += 1;
        }
    }

    debug!(files = count, "rescan finished");
    Ok(())
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|error| Error::setup(path, error))
}
