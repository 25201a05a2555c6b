use std::{
    fmt,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
};

use tracing::{
    debug,
    warn,
};

use crate::{
    backend::{
        DirectoryWatch,
        StopHandle,
    },
    config::WatchConfig,
    error::{Error, Result},
    handler::EventHandler,
    registry::{ActiveGuard, OnError},
    state::{Control, SessionState},
};


/// A watch running on its own thread
///
/// [`WatchSession::start`] returns once the watch is set up: from then on,
/// every change to the directory is delivered to the handler, on the
/// session's thread. Sessions are independent of each other; stopping one
/// never affects another.
///
/// Dropping a session stops it and waits for its thread. Use
/// [`WatchSession::stop`] to learn how the watch ended.
pub struct WatchSession {
    directory: PathBuf,
    control: Arc<Control>,
    stop: StopHandle,
    thread: Option<JoinHandle<Result<()>>>,
}

impl WatchSession {
    /// Watch `directory`, delivering its changes to `handler`
    ///
    /// Setup failures, like a missing directory or an exhausted watch limit,
    /// are returned here. The handler is never called in that case.
    pub fn start<H: EventHandler>(
        directory: impl AsRef<Path>,
        config   : WatchConfig,
        handler  : H,
    )
        -> Result<Self>
    {
        Self::spawn(directory.as_ref(), config, handler, None, None)
    }

    pub(crate) fn start_counted<H: EventHandler>(
        directory: &Path,
        config   : WatchConfig,
        handler  : H,
        active   : ActiveGuard,
        on_error : Option<OnError>,
    )
        -> Result<Self>
    {
        Self::spawn(directory, config, handler, Some(active), on_error)
    }

    fn spawn<H: EventHandler>(
        directory: &Path,
        config   : WatchConfig,
        handler  : H,
        active   : Option<ActiveGuard>,
        on_error : Option<OnError>,
    )
        -> Result<Self>
    {
        let watch = DirectoryWatch::open(directory, config)?;
        let directory = watch.root().to_path_buf();
        let control = watch.control().clone();
        let stop = watch.stop_handle();

        if let Some(active) = active {
            control.attach(active);
        }

        // Setup is complete; the session counts as running from here on.
        control.begin();

        let name = match directory.file_name() {
            Some(name) => format!("dirwatch {}", name.to_string_lossy()),
            None => String::from("dirwatch"),
        };
        let root = directory.clone();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let result = watch.run(handler);
                if let (Err(error), Some(on_error)) = (&result, &on_error) {
                    on_error(&root, error);
                }
                result
            });

        let thread = match thread {
            Ok(thread) => thread,
            Err(error) => {
                // The watch was moved into the closure and dropped with it.
                control.finish();
                return Err(Error::setup(&directory, error));
            }
        };
        debug!(dir = %directory.display(), "session started");

        Ok(WatchSession {
            directory,
            control,
            stop,
            thread: Some(thread),
        })
    }

    /// The watched directory, made absolute
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Whether the session can still deliver events
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// A handle that stops this session without consuming it
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the session and wait for its thread to end
    ///
    /// When this returns, the session is [`SessionState::Stopped`], its OS
    /// resources are released and the handler has been dropped. Returns the
    /// error that ended the watch, if it failed before it was stopped.
    pub fn stop(mut self) -> Result<()> {
        self.stop.request_stop()?;
        self.join()
    }

    /// Wait for the session to end without stopping it
    ///
    /// Returns once the session is stopped from elsewhere, through a
    /// [`StopHandle`], or fails.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return Ok(()),
        };

        // Reached from the handler or the error callback of this very
        // session. The thread is on its way out and ends on its own.
        if thread.thread().id() == thread::current().id() {
            debug!(dir = %self.directory.display(), "not joining own thread");
            return Ok(());
        }

        match thread.join() {
            Ok(result) => result,
            Err(_) => {
                warn!(dir = %self.directory.display(), "handler panicked");
                Err(Error::Panicked { path: self.directory.clone() })
            }
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if self.thread.is_none() {
            return;
        }

        if let Err(error) = self.stop.request_stop() {
            warn!(dir = %self.directory.display(), %error, "cannot request stop");
        }
        if let Err(error) = self.join() {
            warn!(dir = %self.directory.display(), %error, "watch ended with error");
        }
    }
}

impl fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSession")
            .field("directory", &self.directory)
            .field("state", &self.state())
            .finish()
    }
}
