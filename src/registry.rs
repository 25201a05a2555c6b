use std::{
    collections::HashMap,
    fmt,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{
    debug,
    warn,
};

use crate::{
    backend::absolute,
    config::WatchConfig,
    error::{Error, Result},
    handler::EventHandler,
    session::WatchSession,
};


/// Called on the watch thread with the error that ended a watch
pub(crate) type OnError = Arc<dyn Fn(&Path, &Error) + Send + Sync>;


/// Number of watches that are starting or running
#[derive(Clone, Debug, Default)]
pub(crate) struct ActiveCount(Arc<AtomicUsize>);

impl ActiveCount {
    pub(crate) fn acquire(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(self.0.clone())
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}


/// Counts one watch as active for as long as it lives
#[derive(Debug)]
pub(crate) struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}


/// Keeps track of the watches of a process, by directory
///
/// Cloning a registry is cheap; all clones share the same watches. At most
/// one watch per directory is active at a time.
///
/// ```no_run
/// use dirwatch::{ChangeEvent, WatchConfig, WatchRegistry};
///
/// let registry = WatchRegistry::new();
/// registry.watch("/tmp/a", WatchConfig::default(), |event: ChangeEvent| {
///     println!("{}", event);
/// })?;
/// assert_eq!(registry.active_count(), 1);
///
/// registry.stop_watching("/tmp/a")?;
/// assert_eq!(registry.active_count(), 0);
/// # Ok::<(), dirwatch::Error>(())
/// ```
#[derive(Clone, Default)]
pub struct WatchRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: Mutex<HashMap<PathBuf, WatchSession>>,
    active: ActiveCount,
    on_error: Option<OnError>,
}

impl WatchRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry that reports failed watches to `on_error`
    ///
    /// `on_error` is called on the thread of the failed watch, with the
    /// watched directory and the error that ended the watch, for example
    /// [`Error::Overflow`] or [`Error::WatchRemoved`]. By then the watch is
    /// stopped and no longer counts as active, so the callback may restart
    /// it through [`WatchRegistry::watch`]. Watches that are stopped on
    /// request are not reported.
    ///
    /// ```no_run
    /// use dirwatch::{ChangeEvent, WatchConfig, WatchRegistry};
    ///
    /// let registry = WatchRegistry::with_error_handler(|dir, error| {
    ///     eprintln!("lost {}: {}", dir.display(), error);
    /// });
    /// registry.watch("/tmp/a", WatchConfig::default(), |_: ChangeEvent| {})?;
    /// # Ok::<(), dirwatch::Error>(())
    /// ```
    pub fn with_error_handler<F>(on_error: F) -> Self
    where
        F: Fn(&Path, &Error) + Send + Sync + 'static,
    {
        WatchRegistry {
            inner: Arc::new(Inner {
                on_error: Some(Arc::new(on_error)),
                ..Inner::default()
            }),
        }
    }

    /// Start watching `directory`
    ///
    /// Fails with [`Error::AlreadyWatching`] if this registry has an active
    /// watch on the same directory. A watch on that directory that has
    /// already stopped, for example after an error, is replaced.
    pub fn watch<H: EventHandler>(
        &self,
        directory: impl AsRef<Path>,
        config   : WatchConfig,
        handler  : H,
    )
        -> Result<()>
    {
        let directory = absolute(directory.as_ref())?;

        let mut sessions = self.inner.sessions.lock();
        if let Some(existing) = sessions.get(&directory) {
            if existing.state().is_active() {
                return Err(Error::AlreadyWatching { path: directory });
            }
        }

        let session = WatchSession::start_counted(
            &directory,
            config,
            handler,
            self.inner.active.acquire(),
            self.inner.on_error.clone(),
        )?;

        if let Some(previous) = sessions.insert(directory.clone(), session) {
            debug!(dir = %directory.display(), "replacing stopped watch");
            if let Err(error) = previous.wait() {
                debug!(%error, "replaced watch had failed");
            }
        }
        Ok(())
    }

    /// Stop watching `directory` and wait for its watch to end
    ///
    /// Returns the error that ended the watch, if it failed before it was
    /// stopped.
    pub fn stop_watching(&self, directory: impl AsRef<Path>) -> Result<()> {
        let directory = absolute(directory.as_ref())?;

        let session = self.inner.sessions.lock().remove(&directory);
        match session {
            Some(session) => session.stop(),
            None => Err(Error::NotWatching { path: directory }),
        }
    }

    /// Whether `directory` has an active watch
    pub fn is_watching(&self, directory: impl AsRef<Path>) -> bool {
        let directory = match absolute(directory.as_ref()) {
            Ok(directory) => directory,
            Err(_) => return false,
        };

        self.inner.sessions.lock()
            .get(&directory)
            .map_or(false, |session| session.state().is_active())
    }

    /// The directories that have an active watch
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut directories: Vec<_> = self.inner.sessions.lock()
            .iter()
            .filter(|(_, session)| session.state().is_active())
            .map(|(directory, _)| directory.clone())
            .collect();
        directories.sort();
        directories
    }

    /// Number of watches that are starting or running
    ///
    /// Counts up when a watch starts and down when it stops, whether it was
    /// stopped or failed.
    pub fn active_count(&self) -> usize {
        self.inner.active.get()
    }

    /// Stop every watch and wait for all of them to end
    ///
    /// All watches are stopped even if some of them fail. The first error is
    /// returned; the others are logged.
    pub fn shutdown(&self) -> Result<()> {
        let sessions: Vec<_> = self.inner.sessions.lock().drain().collect();
        debug!(watches = sessions.len(), "shutting down");

        // Ask everyone first, so the watches wind down in parallel.
        for (directory, session) in &sessions {
            if let Err(error) = session.stop_handle().request_stop() {
                warn!(dir = %directory.display(), %error, "cannot request stop");
            }
        }

        let mut first = None;
        for (directory, session) in sessions {
            if let Err(error) = session.stop() {
                warn!(dir = %directory.display(), %error, "watch ended with error");
                first.get_or_insert(error);
            }
        }

        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Stop every watch, discarding their results
    pub fn reset(&self) {
        if let Err(error) = self.shutdown() {
            debug!(%error, "ignored during reset");
        }
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watched", &self.watched_directories())
            .field("active", &self.active_count())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use tempdir::TempDir;

    use crate::{
        error::Error,
        event::ChangeEvent,
        WatchConfig,
    };

    use super::{ActiveCount, WatchRegistry};

    #[test]
    fn guards_count_while_they_live() {
        let count = ActiveCount::default();
        let a = count.acquire();
        let b = count.clone().acquire();
        assert_eq!(count.get(), 2);

        drop(a);
        assert_eq!(count.get(), 1);
        drop(b);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn one_active_watch_per_directory() {
        let dir = TempDir::new("dirwatch-registry").unwrap();
        let registry = WatchRegistry::new();
        let (tx, _rx) = mpsc::channel::<ChangeEvent>();

        registry.watch(dir.path(), WatchConfig::default(), tx.clone()).unwrap();
        assert!(registry.is_watching(dir.path()));

        match registry.watch(dir.path(), WatchConfig::default(), tx) {
            Err(Error::AlreadyWatching { path }) => assert_eq!(path, dir.path()),
            result => panic!("unexpected result: {:?}", result),
        }
        assert_eq!(registry.active_count(), 1);

        registry.stop_watching(dir.path()).unwrap();
        assert!(!registry.is_watching(dir.path()));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn stopping_an_unknown_directory_fails() {
        let dir = TempDir::new("dirwatch-registry").unwrap();
        let registry = WatchRegistry::new();

        match registry.stop_watching(dir.path()) {
            Err(Error::NotWatching { path }) => assert_eq!(path, dir.path()),
            result => panic!("unexpected result: {:?}", result),
        }
    }

    #[test]
    fn failed_starts_are_not_counted() {
        let dir = TempDir::new("dirwatch-registry").unwrap();
        let registry = WatchRegistry::new();
        let (tx, _rx) = mpsc::channel::<ChangeEvent>();

        let missing = dir.path().join("missing");
        let error = registry.watch(&missing, WatchConfig::default(), tx)
            .unwrap_err();
        assert!(error.is_setup());
        assert_eq!(registry.active_count(), 0);
        assert!(registry.watched_directories().is_empty());
    }

    #[test]
    fn shutdown_stops_everything() {
        let dirs: Vec<_> = (0..3)
            .map(|_| TempDir::new("dirwatch-registry").unwrap())
            .collect();
        let registry = WatchRegistry::new();
        let (tx, _rx) = mpsc::channel::<ChangeEvent>();

        for dir in &dirs {
            registry.watch(dir.path(), WatchConfig::default(), tx.clone())
                .unwrap();
        }
        assert_eq!(registry.active_count(), 3);
        assert_eq!(registry.watched_directories().len(), 3);

        let clone = registry.clone();
        clone.shutdown().unwrap();
        assert_eq!(registry.active_count(), 0);
        assert!(registry.watched_directories().is_empty());

        // A reset registry can be used again.
        registry.watch(dirs[0].path(), WatchConfig::default(), tx).unwrap();
        registry.reset();
        assert_eq!(registry.active_count(), 0);
    }
}
