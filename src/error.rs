use std::{
    io,
    path::PathBuf,
};

use thiserror::Error;


/// Result type used throughout this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by a watch
///
/// Errors fall into two classes. Setup errors (see [`Error::is_setup`]) are
/// returned while a watch is being started, before any event was delivered.
/// All other errors end a running watch: the session transitions to its
/// stopped state and the error is handed back to whoever joins it.
#[derive(Debug, Error)]
pub enum Error {
    /// The path to watch does not exist or is not a directory
    #[error("cannot watch {}: not a directory", .path.display())]
    NotADirectory {
        /// The requested path
        path: PathBuf,
    },

    /// The watch configuration was rejected
    #[error("invalid watch configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to create or bind the notification queue
    #[error("failed to set up a watch for {}", .path.display())]
    Setup {
        /// The directory that was to be watched
        path: PathBuf,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// Waiting for or reading change notifications failed
    #[error("failed to read change notifications for {}", .path.display())]
    Io {
        /// The watched directory
        path: PathBuf,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// A read of change notifications returned no data
    #[error("reading change notifications for {} returned no data", .path.display())]
    EmptyRead {
        /// The watched directory
        path: PathBuf,
    },

    /// A notification record did not fit into the bytes that were read
    #[error(
        "malformed notification record for {} at byte {offset} of {len}",
        .path.display()
    )]
    Framing {
        /// The watched directory
        path: PathBuf,
        /// Position of the offending record in the read buffer
        offset: usize,
        /// Number of valid bytes in the read buffer
        len: usize,
    },

    /// The OS dropped notifications because its queue was full
    #[error("change notifications for {} overflowed; events were lost", .path.display())]
    Overflow {
        /// The watched directory
        path: PathBuf,
    },

    /// The watched directory itself was deleted or unmounted
    #[error("watched directory {} was removed", .path.display())]
    WatchRemoved {
        /// The watched directory
        path: PathBuf,
    },

    /// A registry already has a running watch for this directory
    #[error("{} is already being watched", .path.display())]
    AlreadyWatching {
        /// The requested directory
        path: PathBuf,
    },

    /// A registry has no watch for this directory
    #[error("{} is not being watched", .path.display())]
    NotWatching {
        /// The requested directory
        path: PathBuf,
    },

    /// The thread running the watch panicked, most likely inside the handler
    #[error("watch thread for {} panicked", .path.display())]
    Panicked {
        /// The watched directory
        path: PathBuf,
    },
}

impl Error {
    /// Whether this error occurred while starting a watch
    ///
    /// A watch that fails with a setup error never delivered an event and
    /// never reached its running state.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::NotADirectory { .. }
                | Error::InvalidConfig(_)
                | Error::Setup { .. }
                | Error::AlreadyWatching { .. }
        )
    }

    pub(crate) fn setup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Setup { path: path.into(), source }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}
