#![warn(missing_docs)]

//! Watch directories for changes, one thread per directory
//!
//! Each watched directory gets its own [`WatchSession`]: a thread that blocks
//! on the OS notification mechanism, decodes what the OS reports into
//! [`ChangeEvent`]s and hands them to an [`EventHandler`], in the order the
//! OS reported them.
//!
//! Two backends are available, selected at compile time:
//!
//! - On Linux, [inotify][inotify7]. Files are reported once they were
//!   closed after writing, so creating a file and writing to it yields a
//!   single [`Action::Modified`].
//! - On Windows, [`ReadDirectoryChangesW`][rdcw], issued as overlapped I/O.
//!
//! Every session can be stopped on its own, through [`WatchSession::stop`]
//! or a [`StopHandle`]. Failures are returned as [`Error`]s; nothing in this
//! crate terminates the process.
//!
//! ```no_run
//! use std::time::Duration;
//! use crossbeam_channel::unbounded;
//! use dirwatch::{ChangeEvent, WatchConfig, WatchSession};
//!
//! let (tx, rx) = unbounded::<ChangeEvent>();
//! let session = WatchSession::start(
//!     "/tmp/incoming",
//!     WatchConfig::default().with_recursive(true),
//!     tx,
//! )?;
//!
//! while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
//!     println!("{} {}", event.action, event.path().display());
//! }
//!
//! session.stop()?;
//! # Ok::<(), dirwatch::Error>(())
//! ```
//!
//! To watch many directories by path, use a [`WatchRegistry`].
//!
//! [inotify7]: http://man7.org/linux/man-pages/man7/inotify.7.html
//! [rdcw]: https://learn.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-readdirectorychangesw


mod backend;
mod config;
mod error;
mod event;
mod handler;
mod registry;
mod session;
mod state;


pub use crate::{
    backend::{
        DirectoryWatch,
        StopHandle,
    },
    config::{
        WatchConfig,
        DEFAULT_BUFFER_SIZE,
    },
    error::{
        Error,
        Result,
    },
    event::{
        Action,
        ChangeEvent,
        UnknownAction,
    },
    handler::EventHandler,
    registry::WatchRegistry,
    session::WatchSession,
    state::SessionState,
};
