use std::sync::mpsc;

use crate::event::ChangeEvent;


/// Receives the events of a watch
///
/// The handler is called synchronously on the thread of the watch, once per
/// event, in the order the OS reported the changes. A slow handler delays
/// further events of its own watch, but no other watch.
///
/// Implemented for closures, for [`std::sync::mpsc::Sender`], and, with the
/// `crossbeam-channel` feature, for [`crossbeam_channel::Sender`].
///
/// ```no_run
/// use dirwatch::{ChangeEvent, WatchConfig, WatchSession};
///
/// let session = WatchSession::start(
///     "/tmp",
///     WatchConfig::default(),
///     |event: ChangeEvent| println!("{}", event),
/// )?;
/// # session.stop()?;
/// # Ok::<(), dirwatch::Error>(())
/// ```
pub trait EventHandler: Send + 'static {
    /// Handle one event
    fn handle_event(&mut self, event: ChangeEvent);
}

impl<F> EventHandler for F
where
    F: FnMut(ChangeEvent) + Send + 'static,
{
    fn handle_event(&mut self, event: ChangeEvent) {
        (self)(event);
    }
}

// A disconnected receiver only means nobody is listening any more. The watch
// keeps running until it is stopped.
impl EventHandler for mpsc::Sender<ChangeEvent> {
    fn handle_event(&mut self, event: ChangeEvent) {
        let _ = self.send(event);
    }
}

#[cfg(feature = "crossbeam-channel")]
impl EventHandler for crossbeam_channel::Sender<ChangeEvent> {
    fn handle_event(&mut self, event: ChangeEvent) {
        let _ = self.send(event);
    }
}
