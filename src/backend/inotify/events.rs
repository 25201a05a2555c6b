use std::{
    ffi::OsStr,
    mem,
    os::unix::ffi::OsStrExt,
};

use bitflags::bitflags;
use inotify_sys as ffi;

use crate::event::Action;

use super::watches::WatchDescriptor;


/// Iterator over the records of one read
///
/// Walks the bytes a single `read` returned. Every record header, and the
/// name that follows it, is bounds-checked against the end of the read
/// before it is decoded. A record that does not fit ends the iteration with
/// a [`FramingError`].
#[derive(Debug)]
pub(crate) struct Records<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Records<'a> {
    /// `buffer` must be exactly the bytes the read returned
    pub(crate) fn new(buffer: &'a [u8]) -> Self {
        Records {
            buffer,
            pos: 0,
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buffer.len() {
            return None;
        }

        match Record::from_buffer(&self.buffer[self.pos..]) {
            Some((step, record)) => {
                self.pos += step;
                Some(Ok(record))
            }
            None => {
                let error = FramingError {
                    offset: self.pos,
                    len: self.buffer.len(),
                };
                self.pos = self.buffer.len();
                Some(Err(error))
            }
        }
    }
}


/// A record that did not fit into the bytes that were read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FramingError {
    pub offset: usize,
    pub len: usize,
}


/// One decoded `inotify_event`
#[derive(Clone, Debug)]
pub(crate) struct Record<'a> {
    /// The watch this record originates from
    pub wd: WatchDescriptor,

    /// Indicates what kind of record this is
    pub mask: EventMask,

    /// Connects the `MOVED_FROM` and `MOVED_TO` records of one rename
    pub cookie: u32,

    /// Name of the entry inside the watched directory
    ///
    /// Empty if the record concerns the watched directory itself.
    pub name: &'a OsStr,
}

impl<'a> Record<'a> {
    /// Decode the record at the beginning of `buffer`
    ///
    /// Returns the number of bytes the record occupies, and the record.
    /// Returns `None` if `buffer` does not contain the full record, including
    /// its name.
    pub(crate) fn from_buffer(buffer: &'a [u8]) -> Option<(usize, Self)> {
        let event_size = mem::size_of::<ffi::inotify_event>();

        // Make sure that the buffer is big enough to contain an event, without
        // the name. Otherwise we can't safely convert it to an `inotify_event`.
        if buffer.len() < event_size {
            return None;
        }

        let ffi_event_ptr = buffer.as_ptr() as *const ffi::inotify_event;

        // The check above guarantees enough bytes for one `inotify_event`.
        // The byte buffer has alignment 1, so the pointer might be unaligned
        // for `inotify_event`, hence `read_unaligned()`.
        let ffi_event = unsafe { ffi_event_ptr.read_unaligned() };

        // The name follows directly after the event struct. Its length,
        // including padding, is given by `len`.
        let bytes_consumed = event_size.checked_add(ffi_event.len as usize)?;
        if bytes_consumed > buffer.len() {
            return None;
        }
        let name = &buffer[event_size..bytes_consumed];

        // Remove trailing '\0' bytes
        //
        // The events in the buffer are aligned, and `name` is filled up
        // with '\0' up to the alignment boundary. Here we remove those
        // additional bytes.
        let name = match name.iter().position(|b| *b == 0) {
            Some(end) => &name[..end],
            None      => name,
        };

        let record = Record {
            wd: WatchDescriptor(ffi_event.wd),
            mask: EventMask::from_bits_retain(ffi_event.mask),
            cookie: ffi_event.cookie,
            name: OsStr::from_bytes(name),
        };

        Some((bytes_consumed, record))
    }
}


bitflags! {
    /// Indicates the type of a record
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub(crate) struct EventMask: u32 {
        /// File was modified
        ///
        /// See [`inotify_sys::IN_MODIFY`].
        const MODIFY = ffi::IN_MODIFY;

        /// File opened for writing was closed
        ///
        /// See [`inotify_sys::IN_CLOSE_WRITE`].
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// File/directory created in watched directory
        ///
        /// See [`inotify_sys::IN_CREATE`].
        const CREATE = ffi::IN_CREATE;

        /// File/directory deleted from watched directory
        ///
        /// See [`inotify_sys::IN_DELETE`].
        const DELETE = ffi::IN_DELETE;

        /// File was renamed/moved; watched directory contained old name
        ///
        /// See [`inotify_sys::IN_MOVED_FROM`].
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// File was renamed/moved; watched directory contains new name
        ///
        /// See [`inotify_sys::IN_MOVED_TO`].
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// Watch was removed
        ///
        /// Generated when the watched directory was deleted or the file
        /// system was unmounted.
        ///
        /// See [`inotify_sys::IN_IGNORED`].
        const IGNORED = ffi::IN_IGNORED;

        /// The subject of the record is a directory
        ///
        /// See [`inotify_sys::IN_ISDIR`].
        const ISDIR = ffi::IN_ISDIR;

        /// Event queue overflowed
        ///
        /// See [`inotify_sys::IN_Q_OVERFLOW`].
        const Q_OVERFLOW = ffi::IN_Q_OVERFLOW;

        /// File system containing watched object was unmounted
        ///
        /// See [`inotify_sys::IN_UNMOUNT`].
        const UNMOUNT = ffi::IN_UNMOUNT;
    }
}

impl EventMask {
    const ACTION_MAP: &'static [(EventMask, Action)] = &[
        (EventMask::CLOSE_WRITE, Action::Modified),
        (EventMask::MODIFY, Action::Modified),
        (EventMask::CREATE, Action::Created),
        (EventMask::DELETE, Action::Removed),
        (EventMask::MOVED_FROM, Action::RenamedFrom),
        (EventMask::MOVED_TO, Action::RenamedTo),
    ];

    /// The canonical action of a record with this mask
    ///
    /// Returns `None` for masks that carry no change of a directory entry,
    /// like `IN_IGNORED` or `IN_Q_OVERFLOW`.
    pub(crate) fn action(self) -> Option<Action> {
        Self::ACTION_MAP
            .iter()
            .find(|(mask, _)| self.contains(*mask))
            .map(|(_, action)| *action)
    }
}
