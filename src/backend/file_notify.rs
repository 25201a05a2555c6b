//! Decoding of `FILE_NOTIFY_INFORMATION` buffers
//!
//! Kept free of Windows types, so the framing rules can be tested anywhere.
//! Every record has this layout, all integers little endian:
//!
//! ```text
//! offset 0   u32      NextEntryOffset   0 for the last record
//! offset 4   u32      Action            FILE_ACTION_*
//! offset 8   u32      FileNameLength    in bytes
//! offset 12  [u16]    FileName          not nul-terminated
//! ```

#![cfg_attr(not(windows), allow(dead_code))]

use crate::event::Action;


const HEADER_LEN: usize = 12;

pub(crate) const FILE_ACTION_ADDED: u32 = 1;
pub(crate) const FILE_ACTION_REMOVED: u32 = 2;
pub(crate) const FILE_ACTION_MODIFIED: u32 = 3;
pub(crate) const FILE_ACTION_RENAMED_OLD_NAME: u32 = 4;
pub(crate) const FILE_ACTION_RENAMED_NEW_NAME: u32 = 5;

/// Fixed part of a record plus one maximal name (`MAX_PATH` UTF-16 units)
pub(crate) const MIN_RECORD_BUFFER: usize = HEADER_LEN + 260 * 2;


/// The canonical action of a `FILE_ACTION_*` code
pub(crate) fn action(code: u32) -> Option<Action> {
    match code {
        FILE_ACTION_ADDED            => Some(Action::Created),
        FILE_ACTION_REMOVED          => Some(Action::Removed),
        FILE_ACTION_MODIFIED         => Some(Action::Modified),
        FILE_ACTION_RENAMED_OLD_NAME => Some(Action::RenamedFrom),
        FILE_ACTION_RENAMED_NEW_NAME => Some(Action::RenamedTo),
        _                            => None,
    }
}


/// One decoded record
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NotifyRecord {
    /// Raw `FILE_ACTION_*` code
    pub action: u32,

    /// Path relative to the watched directory, as UTF-16
    pub name: Vec<u16>,
}


/// A record that does not fit into the bytes the read returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FramingError {
    pub offset: usize,
    pub len: usize,
}


/// Iterator over the records of one completed read
///
/// Ends after the record whose `NextEntryOffset` is zero, or at a record
/// whose action is zero, which carries no information.
#[derive(Debug)]
pub(crate) struct NotifyRecords<'a> {
    buffer: &'a [u8],
    pos: Option<usize>,
}

impl<'a> NotifyRecords<'a> {
    /// `buffer` must be exactly the bytes the read returned
    pub(crate) fn new(buffer: &'a [u8]) -> Self {
        let pos = if buffer.is_empty() { None } else { Some(0) };
        NotifyRecords { buffer, pos }
    }

    fn fail(&mut self, offset: usize) -> Option<Result<NotifyRecord, FramingError>> {
        self.pos = None;
        Some(Err(FramingError { offset, len: self.buffer.len() }))
    }
}

impl<'a> Iterator for NotifyRecords<'a> {
    type Item = Result<NotifyRecord, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.pos?;

        let header = match self.buffer.get(offset..offset + HEADER_LEN) {
            Some(header) => header,
            None => return self.fail(offset),
        };
        let next = read_u32(&header[0..4]) as usize;
        let action = read_u32(&header[4..8]);
        let name_len = read_u32(&header[8..12]) as usize;

        if action == 0 {
            self.pos = None;
            return None;
        }

        let start = offset + HEADER_LEN;
        let name = match start.checked_add(name_len)
            .and_then(|end| self.buffer.get(start..end))
        {
            Some(name) if name_len % 2 == 0 => name,
            _ => return self.fail(offset),
        };
        let name = name
            .chunks_exact(2)
            .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
            .collect();

        self.pos = match next {
            0 => None,
            next if next < HEADER_LEN => return self.fail(offset),
            next => Some(offset + next),
        };
        if let Some(pos) = self.pos {
            if pos >= self.buffer.len() {
                return self.fail(offset);
            }
        }

        Some(Ok(NotifyRecord { action, name }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}


#[cfg(test)]
mod tests {
    use crate::event::Action;

    use super::{
        action,
        FramingError,
        NotifyRecords,
        FILE_ACTION_ADDED,
        FILE_ACTION_MODIFIED,
        FILE_ACTION_REMOVED,
        FILE_ACTION_RENAMED_NEW_NAME,
        FILE_ACTION_RENAMED_OLD_NAME,
    };

    /// Build a buffer the way the kernel fills it, DWORD-aligned records
    fn buffer(records: &[(u32, &str)]) -> Vec<u8> {
        let mut buffer = Vec::new();

        for (i, (action, name)) in records.iter().enumerate() {
            let start = buffer.len();
            let name: Vec<u16> = name.encode_utf16().collect();
            let len = 12 + name.len() * 2;
            let padded = (len + 3) / 4 * 4;
            let next = if i + 1 == records.len() { 0 } else { padded };

            buffer.extend_from_slice(&(next as u32).to_le_bytes());
            buffer.extend_from_slice(&action.to_le_bytes());
            buffer.extend_from_slice(&((name.len() * 2) as u32).to_le_bytes());
            for unit in name {
                buffer.extend_from_slice(&unit.to_le_bytes());
            }
            buffer.resize(start + padded, 0);
        }

        buffer
    }

    fn names(buffer: &[u8]) -> Vec<(u32, String)> {
        NotifyRecords::new(buffer)
            .map(|record| {
                let record = record.unwrap();
                (record.action, String::from_utf16(&record.name).unwrap())
            })
            .collect()
    }

    #[test]
    fn every_chained_record_is_decoded_in_order() {
        let records = [
            (FILE_ACTION_ADDED, "a.txt"),
            (FILE_ACTION_MODIFIED, "sub\\b.txt"),
            (FILE_ACTION_RENAMED_OLD_NAME, "c"),
            (FILE_ACTION_RENAMED_NEW_NAME, "日本語.txt"),
            (FILE_ACTION_REMOVED, "d.txt"),
        ];
        let decoded = names(&buffer(&records));

        assert_eq!(decoded.len(), records.len());
        for ((action, name), (expected_action, expected_name)) in
            decoded.iter().zip(records.iter())
        {
            assert_eq!(action, expected_action);
            assert_eq!(name, expected_name);
        }
    }

    #[test]
    fn a_zero_action_ends_the_walk_without_error() {
        let buffer = buffer(&[
            (FILE_ACTION_ADDED, "a.txt"),
            (0, "ignored"),
            (FILE_ACTION_ADDED, "never.txt"),
        ]);

        assert_eq!(names(&buffer), vec![(FILE_ACTION_ADDED, String::from("a.txt"))]);
    }

    #[test]
    fn records_past_the_end_are_framing_errors() {
        let full = buffer(&[(FILE_ACTION_ADDED, "a.txt"), (FILE_ACTION_ADDED, "b.txt")]);
        let first = 12 + 5 * 2 + 2;

        // Name cut short.
        let truncated = &full[..full.len() - 4];
        let mut records = NotifyRecords::new(truncated);
        assert!(records.next().unwrap().is_ok());
        assert_eq!(
            records.next().unwrap().unwrap_err(),
            FramingError { offset: first, len: truncated.len() },
        );
        assert!(records.next().is_none());

        // Offset pointing past the buffer.
        let mut corrupt = full.clone();
        corrupt[0..4].copy_from_slice(&1000u32.to_le_bytes());
        let mut records = NotifyRecords::new(&corrupt);
        assert!(records.next().unwrap().is_err());
        assert!(records.next().is_none());
    }

    #[test]
    fn empty_buffers_have_no_records() {
        assert!(NotifyRecords::new(&[]).next().is_none());
    }

    #[test]
    fn action_codes_map_to_canonical_actions() {
        assert_eq!(action(FILE_ACTION_ADDED), Some(Action::Created));
        assert_eq!(action(FILE_ACTION_REMOVED), Some(Action::Removed));
        assert_eq!(action(FILE_ACTION_MODIFIED), Some(Action::Modified));
        assert_eq!(action(FILE_ACTION_RENAMED_OLD_NAME), Some(Action::RenamedFrom));
        assert_eq!(action(FILE_ACTION_RENAMED_NEW_NAME), Some(Action::RenamedTo));
        assert_eq!(action(42), None);
    }
}
