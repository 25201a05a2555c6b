use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};


/// What happened to a directory entry
///
/// Every backend maps its native change codes into this set when it decodes
/// a notification record. Codes that have no counterpart here are dropped
/// by the backend and never reach a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Action {
    /// The entry was added to the directory
    Created,

    /// The entry was removed from the directory
    Removed,

    /// The entry's contents or timestamps changed
    ///
    /// On Linux this is reported when a file that was opened for writing is
    /// closed, which makes it the first event seen for a freshly written
    /// file.
    Modified,

    /// The entry was renamed; this event carries the old name
    RenamedFrom,

    /// The entry was renamed; this event carries the new name
    RenamedTo,
}

impl Action {
    /// All actions, in declaration order
    pub const ALL: [Action; 5] = [
        Action::Created,
        Action::Removed,
        Action::Modified,
        Action::RenamedFrom,
        Action::RenamedTo,
    ];

    /// Stable lower-case name of the action
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Created     => "created",
            Action::Removed     => "removed",
            Action::Modified    => "modified",
            Action::RenamedFrom => "renamed-from",
            Action::RenamedTo   => "renamed-to",
        }
    }

    /// Whether this is one half of a rename
    pub fn is_rename(self) -> bool {
        matches!(self, Action::RenamedFrom | Action::RenamedTo)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_owned()))
    }
}

/// Returned when parsing an unknown action name
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown action `{0}`")]
pub struct UnknownAction(pub String);


/// A single change inside a watched directory
///
/// Handed to an [`EventHandler`] by value, once per change, on the thread of
/// the watch that observed it.
///
/// [`EventHandler`]: crate::EventHandler
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChangeEvent {
    /// The directory the watch was started for
    pub root: PathBuf,

    /// The directory the change happened in
    ///
    /// Equal to `root`, unless the watch is recursive and the change
    /// happened in a subdirectory.
    pub dir: PathBuf,

    /// Name of the affected entry inside `dir`; never empty
    pub file_name: OsString,

    /// What happened to the entry
    pub action: Action,
}

impl ChangeEvent {
    /// Build an event for an entry directly inside `dir`
    ///
    /// Returns `None` if `file_name` is empty. Backends skip such records.
    pub fn new(
        root     : impl Into<PathBuf>,
        dir      : impl Into<PathBuf>,
        file_name: impl Into<OsString>,
        action   : Action,
    )
        -> Option<Self>
    {
        let file_name = file_name.into();
        if file_name.is_empty() {
            return None;
        }

        Some(ChangeEvent {
            root: root.into(),
            dir: dir.into(),
            file_name,
            action,
        })
    }

    /// Build an event from a path relative to `root`
    ///
    /// Splits `relative` into the directory part, which is joined onto
    /// `root`, and the final component. Returns `None` if `relative` has no
    /// final component.
    pub fn from_relative(root: &Path, relative: &Path, action: Action)
        -> Option<Self>
    {
        let file_name = relative.file_name()?;
        let dir = match relative.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => root.join(parent),
            _ => root.to_path_buf(),
        };

        ChangeEvent::new(root, dir, file_name, action)
    }

    /// Full path of the affected entry
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Path of the affected entry relative to the watched root
    pub fn relative_path(&self) -> PathBuf {
        match self.dir.strip_prefix(&self.root) {
            Ok(sub) => sub.join(&self.file_name),
            Err(_)  => PathBuf::from(&self.file_name),
        }
    }

    /// The entry name, as an `OsStr`
    pub fn name(&self) -> &OsStr {
        &self.file_name
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.path().display())
    }
}
