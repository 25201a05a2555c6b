#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    backend,
    error::{Error, Result},
    event::{Action, ChangeEvent},
};


/// Size of the read buffer, unless configured otherwise
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;


/// Options for a single directory watch
///
/// The defaults watch only the directory itself, deliver every action and
/// skip the initial scan.
///
/// ```
/// use dirwatch::{Action, WatchConfig};
///
/// let config = WatchConfig::default()
///     .with_recursive(true)
///     .with_ignored_pattern(".crdownload")
///     .with_ignored_action(Action::Modified);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WatchConfig {
    /// Size in bytes of the buffer notifications are read into
    ///
    /// Each watch owns one buffer of this size. It has to be large enough for
    /// the largest possible notification record of the platform, see
    /// [`WatchConfig::min_buffer_size`].
    pub buffer_size: usize,

    /// Also report changes in subdirectories
    ///
    /// On Linux, subdirectories that exist when the watch starts are watched.
    /// On Windows, the whole subtree is watched by the OS.
    pub recursive: bool,

    /// Report every file that already exists as [`Action::Created`] before
    /// reporting live changes
    pub rescan: bool,

    /// Drop events whose path, relative to the watched directory, contains
    /// any of these substrings
    pub ignored_patterns: Vec<String>,

    /// Drop events with any of these actions
    pub ignored_actions: Vec<Action>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            recursive: false,
            rescan: false,
            ignored_patterns: Vec::new(),
            ignored_actions: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Smallest buffer that can hold one notification record on this platform
    pub fn min_buffer_size() -> usize {
        backend::MIN_BUFFER_SIZE
    }

    /// Set [`buffer_size`](Self::buffer_size)
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set [`recursive`](Self::recursive)
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set [`rescan`](Self::rescan)
    pub fn with_rescan(mut self, rescan: bool) -> Self {
        self.rescan = rescan;
        self
    }

    /// Add an entry to [`ignored_patterns`](Self::ignored_patterns)
    pub fn with_ignored_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignored_patterns.push(pattern.into());
        self
    }

    /// Add an entry to [`ignored_actions`](Self::ignored_actions)
    pub fn with_ignored_action(mut self, action: Action) -> Self {
        if !self.ignored_actions.contains(&action) {
            self.ignored_actions.push(action);
        }
        self
    }

    /// Check the configuration before any OS resource is acquired
    pub fn validate(&self) -> Result<()> {
        let min = Self::min_buffer_size();
        if self.buffer_size < min {
            return Err(Error::InvalidConfig(format!(
                "buffer_size is {} bytes, but at least {} bytes are needed \
                to hold one notification",
                self.buffer_size, min,
            )));
        }
        if u32::try_from(self.buffer_size).is_err() {
            return Err(Error::InvalidConfig(format!(
                "buffer_size of {} bytes is too large",
                self.buffer_size,
            )));
        }
        if self.ignored_patterns.iter().any(String::is_empty) {
            return Err(Error::InvalidConfig(
                "ignored_patterns must not contain empty patterns".to_owned(),
            ));
        }

        Ok(())
    }

    /// Whether an event passes the configured filters
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if self.ignored_actions.contains(&event.action) {
            return false;
        }
        if self.ignored_patterns.is_empty() {
            return true;
        }

        let relative = event.relative_path();
        let relative = relative.to_string_lossy();
        !self.ignored_patterns
            .iter()
            .any(|pattern| relative.contains(pattern.as_str()))
    }
}


#[cfg(test)]
mod tests {
    use crate::{Action, ChangeEvent, Error};

    use super::{WatchConfig, DEFAULT_BUFFER_SIZE};

    fn event(relative: &str, action: Action) -> ChangeEvent {
        ChangeEvent::from_relative("/d".as_ref(), relative.as_ref(), action)
            .unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        let config = WatchConfig::default();

        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(!config.recursive);
        assert!(!config.rescan);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn buffers_too_small_for_one_record_are_rejected() {
        let config = WatchConfig::default()
            .with_buffer_size(WatchConfig::min_buffer_size() - 1);

        match config.validate() {
            Err(error @ Error::InvalidConfig(_)) => assert!(error.is_setup()),
            result => panic!("unexpected result: {:?}", result),
        }

        let config = WatchConfig::default()
            .with_buffer_size(WatchConfig::min_buffer_size());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_patterns_are_rejected() {
        let config = WatchConfig::default().with_ignored_pattern("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn filters_drop_matching_events() {
        let config = WatchConfig::default()
            .with_ignored_pattern(".crdownload")
            .with_ignored_pattern(".lock")
            .with_ignored_action(Action::RenamedFrom);

        assert!(config.accepts(&event("a.txt", Action::Created)));
        assert!(config.accepts(&event("sub/a.txt", Action::RenamedTo)));

        assert!(!config.accepts(&event("movie.mp4.crdownload", Action::Modified)));
        assert!(!config.accepts(&event(".lock/a.txt", Action::Created)));
        assert!(!config.accepts(&event("a.txt", Action::RenamedFrom)));
    }

    #[test]
    fn ignored_actions_are_not_duplicated() {
        let config = WatchConfig::default()
            .with_ignored_action(Action::Removed)
            .with_ignored_action(Action::Removed);

        assert_eq!(config.ignored_actions, vec![Action::Removed]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: WatchConfig = serde_json::from_str(
            r#"{ "recursive": true, "ignored_actions": ["modified"] }"#,
        ).unwrap();

        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.recursive);
        assert_eq!(config.ignored_actions, vec![Action::Modified]);
    }
}
