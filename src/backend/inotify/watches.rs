use std::{
    collections::HashMap,
    ffi::CString,
    io,
    os::raw::c_int,
    os::unix::ffi::OsStrExt,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use bitflags::bitflags;
use inotify_sys as ffi;

use super::fd_guard::FdGuard;


bitflags! {
    /// Describes what a directory watch reports
    ///
    /// Passed to [`Watches::add`].
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
    pub(crate) struct WatchMask: u32 {
        /// File opened for writing was closed
        ///
        /// See [`inotify_sys::IN_CLOSE_WRITE`].
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

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

        /// Only watch path, if it is a directory
        ///
        /// See [`inotify_sys::IN_ONLYDIR`].
        const ONLYDIR = ffi::IN_ONLYDIR;

        /// Everything a directory watch registers for
        const DIRECTORY = ffi::IN_CLOSE_WRITE
            | ffi::IN_DELETE
            | ffi::IN_MOVED_FROM
            | ffi::IN_MOVED_TO
            | ffi::IN_ONLYDIR;
    }
}


/// Identifies one watched directory on an inotify instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct WatchDescriptor(pub(crate) c_int);


/// The directories watched by one inotify instance
///
/// Keeps the mapping from watch descriptor to directory, which is needed to
/// tell which directory a record belongs to.
#[derive(Debug)]
pub(crate) struct Watches {
    fd: Arc<FdGuard>,
    dirs: HashMap<WatchDescriptor, PathBuf>,
}

impl Watches {
    pub(crate) fn new(fd: Arc<FdGuard>) -> Self {
        Watches {
            fd,
            dirs: HashMap::new(),
        }
    }

    /// Adds or updates a watch for the given directory
    ///
    /// Under the hood, this just calls [`inotify_add_watch`] and remembers
    /// which directory the returned descriptor stands for.
    ///
    /// # Errors
    ///
    /// Directly returns the error from the call to [`inotify_add_watch`]
    /// (translated into an `io::Error`). A path that contains a nul byte is
    /// reported as [`io::ErrorKind::InvalidInput`].
    ///
    /// [`inotify_add_watch`]: inotify_sys::inotify_add_watch
    pub(crate) fn add(&mut self, path: &Path, mask: WatchMask)
        -> io::Result<WatchDescriptor>
    {
        let c_path = CString::new(path.as_os_str().as_bytes())?;

        let wd = unsafe {
            ffi::inotify_add_watch(
                **self.fd,
                c_path.as_ptr() as *const _,
                mask.bits(),
            )
        };

        match wd {
            -1 => Err(io::Error::last_os_error()),
            _  => {
                let wd = WatchDescriptor(wd);
                self.dirs.insert(wd, path.to_path_buf());
                Ok(wd)
            }
        }
    }

    /// The directory a watch descriptor refers to
    pub(crate) fn dir(&self, wd: WatchDescriptor) -> Option<&Path> {
        self.dirs.get(&wd).map(PathBuf::as_path)
    }

    /// Forget a watch the kernel has already removed
    ///
    /// The kernel removes a watch on its own, and says so with
    /// `IN_IGNORED`, when the watched directory is deleted or its file system
    /// is unmounted.
    pub(crate) fn forget(&mut self, wd: WatchDescriptor) -> Option<PathBuf> {
        self.dirs.remove(&wd)
    }

    /// Point every watch at or below `from` to the same place below `to`
    ///
    /// Called when a watched subdirectory was renamed inside the watched
    /// tree. The kernel keeps the watches; only their paths change. Returns
    /// the number of watches that were moved.
    pub(crate) fn rename(&mut self, from: &Path, to: &Path) -> usize {
        let mut moved = 0;
        for dir in self.dirs.values_mut() {
            if let Ok(rest) = dir.strip_prefix(from) {
                *dir = to.join(rest);
                moved += 1;
            }
        }
        moved
    }

    /// Remove every watch at or below `dir`
    ///
    /// Called when a watched subdirectory left the watched tree. The kernel
    /// confirms each removal with `IN_IGNORED`, which is skipped because the
    /// descriptor is already forgotten by then.
    pub(crate) fn remove_tree(&mut self, dir: &Path) -> Vec<PathBuf> {
        let doomed: Vec<_> = self.dirs
            .iter()
            .filter(|(_, path)| path.starts_with(dir))
            .map(|(wd, _)| *wd)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for wd in doomed {
            // Fails if the kernel already dropped the watch; nothing to do.
            unsafe { ffi::inotify_rm_watch(**self.fd, wd.0); }
            if let Some(path) = self.dirs.remove(&wd) {
                removed.push(path);
            }
        }
        removed
    }

    /// Whether `dir` is one of the watched directories
    pub(crate) fn contains(&self, dir: &Path) -> bool {
        self.dirs.values().any(|path| path == dir)
    }

    pub(crate) fn len(&self) -> usize {
        self.dirs.len()
    }
}


#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::Arc,
    };

    use tempdir::TempDir;

    use super::{
        super::fd_guard::FdGuard,
        WatchMask,
        Watches,
    };

    #[test]
    fn added_directories_can_be_looked_up_and_forgotten() {
        let dir = TempDir::new("dirwatch-watches").unwrap();
        let fd = Arc::new(FdGuard::init().unwrap());
        let mut watches = Watches::new(fd);

        let wd = watches.add(dir.path(), WatchMask::DIRECTORY).unwrap();
        assert_eq!(watches.dir(wd), Some(dir.path()));

        // Adding the same inode again updates the existing watch.
        let again = watches.add(dir.path(), WatchMask::DIRECTORY).unwrap();
        assert_eq!(wd, again);
        assert_eq!(watches.len(), 1);

        assert_eq!(watches.forget(wd).as_deref(), Some(dir.path()));
        assert_eq!(watches.dir(wd), None);
    }

    #[test]
    fn renamed_and_removed_trees_update_every_watch_below_them() {
        let dir = TempDir::new("dirwatch-watches").unwrap();
        let sub = dir.path().join("sub");
        let nested = sub.join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        let fd = Arc::new(FdGuard::init().unwrap());
        let mut watches = Watches::new(fd);
        let root_wd = watches.add(dir.path(), WatchMask::DIRECTORY).unwrap();
        let sub_wd = watches.add(&sub, WatchMask::DIRECTORY).unwrap();
        let nested_wd = watches.add(&nested, WatchMask::DIRECTORY).unwrap();

        let renamed = dir.path().join("renamed");
        assert_eq!(watches.rename(&sub, &renamed), 2);
        assert_eq!(watches.dir(root_wd), Some(dir.path()));
        assert_eq!(watches.dir(sub_wd), Some(renamed.as_path()));
        assert_eq!(watches.dir(nested_wd), Some(renamed.join("nested").as_path()));
        assert!(!watches.contains(&sub));

        // A sibling that merely shares the name prefix is left alone.
        assert_eq!(watches.rename(&dir.path().join("ren"), dir.path()), 0);

        let removed = watches.remove_tree(&renamed);
        assert_eq!(removed.len(), 2);
        assert_eq!(watches.len(), 1);
        assert_eq!(watches.dir(sub_wd), None);
        assert_eq!(watches.dir(root_wd), Some(dir.path()));
    }

    #[test]
    fn files_are_rejected_as_directories() {
        let dir = TempDir::new("dirwatch-watches").unwrap();
        let file = dir.path().join("file");
        std::fs::File::create(&file).unwrap();

        let fd = Arc::new(FdGuard::init().unwrap());
        let mut watches = Watches::new(fd);

        let error = watches.add(&file, WatchMask::DIRECTORY).unwrap_err();
        assert_eq!(error.raw_os_error(), Some(libc::ENOTDIR));
        assert_eq!(watches.len(), 0);

        let error = watches
            .add("bad\0path".as_ref(), WatchMask::DIRECTORY)
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }
}
