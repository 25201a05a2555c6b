// End-to-end tests against the kernel. The Linux backend reports a file once
// it was closed after writing, which these tests rely on.
#![cfg(target_os = "linux")]

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver};
use dirwatch::{
    Action,
    ChangeEvent,
    Error,
    WatchConfig,
    WatchRegistry,
    WatchSession,
};
use tempdir::TempDir;


const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);


#[test]
fn it_should_report_a_written_file_once() {
    let mut testdir = TestDir::new();
    let (session, events) = testdir.watch(WatchConfig::default());

    let (path, mut file) = testdir.new_file();
    write_to(&mut file);
    drop(file);

    let event = next(&events);
    assert_eq!(event.action, Action::Modified);
    assert_eq!(event.root, testdir.path());
    assert_eq!(event.dir, testdir.path());
    assert_eq!(event.path(), path);
    assert_no_more(&events);

    session.stop().unwrap();
}

#[test]
fn it_should_report_removed_files() {
    let mut testdir = TestDir::new();
    let (path, file) = testdir.new_file();
    drop(file);

    let (session, events) = testdir.watch(WatchConfig::default());
    fs::remove_file(&path).unwrap();

    let event = next(&events);
    assert_eq!(event.action, Action::Removed);
    assert_eq!(event.path(), path);

    session.stop().unwrap();
}

#[test]
fn it_should_report_both_names_of_a_rename_in_order() {
    let mut testdir = TestDir::new();
    let (from, file) = testdir.new_file();
    drop(file);
    let to = testdir.path().join("renamed");

    let (session, events) = testdir.watch(WatchConfig::default());
    fs::rename(&from, &to).unwrap();

    let first = next(&events);
    let second = next(&events);
    assert_eq!((first.action, first.path()), (Action::RenamedFrom, from));
    assert_eq!((second.action, second.path()), (Action::RenamedTo, to));

    session.stop().unwrap();
}

#[test]
fn it_should_deliver_events_in_kernel_order() {
    let mut testdir = TestDir::new();
    let (session, events) = testdir.watch(WatchConfig::default());

    let mut expected = Vec::new();
    for _ in 0..10 {
        let (path, mut file) = testdir.new_file();
        write_to(&mut file);
        drop(file);
        expected.push(path);
    }

    let received: Vec<_> = expected.iter().map(|_| next(&events).path()).collect();
    assert_eq!(received, expected);

    session.stop().unwrap();
}

#[test]
fn it_should_only_watch_subdirectories_when_recursive() {
    let testdir = TestDir::new();
    let sub = testdir.path().join("sub");
    fs::create_dir(&sub).unwrap();

    let (flat, flat_events) = testdir.watch(WatchConfig::default());
    let (deep, deep_events) = {
        // A second session on the same directory is independent of the first.
        let (tx, rx) = unbounded::<ChangeEvent>();
        let config = WatchConfig::default().with_recursive(true);
        (WatchSession::start(testdir.path(), config, tx).unwrap(), rx)
    };

    File::create(sub.join("nested.txt")).unwrap();

    let event = next(&deep_events);
    assert_eq!(event.action, Action::Modified);
    assert_eq!(event.root, testdir.path());
    assert_eq!(event.dir, sub);
    assert_eq!(event.relative_path(), Path::new("sub").join("nested.txt"));

    assert_no_more(&flat_events);
    flat.stop().unwrap();
    deep.stop().unwrap();
}

#[test]
fn it_should_follow_renamed_subdirectories() {
    let testdir = TestDir::new();
    let sub = testdir.path().join("sub");
    let renamed = testdir.path().join("sub2");
    fs::create_dir(&sub).unwrap();

    let (session, events) = testdir.watch(WatchConfig::default().with_recursive(true));
    fs::rename(&sub, &renamed).unwrap();

    let first = next(&events);
    let second = next(&events);
    assert_eq!((first.action, first.path()), (Action::RenamedFrom, sub));
    assert_eq!((second.action, second.path()), (Action::RenamedTo, renamed.clone()));

    File::create(renamed.join("x.txt")).unwrap();

    let event = next(&events);
    assert_eq!(event.action, Action::Modified);
    assert_eq!(event.dir, renamed);
    assert_eq!(event.relative_path(), Path::new("sub2").join("x.txt"));
    assert!(event.path().exists());

    session.stop().unwrap();
}

#[test]
fn it_should_report_existing_files_on_rescan() {
    let mut testdir = TestDir::new();
    let (existing, file) = testdir.new_file();
    drop(file);

    let (session, events) = testdir.watch(WatchConfig::default().with_rescan(true));

    let event = next(&events);
    assert_eq!(event.action, Action::Created);
    assert_eq!(event.path(), existing);

    let (written, mut file) = testdir.new_file();
    write_to(&mut file);
    drop(file);

    let event = next(&events);
    assert_eq!(event.action, Action::Modified);
    assert_eq!(event.path(), written);

    session.stop().unwrap();
}

#[test]
fn it_should_drop_filtered_events() {
    let mut testdir = TestDir::new();
    let config = WatchConfig::default()
        .with_ignored_pattern(".part")
        .with_ignored_action(Action::Removed);
    let (session, events) = testdir.watch(config);

    File::create(testdir.path().join("download.part")).unwrap();
    let (path, file) = testdir.new_file();
    drop(file);
    fs::remove_file(&path).unwrap();

    let event = next(&events);
    assert_eq!(event.action, Action::Modified);
    assert_eq!(event.path(), path);
    assert_no_more(&events);

    session.stop().unwrap();
}

#[test]
fn it_should_fail_when_the_watched_directory_is_removed() {
    let testdir = TestDir::new();
    let root = testdir.path().join("root");
    fs::create_dir(&root).unwrap();

    let (tx, _rx) = unbounded::<ChangeEvent>();
    let session = WatchSession::start(&root, WatchConfig::default(), tx).unwrap();

    fs::remove_dir(&root).unwrap();

    match session.wait() {
        Err(Error::WatchRemoved { path }) => assert_eq!(path, root),
        result => panic!("unexpected result: {:?}", result),
    }
}

#[test]
fn it_should_tell_the_registry_owner_about_failed_watches() {
    let testdir = TestDir::new();
    let root = testdir.path().join("root");
    fs::create_dir(&root).unwrap();

    let (failures_tx, failures) = unbounded();
    let registry = WatchRegistry::with_error_handler(move |dir, error| {
        let removed = matches!(error, Error::WatchRemoved { .. });
        failures_tx.send((dir.to_path_buf(), removed)).unwrap();
    });
    registry.watch(&root, WatchConfig::default(), |_: ChangeEvent| {}).unwrap();
    assert_eq!(registry.active_count(), 1);

    fs::remove_dir(&root).unwrap();

    let (dir, removed) = failures.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(dir, root);
    assert!(removed);
    assert!(!registry.is_watching(&root));
    assert_eq!(registry.active_count(), 0);

    // The failed watch can be replaced.
    fs::create_dir(&root).unwrap();
    registry.watch(&root, WatchConfig::default(), |_: ChangeEvent| {}).unwrap();
    assert!(registry.is_watching(&root));
    registry.shutdown().unwrap();

    assert!(failures.try_recv().is_err());
}


struct TestDir {
    dir: TempDir,
    counter: u32,
}

impl TestDir {
    fn new() -> TestDir {
        TestDir {
            dir: TempDir::new("dirwatch-test").unwrap(),
            counter: 0,
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn new_file(&mut self) -> (PathBuf, File) {
        let id = self.counter;
        self.counter += 1;

        let path = self.dir.path().join("file-".to_string() + &id.to_string());
        let file = File::create(&path)
            .unwrap_or_else(|error| panic!("Failed to create temporary file: {}", error));

        (path, file)
    }

    fn watch(&self, config: WatchConfig) -> (WatchSession, Receiver<ChangeEvent>) {
        let (tx, rx) = unbounded::<ChangeEvent>();
        let session = WatchSession::start(self.path(), config, tx)
            .unwrap_or_else(|error| panic!("Failed to start watching: {}", error));

        (session, rx)
    }
}

fn write_to(file: &mut File) {
    file
        .write(b"This should trigger a change event.")
        .unwrap_or_else(|error|
            panic!("Failed to write to file: {}", error)
        );
}

fn next(events: &Receiver<ChangeEvent>) -> ChangeEvent {
    events.recv_timeout(TIMEOUT)
        .unwrap_or_else(|error| panic!("No event received: {}", error))
}

fn assert_no_more(events: &Receiver<ChangeEvent>) {
    if let Ok(event) = events.recv_timeout(QUIET) {
        panic!("Unexpected event: {}", event);
    }
}
