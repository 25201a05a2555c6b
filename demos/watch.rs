use std::{
    env,
    path::PathBuf,
    process,
};

use crossbeam_channel::unbounded;
use dirwatch::{
    ChangeEvent,
    WatchConfig,
    WatchRegistry,
};
use tracing_subscriber::EnvFilter;


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut dirs: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    if dirs.is_empty() {
        dirs.push(
            env::current_dir().expect("Failed to determine current directory")
        );
    }

    let registry = WatchRegistry::new();
    let (tx, rx) = unbounded::<ChangeEvent>();

    for dir in &dirs {
        let config = WatchConfig::default().with_recursive(true);
        if let Err(error) = registry.watch(dir, config, tx.clone()) {
            eprintln!("Failed to watch {}: {}", dir.display(), error);
            process::exit(1);
        }
    }
    drop(tx);

    println!("Watching {} directories for activity...", dirs.len());

    for event in rx {
        println!("{:<13} {}", event.action, event.path().display());
    }
}
