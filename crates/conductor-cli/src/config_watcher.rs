//! Config hot-reload watcher.
//!
//! Watches a `conductor.toml` file for modifications and hands the freshly
//! parsed [`ConfigSnapshot`] to a callback after a debounce window. The
//! orchestrator only ever sees the result through a [`ConfigSource`], so a
//! reload lands between processing cycles, never inside one.
//!
//! [`ConfigSource`]: conductor_core::ConfigSource

use crate::config::load_config;
use conductor_core::{ConductorError, ConductorResult, ConfigSnapshot, SharedConfig};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Watches a config file on disk and calls back on every (debounced) change.
///
/// The watcher is kept alive as long as this struct is alive; dropping it
/// stops the background thread and releases the file-system watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `config_path` for modifications.
    ///
    /// * `debounce_ms` -- minimum milliseconds between two successive reload
    ///   callbacks.
    /// * `on_reload` -- called on a background thread each time the file is
    ///   modified and parses into a valid snapshot. Invalid files are logged
    ///   and do not invoke the callback.
    pub fn start<F>(config_path: PathBuf, debounce_ms: u64, on_reload: F) -> ConductorResult<Self>
    where
        F: Fn(ConfigSnapshot) + Send + Sync + 'static,
    {
        let (tx, rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| ConductorError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(config_path.as_ref(), RecursiveMode::NonRecursive)
            .map_err(|e| ConductorError::Config(format!("Failed to watch config file: {e}")))?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let debounce = Duration::from_millis(debounce_ms);
            let mut last_reload = Instant::now();

            while rx.recv().is_ok() {
                // One reload per burst of writes.
                while rx.try_recv().is_ok() {}

                let since = last_reload.elapsed();
                if since < debounce {
                    std::thread::sleep(debounce - since);
                }
                last_reload = Instant::now();

                match load_config(&path) {
                    Ok(snapshot) => on_reload(snapshot),
                    Err(e) => tracing::warn!(error = %e, "Failed to reload config, keeping the previous one"),
                }
            }

            tracing::debug!("Config watcher thread exiting");
        });

        tracing::info!(path = %config_path.display(), "Config hot-reload watcher started");

        Ok(Self { _watcher: watcher })
    }

    /// Watch `config_path` and swap every valid reload into `shared`.
    pub fn into_shared(
        config_path: PathBuf,
        debounce_ms: u64,
        shared: Arc<SharedConfig>,
    ) -> ConductorResult<Self> {
        Self::start(config_path, debounce_ms, move |snapshot| {
            if let Err(e) = shared.replace(snapshot) {
                tracing::warn!(error = %e, "Reloaded config rejected");
            }
        })
    }
}
