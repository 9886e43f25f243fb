//! Change notification: polling file watcher and reload policy.
//!
//! The notifier only reports that something changed. Turning a changed file
//! into a new handler is the embedding application's job, expressed as a
//! [`ReloadPolicy`]:
//!
//! ```text
//! PollingWatcher ──ChangeEvent──▶ change listener ──policy──▶ ReloadCoordinator
//!   (or any sender from HotReloadClient::change_sender)
//! ```
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use croupier_core::{ConfigError, FileWatchingConfig};
use glob::Pattern;
use ignore::WalkBuilder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::loop_interval;
use crate::reload::{FunctionUpdate, ReloadCoordinator};

/// Buffer of the change event channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Events
// ============================================================================

/// What kind of file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Handler source or artifact.
    Code,
    /// Configuration document.
    Config,
}

impl ChangeKind {
    /// `.json`, `.yaml`, `.yml` and `.toml` files are configuration,
    /// everything else is code.
    pub fn for_path(path: &Path) -> Self {
        let is_config = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                matches!(
                    ext.to_ascii_lowercase().as_str(),
                    "json" | "yaml" | "yml" | "toml"
                )
            })
            .unwrap_or(false);

        if is_config {
            Self::Config
        } else {
            Self::Code
        }
    }
}

/// A file was created or modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Builds an event, classifying the path with [`ChangeKind::for_path`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = ChangeKind::for_path(&path);
        Self { path, kind }
    }

    /// File name without extension, e.g. `player.ban` for `player.ban.rs`.
    pub fn file_stem(&self) -> Option<&str> {
        self.path.file_stem().and_then(|s| s.to_str())
    }
}

// ============================================================================
// Reload Policy
// ============================================================================

/// Decides which function, if any, a code change reloads.
pub trait ReloadPolicy: Send + Sync {
    fn resolve(&self, event: &ChangeEvent) -> Option<FunctionUpdate>;
}

impl<F> ReloadPolicy for F
where
    F: Fn(&ChangeEvent) -> Option<FunctionUpdate> + Send + Sync,
{
    fn resolve(&self, event: &ChangeEvent) -> Option<FunctionUpdate> {
        self(event)
    }
}

/// Policy that never reloads; changes are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreChanges;

impl ReloadPolicy for IgnoreChanges {
    fn resolve(&self, _event: &ChangeEvent) -> Option<FunctionUpdate> {
        None
    }
}

// ============================================================================
// Polling Watcher
// ============================================================================

/// Detects new and modified files by comparing modification times between
/// periodic scans of a directory tree.
#[derive(Debug, Clone)]
pub struct PollingWatcher {
    dir: PathBuf,
    patterns: Vec<Pattern>,
    poll_interval: Duration,
}

impl PollingWatcher {
    /// # Errors
    ///
    /// `ConfigError::InvalidFieldValue` if a pattern is not a valid glob.
    pub fn new(
        dir: impl Into<PathBuf>,
        patterns: &[String],
        poll_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidFieldValue {
                    field: "file_watching.patterns".to_string(),
                    value: p.clone(),
                    expected: format!("glob pattern ({e})"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dir: dir.into(),
            patterns,
            poll_interval,
        })
    }

    pub fn from_config(config: &FileWatchingConfig) -> Result<Self, ConfigError> {
        Self::new(&config.watch_dir, &config.patterns, config.poll_interval())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True if the file name matches any configured pattern.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns.iter().any(|p| p.matches(name))
    }

    /// Walks the tree and records the modification time of every matching
    /// file. Blocking.
    ///
    /// # Errors
    ///
    /// Fails only when the root itself is missing or is not a directory;
    /// unreadable entries below it are skipped.
    pub fn scan(&self) -> io::Result<HashMap<PathBuf, SystemTime>> {
        if !std::fs::metadata(&self.dir)?.is_dir() {
            return Err(io::Error::other(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        // Every file counts; ignore files and hidden-file rules do not apply.
        let walker = WalkBuilder::new(&self.dir)
            .standard_filters(false)
            .build();

        let mut found = HashMap::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let is_file = entry.file_type().is_some_and(|t| t.is_file());
            if entry.depth() == 0 || !is_file || !self.matches(entry.path()) {
                continue;
            }

            if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                found.insert(entry.into_path(), modified);
            }
        }

        Ok(found)
    }

    /// Runs the watcher until cancelled or until `events` is closed.
    pub fn spawn(
        self,
        events: mpsc::Sender<ChangeEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }

    async fn run(self, events: mpsc::Sender<ChangeEvent>, cancel: CancellationToken) {
        let watcher = Arc::new(self);

        let mut known = match watcher.scan_blocking().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    dir = %watcher.dir.display(),
                    error = %e,
                    "Watch directory unavailable, file watching disabled"
                );
                return;
            }
        };

        info!(
            dir = %watcher.dir.display(),
            files = known.len(),
            poll_interval_secs = watcher.poll_interval.as_secs_f64(),
            "File watcher started"
        );

        let mut ticker = loop_interval(watcher.poll_interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = match watcher.scan_blocking().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(
                        dir = %watcher.dir.display(),
                        error = %e,
                        "Watch directory disappeared, file watching stopped"
                    );
                    return;
                }
            };

            let mut changed: Vec<&PathBuf> = current
                .iter()
                .filter(|(path, modified)| known.get(*path) != Some(*modified))
                .map(|(path, _)| path)
                .collect();
            changed.sort();

            for path in changed {
                let event = ChangeEvent::new(path.clone());
                debug!(path = %path.display(), kind = ?event.kind, "File changed");
                if events.send(event).await.is_err() {
                    debug!("Change receiver dropped, stopping file watcher");
                    return;
                }
            }

            known = current;
        }

        info!("File watcher stopped");
    }

    async fn scan_blocking(self: &Arc<Self>) -> io::Result<HashMap<PathBuf, SystemTime>> {
        let watcher = Arc::clone(self);
        tokio::task::spawn_blocking(move || watcher.scan())
            .await
            .map_err(io::Error::other)?
    }
}

// ============================================================================
// Change Listener
// ============================================================================

/// Forwards change events to the coordinator until cancelled or until every
/// sender is gone.
pub fn spawn_change_listener(
    coordinator: Arc<ReloadCoordinator>,
    policy: Arc<dyn ReloadPolicy>,
    mut events: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            let Some(event) = event else {
                debug!("All change senders dropped");
                break;
            };

            coordinator.handle_change(&event, policy.as_ref()).await;
        }
        debug!("Change listener stopped");
    })
}
