//! Rebuilding the concatenated video whenever a watched folder changes.
//!
//! A background task scans the folder on an interval and sends create/modify
//! events over a channel until its [`CancellationToken`] fires. The consumer
//! starts a rebuild per event through a [`SingleFlight`] guard, so events
//! that arrive while a rebuild is running are dropped rather than queued.
//! Cancelling the watcher never interrupts a rebuild already in progress.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "mkv", "avi"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
}

/// At most one holder at a time; the flag resets when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn try_begin(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: self.busy.clone(),
            })
    }

    #[cfg(test)]
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

type Snapshot = HashMap<PathBuf, SystemTime>;

async fn snapshot(dir: &Path, ignore: Option<&Path>) -> std::io::Result<Snapshot> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut snapshot = Snapshot::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_video(&path) || is_ignored(&path, ignore) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            snapshot.insert(path, metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));
        }
    }
    Ok(snapshot)
}

fn is_ignored(path: &Path, ignore: Option<&Path>) -> bool {
    ignore.is_some_and(|x| path.file_name() == x.file_name())
}

fn diff(before: &Snapshot, after: &Snapshot) -> Vec<WatchEvent> {
    let mut events: Vec<WatchEvent> = after
        .iter()
        .filter_map(|(path, modified)| match before.get(path) {
            None => Some(WatchEvent::Created(path.clone())),
            Some(previous) if previous != modified => Some(WatchEvent::Modified(path.clone())),
            Some(_) => None,
        })
        .collect();
    events.sort_by(|a, b| event_path(a).cmp(event_path(b)));
    events
}

fn event_path(event: &WatchEvent) -> &Path {
    match event {
        WatchEvent::Created(p) | WatchEvent::Modified(p) => p,
    }
}

/// Starts scanning `dir` every `interval`. Files present at start are not
/// reported, nor is `ignore` (the rebuild output when it lives in `dir`).
/// The channel closes when `cancel` fires.
pub async fn spawn_watcher(
    dir: PathBuf,
    ignore: Option<PathBuf>,
    interval: Duration,
    cancel: CancellationToken,
) -> std::io::Result<(mpsc::Receiver<WatchEvent>, JoinHandle<()>)> {
    let mut known = snapshot(&dir, ignore.as_deref()).await?;
    let (tx, rx) = mpsc::channel(64);

    let handle = tokio::spawn(async move {
        tracing::info!(
            dir = %dir.display(),
            interval_ms = interval.as_millis() as u64,
            "Directory watcher started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Directory watcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let current = match snapshot(&dir, ignore.as_deref()).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, "Directory scan failed");
                            continue;
                        }
                    };
                    for event in diff(&known, &current) {
                        tracing::debug!(event = ?event, "Change detected");
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    known = current;
                }
            }
        }
    });

    Ok((rx, handle))
}

/// Consumes events and runs `rebuild` on a blocking thread for each one
/// that finds no rebuild in flight. Returns once the channel closes.
pub async fn run_rebuilds<F>(
    mut events: mpsc::Receiver<WatchEvent>,
    flight: SingleFlight,
    rebuild: F,
) where
    F: Fn() -> anyhow::Result<()> + Send + Sync + Clone + 'static,
{
    let mut in_flight: Option<JoinHandle<()>> = None;
    while let Some(event) = events.recv().await {
        let Some(guard) = flight.try_begin() else {
            tracing::debug!(event = ?event, "Rebuild already running, ignoring change");
            continue;
        };
        tracing::info!(event = ?event, "Change detected, rebuilding");
        let rebuild = rebuild.clone();
        in_flight = Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            if let Err(e) = rebuild() {
                tracing::error!(error = ?e, "Rebuild failed");
            }
        }));
    }
    if let Some(handle) = in_flight {
        let _ = handle.await;
    }
}

/// Video files directly inside `dir`, sorted by name.
pub fn list_videos(dir: &Path, exclude: Option<&Path>) -> std::io::Result<Vec<PathBuf>> {
    let mut videos: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_video(p))
        .filter(|p| !is_ignored(p, exclude))
        .collect();
    videos.sort();
    Ok(videos)
}
