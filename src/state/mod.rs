//! Per-channel playback status.
//!
//! Only the player writes here; everyone else reads a cloned
//! [`StatusSnapshot`] or subscribes to change events.

mod types;

pub use types::*;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use vitrine_common::ChannelId;

pub struct StateStore {
    snapshot: RwLock<Arc<StatusSnapshot>>,
    /// Bumped on every update, under the `snapshot` write lock.
    version: Mutex<u64>,
    /// Version of the snapshot last written to disk.
    persisted: Mutex<u64>,
    persistence_path: Option<PathBuf>,
    event_tx: broadcast::Sender<ChannelStatus>,
}

impl StateStore {
    pub fn new(persistence_path: Option<PathBuf>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            snapshot: RwLock::new(Arc::new(StatusSnapshot::default())),
            version: Mutex::new(0),
            persisted: Mutex::new(0),
            persistence_path,
            event_tx,
        })
    }

    /// The current status of both channels. Never blocks on playback.
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn channel(&self, channel: ChannelId) -> ChannelStatus {
        self.snapshot.read().channel(channel).clone()
    }

    /// Receive every channel status change.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelStatus> {
        self.event_tx.subscribe()
    }

    /// Apply `f` to one channel's status and publish the result.
    pub(crate) fn update(&self, channel: ChannelId, f: impl FnOnce(&mut ChannelStatus)) {
        let (status, snapshot, version) = {
            let mut guard = self.snapshot.write();
            let mut next = StatusSnapshot::clone(&guard);
            let status = next.channel_mut(channel);
            f(status);
            status.updated_at = Utc::now();
            let status = status.clone();
            let next = Arc::new(next);
            *guard = next.clone();

            let mut version = self.version.lock();
            *version += 1;
            (status, next, *version)
        };

        // No subscribers is fine
        let _ = self.event_tx.send(status);
        self.persist(&snapshot, version);
    }

    /// Write `snapshot` unless a newer one already reached the disk.
    fn persist(&self, snapshot: &StatusSnapshot, version: u64) {
        let Some(ref path) = self.persistence_path else {
            return;
        };
        let mut persisted = self.persisted.lock();
        if *persisted >= version {
            return;
        }
        match save_to_file(path, snapshot) {
            Ok(()) => *persisted = version,
            Err(e) => tracing::error!("Failed to persist channel status: {:#}", e),
        }
    }

    /// Read the status last written to `path`, e.g. by a restarted dashboard.
    pub fn load_persisted(path: &Path) -> Result<Option<StatusSnapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Replace `path` atomically so readers never see a partial file.
fn save_to_file(path: &Path, snapshot: &StatusSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {:?}", dir))?;
    file.write_all(json.as_bytes())?;
    file.persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}
