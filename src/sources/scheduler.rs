//! Periodic rescanning, one task per `auto_scan` source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ScannerConfig;

use super::{MediaSource, SourceRegistry};

/// Exponential backoff after failed mounts or scans: base, 2x, 4x, ... capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            base: Duration::from_secs(config.retry_base_secs),
            max: Duration::from_secs(config.retry_max_secs),
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

struct ScanTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps one scan loop alive per `auto_scan` source.
///
/// Call [`ScanScheduler::sync`] after every registry change; it spawns loops
/// for new or re-enabled sources and cancels loops for removed or disabled
/// ones.
pub struct ScanScheduler {
    registry: Arc<SourceRegistry>,
    retry: RetryPolicy,
    tasks: Mutex<HashMap<String, ScanTask>>,
}

impl ScanScheduler {
    pub fn new(registry: Arc<SourceRegistry>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            retry,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Scan every source once, concurrently, and wait for all of them.
    pub async fn initial_scan(&self) {
        let names = self.registry.snapshot().names();
        info!("Initial scan of {} sources", names.len());
        let scans = names.iter().map(|name| self.registry.scan(name));
        futures::future::join_all(scans).await;
    }

    /// Reconcile running loops with the registry.
    pub fn sync(&self) {
        let snapshot = self.registry.snapshot();
        let wanted: HashSet<String> = snapshot
            .iter()
            .filter(|s| s.auto_scan)
            .map(|s| s.name.clone())
            .collect();

        let mut tasks = self.tasks.lock();
        tasks.retain(|name, task| {
            let keep = wanted.contains(name) && !task.handle.is_finished();
            if !keep {
                debug!("Stopping scan loop for '{}'", name);
                task.token.cancel();
            }
            keep
        });

        for name in wanted {
            if !tasks.contains_key(&name) {
                let task = self.spawn(name.clone());
                tasks.insert(name, task);
            }
        }
    }

    /// Restart the loop of one source so new settings apply immediately.
    pub fn restart(&self, name: &str) {
        if let Some(task) = self.tasks.lock().remove(name) {
            task.token.cancel();
        }
        self.sync();
    }

    /// Names of sources that currently have a scan loop.
    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn shutdown(&self) {
        let tasks: Vec<ScanTask> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.token.cancel();
        }
        for task in tasks {
            let _ = task.handle.await;
        }
    }

    fn spawn(&self, name: String) -> ScanTask {
        let token = CancellationToken::new();
        let handle = tokio::spawn(scan_loop(
            self.registry.clone(),
            name,
            self.retry,
            token.clone(),
        ));
        ScanTask { token, handle }
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().values() {
            task.token.cancel();
        }
    }
}

/// Time to wait before the next scan of `source`.
fn next_delay(source: &MediaSource, retry: RetryPolicy) -> Duration {
    if source.consecutive_failures > 0 {
        retry.delay(source.consecutive_failures)
    } else if source.last_scan_at.is_none() {
        Duration::ZERO
    } else {
        source.scan_interval
    }
}

async fn scan_loop(
    registry: Arc<SourceRegistry>,
    name: String,
    retry: RetryPolicy,
    token: CancellationToken,
) {
    debug!("Scan loop started for '{}'", name);

    loop {
        let Some(source) = registry.get(&name) else {
            break;
        };
        if !source.auto_scan {
            break;
        }

        let delay = next_delay(&source, retry);
        if source.consecutive_failures > 0 {
            debug!(
                "Retrying '{}' in {:?} after {} failures",
                name, delay, source.consecutive_failures
            );
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        // Cancellation while a scan runs is honored after it completes, so the
        // catalog swap is never torn.
        if registry.scan(&name).await.is_err() {
            break;
        }
        if token.is_cancelled() {
            break;
        }
    }

    debug!("Scan loop for '{}' exited", name);
}
