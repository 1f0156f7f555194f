//! Media source registry.
//!
//! Owns the configured sources, their mount lifecycle and the file catalog of
//! the last successful scan. Readers take an immutable [`RegistrySnapshot`];
//! every change swaps in a new snapshot so a reader never sees a half-applied
//! update.

pub mod mount;
pub mod scan;
pub mod scheduler;
pub mod smb;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vitrine_common::{Error, MountStatus, Result, SourceKind};

use crate::config::{Config, SmbConfig, SourceConfig};
use crate::secrets::SecretStore;

pub use mount::{CommandMountHelper, MountHelper, MountRequest};
pub use scan::Catalog;
pub use scheduler::{RetryPolicy, ScanScheduler};

/// A configured source plus what the registry last observed about it.
#[derive(Debug, Clone, Serialize)]
pub struct MediaSource {
    pub name: String,
    pub kind: SourceKind,
    /// Local root, or the mount point of the share.
    pub path: PathBuf,
    pub smb: Option<SmbConfig>,
    pub auto_scan: bool,
    pub scan_interval: Duration,
    pub mount_status: MountStatus,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// The default local source; cannot be removed or renamed.
    pub protected: bool,
    #[serde(skip)]
    pub files: Arc<Catalog>,
    /// Bumped when the name or location changes, so stale scans are dropped.
    #[serde(skip)]
    generation: u64,
}

impl MediaSource {
    /// A mounted source with a fixed catalog, not backed by a registry.
    pub fn detached(name: impl Into<String>, path: impl Into<PathBuf>, files: Catalog) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Local,
            path: path.into(),
            smb: None,
            auto_scan: true,
            scan_interval: Duration::from_secs(300),
            mount_status: MountStatus::Mounted,
            last_scan_at: None,
            last_error: None,
            consecutive_failures: 0,
            protected: false,
            files: Arc::new(files),
            generation: 0,
        }
    }

    /// Directory that catalog paths are relative to.
    pub fn scan_root(&self) -> PathBuf {
        match self.smb.as_ref() {
            Some(smb) => {
                let subpath = smb::normalize_subpath(&smb.subpath);
                if subpath.is_empty() {
                    self.path.clone()
                } else {
                    self.path.join(subpath)
                }
            }
            None => self.path.clone(),
        }
    }

    /// Only mounted sources feed playlists.
    pub fn is_reachable(&self) -> bool {
        self.mount_status == MountStatus::Mounted
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// The persisted form of this source.
    pub fn to_config(&self, default_interval: Duration) -> SourceConfig {
        SourceConfig {
            name: self.name.clone(),
            kind: self.kind,
            path: Some(self.path.clone()),
            smb: self.smb.clone(),
            auto_scan: self.auto_scan,
            scan_interval_secs: (self.scan_interval != default_interval)
                .then(|| self.scan_interval.as_secs()),
        }
    }
}

/// Immutable view of all sources, in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    sources: Vec<MediaSource>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&MediaSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// The source, if it exists and is currently reachable.
    pub fn reachable(&self, name: &str) -> Option<&MediaSource> {
        self.get(name).filter(|s| s.is_reachable())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaSource> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Build a snapshot directly, e.g. for playlist tests.
    pub fn from_sources(sources: Vec<MediaSource>) -> Self {
        Self { sources }
    }
}

/// Parameters for [`SourceRegistry::add`].
///
/// An SMB source can be given either as `location` (`smb://server/share/sub`
/// or a UNC path) or through explicit fields; explicit fields win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewSource {
    pub name: String,
    pub kind: Option<SourceKind>,
    pub path: Option<PathBuf>,
    pub location: Option<String>,
    pub server: Option<String>,
    pub share: Option<String>,
    pub subpath: Option<String>,
    pub username: Option<String>,
    pub domain: Option<String>,
    /// Plaintext; encrypted before it is stored.
    pub password: Option<String>,
    pub version: Option<String>,
    pub extra_options: Vec<String>,
    pub auto_scan: Option<bool>,
    pub scan_interval_secs: Option<u64>,
}

/// Partial update for [`SourceRegistry::update`].
///
/// For `username`, `domain` and `password` an empty string clears the value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceUpdate {
    pub new_name: Option<String>,
    pub location: Option<String>,
    pub server: Option<String>,
    pub share: Option<String>,
    pub subpath: Option<String>,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub password: Option<String>,
    pub version: Option<String>,
    pub extra_options: Option<Vec<String>>,
    pub auto_scan: Option<bool>,
    pub scan_interval_secs: Option<u64>,
}

impl SourceUpdate {
    fn touches_connection(&self) -> bool {
        self.location.is_some()
            || self.server.is_some()
            || self.share.is_some()
            || self.subpath.is_some()
            || self.username.is_some()
            || self.domain.is_some()
            || self.password.is_some()
            || self.version.is_some()
            || self.extra_options.is_some()
    }
}

/// Result of [`SourceRegistry::update`].
#[derive(Debug, Clone)]
pub struct UpdatedSource {
    pub source: MediaSource,
    /// Previous name, when the update renamed the source.
    pub renamed_from: Option<String>,
}

/// What a single scan did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The catalog was replaced.
    Updated { files: usize },
    /// Mount or listing failed; the previous catalog is kept.
    Failed { error: String },
    /// The source was removed, renamed or re-pointed while scanning.
    Discarded,
}

/// Registry tuning taken from `[scanner]`.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub mount_root: PathBuf,
    pub mount_timeout: Duration,
    pub default_scan_interval: Duration,
    pub uid: u32,
    pub gid: u32,
}

impl RegistryOptions {
    pub fn from_config(config: &Config) -> Self {
        let (uid, gid) = current_ids();
        Self {
            mount_root: config.mount_root(),
            mount_timeout: Duration::from_secs(config.scanner.mount_timeout_secs),
            default_scan_interval: Duration::from_secs(config.scanner.default_scan_interval_secs),
            uid,
            gid,
        }
    }
}

#[cfg(unix)]
fn current_ids() -> (u32, u32) {
    (
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}

#[cfg(not(unix))]
fn current_ids() -> (u32, u32) {
    (0, 0)
}

pub struct SourceRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    mount: Arc<dyn MountHelper>,
    secrets: Arc<dyn SecretStore>,
    options: RegistryOptions,
    scan_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generations: AtomicU64,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.snapshot.read().names())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SourceRegistry {
    /// Build the registry from configured sources.
    ///
    /// The first local source becomes the protected default. SMB sources
    /// without a mount point get one allocated under the mount root.
    pub fn new(
        configs: Vec<SourceConfig>,
        mount: Arc<dyn MountHelper>,
        secrets: Arc<dyn SecretStore>,
        options: RegistryOptions,
    ) -> Result<Self> {
        let registry = Self {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            mount,
            secrets,
            options,
            scan_locks: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(1),
        };

        let mut sources: Vec<MediaSource> = Vec::with_capacity(configs.len());
        let mut has_protected = false;
        for config in configs {
            if sources.iter().any(|s| s.name == config.name) {
                return Err(Error::config(format!(
                    "duplicate source name '{}'",
                    config.name
                )));
            }
            let taken = taken_mount_points(&sources);
            let mut source = registry.source_from_config(config, &taken)?;
            if source.kind == SourceKind::Local && !has_protected {
                source.protected = true;
                has_protected = true;
            }
            sources.push(source);
        }

        *registry.snapshot.write() = Arc::new(RegistrySnapshot { sources });
        Ok(registry)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn source_from_config(
        &self,
        config: SourceConfig,
        taken: &HashSet<PathBuf>,
    ) -> Result<MediaSource> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::config("source name cannot be empty"));
        }

        let path = match (config.kind, config.path) {
            (_, Some(path)) => path,
            (SourceKind::Local, None) => {
                return Err(Error::config(format!(
                    "local source '{name}' needs a path"
                )))
            }
            (SourceKind::Smb, None) => {
                smb::allocate_mount_point(&self.options.mount_root, &name, taken)
            }
        };

        let smb = match config.kind {
            SourceKind::Smb => {
                let mut smb = config.smb.ok_or_else(|| {
                    Error::config(format!("SMB source '{name}' needs a server and a share"))
                })?;
                smb.server = smb.server.trim().to_string();
                smb.share = smb.share.trim().to_string();
                smb.subpath = smb::normalize_subpath(&smb.subpath);
                if smb.server.is_empty() || smb.share.is_empty() {
                    return Err(Error::config(format!(
                        "SMB source '{name}' needs a server and a share"
                    )));
                }
                Some(smb)
            }
            SourceKind::Local => None,
        };

        let scan_interval = match config.scan_interval_secs {
            Some(0) => {
                return Err(Error::config(format!(
                    "source '{name}' has a scan interval of 0"
                )))
            }
            Some(secs) => Duration::from_secs(secs),
            None => self.options.default_scan_interval,
        };

        Ok(MediaSource {
            name,
            kind: config.kind,
            path,
            smb,
            auto_scan: config.auto_scan,
            scan_interval,
            mount_status: MountStatus::Unmounted,
            last_scan_at: None,
            last_error: None,
            consecutive_failures: 0,
            protected: false,
            files: Arc::new(Catalog::new()),
            generation: self.next_generation(),
        })
    }

    /// Current snapshot; cheap to take and never blocks on scans.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<MediaSource> {
        self.snapshot.read().get(name).cloned()
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Persisted form of every source, in addition order.
    pub fn to_configs(&self) -> Vec<SourceConfig> {
        self.snapshot
            .read()
            .iter()
            .map(|s| s.to_config(self.options.default_scan_interval))
            .collect()
    }

    /// Replace the snapshot with a modified copy, under the write lock.
    fn modify<T>(&self, f: impl FnOnce(&mut Vec<MediaSource>) -> Result<T>) -> Result<T> {
        let mut guard = self.snapshot.write();
        let mut sources = guard.sources.clone();
        let result = f(&mut sources)?;
        *guard = Arc::new(RegistrySnapshot { sources });
        Ok(result)
    }

    /// Register a new source. SMB sources start unmounted.
    pub fn add(&self, new: NewSource) -> Result<MediaSource> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::config("source name cannot be empty"));
        }

        let kind = new.kind.unwrap_or(if new.location.is_some() || new.server.is_some() {
            SourceKind::Smb
        } else {
            SourceKind::Local
        });

        let smb = match kind {
            SourceKind::Smb => Some(self.smb_from_new(&name, &new)?),
            SourceKind::Local => None,
        };

        let config = SourceConfig {
            name: name.clone(),
            kind,
            path: new.path.clone(),
            smb,
            auto_scan: new.auto_scan.unwrap_or(true),
            scan_interval_secs: new.scan_interval_secs,
        };

        let source = self.modify(|sources| {
            if sources.iter().any(|s| s.name == name) {
                return Err(Error::config(format!("a source named '{name}' already exists")));
            }
            let taken = taken_mount_points(sources);
            let source = self.source_from_config(config, &taken)?;
            sources.push(source.clone());
            Ok(source)
        })?;

        info!(
            "Added {} source '{}' at {:?}",
            source.kind, source.name, source.path
        );
        Ok(source)
    }

    fn smb_from_new(&self, name: &str, new: &NewSource) -> Result<SmbConfig> {
        let parsed = new
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .map(smb::parse_smb_location)
            .transpose()?;

        let pick = |explicit: &Option<String>, parsed: Option<&String>| {
            explicit
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| parsed.cloned())
                .unwrap_or_default()
        };

        let server = pick(&new.server, parsed.as_ref().map(|p| &p.server));
        let share = pick(&new.share, parsed.as_ref().map(|p| &p.share));
        let subpath = pick(&new.subpath, parsed.as_ref().map(|p| &p.subpath));

        if server.is_empty() || share.is_empty() {
            return Err(Error::config(format!(
                "SMB source '{name}' needs a server and a share"
            )));
        }

        let encrypted_password = match new.password.as_deref() {
            Some(pw) if !pw.is_empty() => Some(self.secrets.encrypt(pw)?),
            _ => None,
        };

        Ok(SmbConfig {
            server,
            share,
            subpath: smb::normalize_subpath(&subpath),
            username: new.username.clone().filter(|u| !u.trim().is_empty()),
            domain: new.domain.clone().filter(|d| !d.trim().is_empty()),
            encrypted_password,
            version: new
                .version
                .clone()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(crate::config::default_smb_version),
            extra_options: new.extra_options.clone(),
        })
    }

    /// Apply a partial update.
    ///
    /// Changing where an SMB source points unmounts it so the next scan
    /// mounts the new location.
    pub async fn update(&self, name: &str, update: SourceUpdate) -> Result<UpdatedSource> {
        let new_password = match update.password.as_deref() {
            Some("") => Some(None),
            Some(pw) => Some(Some(self.secrets.encrypt(pw)?)),
            None => None,
        };
        let parsed = update
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .map(smb::parse_smb_location)
            .transpose()?;

        let (updated, previous) = self.modify(|sources| {
            let index = sources
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| Error::config(format!("unknown source '{name}'")))?;

            let target_name = match update.new_name.as_deref().map(str::trim) {
                Some("") => return Err(Error::config("source name cannot be empty")),
                Some(new_name) if new_name != name => {
                    if sources.iter().any(|s| s.name == new_name) {
                        return Err(Error::config(format!(
                            "a source named '{new_name}' already exists"
                        )));
                    }
                    Some(new_name.to_string())
                }
                _ => None,
            };

            let previous = sources[index].clone();
            let mut source = previous.clone();

            if source.kind == SourceKind::Local && update.touches_connection() {
                return Err(Error::config(format!(
                    "only auto_scan and scan_interval can change on local source '{name}'"
                )));
            }
            if source.protected && target_name.is_some() {
                return Err(Error::config(format!(
                    "the default source '{name}' cannot be renamed"
                )));
            }

            if let Some(smb) = source.smb.as_mut() {
                if let Some(ref parsed) = parsed {
                    smb.server = parsed.server.clone();
                    smb.share = parsed.share.clone();
                    smb.subpath = parsed.subpath.clone();
                }
                if let Some(ref server) = update.server {
                    smb.server = server.trim().to_string();
                }
                if let Some(ref share) = update.share {
                    smb.share = share.trim().to_string();
                }
                if let Some(ref subpath) = update.subpath {
                    smb.subpath = smb::normalize_subpath(subpath);
                }
                if let Some(ref username) = update.username {
                    smb.username = Some(username.trim().to_string()).filter(|u| !u.is_empty());
                }
                if let Some(ref domain) = update.domain {
                    smb.domain = Some(domain.trim().to_string()).filter(|d| !d.is_empty());
                }
                if let Some(ref password) = new_password {
                    smb.encrypted_password = password.clone();
                }
                if let Some(ref version) = update.version {
                    smb.version = version.trim().to_string();
                }
                if let Some(ref extra) = update.extra_options {
                    smb.extra_options = extra.clone();
                }
                if smb.server.is_empty() || smb.share.is_empty() {
                    return Err(Error::config(format!(
                        "SMB source '{name}' needs a server and a share"
                    )));
                }
            }

            if let Some(auto_scan) = update.auto_scan {
                source.auto_scan = auto_scan;
            }
            match update.scan_interval_secs {
                Some(0) => {
                    return Err(Error::config(format!(
                        "source '{name}' has a scan interval of 0"
                    )))
                }
                Some(secs) => source.scan_interval = Duration::from_secs(secs),
                None => {}
            }

            let relocated = source.smb != previous.smb;
            if let Some(ref new_name) = target_name {
                source.name = new_name.clone();
            }
            if relocated || target_name.is_some() {
                source.generation = self.next_generation();
            }
            if relocated {
                source.mount_status = MountStatus::Unmounted;
                source.files = Arc::new(Catalog::new());
                source.last_scan_at = None;
                source.consecutive_failures = 0;
                source.last_error = None;
            }

            sources[index] = source.clone();
            Ok((source, previous))
        })?;

        let renamed_from = (updated.name != previous.name).then(|| previous.name.clone());
        if let Some(ref old) = renamed_from {
            self.scan_locks.lock().remove(old);
            info!("Renamed source '{}' to '{}'", old, updated.name);
        }

        if previous.kind == SourceKind::Smb
            && updated.smb != previous.smb
            && previous.mount_status == MountStatus::Mounted
        {
            if let Err(e) = self.mount.unmount(&previous.name, &previous.path).await {
                debug!("Unmount after update of '{}' failed: {}", updated.name, e);
            }
        }

        Ok(UpdatedSource {
            source: updated,
            renamed_from,
        })
    }

    /// Remove a source, unmounting it first. The protected local source
    /// cannot be removed.
    pub async fn remove(&self, name: &str) -> Result<MediaSource> {
        let removed = self.modify(|sources| {
            let index = sources
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| Error::config(format!("unknown source '{name}'")))?;
            if sources[index].protected {
                return Err(Error::config(format!(
                    "the default source '{name}' cannot be removed"
                )));
            }
            Ok(sources.remove(index))
        })?;
        self.scan_locks.lock().remove(name);

        if removed.kind == SourceKind::Smb {
            if removed.mount_status == MountStatus::Mounted || self.mount.is_mounted(&removed.path) {
                if let Err(e) = self.mount.unmount(&removed.name, &removed.path).await {
                    debug!("Unmount before removing '{}' failed: {}", name, e);
                }
            }
            if removed.path.starts_with(&self.options.mount_root) {
                // Only an empty directory is removed; a share still attached stays.
                if let Err(e) = tokio::fs::remove_dir(&removed.path).await {
                    debug!("Could not remove mount point {:?}: {}", removed.path, e);
                }
            }
        }

        info!("Removed source '{}'", name);
        Ok(removed)
    }

    /// Toggle periodic rescanning; the catalog is left as it is.
    pub fn set_auto_scan(&self, name: &str, enabled: bool) -> Result<MediaSource> {
        self.modify(|sources| {
            let source = sources
                .iter_mut()
                .find(|s| s.name == name)
                .ok_or_else(|| Error::config(format!("unknown source '{name}'")))?;
            source.auto_scan = enabled;
            Ok(source.clone())
        })
    }

    fn scan_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.scan_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Mount (for SMB) and list a source, then swap in the new catalog.
    ///
    /// Mount and listing failures are recorded on the source and reported as
    /// [`ScanOutcome::Failed`]; only an unknown name is an error.
    pub async fn scan(&self, name: &str) -> Result<ScanOutcome> {
        if self.get(name).is_none() {
            return Err(Error::config(format!("unknown source '{name}'")));
        }
        let lock = self.scan_lock(name);
        let _guard = lock.lock().await;

        // removed while we waited for the lock
        let Some(source) = self.get(name) else {
            self.scan_locks.lock().remove(name);
            return Err(Error::config(format!("unknown source '{name}'")));
        };

        let result = match self.ensure_mounted(&source).await {
            Ok(()) => scan::scan_tree_blocking(source.name.clone(), source.scan_root()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(catalog) => Ok(self.apply_scan(&source, catalog)),
            Err(e) => {
                warn!("Scan of source '{}' failed: {}", name, e);
                Ok(self.record_failure(&source, e.to_string()))
            }
        }
    }

    async fn ensure_mounted(&self, source: &MediaSource) -> Result<()> {
        let Some(smb) = source.smb.as_ref() else {
            return Ok(());
        };

        if self.mount.is_mounted(&source.path) {
            debug!("Mount point {:?} is already active", source.path);
            return Ok(());
        }

        let password = smb
            .encrypted_password
            .as_deref()
            .map(|c| self.secrets.decrypt(c))
            .transpose()
            .map_err(|e| Error::mount(&source.name, e.to_string()))?;

        let request = MountRequest {
            source_name: source.name.clone(),
            unc: smb::unc_path(smb),
            target: source.path.clone(),
            options: smb::mount_options(smb, password.as_deref(), self.options.uid, self.options.gid),
        };

        info!("Mounting {} on {:?}", request.unc, request.target);
        match tokio::time::timeout(self.options.mount_timeout, self.mount.mount(&request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::mount(
                &source.name,
                format!("mount timed out after {:?}", self.options.mount_timeout),
            )),
        }
    }

    fn apply_scan(&self, scanned: &MediaSource, catalog: Catalog) -> ScanOutcome {
        let files = catalog.len();
        let applied = self.modify(|sources| {
            let Some(source) = sources
                .iter_mut()
                .find(|s| s.name == scanned.name && s.generation == scanned.generation)
            else {
                return Ok(false);
            };
            source.files = Arc::new(catalog);
            source.last_scan_at = Some(Utc::now());
            source.mount_status = MountStatus::Mounted;
            source.last_error = None;
            source.consecutive_failures = 0;
            Ok(true)
        });

        match applied {
            Ok(true) => {
                info!("Source '{}' scanned: {} media files", scanned.name, files);
                ScanOutcome::Updated { files }
            }
            _ => {
                debug!("Discarding stale scan of '{}'", scanned.name);
                ScanOutcome::Discarded
            }
        }
    }

    fn record_failure(&self, scanned: &MediaSource, error: String) -> ScanOutcome {
        let applied = self.modify(|sources| {
            let Some(source) = sources
                .iter_mut()
                .find(|s| s.name == scanned.name && s.generation == scanned.generation)
            else {
                return Ok(false);
            };
            source.mount_status = MountStatus::Error;
            source.last_error = Some(error.clone());
            source.consecutive_failures = source.consecutive_failures.saturating_add(1);
            Ok(true)
        });

        match applied {
            Ok(true) => ScanOutcome::Failed { error },
            _ => ScanOutcome::Discarded,
        }
    }

    /// Unmount every mounted share. Used on shutdown.
    pub async fn unmount_all(&self) {
        let snapshot = self.snapshot();
        for source in snapshot.iter().filter(|s| s.kind == SourceKind::Smb) {
            if source.mount_status != MountStatus::Mounted {
                continue;
            }
            if let Err(e) = self.mount.unmount(&source.name, &source.path).await {
                debug!("Unmount of '{}' failed: {}", source.name, e);
            }
        }
    }
}

fn taken_mount_points(sources: &[MediaSource]) -> HashSet<PathBuf> {
    sources
        .iter()
        .filter(|s| s.kind == SourceKind::Smb)
        .map(|s| s.path.clone())
        .collect()
}

/// Whether `target` is `base` or lies below it once `..` is resolved lexically.
pub fn is_within(base: &Path, target: &Path) -> bool {
    use std::path::Component;

    let mut depth: usize = 0;
    let relative = match target.strip_prefix(base) {
        Ok(rel) => rel,
        Err(_) => return false,
    };
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoMount;

    #[async_trait]
    impl MountHelper for NoMount {
        fn is_mounted(&self, _target: &Path) -> bool {
            false
        }
        async fn mount(&self, request: &MountRequest) -> Result<()> {
            Err(Error::mount(&request.source_name, "unreachable"))
        }
        async fn unmount(&self, _source_name: &str, _target: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct PlainSecrets;

    impl SecretStore for PlainSecrets {
        fn encrypt(&self, plaintext: &str) -> Result<String> {
            Ok(format!("x:{plaintext}"))
        }
        fn decrypt(&self, ciphertext: &str) -> Result<String> {
            Ok(ciphertext.trim_start_matches("x:").to_string())
        }
    }

    fn registry(dir: &Path) -> SourceRegistry {
        let local = SourceConfig {
            name: "local".into(),
            kind: SourceKind::Local,
            path: Some(dir.join("media")),
            smb: None,
            auto_scan: true,
            scan_interval_secs: None,
        };
        SourceRegistry::new(
            vec![local],
            Arc::new(NoMount),
            Arc::new(PlainSecrets),
            RegistryOptions {
                mount_root: dir.join("mounts"),
                mount_timeout: Duration::from_secs(5),
                default_scan_interval: Duration::from_secs(300),
                uid: 1000,
                gid: 1000,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_add_smb_from_location() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        let source = registry
            .add(NewSource {
                name: "Office NAS".into(),
                location: Some(r"\\nas\photos\lobby".into()),
                password: Some("pw".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(source.kind, SourceKind::Smb);
        assert_eq!(source.mount_status, MountStatus::Unmounted);
        assert_eq!(source.path, dir.path().join("mounts/Office-NAS"));
        let smb = source.smb.as_ref().unwrap();
        assert_eq!(smb.server, "nas");
        assert_eq!(smb.subpath, "lobby");
        assert_eq!(smb.encrypted_password.as_deref(), Some("x:pw"));
        assert_eq!(source.scan_root(), dir.path().join("mounts/Office-NAS/lobby"));
    }

    #[test]
    fn test_add_rejects_duplicates_and_missing_share() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());

        let err = registry
            .add(NewSource {
                name: "local".into(),
                path: Some(dir.path().to_path_buf()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = registry
            .add(NewSource {
                name: "nas".into(),
                kind: Some(SourceKind::Smb),
                server: Some("nas".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_protected_source() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        assert!(registry.get("local").unwrap().protected);
        assert!(registry.remove("local").await.is_err());
        let err = registry
            .update(
                "local",
                SourceUpdate {
                    server: Some("nas".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_update_rename_and_clear_password() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        registry
            .add(NewSource {
                name: "nas".into(),
                location: Some("smb://nas/photos".into()),
                username: Some("frame".into()),
                password: Some("pw".into()),
                ..Default::default()
            })
            .unwrap();

        let updated = registry
            .update(
                "nas",
                SourceUpdate {
                    new_name: Some("lobby".into()),
                    password: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.renamed_from.as_deref(), Some("nas"));
        assert_eq!(updated.source.name, "lobby");
        assert!(updated.source.smb.as_ref().unwrap().encrypted_password.is_none());
        assert!(registry.get("nas").is_none());
        assert!(registry.get("lobby").is_some());
    }

    #[tokio::test]
    async fn test_scan_local_marks_mounted() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        std::fs::create_dir_all(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/a.jpg"), b"x").unwrap();

        let outcome = registry.scan("local").await.unwrap();
        assert_eq!(outcome, ScanOutcome::Updated { files: 1 });
        let source = registry.get("local").unwrap();
        assert!(source.is_reachable());
        assert!(source.last_scan_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_catalog() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        std::fs::create_dir_all(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/a.jpg"), b"x").unwrap();
        registry.scan("local").await.unwrap();

        std::fs::remove_dir_all(dir.path().join("media")).unwrap();
        let outcome = registry.scan("local").await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Failed { .. }));

        let source = registry.get("local").unwrap();
        assert_eq!(source.mount_status, MountStatus::Error);
        assert_eq!(source.file_count(), 1);
        assert_eq!(source.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_scan_unknown_source() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        assert!(registry.scan("nope").await.is_err());
        assert!(registry.scan("nope").await.is_err());
        assert!(registry.scan_locks.lock().is_empty());
    }

    #[test]
    fn test_is_within() {
        let base = Path::new("/srv/media");
        assert!(is_within(base, Path::new("/srv/media/a/b.jpg")));
        assert!(is_within(base, Path::new("/srv/media/a/../b.jpg")));
        assert!(!is_within(base, Path::new("/srv/media/../etc/passwd")));
        assert!(!is_within(base, Path::new("/srv/other/a.jpg")));
    }

    #[test]
    fn test_to_config_omits_default_interval() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        let configs = registry.to_configs();
        assert_eq!(configs[0].scan_interval_secs, None);
        assert_eq!(configs[0].path, Some(dir.path().join("media")));
    }
}
