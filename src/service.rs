//! Service-oriented facade.
//!
//! [`Slideshow`] wires the source registry, the scan scheduler, the player
//! and the status store to the config store, and is the one entry point the
//! control/status API and the CLI talk to. Every accepted mutation is
//! written back through the [`ConfigStore`]; a failed write is logged and
//! does not undo the change.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};
use vitrine_common::{Error, Result};

use crate::config::{
    Config, ConfigSection, ConfigSnapshot, ConfigStore, MemoryConfigStore, PlaybackConfig,
    PlaybackUpdate, PlaylistItem,
};
use crate::player::{
    Backend, Compositor, FfmpegCompositor, PlanProvider, PlayerController, PlayerSettings,
    PlayerTiming, ProcessBackend,
};
use crate::secrets::{AesSecretStore, SecretStore};
use crate::sources::{
    CommandMountHelper, MediaSource, MountHelper, NewSource, RegistryOptions, RegistrySnapshot,
    RetryPolicy, ScanOutcome, ScanScheduler, SourceRegistry, SourceUpdate,
};
use crate::state::{ChannelStatus, StateStore, StatusSnapshot};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Slideshow`], with every external collaborator replaceable.
pub struct SlideshowBuilder {
    config: Config,
    store: Option<Arc<dyn ConfigStore>>,
    mount: Option<Arc<dyn MountHelper>>,
    secrets: Option<Arc<dyn SecretStore>>,
    backend: Option<Arc<dyn Backend>>,
    compositor: Option<Option<Arc<dyn Compositor>>>,
    timing: Option<PlayerTiming>,
}

impl SlideshowBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            mount: None,
            secrets: None,
            backend: None,
            compositor: None,
            timing: None,
        }
    }

    /// Where configuration is loaded from and saved to. Defaults to an
    /// in-memory store seeded from the config.
    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn mount_helper(mut self, mount: Arc<dyn MountHelper>) -> Self {
        self.mount = Some(mount);
        self
    }

    pub fn secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Override transition rendering; `None` disables transitions.
    pub fn compositor(mut self, compositor: Option<Arc<dyn Compositor>>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    pub fn timing(mut self, timing: PlayerTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Build the service and spawn its channel workers. Must run inside a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::MediaRootUnavailable`] when the local media root cannot be
    /// created or written; [`Error::Config`] for an unusable source list.
    pub fn build(self) -> Result<Slideshow> {
        let config = self.config;

        let store: Arc<dyn ConfigStore> = self.store.unwrap_or_else(|| {
            Arc::new(MemoryConfigStore::new(ConfigSnapshot::from(&config)))
        });
        let snapshot = store
            .load()
            .map_err(|e| Error::config(format!("failed to load configuration: {e:#}")))?;

        let secrets: Arc<dyn SecretStore> = match self.secrets {
            Some(secrets) => secrets,
            None => Arc::new(AesSecretStore::open(config.secret_key_file.as_deref())),
        };
        let mount: Arc<dyn MountHelper> = self.mount.unwrap_or_else(|| {
            Arc::new(CommandMountHelper::new(
                &config.scanner.mount_helper,
                config
                    .scanner
                    .use_sudo
                    .unwrap_or_else(CommandMountHelper::needs_sudo),
                Duration::from_secs(config.scanner.mount_timeout_secs),
            ))
        });

        let registry = Arc::new(SourceRegistry::new(
            snapshot.sources,
            mount,
            secrets,
            RegistryOptions::from_config(&config),
        )?);

        let media_root = registry
            .snapshot()
            .iter()
            .find(|s| s.protected)
            .map(|s| s.path.clone())
            .unwrap_or_else(|| config.media_root());
        check_media_root(&media_root)?;

        let scheduler = ScanScheduler::new(
            registry.clone(),
            RetryPolicy::from_config(&config.scanner),
        );
        let state = StateStore::new(config.state_file.clone());
        let plans = Arc::new(PlanProvider::new(
            registry.clone(),
            PlayerSettings {
                playback: snapshot.playback,
                playlist: snapshot.playlist,
            },
        ));

        let backend: Arc<dyn Backend> = self
            .backend
            .unwrap_or_else(|| Arc::new(ProcessBackend));
        let compositor = self.compositor.unwrap_or_else(|| {
            FfmpegCompositor::locate(
                config.player.ffmpeg_path.as_deref(),
                Duration::from_secs(config.player.transition_timeout_secs),
            )
            .map(|c| Arc::new(c) as Arc<dyn Compositor>)
        });
        if compositor.is_none() {
            info!("Transitions disabled: ffmpeg not available");
        }

        let controller = PlayerController::spawn(
            plans,
            backend,
            compositor,
            state.clone(),
            self.timing
                .unwrap_or_else(|| PlayerTiming::from_config(&config.player)),
        );

        Ok(Slideshow {
            store,
            registry,
            scheduler,
            controller,
            state,
            media_root,
            mutations: tokio::sync::Mutex::new(()),
        })
    }
}

/// The local media root must exist and accept writes.
pub fn check_media_root(path: &Path) -> Result<()> {
    let unavailable = |reason: String| Error::MediaRootUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    std::fs::create_dir_all(path).map_err(|e| unavailable(e.to_string()))?;
    tempfile::NamedTempFile::new_in(path)
        .map_err(|e| unavailable(format!("not writable: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Slideshow
// ---------------------------------------------------------------------------

pub struct Slideshow {
    store: Arc<dyn ConfigStore>,
    registry: Arc<SourceRegistry>,
    scheduler: ScanScheduler,
    controller: PlayerController,
    state: Arc<StateStore>,
    media_root: PathBuf,
    /// Serializes mutations so saves reach the store in order.
    mutations: tokio::sync::Mutex<()>,
}

impl Slideshow {
    pub fn builder(config: Config) -> SlideshowBuilder {
        SlideshowBuilder::new(config)
    }

    /// Scan every source once, start the periodic scanners and start
    /// playback when both `autostart` and the `auto_start` setting allow it.
    pub async fn startup(&self, autostart: bool) -> Result<()> {
        self.scheduler.initial_scan().await;
        self.scheduler.sync();

        if autostart && self.playback().auto_start {
            self.controller.start().await?;
        }
        Ok(())
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> &PlayerController {
        &self.controller
    }

    // ----- Playback control -----

    pub async fn start(&self) -> Result<()> {
        self.controller.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.controller.stop().await
    }

    pub async fn reload(&self) -> Result<()> {
        self.controller.reload().await
    }

    pub async fn set_info_screen(&self, enabled: bool) -> Result<()> {
        self.controller.set_info_screen(enabled).await
    }

    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelStatus> {
        self.state.subscribe()
    }

    // ----- Settings -----

    pub fn playback(&self) -> PlaybackConfig {
        self.controller.plans().settings().playback.clone()
    }

    pub fn playlist(&self) -> Vec<PlaylistItem> {
        self.controller.plans().settings().playlist.clone()
    }

    /// Validate and apply a partial playback update, then reload both
    /// channels so it takes effect. Nothing changes when validation fails.
    pub async fn update_playback(&self, update: PlaybackUpdate) -> Result<PlaybackConfig> {
        let _guard = self.mutations.lock().await;

        let playback = update.apply_to(&self.playback())?;
        self.controller.plans().set_playback(playback.clone());
        self.persist(ConfigSection::Playback(playback.clone()));
        info!("Playback settings updated");

        self.controller.reload().await?;
        Ok(playback)
    }

    /// Replace the manual playlist; an empty list returns to automatic mode.
    pub async fn set_playlist(&self, playlist: Vec<PlaylistItem>) -> Result<()> {
        let _guard = self.mutations.lock().await;

        for item in &playlist {
            if item.source.trim().is_empty() || item.path.trim().is_empty() {
                return Err(Error::config("playlist items need a source and a path"));
            }
            if item.duration == Some(0) {
                return Err(Error::config(format!(
                    "playlist item '{}' has a duration of 0",
                    item.path
                )));
            }
        }

        self.controller.plans().set_playlist(playlist.clone());
        self.persist(ConfigSection::Playlist(playlist));
        self.controller.reload().await
    }

    // ----- Sources -----

    pub fn sources(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot()
    }

    pub fn source(&self, name: &str) -> Option<MediaSource> {
        self.registry.get(name)
    }

    pub async fn add_source(&self, new: NewSource) -> Result<MediaSource> {
        let _guard = self.mutations.lock().await;

        let source = self.registry.add(new)?;
        self.persist_sources();
        self.scheduler.sync();
        Ok(source)
    }

    pub async fn update_source(&self, name: &str, update: SourceUpdate) -> Result<MediaSource> {
        let _guard = self.mutations.lock().await;

        let updated = self.registry.update(name, update).await?;
        self.persist_sources();

        if let Some(ref old) = updated.renamed_from {
            self.rename_references(old, &updated.source.name);
        }

        self.scheduler.restart(&updated.source.name);
        self.controller.refresh().await?;
        Ok(updated.source)
    }

    pub async fn remove_source(&self, name: &str) -> Result<MediaSource> {
        let _guard = self.mutations.lock().await;

        let removed = self.registry.remove(name).await?;
        self.persist_sources();
        self.drop_references(name);

        self.scheduler.sync();
        self.controller.refresh().await?;
        Ok(removed)
    }

    pub async fn set_auto_scan(&self, name: &str, enabled: bool) -> Result<MediaSource> {
        let _guard = self.mutations.lock().await;

        let source = self.registry.set_auto_scan(name, enabled)?;
        self.persist_sources();
        self.scheduler.sync();
        Ok(source)
    }

    /// Scan one source now. The new catalog reaches the screen the next time
    /// a channel re-derives its sequence.
    pub async fn scan_source(&self, name: &str) -> Result<ScanOutcome> {
        self.registry.scan(name).await
    }

    // ----- Persistence -----

    fn persist(&self, section: ConfigSection) {
        let name = section.name();
        if let Err(e) = self.store.save(section) {
            warn!("Failed to save [{}] configuration: {:#}", name, e);
        }
    }

    fn persist_sources(&self) {
        self.persist(ConfigSection::Sources(self.registry.to_configs()));
    }

    fn rename_references(&self, old: &str, new: &str) {
        let plans = self.controller.plans();
        let settings = plans.settings();

        let mut playback = settings.playback.clone();
        if rename_in_playback(&mut playback, old, new) {
            plans.set_playback(playback.clone());
            self.persist(ConfigSection::Playback(playback));
        }

        let mut playlist = settings.playlist.clone();
        if rename_in_playlist(&mut playlist, old, new) {
            plans.set_playlist(playlist.clone());
            self.persist(ConfigSection::Playlist(playlist));
        }
    }

    fn drop_references(&self, name: &str) {
        let plans = self.controller.plans();
        let settings = plans.settings();

        let mut playback = settings.playback.clone();
        if drop_from_playback(&mut playback, name) {
            plans.set_playback(playback.clone());
            self.persist(ConfigSection::Playback(playback));
        }

        let mut playlist = settings.playlist.clone();
        let before = playlist.len();
        playlist.retain(|item| item.source != name);
        if playlist.len() != before {
            plans.set_playlist(playlist.clone());
            self.persist(ConfigSection::Playlist(playlist));
        }
    }

    /// Stop playback and scanning, then unmount every share.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.controller.shutdown().await;
        self.scheduler.shutdown().await;
        self.registry.unmount_all().await;
    }
}

fn rename_in_playback(playback: &mut PlaybackConfig, old: &str, new: &str) -> bool {
    let mut changed = false;
    for side in [
        &mut playback.splitscreen_left_source,
        &mut playback.splitscreen_right_source,
    ] {
        if side.as_deref() == Some(old) {
            *side = Some(new.to_string());
            changed = true;
        }
    }
    for media in playback.disabled_media.iter_mut() {
        if media.source == old {
            media.source = new.to_string();
            changed = true;
        }
    }
    if changed {
        playback.disabled_media.sort();
        playback.disabled_media.dedup();
    }
    changed
}

fn rename_in_playlist(playlist: &mut [PlaylistItem], old: &str, new: &str) -> bool {
    let mut changed = false;
    for item in playlist.iter_mut().filter(|item| item.source == old) {
        item.source = new.to_string();
        changed = true;
    }
    changed
}

fn drop_from_playback(playback: &mut PlaybackConfig, name: &str) -> bool {
    let mut changed = false;
    for side in [
        &mut playback.splitscreen_left_source,
        &mut playback.splitscreen_right_source,
    ] {
        if side.as_deref() == Some(name) {
            *side = None;
            changed = true;
        }
    }
    let before = playback.disabled_media.len();
    playback.disabled_media.retain(|m| m.source != name);
    changed || playback.disabled_media.len() != before
}
