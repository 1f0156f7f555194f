//! Shared fakes for integration tests.
//!
//! [`FakeBackend`] stands in for mpv and records every launch with the
//! (possibly paused) tokio clock, [`FakeCompositor`] records transition
//! requests, and [`ScriptedMount`] plays back mount results. Nothing here
//! spawns a real process.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::time::Instant;

use vitrine::config::{PlaybackConfig, SourceConfig};
use vitrine::player::{
    Backend, BackendProcess, Compositor, LaunchPurpose, LaunchRequest, PlanProvider,
    PlayerController, PlayerSettings, PlayerTiming, ProcessExit, TransitionRequest,
};
use vitrine::secrets::SecretStore;
use vitrine::sources::{MountHelper, MountRequest, RegistryOptions, SourceRegistry};
use vitrine::state::StateStore;
use vitrine_common::{ChannelId, Error, MediaType, Result, SourceKind};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// One recorded backend launch.
#[derive(Debug, Clone)]
pub struct Launch {
    pub at: Instant,
    pub request: LaunchRequest,
}

impl Launch {
    /// File name of the launched media, e.g. `"b.jpg"`.
    pub fn file(&self) -> String {
        self.request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl Counters {
    fn started(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }

    fn ended(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend whose "processes" are timers.
///
/// Images run until terminated, videos exit after `video_runtime`, and
/// transition clips exit right away. Launches of files listed with
/// [`FakeBackend::fail_on`] are rejected.
pub struct FakeBackend {
    launches: Mutex<Vec<Launch>>,
    counters: Arc<Counters>,
    per_channel: [Arc<Counters>; 2],
    video_runtime: Duration,
    failing: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::with_video_runtime(Duration::from_secs(8))
    }

    pub fn with_video_runtime(video_runtime: Duration) -> Arc<Self> {
        Arc::new(Self {
            launches: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            per_channel: [Arc::new(Counters::default()), Arc::new(Counters::default())],
            video_runtime,
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_on(&self, file_name: &str) {
        self.failing.lock().insert(file_name.to_string());
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().clone()
    }

    /// Item launches (no transition clips) on one channel.
    pub fn items(&self, channel: ChannelId) -> Vec<Launch> {
        self.launches()
            .into_iter()
            .filter(|l| l.request.channel == channel && l.request.purpose == LaunchPurpose::Item)
            .collect()
    }

    pub fn item_files(&self, channel: ChannelId) -> Vec<String> {
        self.items(channel).iter().map(Launch::file).collect()
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of processes ever alive at once on `channel`.
    pub fn max_live(&self, channel: ChannelId) -> usize {
        self.channel_counters(channel).max_live.load(Ordering::SeqCst)
    }

    fn channel_counters(&self, channel: ChannelId) -> &Arc<Counters> {
        match channel {
            ChannelId::Primary => &self.per_channel[0],
            ChannelId::Secondary => &self.per_channel[1],
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn BackendProcess>> {
        let launch = Launch {
            at: Instant::now(),
            request: request.clone(),
        };
        let file = launch.file();
        self.launches.lock().push(launch);

        if self.failing.lock().contains(&file) {
            return Err(Error::playback(request.channel, format!("cannot open {file}")));
        }

        let exit_at = match (request.purpose, request.media_type) {
            (LaunchPurpose::Transition, _) => Some(Instant::now()),
            (LaunchPurpose::Item, MediaType::Video) => Some(Instant::now() + self.video_runtime),
            (LaunchPurpose::Item, MediaType::Image) => None,
        };

        let counters = vec![
            self.counters.clone(),
            self.channel_counters(request.channel).clone(),
        ];
        for c in &counters {
            c.started();
        }
        Ok(Box::new(FakeProcess {
            exit_at,
            counters,
            alive: true,
        }))
    }
}

struct FakeProcess {
    exit_at: Option<Instant>,
    counters: Vec<Arc<Counters>>,
    alive: bool,
}

impl FakeProcess {
    fn end(&mut self) {
        if std::mem::take(&mut self.alive) {
            for c in &self.counters {
                c.ended();
            }
        }
    }
}

#[async_trait]
impl BackendProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        match self.exit_at {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                self.end();
                Ok(ProcessExit::Success)
            }
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.end();
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.end();
    }
}

// ---------------------------------------------------------------------------
// Compositor
// ---------------------------------------------------------------------------

/// Records transition requests and hands back a fake clip path after
/// `render_time`.
#[derive(Default)]
pub struct FakeCompositor {
    requests: Mutex<Vec<TransitionRequest>>,
    render_time: Duration,
}

impl FakeCompositor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_render_time(render_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            render_time,
        })
    }

    pub fn requests(&self) -> Vec<TransitionRequest> {
        self.requests.lock().clone()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.requests().iter().map(|r| r.duration).collect()
    }
}

#[async_trait]
impl Compositor for FakeCompositor {
    async fn render(&self, request: &TransitionRequest) -> Result<PathBuf> {
        self.requests.lock().push(request.clone());
        if !self.render_time.is_zero() {
            tokio::time::sleep(self.render_time).await;
        }
        Ok(PathBuf::from(format!(
            "/tmp/transition-{}.mp4",
            request.channel.side()
        )))
    }
}

// ---------------------------------------------------------------------------
// Mounting and secrets
// ---------------------------------------------------------------------------

/// How [`ScriptedMount`] answers mount calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountBehavior {
    Succeed,
    /// Fail this many times, then succeed.
    FailTimes(usize),
    FailAlways,
    /// Never return.
    Hang,
}

pub struct ScriptedMount {
    behavior: MountBehavior,
    attempts: Mutex<Vec<(Instant, MountRequest)>>,
    unmounts: Mutex<Vec<String>>,
    mounted: Mutex<HashSet<PathBuf>>,
}

impl ScriptedMount {
    pub fn new(behavior: MountBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            attempts: Mutex::new(Vec::new()),
            unmounts: Mutex::new(Vec::new()),
            mounted: Mutex::new(HashSet::new()),
        })
    }

    pub fn attempts(&self) -> Vec<(Instant, MountRequest)> {
        self.attempts.lock().clone()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn unmounts(&self) -> Vec<String> {
        self.unmounts.lock().clone()
    }
}

#[async_trait]
impl MountHelper for ScriptedMount {
    fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().contains(target)
    }

    async fn mount(&self, request: &MountRequest) -> Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            attempts.push((Instant::now(), request.clone()));
            attempts.len()
        };

        let ok = match self.behavior {
            MountBehavior::Succeed => true,
            MountBehavior::FailTimes(n) => attempt > n,
            MountBehavior::FailAlways => false,
            MountBehavior::Hang => std::future::pending().await,
        };
        if !ok {
            return Err(Error::mount(
                &request.source_name,
                "mount error(13): Permission denied",
            ));
        }
        self.mounted.lock().insert(request.target.clone());
        Ok(())
    }

    async fn unmount(&self, source_name: &str, target: &Path) -> Result<()> {
        self.unmounts.lock().push(source_name.to_string());
        self.mounted.lock().remove(target);
        Ok(())
    }
}

/// Reversible "encryption" that keeps test assertions readable.
pub struct PlainSecrets;

impl SecretStore for PlainSecrets {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(format!("plain:{plaintext}"))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        ciphertext
            .strip_prefix("plain:")
            .map(str::to_string)
            .ok_or_else(|| Error::secret("not a plain: value"))
    }
}

// ---------------------------------------------------------------------------
// Media trees and registries
// ---------------------------------------------------------------------------

/// Create `files` (relative paths) under `root`, with placeholder content.
pub fn write_media(root: &Path, files: &[&str]) {
    for file in files {
        let path = root.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"not really media").unwrap();
    }
}

pub fn local_source(name: &str, path: &Path) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        kind: SourceKind::Local,
        path: Some(path.to_path_buf()),
        smb: None,
        auto_scan: true,
        scan_interval_secs: None,
    }
}

pub fn options(mount_root: &Path) -> RegistryOptions {
    RegistryOptions {
        mount_root: mount_root.to_path_buf(),
        mount_timeout: Duration::from_secs(2),
        default_scan_interval: Duration::from_secs(300),
        uid: 1000,
        gid: 1000,
    }
}

/// Registry over local directories. Each `(name, files)` pair becomes a
/// source rooted at `<tmp>/<name>`, in order.
pub struct LocalMedia {
    pub dir: TempDir,
    pub registry: Arc<SourceRegistry>,
}

impl LocalMedia {
    pub fn new(sources: &[(&str, &[&str])]) -> Self {
        let dir = TempDir::new().unwrap();
        let configs = sources
            .iter()
            .map(|(name, files)| {
                let root = dir.path().join(name);
                std::fs::create_dir_all(&root).unwrap();
                write_media(&root, files);
                local_source(name, &root)
            })
            .collect();

        let registry = SourceRegistry::new(
            configs,
            ScriptedMount::new(MountBehavior::Succeed),
            Arc::new(PlainSecrets),
            options(&dir.path().join("mounts")),
        )
        .unwrap();

        Self {
            dir,
            registry: Arc::new(registry),
        }
    }

    pub fn root(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Scan every source once. Call before pausing the clock; scans run on
    /// the blocking pool.
    pub async fn scan_all(&self) {
        for name in self.registry.snapshot().names() {
            self.registry.scan(&name).await.unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

pub struct TestPlayer {
    pub controller: PlayerController,
    pub backend: Arc<FakeBackend>,
    pub compositor: Arc<FakeCompositor>,
    pub state: Arc<StateStore>,
}

impl TestPlayer {
    pub fn spawn(registry: Arc<SourceRegistry>, playback: PlaybackConfig) -> Self {
        Self::spawn_with(registry, playback, FakeBackend::new(), true)
    }

    pub fn spawn_with(
        registry: Arc<SourceRegistry>,
        playback: PlaybackConfig,
        backend: Arc<FakeBackend>,
        with_compositor: bool,
    ) -> Self {
        Self::build(
            registry,
            playback,
            backend,
            FakeCompositor::new(),
            with_compositor,
        )
    }

    pub fn spawn_with_compositor(
        registry: Arc<SourceRegistry>,
        playback: PlaybackConfig,
        compositor: Arc<FakeCompositor>,
    ) -> Self {
        Self::build(registry, playback, FakeBackend::new(), compositor, true)
    }

    fn build(
        registry: Arc<SourceRegistry>,
        playback: PlaybackConfig,
        backend: Arc<FakeBackend>,
        compositor: Arc<FakeCompositor>,
        with_compositor: bool,
    ) -> Self {
        let state = StateStore::new(None);
        let plans = Arc::new(PlanProvider::new(
            registry,
            PlayerSettings {
                playback,
                playlist: Vec::new(),
            },
        ));

        let backend_dyn: Arc<dyn Backend> = backend.clone();
        let compositor_dyn: Option<Arc<dyn Compositor>> = if with_compositor {
            Some(compositor.clone() as Arc<dyn Compositor>)
        } else {
            None
        };

        let controller = PlayerController::spawn(
            plans,
            backend_dyn,
            compositor_dyn,
            state.clone(),
            PlayerTiming {
                error_backoff: Duration::from_secs(1),
                terminate_grace: Duration::from_millis(100),
            },
        );

        Self {
            controller,
            backend,
            compositor,
            state,
        }
    }
}

pub fn playback(image_duration: u64) -> PlaybackConfig {
    PlaybackConfig {
        image_duration,
        ..Default::default()
    }
}

/// Let the workers run, advancing the paused clock by `secs`.
pub async fn advance(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

/// Assert that `actual` is within a few milliseconds of `expected`.
pub fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(50),
        "expected about {:?}, got {:?}",
        expected,
        actual
    );
}
