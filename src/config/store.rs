//! The config store boundary: where sources, playback settings and the
//! manual playlist are loaded from and written back to.

use std::path::PathBuf;

use anyhow::Result;
use parking_lot::RwLock;

use super::{persist, Config, PlaybackConfig, PlaylistItem, SourceConfig};

/// Everything the core reads from the store at startup and on reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub sources: Vec<SourceConfig>,
    pub playback: PlaybackConfig,
    pub playlist: Vec<PlaylistItem>,
}

impl From<&Config> for ConfigSnapshot {
    fn from(config: &Config) -> Self {
        Self {
            sources: config.sources.clone(),
            playback: config.playback.clone(),
            playlist: config.playlist.clone(),
        }
    }
}

/// One section of a partial save.
#[derive(Debug, Clone)]
pub enum ConfigSection {
    Sources(Vec<SourceConfig>),
    Playback(PlaybackConfig),
    Playlist(Vec<PlaylistItem>),
}

impl ConfigSection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sources(_) => "sources",
            Self::Playback(_) => "playback",
            Self::Playlist(_) => "playlist",
        }
    }
}

/// Persistent configuration backend.
///
/// Credentials pass through as already-encrypted strings.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<ConfigSnapshot>;

    fn save(&self, section: ConfigSection) -> Result<()>;
}

/// Stores configuration in a TOML file, rewriting one section per save.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<ConfigSnapshot> {
        let config = super::load_config(&self.path)?;
        Ok(ConfigSnapshot::from(&config))
    }

    fn save(&self, section: ConfigSection) -> Result<()> {
        match section {
            ConfigSection::Sources(sources) => persist::update_sources(&self.path, &sources),
            ConfigSection::Playback(playback) => persist::update_playback(&self.path, &playback),
            ConfigSection::Playlist(playlist) => persist::update_playlist(&self.path, &playlist),
        }
    }
}

/// Keeps configuration in memory only; used when no config file was given.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    snapshot: RwLock<ConfigSnapshot>,
}

impl MemoryConfigStore {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<ConfigSnapshot> {
        Ok(self.snapshot.read().clone())
    }

    fn save(&self, section: ConfigSection) -> Result<()> {
        let mut snapshot = self.snapshot.write();
        match section {
            ConfigSection::Sources(sources) => snapshot.sources = sources,
            ConfigSection::Playback(playback) => snapshot.playback = playback,
            ConfigSection::Playlist(playlist) => snapshot.playlist = playlist,
        }
        Ok(())
    }
}
