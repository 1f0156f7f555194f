//! What a channel should play next, derived from the live registry and the
//! current playback settings.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use vitrine_common::ChannelId;

use crate::config::{parse_resolution, PlaybackConfig, PlaylistItem};
use crate::playlist::{ChannelAssignment, PlaylistBuilder, PlaylistEntry};
use crate::sources::{is_within, SourceRegistry};

const FALLBACK_RESOLUTION: (u32, u32) = (1920, 1080);

/// Settings the player reads on every plan. Replaced wholesale, never edited.
#[derive(Debug, Clone, Default)]
pub struct PlayerSettings {
    pub playback: PlaybackConfig,
    pub playlist: Vec<PlaylistItem>,
}

/// A window position in `WxH+X+Y` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Display resolution, falling back to 1080p when the setting is unusable.
pub fn display_size(playback: &PlaybackConfig) -> (u32, u32) {
    parse_resolution(&playback.display_resolution).unwrap_or_else(|e| {
        warn!("Invalid display resolution: {}", e);
        FALLBACK_RESOLUTION
    })
}

/// Window of one split-screen side; `None` outside split-screen mode.
pub fn split_geometry(playback: &PlaybackConfig, channel: ChannelId) -> Option<Geometry> {
    if !playback.splitscreen_enabled {
        return None;
    }
    let (width, height) = display_size(playback);
    let left = width * u32::from(playback.splitscreen_ratio.clamp(1, 99)) / 100;

    Some(match channel {
        ChannelId::Primary => Geometry {
            width: left,
            height,
            x: 0,
            y: 0,
        },
        ChannelId::Secondary => Geometry {
            width: width - left,
            height,
            x: left,
            y: 0,
        },
    })
}

/// Everything one pass through a channel's sequence needs.
#[derive(Debug, Clone)]
pub struct ChannelPlan {
    pub channel: ChannelId,
    pub enabled: bool,
    pub entries: Vec<PlaylistEntry>,
    pub playback: Arc<PlaybackConfig>,
    pub geometry: Option<Geometry>,
}

impl ChannelPlan {
    pub fn position_of(&self, entry: &PlaylistEntry) -> Option<usize> {
        self.entries.iter().position(|e| e.same_item(entry))
    }
}

/// Builds [`ChannelPlan`]s on demand. Shared by both channel workers.
pub struct PlanProvider {
    registry: Arc<SourceRegistry>,
    settings: RwLock<Arc<PlayerSettings>>,
}

impl PlanProvider {
    pub fn new(registry: Arc<SourceRegistry>, settings: PlayerSettings) -> Self {
        Self {
            registry,
            settings: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> Arc<PlayerSettings> {
        self.settings.read().clone()
    }

    /// Takes effect on the next plan; channels pick it up on reload.
    pub fn set_playback(&self, playback: PlaybackConfig) {
        let mut guard = self.settings.write();
        let mut next = PlayerSettings::clone(&guard);
        next.playback = playback;
        *guard = Arc::new(next);
    }

    pub fn set_playlist(&self, playlist: Vec<PlaylistItem>) {
        let mut guard = self.settings.write();
        let mut next = PlayerSettings::clone(&guard);
        next.playlist = playlist;
        *guard = Arc::new(next);
    }

    pub fn plan(&self, channel: ChannelId) -> ChannelPlan {
        let settings = self.settings();
        let snapshot = self.registry.snapshot();
        let assignment =
            ChannelAssignment::for_channel(channel, &settings.playback, &settings.playlist);
        let entries =
            PlaylistBuilder::new(&settings.playback.disabled_media).build(&assignment, &snapshot);

        debug!("Planned {} entries for {} channel", entries.len(), channel);
        ChannelPlan {
            channel,
            enabled: assignment.is_enabled(),
            entries,
            playback: Arc::new(settings.playback.clone()),
            geometry: split_geometry(&settings.playback, channel),
        }
    }

    /// Absolute path of an entry against the latest snapshot, or `None` when
    /// its source is gone, unreachable, or the path escapes the source root.
    pub fn resolve(&self, entry: &PlaylistEntry) -> Option<PathBuf> {
        let snapshot = self.registry.snapshot();
        let source = snapshot.reachable(&entry.source)?;
        let root = source.scan_root();
        let path = root.join(&entry.path);
        if !is_within(&root, &path) {
            warn!(
                "Refusing {:?}: outside of source '{}'",
                entry.path, entry.source
            );
            return None;
        }
        Some(path)
    }
}
