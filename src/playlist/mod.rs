//! Playlist construction.
//!
//! A playlist is derived from a registry snapshot every time it is needed and
//! is never stored. Building twice from the same snapshot gives the same
//! sequence: sources in addition order, then paths in lexical order.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use vitrine_common::{paths::detect_media_type, ChannelId, MediaType};

use crate::config::{MediaRef, PlaybackConfig, PlaylistItem};
use crate::sources::{smb::normalize_side_folder, RegistrySnapshot};

/// One playable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistEntry {
    pub source: String,
    /// Relative to the source's scan root.
    pub path: String,
    pub media_type: MediaType,
    /// Per-item display time overriding `image_duration`.
    pub duration: Option<Duration>,
}

impl PlaylistEntry {
    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            source: self.source.clone(),
            path: self.path.clone(),
        }
    }

    pub fn same_item(&self, other: &PlaylistEntry) -> bool {
        self.source == other.source && self.path == other.path
    }
}

/// Which content a channel shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAssignment {
    /// The channel is off (secondary channel outside split-screen mode).
    Disabled,
    /// The operator's playlist, in its own order.
    Manual(Vec<PlaylistItem>),
    /// Every source with `auto_scan` enabled.
    AutoScan,
    /// One split-screen side: a single source, optionally one folder of it.
    Side {
        source: Option<String>,
        folder: String,
    },
}

impl ChannelAssignment {
    /// Work out what `channel` should show for the given settings.
    pub fn for_channel(
        channel: ChannelId,
        playback: &PlaybackConfig,
        manual: &[PlaylistItem],
    ) -> Self {
        if playback.splitscreen_enabled {
            let (source, folder) = match channel {
                ChannelId::Primary => (
                    &playback.splitscreen_left_source,
                    &playback.splitscreen_left_path,
                ),
                ChannelId::Secondary => (
                    &playback.splitscreen_right_source,
                    &playback.splitscreen_right_path,
                ),
            };
            return Self::Side {
                source: source.clone(),
                folder: folder.clone(),
            };
        }

        match channel {
            ChannelId::Secondary => Self::Disabled,
            ChannelId::Primary if !manual.is_empty() => Self::Manual(manual.to_vec()),
            ChannelId::Primary => Self::AutoScan,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Turns an assignment plus a registry snapshot into an ordered sequence.
#[derive(Debug, Clone, Default)]
pub struct PlaylistBuilder {
    disabled: HashSet<(String, String)>,
}

impl PlaylistBuilder {
    pub fn new(disabled_media: &[MediaRef]) -> Self {
        Self {
            disabled: disabled_media
                .iter()
                .map(|r| (r.source.clone(), r.path.clone()))
                .collect(),
        }
    }

    fn is_disabled(&self, source: &str, path: &str) -> bool {
        self.disabled
            .contains(&(source.to_string(), path.to_string()))
    }

    /// Build the sequence. Unreachable or unknown sources contribute nothing;
    /// an empty result means "show the info screen".
    pub fn build(
        &self,
        assignment: &ChannelAssignment,
        snapshot: &RegistrySnapshot,
    ) -> Vec<PlaylistEntry> {
        let entries = match assignment {
            ChannelAssignment::Disabled => Vec::new(),
            ChannelAssignment::Manual(items) => self.build_manual(items, snapshot),
            ChannelAssignment::AutoScan => self.build_auto(snapshot),
            ChannelAssignment::Side { source, folder } => match source {
                Some(source) => self.build_side(source, folder, snapshot),
                None => Vec::new(),
            },
        };
        debug!("Built playlist with {} entries", entries.len());
        entries
    }

    fn build_manual(&self, items: &[PlaylistItem], snapshot: &RegistrySnapshot) -> Vec<PlaylistEntry> {
        items
            .iter()
            .filter(|item| snapshot.reachable(&item.source).is_some())
            .filter(|item| !self.is_disabled(&item.source, &item.path))
            .filter_map(|item| {
                let media_type = item
                    .media_type
                    .or_else(|| detect_media_type(Path::new(&item.path)))?;
                Some(PlaylistEntry {
                    source: item.source.clone(),
                    path: item.path.clone(),
                    media_type,
                    duration: item.duration.map(Duration::from_secs),
                })
            })
            .collect()
    }

    fn build_auto(&self, snapshot: &RegistrySnapshot) -> Vec<PlaylistEntry> {
        snapshot
            .iter()
            .filter(|source| source.auto_scan && source.is_reachable())
            .flat_map(|source| {
                source
                    .files
                    .iter()
                    .filter(|(path, _)| !self.is_disabled(&source.name, path))
                    .map(|(path, media_type)| PlaylistEntry {
                        source: source.name.clone(),
                        path: path.clone(),
                        media_type: *media_type,
                        duration: None,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn build_side(&self, name: &str, folder: &str, snapshot: &RegistrySnapshot) -> Vec<PlaylistEntry> {
        let Some(source) = snapshot.reachable(name) else {
            return Vec::new();
        };
        let folder = normalize_side_folder(folder, source.smb.as_ref());
        let prefix = format!("{folder}/");

        source
            .files
            .iter()
            .filter(|(path, _)| folder.is_empty() || *path == &folder || path.starts_with(&prefix))
            .filter(|(path, _)| !self.is_disabled(&source.name, path))
            .map(|(path, media_type)| PlaylistEntry {
                source: source.name.clone(),
                path: path.clone(),
                media_type: *media_type,
                duration: None,
            })
            .collect()
    }
}
