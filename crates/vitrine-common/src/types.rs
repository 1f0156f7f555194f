//! Core type definitions shared by the registry, playlist and player.
//!
//! All enums serialize in lowercase, matching the status snapshot consumed by
//! the dashboard.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of playable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Still image, held on screen for the configured duration.
    Image,
    /// Video, played until the backend exits.
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Display channel. Primary is the full screen or the left split side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Primary,
    Secondary,
}

impl ChannelId {
    /// Both channels, primary first.
    pub const ALL: [ChannelId; 2] = [ChannelId::Primary, ChannelId::Secondary];

    /// Split-screen side served by this channel.
    pub fn side(&self) -> &'static str {
        match self {
            Self::Primary => "left",
            Self::Secondary => "right",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Where a media source lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A directory on the local filesystem.
    Local,
    /// An SMB/CIFS share mounted through the privileged helper.
    Smb,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Smb => write!(f, "smb"),
        }
    }
}

/// Reachability of a source as last observed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    #[default]
    Unmounted,
    Mounted,
    Error,
}

impl fmt::Display for MountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmounted => write!(f, "unmounted"),
            Self::Mounted => write!(f, "mounted"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// State of one channel's playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not started yet.
    #[default]
    Idle,
    /// Resolving and launching the next item.
    Loading,
    /// A backend process is showing the current item.
    Playing,
    /// Applying the transition effect before the next item.
    Transitioning,
    /// The backend failed; waiting out the backoff before skipping ahead.
    Error,
    /// No playable content, or the info screen was forced.
    InfoScreen,
    /// Stopped by command or disabled.
    Stopped,
}

impl ChannelState {
    /// Whether a backend process may be attached in this state.
    pub fn has_process(&self) -> bool {
        matches!(self, Self::Playing | Self::Transitioning)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Playing => write!(f, "playing"),
            Self::Transitioning => write!(f, "transitioning"),
            Self::Error => write!(f, "error"),
            Self::InfoScreen => write!(f, "info_screen"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
