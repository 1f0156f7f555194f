use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vitrine_common::{ChannelId, ChannelState, MediaType};

use crate::playlist::PlaylistEntry;

/// The item a channel is showing or about to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentItem {
    pub source: String,
    pub path: String,
    pub media_type: MediaType,
}

impl From<&PlaylistEntry> for CurrentItem {
    fn from(entry: &PlaylistEntry) -> Self {
        Self {
            source: entry.source.clone(),
            path: entry.path.clone(),
            media_type: entry.media_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: ChannelId,
    pub state: ChannelState,
    pub current_item: Option<CurrentItem>,
    /// When the current item started playing
    pub started_at: Option<DateTime<Utc>>,
    /// Cursor into the channel's sequence
    pub position: Option<usize>,
    pub playlist_len: usize,
    /// Info screen forced on by an operator
    pub info_forced: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelStatus {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            state: ChannelState::Idle,
            current_item: None,
            started_at: None,
            position: None,
            playlist_len: 0,
            info_forced: false,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub primary: ChannelStatus,
    pub secondary: ChannelStatus,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            primary: ChannelStatus::new(ChannelId::Primary),
            secondary: ChannelStatus::new(ChannelId::Secondary),
        }
    }
}

impl StatusSnapshot {
    pub fn channel(&self, channel: ChannelId) -> &ChannelStatus {
        match channel {
            ChannelId::Primary => &self.primary,
            ChannelId::Secondary => &self.secondary,
        }
    }

    pub(crate) fn channel_mut(&mut self, channel: ChannelId) -> &mut ChannelStatus {
        match channel {
            ChannelId::Primary => &mut self.primary,
            ChannelId::Secondary => &mut self.secondary,
        }
    }
}
