//! Validated partial updates to [`PlaybackConfig`].
//!
//! Every field of a [`PlaybackUpdate`] is checked before anything is applied.
//! One bad field rejects the whole update and the current config is left as is.

use serde::Deserialize;
use vitrine_common::{Error, Result};

use super::{ImageFit, MediaRef, PlaybackConfig, TransitionType};

pub const MIN_IMAGE_DURATION: u64 = 1;
pub const MIN_TRANSITION_DURATION: f64 = 0.2;
pub const MAX_TRANSITION_DURATION: f64 = 10.0;
pub const MIN_SPLIT_RATIO: u8 = 10;
pub const MAX_SPLIT_RATIO: u8 = 90;
pub const MIN_REFRESH_INTERVAL: u64 = 5;
pub const MIN_DISPLAY_WIDTH: u32 = 320;
pub const MIN_DISPLAY_HEIGHT: u32 = 240;

/// Partial playback settings, as submitted by the control API.
///
/// A split-screen source of `Some("")` clears the assignment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackUpdate {
    pub image_duration: Option<u64>,
    pub image_fit: Option<ImageFit>,
    pub image_rotation: Option<u16>,
    pub transition_type: Option<TransitionType>,
    pub transition_duration: Option<f64>,
    pub splitscreen_enabled: Option<bool>,
    pub splitscreen_left_source: Option<String>,
    pub splitscreen_left_path: Option<String>,
    pub splitscreen_right_source: Option<String>,
    pub splitscreen_right_path: Option<String>,
    pub splitscreen_ratio: Option<u8>,
    pub display_resolution: Option<String>,
    pub video_player: Option<String>,
    pub video_player_args: Option<Vec<String>>,
    pub image_viewer: Option<String>,
    pub image_viewer_args: Option<Vec<String>>,
    pub auto_start: Option<bool>,
    pub refresh_interval: Option<u64>,
    pub disabled_media: Option<Vec<MediaRef>>,
}

impl PlaybackUpdate {
    /// Whether the update carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.image_duration.is_none()
            && self.image_fit.is_none()
            && self.image_rotation.is_none()
            && self.transition_type.is_none()
            && self.transition_duration.is_none()
            && self.splitscreen_enabled.is_none()
            && self.splitscreen_left_source.is_none()
            && self.splitscreen_left_path.is_none()
            && self.splitscreen_right_source.is_none()
            && self.splitscreen_right_path.is_none()
            && self.splitscreen_ratio.is_none()
            && self.display_resolution.is_none()
            && self.video_player.is_none()
            && self.video_player_args.is_none()
            && self.image_viewer.is_none()
            && self.image_viewer_args.is_none()
            && self.auto_start.is_none()
            && self.refresh_interval.is_none()
            && self.disabled_media.is_none()
    }

    /// Validate every present field, then produce the merged config.
    ///
    /// Returns [`Error::Config`] listing all offending fields; `current` is
    /// never touched.
    pub fn apply_to(&self, current: &PlaybackConfig) -> Result<PlaybackConfig> {
        let mut problems = Vec::new();

        if let Some(v) = self.image_duration {
            collect(&mut problems, validate_image_duration(v));
        }
        if let Some(v) = self.image_rotation {
            collect(&mut problems, validate_rotation(v));
        }
        if let Some(v) = self.transition_duration {
            collect(&mut problems, validate_transition_duration(v));
        }
        if let Some(v) = self.splitscreen_ratio {
            collect(&mut problems, validate_split_ratio(v));
        }
        if let Some(ref v) = self.display_resolution {
            collect(&mut problems, parse_resolution(v).map(|_| ()));
        }
        if let Some(ref v) = self.video_player {
            collect(&mut problems, validate_program("video_player", v));
        }
        if let Some(ref v) = self.image_viewer {
            collect(&mut problems, validate_program("image_viewer", v));
        }
        if let Some(v) = self.refresh_interval {
            collect(&mut problems, validate_refresh_interval(v));
        }
        if let Some(ref v) = self.disabled_media {
            collect(&mut problems, validate_disabled_media(v));
        }

        if !problems.is_empty() {
            return Err(Error::config(problems.join("; ")));
        }

        let mut next = current.clone();
        if let Some(v) = self.image_duration {
            next.image_duration = v;
        }
        if let Some(v) = self.image_fit {
            next.image_fit = v;
        }
        if let Some(v) = self.image_rotation {
            next.image_rotation = v;
        }
        if let Some(v) = self.transition_type {
            next.transition_type = v;
        }
        if let Some(v) = self.transition_duration {
            next.transition_duration = v;
        }
        if let Some(v) = self.splitscreen_enabled {
            next.splitscreen_enabled = v;
        }
        if let Some(ref v) = self.splitscreen_left_source {
            next.splitscreen_left_source = non_empty(v);
        }
        if let Some(ref v) = self.splitscreen_left_path {
            next.splitscreen_left_path = v.trim().to_string();
        }
        if let Some(ref v) = self.splitscreen_right_source {
            next.splitscreen_right_source = non_empty(v);
        }
        if let Some(ref v) = self.splitscreen_right_path {
            next.splitscreen_right_path = v.trim().to_string();
        }
        if let Some(v) = self.splitscreen_ratio {
            next.splitscreen_ratio = v;
        }
        if let Some(ref v) = self.display_resolution {
            next.display_resolution = v.trim().to_lowercase();
        }
        if let Some(ref v) = self.video_player {
            next.video_player = v.trim().to_string();
        }
        if let Some(ref v) = self.video_player_args {
            next.video_player_args = v.clone();
        }
        if let Some(ref v) = self.image_viewer {
            next.image_viewer = v.trim().to_string();
        }
        if let Some(ref v) = self.image_viewer_args {
            next.image_viewer_args = v.clone();
        }
        if let Some(v) = self.auto_start {
            next.auto_start = v;
        }
        if let Some(v) = self.refresh_interval {
            next.refresh_interval = v;
        }
        if let Some(ref v) = self.disabled_media {
            let mut refs = v.clone();
            refs.sort();
            refs.dedup();
            next.disabled_media = refs;
        }

        Ok(next)
    }
}

fn collect(problems: &mut Vec<String>, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(Error::Config(msg)) => problems.push(msg),
        Err(other) => problems.push(other.to_string()),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Check a full playback config, e.g. one loaded from disk.
pub fn validate_playback(config: &PlaybackConfig) -> Result<()> {
    validate_image_duration(config.image_duration)?;
    validate_rotation(config.image_rotation)?;
    validate_transition_duration(config.transition_duration)?;
    validate_split_ratio(config.splitscreen_ratio)?;
    parse_resolution(&config.display_resolution)?;
    validate_program("video_player", &config.video_player)?;
    validate_program("image_viewer", &config.image_viewer)?;
    validate_refresh_interval(config.refresh_interval)?;
    validate_disabled_media(&config.disabled_media)?;
    Ok(())
}

fn validate_image_duration(v: u64) -> Result<()> {
    if v < MIN_IMAGE_DURATION {
        return Err(Error::config(format!(
            "image_duration must be at least {MIN_IMAGE_DURATION}s, got {v}"
        )));
    }
    Ok(())
}

fn validate_rotation(v: u16) -> Result<()> {
    if v >= 360 {
        return Err(Error::config(format!(
            "image_rotation must be between 0 and 359, got {v}"
        )));
    }
    Ok(())
}

fn validate_transition_duration(v: f64) -> Result<()> {
    if !v.is_finite() || !(MIN_TRANSITION_DURATION..=MAX_TRANSITION_DURATION).contains(&v) {
        return Err(Error::config(format!(
            "transition_duration must be between {MIN_TRANSITION_DURATION} and {MAX_TRANSITION_DURATION}s, got {v}"
        )));
    }
    Ok(())
}

fn validate_split_ratio(v: u8) -> Result<()> {
    if !(MIN_SPLIT_RATIO..=MAX_SPLIT_RATIO).contains(&v) {
        return Err(Error::config(format!(
            "splitscreen_ratio must be between {MIN_SPLIT_RATIO} and {MAX_SPLIT_RATIO}, got {v}"
        )));
    }
    Ok(())
}

fn validate_program(field: &str, v: &str) -> Result<()> {
    if v.trim().is_empty() {
        return Err(Error::config(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn validate_refresh_interval(v: u64) -> Result<()> {
    if v < MIN_REFRESH_INTERVAL {
        return Err(Error::config(format!(
            "refresh_interval must be at least {MIN_REFRESH_INTERVAL}s, got {v}"
        )));
    }
    Ok(())
}

fn validate_disabled_media(refs: &[MediaRef]) -> Result<()> {
    if let Some(bad) = refs
        .iter()
        .find(|r| r.source.trim().is_empty() || r.path.trim().is_empty())
    {
        return Err(Error::config(format!(
            "disabled_media entries need a source and a path, got {:?}",
            bad
        )));
    }
    Ok(())
}

/// Parse a `WxH` display resolution.
///
/// Values below 320x240 are raised to that minimum.
pub fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let invalid = || Error::config(format!("display_resolution must look like 1920x1080, got '{value}'"));
    let lowered = value.trim().to_lowercase();
    let (width, height) = lowered.split_once('x').ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    Ok((width.max(MIN_DISPLAY_WIDTH), height.max(MIN_DISPLAY_HEIGHT)))
}
