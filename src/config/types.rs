use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vitrine_common::{MediaType, SourceKind};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Root for local media, mount points and runtime state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where the last channel status is written (None = not persisted)
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Key material for credential encryption (default: /etc/machine-id)
    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Manual playlist; when non-empty it replaces the automatic one
    #[serde(default)]
    pub playlist: Vec<PlaylistItem>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/vitrine")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            state_file: None,
            secret_key_file: None,
            scanner: ScannerConfig::default(),
            player: PlayerConfig::default(),
            playback: PlaybackConfig::default(),
            sources: Vec::new(),
            playlist: Vec::new(),
        }
    }
}

impl Config {
    /// Local media root used by the protected default source.
    pub fn media_root(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    /// Directory under which SMB shares get their mount points.
    pub fn mount_root(&self) -> PathBuf {
        self.scanner
            .mount_root
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mounts"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// Privileged helper invoked as `<helper> mount|umount ...`
    #[serde(default = "default_mount_helper")]
    pub mount_helper: PathBuf,

    /// Run the helper through `sudo -n` (default: only when not root)
    #[serde(default)]
    pub use_sudo: Option<bool>,

    #[serde(default)]
    pub mount_root: Option<PathBuf>,

    #[serde(default = "default_mount_timeout")]
    pub mount_timeout_secs: u64,

    /// First retry delay after a failed mount or scan; doubles per failure
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,

    #[serde(default = "default_scan_interval")]
    pub default_scan_interval_secs: u64,
}

fn default_mount_helper() -> PathBuf {
    PathBuf::from("/usr/local/sbin/vitrine-mount")
}
fn default_mount_timeout() -> u64 {
    30
}
fn default_retry_base() -> u64 {
    1
}
fn default_retry_max() -> u64 {
    300
}
fn default_scan_interval() -> u64 {
    300
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            mount_helper: default_mount_helper(),
            use_sudo: None,
            mount_root: None,
            mount_timeout_secs: default_mount_timeout(),
            retry_base_secs: default_retry_base(),
            retry_max_secs: default_retry_max(),
            default_scan_interval_secs: default_scan_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Pause after a backend failure before skipping to the next item
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Time a backend gets to exit after SIGTERM before it is killed
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,

    /// ffmpeg used for transition clips (default: looked up on PATH)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default = "default_transition_timeout")]
    pub transition_timeout_secs: u64,
}

fn default_error_backoff() -> u64 {
    3
}
fn default_terminate_grace() -> u64 {
    2000
}
fn default_transition_timeout() -> u64 {
    60
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            error_backoff_secs: default_error_backoff(),
            terminate_grace_ms: default_terminate_grace(),
            ffmpeg_path: None,
            transition_timeout_secs: default_transition_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,

    #[serde(rename = "type", default = "default_source_kind")]
    pub kind: SourceKind,

    /// Local root, or the mount point of an SMB share (allocated when absent)
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub smb: Option<SmbConfig>,

    #[serde(default = "default_auto_scan")]
    pub auto_scan: bool,

    #[serde(default)]
    pub scan_interval_secs: Option<u64>,
}

fn default_source_kind() -> SourceKind {
    SourceKind::Local
}
fn default_auto_scan() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SmbConfig {
    pub server: String,

    pub share: String,

    /// Folder inside the share that acts as the source root
    #[serde(default)]
    pub subpath: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub domain: Option<String>,

    /// Password as produced by the secret store, never plaintext
    #[serde(default)]
    pub encrypted_password: Option<String>,

    #[serde(default = "default_smb_version")]
    pub version: String,

    #[serde(default)]
    pub extra_options: Vec<String>,
}

pub fn default_smb_version() -> String {
    "3.1.1".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFit {
    #[default]
    Contain,
    Stretch,
    Original,
}

/// Transition effect between two items, named after ffmpeg's xfade modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    #[default]
    None,
    Fade,
    FadeBlack,
    FadeWhite,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    #[serde(alias = "slide")]
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
}

impl TransitionType {
    /// The xfade `transition=` value, or `None` when no effect is applied.
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Fade => Some("fade"),
            Self::FadeBlack => Some("fadeblack"),
            Self::FadeWhite => Some("fadewhite"),
            Self::WipeLeft => Some("wipeleft"),
            Self::WipeRight => Some("wiperight"),
            Self::WipeUp => Some("wipeup"),
            Self::WipeDown => Some("wipedown"),
            Self::SlideLeft => Some("slideleft"),
            Self::SlideRight => Some("slideright"),
            Self::SlideUp => Some("slideup"),
            Self::SlideDown => Some("slidedown"),
        }
    }
}

/// A `(source, path)` pair naming one catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct MediaRef {
    pub source: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Seconds each image stays on screen
    #[serde(default = "default_image_duration")]
    pub image_duration: u64,

    #[serde(default)]
    pub image_fit: ImageFit,

    /// Clockwise rotation in degrees (0-359)
    #[serde(default)]
    pub image_rotation: u16,

    #[serde(default)]
    pub transition_type: TransitionType,

    /// Seconds (0.2-10.0)
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f64,

    #[serde(default)]
    pub splitscreen_enabled: bool,

    #[serde(default)]
    pub splitscreen_left_source: Option<String>,

    #[serde(default)]
    pub splitscreen_left_path: String,

    #[serde(default)]
    pub splitscreen_right_source: Option<String>,

    #[serde(default)]
    pub splitscreen_right_path: String,

    /// Percent of the display width given to the left side (10-90)
    #[serde(default = "default_splitscreen_ratio")]
    pub splitscreen_ratio: u8,

    /// `WxH`, used to compute split-screen geometry
    #[serde(default = "default_display_resolution")]
    pub display_resolution: String,

    #[serde(default = "default_player")]
    pub video_player: String,

    #[serde(default)]
    pub video_player_args: Vec<String>,

    #[serde(default = "default_player")]
    pub image_viewer: String,

    #[serde(default)]
    pub image_viewer_args: Vec<String>,

    /// Start playback when the daemon boots
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    /// Seconds between checks for new content while the info screen is up
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Files excluded from every playlist
    #[serde(default)]
    pub disabled_media: Vec<MediaRef>,
}

fn default_image_duration() -> u64 {
    10
}
fn default_transition_duration() -> f64 {
    1.0
}
fn default_splitscreen_ratio() -> u8 {
    50
}
fn default_display_resolution() -> String {
    "1920x1080".to_string()
}
fn default_player() -> String {
    "mpv".to_string()
}
fn default_auto_start() -> bool {
    true
}
fn default_refresh_interval() -> u64 {
    30
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            image_duration: default_image_duration(),
            image_fit: ImageFit::default(),
            image_rotation: 0,
            transition_type: TransitionType::default(),
            transition_duration: default_transition_duration(),
            splitscreen_enabled: false,
            splitscreen_left_source: None,
            splitscreen_left_path: String::new(),
            splitscreen_right_source: None,
            splitscreen_right_path: String::new(),
            splitscreen_ratio: default_splitscreen_ratio(),
            display_resolution: default_display_resolution(),
            video_player: default_player(),
            video_player_args: Vec::new(),
            image_viewer: default_player(),
            image_viewer_args: Vec::new(),
            auto_start: default_auto_start(),
            refresh_interval: default_refresh_interval(),
            disabled_media: Vec::new(),
        }
    }
}

/// One entry of the manual playlist.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlaylistItem {
    pub source: String,

    pub path: String,

    /// Detected from the extension when absent
    #[serde(rename = "type", default)]
    pub media_type: Option<MediaType>,

    /// Overrides `image_duration` for this item, in seconds
    #[serde(default)]
    pub duration: Option<u64>,
}
