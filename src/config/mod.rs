pub mod persist;
mod store;
mod types;
pub mod update;

pub use store::*;
pub use types::*;
pub use update::{parse_resolution, validate_playback, PlaybackUpdate};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vitrine_common::SourceKind;

/// Name of the protected local source created when none is configured.
pub const DEFAULT_SOURCE_NAME: &str = "local";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    prepare_sources(&mut config);

    validate_config(&config)?;

    Ok(config)
}

/// The config file to use: `custom_path` if given, else the first default
/// location that exists.
pub fn locate_config(custom_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = custom_path {
        return Some(path.to_path_buf());
    }

    let default_paths = [
        "./vitrine.toml",
        "~/.config/vitrine/config.toml",
        "/etc/vitrine/config.toml",
    ];

    default_paths
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
        .find(|p| p.exists())
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = locate_config(custom_path) {
        return load_config(&path);
    }

    let mut config = Config::default();
    prepare_sources(&mut config);
    Ok(config)
}

/// Make sure a local source exists and fill in its default root.
fn prepare_sources(config: &mut Config) {
    let media_root = config.media_root();

    if !config.sources.iter().any(|s| s.kind == SourceKind::Local) {
        config.sources.insert(
            0,
            SourceConfig {
                name: DEFAULT_SOURCE_NAME.to_string(),
                kind: SourceKind::Local,
                path: Some(media_root.clone()),
                smb: None,
                auto_scan: true,
                scan_interval_secs: None,
            },
        );
    }

    for source in config.sources.iter_mut() {
        if source.kind == SourceKind::Local && source.path.is_none() {
            source.path = Some(media_root.clone());
        }
    }
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    let mut names = HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            anyhow::bail!("Source names cannot be empty");
        }
        if !names.insert(source.name.as_str()) {
            anyhow::bail!("Duplicate source name '{}'", source.name);
        }
        if source.kind == SourceKind::Smb {
            let Some(smb) = source.smb.as_ref() else {
                anyhow::bail!("SMB source '{}' has no [sources.smb] table", source.name);
            };
            if smb.server.trim().is_empty() || smb.share.trim().is_empty() {
                anyhow::bail!("SMB source '{}' needs both server and share", source.name);
            }
        }
        if source.scan_interval_secs == Some(0) {
            anyhow::bail!("Source '{}' has a scan interval of 0", source.name);
        }
    }

    validate_playback(&config.playback)
        .map_err(|e| anyhow::anyhow!("Invalid [playback] section: {}", e))?;

    for side in [
        &config.playback.splitscreen_left_source,
        &config.playback.splitscreen_right_source,
    ]
    .into_iter()
    .flatten()
    {
        if !names.contains(side.as_str()) {
            tracing::warn!("Split-screen source '{}' is not configured", side);
        }
    }

    for item in &config.playlist {
        if !names.contains(item.source.as_str()) {
            tracing::warn!(
                "Playlist item {:?} references unknown source '{}'",
                item.path,
                item.source
            );
        }
    }

    if config.scanner.retry_base_secs == 0 {
        anyhow::bail!("scanner.retry_base_secs cannot be 0");
    }
    if config.scanner.mount_timeout_secs == 0 {
        anyhow::bail!("scanner.mount_timeout_secs cannot be 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_has_local_source() {
        let mut config = Config::default();
        prepare_sources(&mut config);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].name, DEFAULT_SOURCE_NAME);
        assert_eq!(
            config.sources[0].path.as_deref(),
            Some(Path::new("/var/lib/vitrine/media"))
        );
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
data_dir = "/srv/vitrine"

[scanner]
retry_base_secs = 2

[playback]
image_duration = 7
transition_type = "fade"
splitscreen_enabled = true
splitscreen_left_source = "nas"

[[sources]]
name = "nas"
type = "smb"
auto_scan = false

[sources.smb]
server = "fileserver"
share = "photos"
subpath = "lobby"

[[playlist]]
source = "nas"
path = "welcome.png"
duration = 20
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.scanner.retry_base_secs, 2);
        assert_eq!(config.playback.image_duration, 7);
        assert_eq!(config.playback.transition_type, TransitionType::Fade);
        // local source is inserted in front
        assert_eq!(config.sources[0].name, "local");
        assert_eq!(config.sources[1].name, "nas");
        let smb = config.sources[1].smb.as_ref().unwrap();
        assert_eq!(smb.version, "3.1.1");
        assert_eq!(config.playlist[0].duration, Some(20));
    }

    #[test]
    fn test_reject_duplicate_names() {
        let file = write_config(
            r#"
[[sources]]
name = "media"

[[sources]]
name = "media"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_reject_smb_without_share() {
        let file = write_config(
            r#"
[[sources]]
name = "nas"
type = "smb"

[sources.smb]
server = "fileserver"
share = ""
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_reject_invalid_playback() {
        let file = write_config(
            r#"
[playback]
transition_duration = 30.0
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("playback"));
    }
}
