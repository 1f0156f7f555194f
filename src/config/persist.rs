//! Configuration persistence using toml_edit to preserve formatting and comments.

use super::{PlaybackConfig, PlaylistItem, SourceConfig};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use toml_edit::DocumentMut;

/// Save the entire config to a TOML file
pub fn save_config(path: &Path, config: &super::Config) -> Result<()> {
    let new_content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config")?;

    std::fs::write(path, new_content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

/// Update just the sources section of the config file
pub fn update_sources(path: &Path, sources: &[SourceConfig]) -> Result<()> {
    update_section(
        path,
        "sources",
        &SourcesWrapper {
            sources: sources.to_vec(),
        },
    )
}

/// Update just the playback section of the config file
pub fn update_playback(path: &Path, playback: &PlaybackConfig) -> Result<()> {
    update_section(
        path,
        "playback",
        &PlaybackWrapper {
            playback: playback.clone(),
        },
    )
}

/// Update just the manual playlist of the config file
pub fn update_playlist(path: &Path, playlist: &[PlaylistItem]) -> Result<()> {
    update_section(
        path,
        "playlist",
        &PlaylistWrapper {
            playlist: playlist.to_vec(),
        },
    )
}

/// Replace one top-level key, leaving the rest of the document untouched.
///
/// A missing file is treated as an empty document.
fn update_section<T: Serialize>(path: &Path, key: &str, wrapper: &T) -> Result<()> {
    let content = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = content
        .parse()
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    let section_toml =
        toml::to_string(wrapper).with_context(|| format!("Failed to serialize {}", key))?;
    let section_doc: DocumentMut = section_toml
        .parse()
        .with_context(|| format!("Failed to parse serialized {}", key))?;

    if let Some(item) = section_doc.get(key) {
        doc[key] = item.clone();
    } else {
        doc.remove(key);
    }

    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

// Wrapper structs for serialization
#[derive(Serialize)]
struct SourcesWrapper {
    sources: Vec<SourceConfig>,
}

#[derive(Serialize)]
struct PlaybackWrapper {
    playback: PlaybackConfig,
}

#[derive(Serialize)]
struct PlaylistWrapper {
    playlist: Vec<PlaylistItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, TransitionType};
    use tempfile::TempDir;
    use vitrine_common::SourceKind;

    #[test]
    fn test_update_playback_keeps_comments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vitrine.toml");
        std::fs::write(
            &path,
            "# device settings\ndata_dir = \"/srv/vitrine\"\n\n[playback]\nimage_duration = 4\n",
        )
        .unwrap();

        let playback = PlaybackConfig {
            image_duration: 12,
            transition_type: TransitionType::WipeUp,
            ..Default::default()
        };
        update_playback(&path, &playback).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# device settings"));
        let config = load_config(&path).unwrap();
        assert_eq!(config.playback.image_duration, 12);
        assert_eq!(config.playback.transition_type, TransitionType::WipeUp);
    }

    #[test]
    fn test_update_sources_and_playlist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vitrine.toml");

        let sources = vec![SourceConfig {
            name: "gallery".into(),
            kind: SourceKind::Local,
            path: Some(dir.path().join("gallery")),
            smb: None,
            auto_scan: false,
            scan_interval_secs: Some(60),
        }];
        update_sources(&path, &sources).unwrap();
        update_playlist(
            &path,
            &[PlaylistItem {
                source: "gallery".into(),
                path: "a.jpg".into(),
                media_type: None,
                duration: None,
            }],
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].scan_interval_secs, Some(60));
        assert_eq!(config.playlist.len(), 1);

        update_playlist(&path, &[]).unwrap();
        let config = load_config(&path).unwrap();
        assert!(config.playlist.is_empty());
    }
}
