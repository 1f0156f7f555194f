//! Playback backends: the external processes that put pixels on screen.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use vitrine_common::{ChannelId, Error, MediaType, Result};

use crate::config::{ImageFit, PlaybackConfig};

use super::plan::Geometry;

/// Why a process is being launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPurpose {
    Item,
    Transition,
}

/// A fully resolved backend invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub channel: ChannelId,
    pub purpose: LaunchPurpose,
    pub media_type: MediaType,
    pub path: PathBuf,
    pub program: String,
    /// Arguments including the file as the last one.
    pub args: Vec<String>,
}

impl LaunchRequest {
    /// Build the invocation for `path` from the playback settings.
    pub fn new(
        channel: ChannelId,
        purpose: LaunchPurpose,
        media_type: MediaType,
        path: PathBuf,
        playback: &PlaybackConfig,
        geometry: Option<Geometry>,
    ) -> Self {
        let program = match media_type {
            MediaType::Image => playback.image_viewer.clone(),
            MediaType::Video => playback.video_player.clone(),
        };
        let args = player_args(&program, media_type, &path, playback, geometry);
        Self {
            channel,
            purpose,
            media_type,
            path,
            program,
            args,
        }
    }
}

/// How a backend process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Failed(String),
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn BackendProcess>>;
}

#[async_trait]
pub trait BackendProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. Must be cancel safe.
    async fn wait(&mut self) -> Result<ProcessExit>;

    /// Ask the process to exit, killing it after `grace`.
    async fn terminate(&mut self, grace: Duration);
}

fn is_mpv(program: &str) -> bool {
    Path::new(program)
        .file_name()
        .map(|name| name == "mpv")
        .unwrap_or(false)
}

/// Command line for `program` playing `path`.
///
/// mpv gets window, fit and rotation flags; other programs only receive the
/// configured extra arguments.
pub fn player_args(
    program: &str,
    media_type: MediaType,
    path: &Path,
    playback: &PlaybackConfig,
    geometry: Option<Geometry>,
) -> Vec<String> {
    let mut args = Vec::new();

    if is_mpv(program) {
        args.extend(
            ["--no-terminal", "--quiet", "--force-window=yes"]
                .iter()
                .map(|s| s.to_string()),
        );
        match geometry {
            Some(geometry) => args.push(format!("--geometry={geometry}")),
            None => args.push("--fullscreen".to_string()),
        }
        match media_type {
            MediaType::Image => {
                args.push("--image-display-duration=inf".to_string());
                args.push(format!("--video-rotate={}", playback.image_rotation));
                match playback.image_fit {
                    ImageFit::Contain => {}
                    ImageFit::Stretch => args.push("--keepaspect=no".to_string()),
                    ImageFit::Original => args.push("--video-unscaled=yes".to_string()),
                }
            }
            MediaType::Video => args.push("--keep-open=no".to_string()),
        }
    }

    let extra = match media_type {
        MediaType::Image => &playback.image_viewer_args,
        MediaType::Video => &playback.video_player_args,
    };
    args.extend(extra.iter().cloned());
    args.push(path.to_string_lossy().to_string());
    args
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Default)]
pub struct ProcessBackend;

#[async_trait]
impl Backend for ProcessBackend {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn BackendProcess>> {
        debug!("Launching {} {:?}", request.program, request.args);

        let child = Command::new(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::playback(
                    request.channel,
                    format!("failed to start {}: {}", request.program, e),
                )
            })?;

        info!(
            "Started {} (pid {:?}) on {} channel for {:?}",
            request.program,
            child.id(),
            request.channel,
            request.path
        );

        Ok(Box::new(ChildProcess {
            channel: request.channel,
            program: request.program.clone(),
            child,
        }))
    }
}

struct ChildProcess {
    channel: ChannelId,
    program: String,
    child: Child,
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

#[async_trait]
impl BackendProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        let status = self.child.wait().await.map_err(|e| {
            Error::playback(self.channel, format!("waiting for {}: {}", self.program, e))
        })?;

        if status.success() {
            Ok(ProcessExit::Success)
        } else {
            Ok(ProcessExit::Failed(format!(
                "{} exited with {}",
                self.program, status
            )))
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        let signalled = self.child.id().map(send_sigterm).unwrap_or(false);
        if signalled {
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                debug!("{} exited after SIGTERM", self.program);
                return;
            }
            warn!(
                "{} did not exit within {:?}, killing it",
                self.program, grace
            );
        }

        if let Err(e) = self.child.kill().await {
            debug!("Kill of {} failed: {}", self.program, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(media_type: MediaType, playback: &PlaybackConfig, geometry: Option<Geometry>) -> Vec<String> {
        player_args("mpv", media_type, Path::new("/m/a.jpg"), playback, geometry)
    }

    #[test]
    fn test_mpv_image_args() {
        let playback = PlaybackConfig {
            image_rotation: 90,
            image_fit: ImageFit::Stretch,
            image_viewer_args: vec!["--mute=yes".into()],
            ..Default::default()
        };
        assert_eq!(
            args(MediaType::Image, &playback, None),
            vec![
                "--no-terminal",
                "--quiet",
                "--force-window=yes",
                "--fullscreen",
                "--image-display-duration=inf",
                "--video-rotate=90",
                "--keepaspect=no",
                "--mute=yes",
                "/m/a.jpg",
            ]
        );
    }

    #[test]
    fn test_mpv_video_args_with_geometry() {
        let playback = PlaybackConfig::default();
        let geometry = Geometry {
            width: 960,
            height: 1080,
            x: 960,
            y: 0,
        };
        let args = args(MediaType::Video, &playback, Some(geometry));
        assert!(args.contains(&"--geometry=960x1080+960+0".to_string()));
        assert!(args.contains(&"--keep-open=no".to_string()));
        assert!(!args.contains(&"--fullscreen".to_string()));
    }

    #[test]
    fn test_original_fit() {
        let playback = PlaybackConfig {
            image_fit: ImageFit::Original,
            ..Default::default()
        };
        assert!(args(MediaType::Image, &playback, None).contains(&"--video-unscaled=yes".to_string()));
    }

    #[test]
    fn test_other_program_gets_only_extra_args() {
        let playback = PlaybackConfig {
            image_viewer: "/usr/bin/feh".into(),
            image_viewer_args: vec!["-F".into()],
            ..Default::default()
        };
        let request = LaunchRequest::new(
            ChannelId::Primary,
            LaunchPurpose::Item,
            MediaType::Image,
            PathBuf::from("/m/a.jpg"),
            &playback,
            None,
        );
        assert_eq!(request.program, "/usr/bin/feh");
        assert_eq!(request.args, vec!["-F", "/m/a.jpg"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_playback_error() {
        let playback = PlaybackConfig {
            video_player: "definitely-not-a-player-xyz".into(),
            ..Default::default()
        };
        let request = LaunchRequest::new(
            ChannelId::Secondary,
            LaunchPurpose::Item,
            MediaType::Video,
            PathBuf::from("/m/a.mp4"),
            &playback,
            None,
        );
        let result = ProcessBackend.launch(&request).await;
        assert!(matches!(result, Err(Error::Playback { .. })));
    }
}
