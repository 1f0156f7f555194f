//! Transition clips between two images.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info};
use vitrine_common::{ChannelId, Error, Result};

use crate::config::TransitionType;
use crate::tool::{find_tool, ToolCommand};

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub channel: ChannelId,
    pub from: PathBuf,
    pub to: PathBuf,
    pub transition: TransitionType,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
}

/// Renders the effect into a short clip that the video player shows.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn render(&self, request: &TransitionRequest) -> Result<PathBuf>;
}

/// Renders clips with ffmpeg's `xfade` filter.
#[derive(Debug)]
pub struct FfmpegCompositor {
    ffmpeg: PathBuf,
    timeout: Duration,
    workdir: TempDir,
}

impl FfmpegCompositor {
    /// `None` when ffmpeg cannot be found; transitions are then skipped.
    pub fn locate(configured: Option<&Path>, timeout: Duration) -> Option<Self> {
        let ffmpeg = find_tool("ffmpeg", configured)?;
        let workdir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                debug!("No scratch directory for transitions: {}", e);
                return None;
            }
        };
        info!("Transitions rendered with {:?}", ffmpeg);
        Some(Self {
            ffmpeg,
            timeout,
            workdir,
        })
    }
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    async fn render(&self, request: &TransitionRequest) -> Result<PathBuf> {
        let name = request
            .transition
            .xfade_name()
            .ok_or_else(|| Error::tool("ffmpeg", "no transition configured"))?;
        let output = self
            .workdir
            .path()
            .join(format!("transition-{}.mp4", request.channel.side()));

        ToolCommand::new(&self.ffmpeg)
            .args(xfade_args(request, name, &output))
            .timeout(self.timeout)
            .execute()
            .await?;

        debug!("Rendered {} transition to {:?}", name, output);
        Ok(output)
    }
}

/// ffmpeg arguments for a clip fading from one still image into another.
pub fn xfade_args(request: &TransitionRequest, name: &str, output: &Path) -> Vec<String> {
    let seconds = format!("{:.3}", request.duration.as_secs_f64());
    let (w, h) = (request.width, request.height);
    let fit = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,format=yuv420p"
    );
    let filter = format!(
        "[0:v]{fit}[a];[1:v]{fit}[b];[a][b]xfade=transition={name}:duration={seconds}:offset=0,format=yuv420p"
    );

    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    for input in [&request.from, &request.to] {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-t".to_string(),
            seconds.clone(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ]);
    }
    args.extend([
        "-filter_complex".to_string(),
        filter,
        "-an".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}
