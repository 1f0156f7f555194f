//! The privileged mount helper seam.
//!
//! The registry only cares whether a mount or unmount succeeded. Everything
//! about how the share gets attached lives behind [`MountHelper`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use vitrine_common::{Error, Result};

use crate::tool::ToolCommand;

/// Exit code the helper returns when the target is already mounted (EBUSY).
pub const EXIT_BUSY: i32 = 16;

/// Everything needed to attach one share.
#[derive(Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source_name: String,
    /// `//server/share`
    pub unc: String,
    pub target: PathBuf,
    /// Comma-separated mount options, credentials included.
    pub options: String,
}

impl std::fmt::Debug for MountRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountRequest")
            .field("source_name", &self.source_name)
            .field("unc", &self.unc)
            .field("target", &self.target)
            .field("options", &redact_password(&self.options))
            .finish()
    }
}

/// Replace the value of a `password=` option for logging.
pub fn redact_password(options: &str) -> String {
    options
        .split(',')
        .map(|opt| {
            if opt.starts_with("password=") {
                "password=***"
            } else {
                opt
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Attaches and detaches network shares.
#[async_trait]
pub trait MountHelper: Send + Sync {
    /// Whether `target` already has something mounted on it.
    fn is_mounted(&self, target: &Path) -> bool;

    async fn mount(&self, request: &MountRequest) -> Result<()>;

    async fn unmount(&self, source_name: &str, target: &Path) -> Result<()>;
}

/// Runs the external helper script, through `sudo -n` when required.
#[derive(Debug, Clone)]
pub struct CommandMountHelper {
    helper: PathBuf,
    use_sudo: bool,
    timeout: Duration,
}

impl CommandMountHelper {
    pub fn new(helper: impl Into<PathBuf>, use_sudo: bool, timeout: Duration) -> Self {
        Self {
            helper: helper.into(),
            use_sudo,
            timeout,
        }
    }

    /// Use sudo unless the daemon already runs as root.
    pub fn needs_sudo() -> bool {
        #[cfg(unix)]
        {
            !nix::unistd::geteuid().is_root()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn command(&self) -> ToolCommand {
        let mut cmd = if self.use_sudo {
            let mut cmd = ToolCommand::new("sudo");
            cmd.arg("-n").arg(self.helper.to_string_lossy());
            cmd
        } else {
            ToolCommand::new(&self.helper)
        };
        cmd.timeout(self.timeout);
        cmd
    }
}

#[async_trait]
impl MountHelper for CommandMountHelper {
    fn is_mounted(&self, target: &Path) -> bool {
        super::smb::is_mount_active(target)
    }

    async fn mount(&self, request: &MountRequest) -> Result<()> {
        if let Err(e) = tokio::fs::create_dir_all(&request.target).await {
            tracing::debug!(
                "Could not create mount point {:?} ({}), leaving it to the helper",
                request.target,
                e
            );
        }

        let mut cmd = self.command();
        cmd.arg("mount")
            .arg(&request.unc)
            .arg(request.target.to_string_lossy())
            .arg(&request.options)
            .accept_exit_code(EXIT_BUSY);

        tracing::debug!(
            "Mount helper: {} mount {} {:?} {}",
            cmd.program_name(),
            request.unc,
            request.target,
            redact_password(&request.options)
        );

        cmd.execute()
            .await
            .map(|_| ())
            .map_err(|e| Error::mount(&request.source_name, e.to_string()))
    }

    async fn unmount(&self, source_name: &str, target: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("umount").arg(target.to_string_lossy());

        cmd.execute()
            .await
            .map(|_| ())
            .map_err(|e| Error::mount(source_name, e.to_string()))
    }
}
