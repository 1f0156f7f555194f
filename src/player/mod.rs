//! Playback control.
//!
//! [`PlayerController`] runs one [`channel`] worker per display channel and
//! is the single path through which commands reach them. Each worker drains
//! its own queue, so commands for one channel are applied in order and never
//! overlap, and the two channels never wait on each other.

pub mod backend;
pub mod channel;
pub mod plan;
pub mod transition;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vitrine_common::{ChannelId, Error, Result};

use crate::state::StateStore;

pub use backend::{Backend, BackendProcess, LaunchPurpose, LaunchRequest, ProcessBackend, ProcessExit};
pub use channel::{ChannelCommand, PlayerTiming};
pub use plan::{ChannelPlan, Geometry, PlanProvider, PlayerSettings};
pub use transition::{Compositor, FfmpegCompositor, TransitionRequest};

const COMMAND_CAPACITY: usize = 32;

pub struct PlayerController {
    primary: mpsc::Sender<ChannelCommand>,
    secondary: mpsc::Sender<ChannelCommand>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    plans: Arc<PlanProvider>,
    state: Arc<StateStore>,
}

impl PlayerController {
    /// Spawn both channel workers. They start idle until [`start`](Self::start).
    pub fn spawn(
        plans: Arc<PlanProvider>,
        backend: Arc<dyn Backend>,
        compositor: Option<Arc<dyn Compositor>>,
        state: Arc<StateStore>,
        timing: PlayerTiming,
    ) -> Self {
        let mut workers = Vec::with_capacity(ChannelId::ALL.len());
        let mut spawn_channel = |channel: ChannelId| {
            let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
            let worker = channel::ChannelWorker::new(
                channel,
                plans.clone(),
                backend.clone(),
                compositor.clone(),
                state.clone(),
                rx,
                timing,
            );
            workers.push(tokio::spawn(worker.run()));
            tx
        };

        let primary = spawn_channel(ChannelId::Primary);
        let secondary = spawn_channel(ChannelId::Secondary);
        info!("Player channels started");

        Self {
            primary,
            secondary,
            workers: Mutex::new(workers),
            plans,
            state,
        }
    }

    pub fn plans(&self) -> &Arc<PlanProvider> {
        &self.plans
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    fn sender(&self, channel: ChannelId) -> &mpsc::Sender<ChannelCommand> {
        match channel {
            ChannelId::Primary => &self.primary,
            ChannelId::Secondary => &self.secondary,
        }
    }

    /// Queue a command for one channel.
    pub async fn send(&self, channel: ChannelId, command: ChannelCommand) -> Result<()> {
        self.sender(channel)
            .send(command)
            .await
            .map_err(|_| Error::playback(channel, "channel worker has stopped"))
    }

    async fn broadcast(&self, command: ChannelCommand) -> Result<()> {
        debug!("Sending {:?} to all channels", command);
        for channel in ChannelId::ALL {
            self.send(channel, command).await?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.broadcast(ChannelCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.broadcast(ChannelCommand::Stop).await
    }

    /// Restart both sequences from the latest registry and settings.
    pub async fn reload(&self) -> Result<()> {
        self.broadcast(ChannelCommand::Reload).await
    }

    /// Pick up registry changes without restarting what is on screen.
    pub async fn refresh(&self) -> Result<()> {
        self.broadcast(ChannelCommand::Refresh).await
    }

    pub async fn set_info_screen(&self, enabled: bool) -> Result<()> {
        self.broadcast(ChannelCommand::SetInfoScreen(enabled)).await
    }

    /// Stop both workers, terminating their processes, and wait for them.
    pub async fn shutdown(&self) {
        for channel in ChannelId::ALL {
            let _ = self.sender(channel).send(ChannelCommand::Shutdown).await;
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!("Player channels stopped");
    }
}
