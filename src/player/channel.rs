//! The per-channel playback loop.
//!
//! A worker owns at most one backend process. Every wait point selects on
//! the command queue, so stop, reload and info-screen requests take effect
//! without waiting for the current item to finish.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vitrine_common::{ChannelId, ChannelState, MediaType, Result};

use crate::config::{PlayerConfig, TransitionType};
use crate::playlist::PlaylistEntry;
use crate::state::{CurrentItem, StateStore};

use super::backend::{Backend, BackendProcess, LaunchPurpose, LaunchRequest, ProcessExit};
use super::plan::{display_size, ChannelPlan, PlanProvider};
use super::transition::{Compositor, TransitionRequest};

/// Extra time a transition clip may run past its nominal duration.
const TRANSITION_SLACK: Duration = Duration::from_secs(2);

/// Commands accepted by a channel worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    Start,
    Stop,
    /// Re-derive the sequence and restart it from the first entry.
    Reload,
    /// Re-derive the sequence, keeping the current item if it survived.
    Refresh,
    SetInfoScreen(bool),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerTiming {
    pub error_backoff: Duration,
    pub terminate_grace: Duration,
}

impl PlayerTiming {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            error_backoff: Duration::from_secs(config.error_backoff_secs),
            terminate_grace: Duration::from_millis(config.terminate_grace_ms),
        }
    }
}

impl Default for PlayerTiming {
    fn default() -> Self {
        Self::from_config(&PlayerConfig::default())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// What a command means for the wait it interrupted.
enum Directive {
    Continue,
    Interrupt,
    Exit,
}

enum Wake {
    Elapsed,
    Exited(Result<ProcessExit>),
    Command(Option<ChannelCommand>),
}

enum Hold {
    Elapsed,
    Exited(Result<ProcessExit>),
    Interrupted,
    Exit,
}

pub(crate) struct ChannelWorker {
    channel: ChannelId,
    plans: Arc<PlanProvider>,
    backend: Arc<dyn Backend>,
    compositor: Option<Arc<dyn Compositor>>,
    state: Arc<StateStore>,
    commands: mpsc::Receiver<ChannelCommand>,
    timing: PlayerTiming,

    plan: ChannelPlan,
    cursor: usize,
    current: Option<PlaylistEntry>,
    process: Option<Box<dyn BackendProcess>>,
    running: bool,
    info_forced: bool,
}

impl ChannelWorker {
    pub(crate) fn new(
        channel: ChannelId,
        plans: Arc<PlanProvider>,
        backend: Arc<dyn Backend>,
        compositor: Option<Arc<dyn Compositor>>,
        state: Arc<StateStore>,
        commands: mpsc::Receiver<ChannelCommand>,
        timing: PlayerTiming,
    ) -> Self {
        let plan = plans.plan(channel);
        Self {
            channel,
            plans,
            backend,
            compositor,
            state,
            commands,
            timing,
            plan,
            cursor: 0,
            current: None,
            process: None,
            running: false,
            info_forced: false,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("{} channel worker started", self.channel);

        loop {
            let flow = if self.running {
                self.step().await
            } else {
                self.idle().await
            };
            if flow == Flow::Exit {
                break;
            }
        }

        self.terminate().await;
        debug!("{} channel worker exited", self.channel);
    }

    // ----- Status -----

    fn publish(&self, state: ChannelState, error: Option<String>) {
        let current = self.current.as_ref().map(CurrentItem::from);
        let position = self.current.as_ref().map(|_| self.cursor);
        let playlist_len = self.plan.entries.len();
        let info_forced = self.info_forced;

        self.state.update(self.channel, move |status| {
            match state {
                ChannelState::Playing => {
                    status.started_at = Some(chrono::Utc::now());
                    status.last_error = None;
                }
                ChannelState::Transitioning => {}
                ChannelState::Error => status.last_error = error,
                _ => status.started_at = None,
            }
            status.state = state;
            status.current_item = current;
            status.position = position;
            status.playlist_len = playlist_len;
            status.info_forced = info_forced;
        });
    }

    // ----- Waiting -----

    async fn wait(&mut self, deadline: Option<Instant>, watch_process: bool) -> Wake {
        let Self {
            commands, process, ..
        } = self;

        let timer = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        let exit = async {
            match process.as_mut() {
                Some(process) if watch_process => process.wait().await,
                _ => std::future::pending().await,
            }
        };

        tokio::select! {
            command = commands.recv() => Wake::Command(command),
            _ = timer => Wake::Elapsed,
            result = exit => Wake::Exited(result),
        }
    }

    /// Wait for the deadline or the process, handling commands meanwhile.
    async fn hold(&mut self, deadline: Option<Instant>, watch_process: bool) -> Hold {
        loop {
            match self.wait(deadline, watch_process).await {
                Wake::Elapsed => return Hold::Elapsed,
                Wake::Exited(result) => return Hold::Exited(result),
                Wake::Command(None) => return Hold::Exit,
                Wake::Command(Some(command)) => match self.handle(command).await {
                    Directive::Continue => continue,
                    Directive::Interrupt => return Hold::Interrupted,
                    Directive::Exit => return Hold::Exit,
                },
            }
        }
    }

    /// Drive `future` to completion unless a command interrupts it.
    /// `future` must not borrow the worker.
    async fn interruptible<T>(&mut self, future: impl Future<Output = T>) -> std::result::Result<T, Flow> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                value = &mut future => return Ok(value),
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Err(Flow::Exit);
                    };
                    match self.handle(command).await {
                        Directive::Continue => continue,
                        Directive::Interrupt => return Err(Flow::Continue),
                        Directive::Exit => return Err(Flow::Exit),
                    }
                }
            }
        }
    }

    // ----- Commands -----

    async fn handle(&mut self, command: ChannelCommand) -> Directive {
        debug!("{} channel: {:?}", self.channel, command);
        match command {
            ChannelCommand::Start => {
                if self.running {
                    return Directive::Continue;
                }
                self.running = true;
                self.replan();
                self.cursor = 0;
                Directive::Interrupt
            }
            ChannelCommand::Stop => {
                self.running = false;
                self.terminate().await;
                self.current = None;
                self.publish(ChannelState::Stopped, None);
                Directive::Interrupt
            }
            ChannelCommand::Reload => {
                self.replan();
                self.cursor = 0;
                if !self.running {
                    return Directive::Continue;
                }
                self.terminate().await;
                self.current = None;
                Directive::Interrupt
            }
            ChannelCommand::Refresh => self.refresh().await,
            ChannelCommand::SetInfoScreen(enabled) => {
                if enabled == self.info_forced {
                    return Directive::Continue;
                }
                self.info_forced = enabled;
                if enabled {
                    self.terminate().await;
                    self.current = None;
                } else {
                    self.replan();
                    if self.cursor >= self.plan.entries.len() {
                        self.cursor = 0;
                    }
                }
                if self.running {
                    Directive::Interrupt
                } else {
                    Directive::Continue
                }
            }
            ChannelCommand::Shutdown => Directive::Exit,
        }
    }

    async fn refresh(&mut self) -> Directive {
        let old = std::mem::replace(&mut self.plan, self.plans.plan(self.channel));

        let Some(current) = self.current.clone() else {
            // Between items the cursor already names the next entry of `old`.
            self.cursor = first_surviving(&old, self.cursor, &self.plan);
            return if self.running && !self.info_forced {
                Directive::Interrupt
            } else {
                Directive::Continue
            };
        };

        if let Some(index) = self.plan.position_of(&current) {
            if self.plans.resolve(&current).is_some() {
                self.cursor = index;
                return Directive::Continue;
            }
        }

        info!(
            "{} channel: {}/{} is no longer available, skipping",
            self.channel, current.source, current.path
        );
        self.cursor = next_surviving(&old, self.cursor, &self.plan);
        self.terminate().await;
        self.current = None;
        Directive::Interrupt
    }

    fn replan(&mut self) {
        self.plan = self.plans.plan(self.channel);
    }

    /// Move to the next entry, re-deriving the sequence on wrap.
    fn advance(&mut self) {
        let next = self.cursor + 1;
        if next >= self.plan.entries.len() {
            self.replan();
            self.cursor = 0;
        } else {
            self.cursor = next;
        }
    }

    async fn terminate(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate(self.timing.terminate_grace).await;
        }
    }

    // ----- States -----

    async fn idle(&mut self) -> Flow {
        match self.hold(None, false).await {
            Hold::Exit => Flow::Exit,
            _ => Flow::Continue,
        }
    }

    async fn step(&mut self) -> Flow {
        if self.info_forced {
            return self.info_screen(true).await;
        }
        if !self.plan.enabled {
            self.terminate().await;
            self.current = None;
            self.publish(ChannelState::Stopped, None);
            return self.idle().await;
        }

        let Some((entry, path)) = self.next_playable() else {
            return self.info_screen(false).await;
        };

        self.current = Some(entry.clone());
        self.publish(ChannelState::Loading, None);

        self.terminate().await;
        let request = LaunchRequest::new(
            self.channel,
            LaunchPurpose::Item,
            entry.media_type,
            path.clone(),
            &self.plan.playback,
            self.plan.geometry,
        );
        match self.backend.launch(&request).await {
            Ok(process) => self.process = Some(process),
            Err(e) => return self.fail(e.to_string()).await,
        }
        self.publish(ChannelState::Playing, None);

        let deadline = match entry.media_type {
            MediaType::Image => {
                let secs = entry.duration.unwrap_or(Duration::from_secs(
                    self.plan.playback.image_duration,
                ));
                Some(Instant::now() + secs)
            }
            MediaType::Video => None,
        };

        match self.hold(deadline, true).await {
            Hold::Elapsed | Hold::Exited(Ok(ProcessExit::Success)) => {
                self.transition(&entry, path).await
            }
            Hold::Exited(Ok(ProcessExit::Failed(reason))) => self.fail(reason).await,
            Hold::Exited(Err(e)) => self.fail(e.to_string()).await,
            Hold::Interrupted => Flow::Continue,
            Hold::Exit => Flow::Exit,
        }
    }

    /// First entry from the cursor on that still resolves, skipping the rest.
    fn next_playable(&mut self) -> Option<(PlaylistEntry, PathBuf)> {
        let len = self.plan.entries.len();
        if self.cursor >= len {
            self.cursor = 0;
        }
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let entry = &self.plan.entries[index];
            match self.plans.resolve(entry) {
                Some(path) => {
                    self.cursor = index;
                    return Some((entry.clone(), path));
                }
                None => debug!(
                    "{} channel: skipping unavailable {}/{}",
                    self.channel, entry.source, entry.path
                ),
            }
        }
        None
    }

    async fn transition(&mut self, from: &PlaylistEntry, from_path: PathBuf) -> Flow {
        self.publish(ChannelState::Transitioning, None);
        // The outgoing item is done; a refresh from here on lands on the next one.
        self.current = None;
        self.advance();

        let playback = self.plan.playback.clone();
        let clip = match (self.compositor.clone(), self.plan.entries.get(self.cursor)) {
            (Some(compositor), Some(target))
                if from.media_type == MediaType::Image
                    && target.media_type == MediaType::Image
                    && playback.transition_type != TransitionType::None =>
            {
                self.plans.resolve(target).map(|to| {
                    let (width, height) = self
                        .plan
                        .geometry
                        .map(|g| (g.width, g.height))
                        .unwrap_or_else(|| display_size(&playback));
                    (
                        compositor,
                        TransitionRequest {
                            channel: self.channel,
                            from: from_path,
                            to,
                            transition: playback.transition_type,
                            duration: Duration::from_secs_f64(playback.transition_duration),
                            width,
                            height,
                        },
                    )
                })
            }
            _ => None,
        };

        if let Some((compositor, request)) = clip {
            let render = async move {
                let result = compositor.render(&request).await;
                (request, result)
            };
            let (request, rendered) = match self.interruptible(render).await {
                Ok(value) => value,
                Err(flow) => return flow,
            };
            match rendered {
                Ok(clip) => return self.play_clip(clip, request.duration).await,
                Err(e) => warn!("{} channel: transition skipped: {}", self.channel, e),
            }
        }

        self.terminate().await;
        Flow::Continue
    }

    async fn play_clip(&mut self, clip: PathBuf, duration: Duration) -> Flow {
        self.terminate().await;
        let request = LaunchRequest::new(
            self.channel,
            LaunchPurpose::Transition,
            MediaType::Video,
            clip,
            &self.plan.playback,
            self.plan.geometry,
        );
        match self.backend.launch(&request).await {
            Ok(process) => self.process = Some(process),
            Err(e) => {
                warn!("{} channel: transition clip failed: {}", self.channel, e);
                return Flow::Continue;
            }
        }

        let deadline = Instant::now() + duration + TRANSITION_SLACK;
        let flow = match self.hold(Some(deadline), true).await {
            Hold::Exit => Flow::Exit,
            _ => Flow::Continue,
        };
        self.terminate().await;
        flow
    }

    async fn fail(&mut self, reason: String) -> Flow {
        self.terminate().await;
        warn!("{} channel playback error: {}", self.channel, reason);
        self.publish(ChannelState::Error, Some(reason));

        let deadline = Instant::now() + self.timing.error_backoff;
        match self.hold(Some(deadline), false).await {
            Hold::Exit => Flow::Exit,
            Hold::Interrupted => Flow::Continue,
            _ => {
                self.advance();
                Flow::Continue
            }
        }
    }

    async fn info_screen(&mut self, forced: bool) -> Flow {
        self.terminate().await;
        self.current = None;
        self.publish(ChannelState::InfoScreen, None);

        if forced {
            return self.idle().await;
        }

        let interval = Duration::from_secs(self.plan.playback.refresh_interval.max(1));
        match self.hold(Some(Instant::now() + interval), false).await {
            Hold::Exit => Flow::Exit,
            Hold::Elapsed => {
                self.replan();
                self.cursor = 0;
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }
}

/// Index in `new` of the first entry at or after `start` in `old` that survived.
fn first_surviving(old: &ChannelPlan, start: usize, new: &ChannelPlan) -> usize {
    let len = old.entries.len();
    (0..len)
        .map(|offset| &old.entries[(start + offset) % len])
        .find_map(|entry| new.position_of(entry))
        .unwrap_or(0)
}

/// Index in `new` of the first entry after `cursor` in `old` that survived.
fn next_surviving(old: &ChannelPlan, cursor: usize, new: &ChannelPlan) -> usize {
    first_surviving(old, cursor + 1, new)
}
