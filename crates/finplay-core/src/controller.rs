//! Player lifecycle controller
//!
//! Owns the player, the session state, the reporter and the heartbeat of
//! the active playback. Player events, heartbeat ticks and stop commands all
//! arrive on one channel and go through [`PlaybackController::dispatch`], so
//! the player and session state are only ever touched from the task that
//! owns the controller.
//!
//! ```text
//! Idle -> Resolving -> Loaded -> Playing <-> Paused -> Ended | Stopped -> Disposed
//!             \-> Failed
//! ```

use crate::{
    api::{MediaServerApi, PlaybackProgressInfo, PlaybackStartInfo, PlaybackStopInfo, ProgressEvent},
    config::{ServerContext, SessionConfig},
    heartbeat::Heartbeat,
    negotiator::{DeliveryPlan, PlaybackNegotiator, PlaybackRequest},
    probe::BitrateProber,
    reporter::SessionReporter,
    resolver::{MediaSourceFactory, MediaSourceHandle, MediaSourceResolver},
    types::*,
    Error, Result,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, trace, warn};

/// Events a player reports back to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Playing,
    Paused,
    Seeked,
    MediaEnded,
    Failed(String),
}

/// Everything the controller reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerInput {
    Player { generation: u64, event: PlayerEvent },
    HeartbeatTick { generation: u64 },
    Stop,
}

/// Handed to a player so it can report events for one session
#[derive(Debug, Clone)]
pub struct PlayerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ControllerInput>,
}

impl PlayerEventSink {
    /// Returns false once the controller is gone
    pub fn emit(&self, event: PlayerEvent) -> bool {
        self.tx
            .send(ControllerInput::Player {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Platform media player driven by the controller
pub trait MediaPlayer: Send {
    fn set_event_sink(&mut self, sink: Option<PlayerEventSink>);

    /// Take ownership of a source and prepare it from `start`
    fn attach_source(&mut self, source: MediaSourceHandle, start: Ticks) -> Result<()>;

    fn detach_source(&mut self) -> Option<MediaSourceHandle>;

    fn play(&mut self);

    fn pause(&mut self);

    fn position(&self) -> Ticks;

    fn can_seek(&self) -> bool;

    fn dispose(self: Box<Self>);
}

/// Creates one player per session
pub trait PlayerFactory: Send + Sync {
    fn create(&self) -> Box<dyn MediaPlayer>;
}

/// Clonable way to stop the controller from elsewhere
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerInput>,
}

impl ControllerHandle {
    pub fn stop(&self) -> bool {
        self.tx.send(ControllerInput::Stop).is_ok()
    }
}

/// Mutable state of the active playback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSessionState {
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub media_source_id: MediaSourceId,
    pub play_session_id: PlaySessionId,
    pub live_stream_id: Option<String>,
    pub play_method: DeliveryMode,
    pub position: Ticks,
    pub is_paused: bool,
    pub can_seek: bool,
    pub streams: StreamSelection,
}

impl PlaybackSessionState {
    fn from_plan(plan: &DeliveryPlan, position: Ticks, can_seek: bool) -> Self {
        Self {
            session_id: SessionId::new(),
            item_id: plan.item_id.clone(),
            media_source_id: plan.media_source_id(),
            play_session_id: plan.play_session_id.clone(),
            live_stream_id: plan.live_stream_id().map(str::to_string),
            play_method: plan.mode,
            position,
            is_paused: false,
            can_seek,
            streams: plan.streams,
        }
    }

    pub fn start_info(&self) -> PlaybackStartInfo {
        PlaybackStartInfo {
            item_id: self.item_id.clone(),
            media_source_id: self.media_source_id.clone(),
            play_session_id: self.play_session_id.clone(),
            live_stream_id: self.live_stream_id.clone(),
            audio_stream_index: self.streams.audio,
            subtitle_stream_index: self.streams.subtitle,
            position_ticks: self.position,
            is_paused: self.is_paused,
            can_seek: self.can_seek,
            play_method: self.play_method,
        }
    }

    pub fn progress_info(&self, event: ProgressEvent) -> PlaybackProgressInfo {
        PlaybackProgressInfo {
            item_id: self.item_id.clone(),
            media_source_id: self.media_source_id.clone(),
            play_session_id: self.play_session_id.clone(),
            live_stream_id: self.live_stream_id.clone(),
            audio_stream_index: self.streams.audio,
            subtitle_stream_index: self.streams.subtitle,
            position_ticks: self.position,
            is_paused: self.is_paused,
            can_seek: self.can_seek,
            play_method: self.play_method,
            event_name: event,
        }
    }

    pub fn stop_info(&self, failed: bool) -> PlaybackStopInfo {
        PlaybackStopInfo {
            item_id: self.item_id.clone(),
            media_source_id: self.media_source_id.clone(),
            play_session_id: self.play_session_id.clone(),
            live_stream_id: self.live_stream_id.clone(),
            position_ticks: self.position,
            failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    Ended,
    Failed,
}

struct ActiveSession {
    generation: u64,
    state: PlaybackSessionState,
    player: Box<dyn MediaPlayer>,
    reporter: SessionReporter,
    heartbeat: Heartbeat,
}

impl ActiveSession {
    fn snapshot(&mut self, paused: bool) {
        self.state.position = self.player.position();
        self.state.can_seek = self.player.can_seek();
        self.state.is_paused = paused;
    }
}

/// Drives one playback at a time from request to disposal
pub struct PlaybackController {
    api: Arc<dyn MediaServerApi>,
    negotiator: PlaybackNegotiator,
    resolver: MediaSourceResolver,
    prober: Option<BitrateProber>,
    players: Arc<dyn PlayerFactory>,
    heartbeat_interval: Duration,
    state: ControllerState,
    state_tx: watch::Sender<ControllerState>,
    generation: u64,
    session: Option<ActiveSession>,
    retired: Option<SessionReporter>,
    inputs_tx: mpsc::UnboundedSender<ControllerInput>,
    inputs_rx: mpsc::UnboundedReceiver<ControllerInput>,
}

impl PlaybackController {
    /// Fails when `config` does not validate
    pub fn new(
        api: Arc<dyn MediaServerApi>,
        context: ServerContext,
        config: &SessionConfig,
        sources: Arc<dyn MediaSourceFactory>,
        players: Arc<dyn PlayerFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ControllerState::Idle);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        let prober = config
            .probe_enabled
            .then(|| BitrateProber::new(api.clone(), config));

        Ok(Self {
            negotiator: PlaybackNegotiator::new(api.clone(), context),
            resolver: MediaSourceResolver::new(sources),
            api,
            prober,
            players,
            heartbeat_interval: config.heartbeat_interval(),
            state: ControllerState::Idle,
            state_tx,
            generation: 0,
            session: None,
            retired: None,
            inputs_tx,
            inputs_rx,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// Active session, if any
    pub fn session(&self) -> Option<&PlaybackSessionState> {
        self.session.as_ref().map(|s| &s.state)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.inputs_tx.clone(),
        }
    }

    fn transition(&mut self, to: ControllerState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.state = to;
        self.state_tx.send_replace(to);
        debug!(from = %from, to = %to, "State transition");
        Ok(())
    }

    /// Return to `Idle` when an earlier `play` future was dropped midway
    ///
    /// A sessionless `Resolving`, `Loaded` or `Stopped` can only be left
    /// behind by a cancelled call; nothing else owns it any more.
    fn recover_abandoned(&mut self) {
        use ControllerState::*;
        if self.session.is_some() || matches!(self.state, Idle | Disposed | Failed) {
            return;
        }
        warn!(state = %self.state, "Previous play request was abandoned; resetting to idle");
        self.state = Idle;
        self.state_tx.send_replace(Idle);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Start playing an item, stopping whatever is playing first
    ///
    /// Negotiation failures leave the controller in `Failed` without ever
    /// touching a player or sending a report.
    #[instrument(skip(self, request), fields(item_id = %request.item_id))]
    pub async fn play(&mut self, mut request: PlaybackRequest) -> Result<PlaybackSessionState> {
        if self.session.is_some() {
            info!("New playback requested; stopping the active session first");
            self.teardown(SessionEnd::Stopped).await?;
        }
        self.recover_abandoned();
        if matches!(self.state, ControllerState::Disposed | ControllerState::Failed) {
            self.transition(ControllerState::Idle)?;
        }
        self.transition(ControllerState::Resolving)?;

        if request.bitrate_ceiling.is_none() {
            if let Some(prober) = &self.prober {
                let ceiling = prober.probe_ceiling().await;
                request = request.with_bitrate_ceiling(ceiling);
            }
        }

        let plan = match self.negotiator.negotiate(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Negotiation failed");
                self.transition(ControllerState::Failed)?;
                return Err(e);
            }
        };

        let source = self.resolver.resolve(&plan).await;

        self.generation += 1;
        let generation = self.generation;
        let start = request.start_position.unwrap_or(Ticks::ZERO);

        let mut player = self.players.create();
        player.set_event_sink(Some(PlayerEventSink {
            generation,
            tx: self.inputs_tx.clone(),
        }));
        if let Err(e) = player.attach_source(source, start) {
            error!(error = %e, "Player rejected the media source");
            player.set_event_sink(None);
            if let Some(source) = player.detach_source() {
                source.dispose();
            }
            player.dispose();
            self.transition(ControllerState::Failed)?;
            return Err(e);
        }
        self.transition(ControllerState::Loaded)?;

        let state = PlaybackSessionState::from_plan(&plan, start, player.can_seek());
        let mut reporter = SessionReporter::new(self.api.clone(), plan.play_session_id.clone());
        reporter.started(state.start_info());

        let tx = self.inputs_tx.clone();
        let heartbeat = Heartbeat::start(self.heartbeat_interval, move || {
            tx.send(ControllerInput::HeartbeatTick { generation }).is_ok()
        });

        player.play();
        heartbeat.set_playing(true);
        self.session = Some(ActiveSession {
            generation,
            state: state.clone(),
            player,
            reporter,
            heartbeat,
        });
        self.transition(ControllerState::Playing)?;

        info!(
            session_id = %state.session_id,
            play_session_id = %state.play_session_id,
            mode = %state.play_method,
            "Playback started"
        );
        Ok(state)
    }

    /// Single entry point for every controller input
    pub async fn dispatch(&mut self, input: ControllerInput) -> Result<()> {
        match input {
            ControllerInput::Stop => {
                if self.session.is_none() {
                    debug!("Stop with no active session");
                    return Ok(());
                }
                self.teardown(SessionEnd::Stopped).await
            }
            ControllerInput::HeartbeatTick { generation } => {
                if !self.is_current(generation) {
                    trace!(generation, "Heartbeat tick from a finished session");
                    return Ok(());
                }
                if self.state == ControllerState::Playing {
                    self.report_progress(ProgressEvent::TimeUpdate);
                }
                Ok(())
            }
            ControllerInput::Player { generation, event } => {
                if !self.is_current(generation) {
                    debug!(generation, ?event, "Ignoring event from a finished session");
                    return Ok(());
                }
                self.on_player_event(event).await
            }
        }
    }

    async fn on_player_event(&mut self, event: PlayerEvent) -> Result<()> {
        use ControllerState::*;

        match (event, self.state) {
            (PlayerEvent::Playing, Paused) => {
                self.transition(Playing)?;
                self.set_heartbeat_playing(true);
                self.report_progress(ProgressEvent::Unpause);
            }
            (PlayerEvent::Playing, Loaded) => {
                self.transition(Playing)?;
                self.set_heartbeat_playing(true);
            }
            (PlayerEvent::Paused, Playing) => {
                self.transition(Paused)?;
                self.set_heartbeat_playing(false);
                self.report_progress(ProgressEvent::Pause);
            }
            (PlayerEvent::Seeked, state) if state.is_active() => {
                self.report_progress(ProgressEvent::TimeUpdate);
            }
            (PlayerEvent::MediaEnded, state @ (Playing | Paused)) => {
                self.transition(Ended)?;
                self.send_progress(ProgressEvent::TimeUpdate, state == Paused);
                self.teardown(SessionEnd::Ended).await?;
            }
            (PlayerEvent::Failed(message), state) if state.is_active() => {
                error!(error = %message, "Player failed");
                self.teardown(SessionEnd::Failed).await?;
            }
            (event, state) => {
                trace!(?event, state = %state, "Player event needs no transition");
            }
        }
        Ok(())
    }

    fn set_heartbeat_playing(&self, playing: bool) {
        if let Some(session) = &self.session {
            session.heartbeat.set_playing(playing);
        }
    }

    fn report_progress(&mut self, event: ProgressEvent) {
        self.send_progress(event, self.state == ControllerState::Paused);
    }

    fn send_progress(&mut self, event: ProgressEvent, paused: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.snapshot(paused);
        session.reporter.progress(session.state.progress_info(event));
    }

    /// Release everything the active session owns, then send `stopped`
    async fn teardown(&mut self, end: SessionEnd) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        if end != SessionEnd::Ended {
            self.transition(ControllerState::Stopped)?;
        }
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let ActiveSession {
            mut state,
            mut player,
            mut reporter,
            heartbeat,
            ..
        } = session;

        heartbeat.stop().await;

        player.pause();
        state.position = player.position();
        state.is_paused = true;

        player.set_event_sink(None);
        if let Some(source) = player.detach_source() {
            source.dispose();
        }
        player.dispose();

        reporter.stopped(state.stop_info(end == SessionEnd::Failed));
        self.retired = Some(reporter);

        self.transition(ControllerState::Disposed)?;
        info!(
            session_id = %state.session_id,
            position = %state.position,
            end = ?end,
            "Playback session disposed"
        );
        Ok(())
    }

    /// Wait for the next input and handle it
    pub async fn step(&mut self) -> Result<()> {
        let input = self
            .inputs_rx
            .recv()
            .await
            .ok_or_else(|| Error::Internal("controller input channel closed".to_string()))?;
        self.dispatch(input).await
    }

    /// Handle inputs until the active session is gone
    pub async fn run_until_finished(&mut self) -> Result<()> {
        while self.session.is_some() {
            self.step().await?;
        }
        Ok(())
    }

    /// Stop the active session, if any
    pub async fn stop(&mut self) -> Result<()> {
        self.dispatch(ControllerInput::Stop).await
    }

    /// Stop and wait for every queued report to be delivered
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop().await?;
        if let Some(reporter) = self.retired.take() {
            reporter.flush().await;
        }
        Ok(())
    }
}
