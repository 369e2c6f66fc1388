//! Pipeline orchestrator that wires agent events, arbitration, playback and
//! the per-frame animation loop together.
//!
//! [`AvatarPipeline`] is the single writer of the active stream id and the
//! player's queue. [`FrameLoop`] is the single writer of morph influences and
//! clip weights; it reads playback state through a [`PlaybackMonitor`] and the
//! current cue track through a watch channel.

use crate::animator::{FacialAnimator, FrameInput, FrameReport};
use crate::arbiter::{ChunkDecision, CompletionDecision, StreamArbiter};
use crate::audio::output::{AudioSink, open_sink};
use crate::audio::pcm::decode_base64_chunk;
use crate::audio::player::{CompleteOutcome, EnqueueOutcome, PlaybackEvent, PlaybackMonitor};
use crate::audio::stream::StreamState;
use crate::audio::unlock::{AudioUnlock, Gesture};
use crate::audio::StreamingPlayer;
use crate::config::AvatarConfig;
use crate::error::{AvatarError, Result};
use crate::events::{AgentEvent, EventLog};
use crate::pipeline::messages::{ActiveTrack, PipelineCommand};
use crate::runtime::{MorphInfluence, RuntimeEvent};
use crate::scene::{AnimationActions, MemoryScene};
use crate::sequencer::IdleSequencer;
use crate::session::{AgentDispatcher, SessionIdentity, UserSaid};
use crate::viseme::{VisemeCue, VisemeTrack, estimate_track};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runtime event broadcast capacity.
const RUNTIME_EVENT_CAPACITY: usize = 256;

/// Cue tracks held for streams that are active or about to be.
const TRACK_CAPACITY: usize = 16;

/// Preempted stream ids remembered so their late tracks can be dropped.
const RETIRED_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct TrackRegistry {
    tracks: VecDeque<(String, Arc<VisemeTrack>)>,
    retired: VecDeque<String>,
}

impl TrackRegistry {
    /// Store `track` unless its stream was preempted. Returns whether it was kept.
    fn insert(&mut self, stream_id: String, track: VisemeTrack) -> bool {
        if self.retired.contains(&stream_id) {
            return false;
        }
        self.remove(&stream_id);
        self.tracks.push_back((stream_id, Arc::new(track)));
        while self.tracks.len() > TRACK_CAPACITY {
            self.tracks.pop_front();
        }
        true
    }

    /// Drop the track of a preempted stream and refuse later ones.
    fn retire(&mut self, stream_id: &str) {
        self.remove(stream_id);
        if !self.retired.iter().any(|id| id == stream_id) {
            self.retired.push_back(stream_id.to_owned());
            while self.retired.len() > RETIRED_CAPACITY {
                self.retired.pop_front();
            }
        }
    }

    /// A retired id is speaking again.
    fn revive(&mut self, stream_id: &str) {
        self.retired.retain(|id| id != stream_id);
    }

    fn get(&self, stream_id: &str) -> Option<Arc<VisemeTrack>> {
        self.tracks
            .iter()
            .find(|(id, _)| id == stream_id)
            .map(|(_, track)| Arc::clone(track))
    }

    fn remove(&mut self, stream_id: &str) {
        self.tracks.retain(|(id, _)| id != stream_id);
    }

    fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// Consumes agent events and UI commands, drives playback.
pub struct AvatarPipeline {
    config: AvatarConfig,
    player: StreamingPlayer,
    playback_rx: Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
    arbiter: StreamArbiter,
    log: EventLog,
    identity: SessionIdentity,
    dispatcher: Option<Arc<dyn AgentDispatcher>>,
    presence: u32,
    tracks: TrackRegistry,
    deferred: Option<String>,
    track_tx: watch::Sender<Option<ActiveTrack>>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    cancel: CancellationToken,
}

impl AvatarPipeline {
    /// Create a pipeline whose player starts behind `gate`.
    ///
    /// The player renders only when something pulls samples through its
    /// monitor; attach a device with [`with_output`](Self::with_output) or
    /// [`with_sink`](Self::with_sink).
    pub fn new(config: AvatarConfig, gate: Arc<AudioUnlock>) -> Self {
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let player = StreamingPlayer::new(&config.audio, gate, Some(playback_tx));
        let (track_tx, _) = watch::channel(None);
        let (runtime_tx, _) = broadcast::channel(RUNTIME_EVENT_CAPACITY);
        Self {
            identity: SessionIdentity::from_config(&config.session),
            log: EventLog::new(config.events.log_capacity),
            config,
            player,
            playback_rx: Some(playback_rx),
            arbiter: StreamArbiter::new(),
            dispatcher: None,
            presence: 0,
            tracks: TrackRegistry::default(),
            deferred: None,
            track_tx,
            runtime_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the output selected in config.
    ///
    /// # Errors
    ///
    /// Returns an error if the output device thread cannot be started.
    pub fn with_output(self) -> Result<Self> {
        let sink = open_sink(&self.config.audio, self.player.monitor())?;
        Ok(self.with_sink(sink))
    }

    /// Attach an explicit output sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn AudioSink>) -> Self {
        self.player = self.player.with_sink(sink);
        self
    }

    /// Attach the transport for outbound messages.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn AgentDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Use an existing runtime event broadcaster.
    #[must_use]
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = tx;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }

    pub fn runtime_sender(&self) -> broadcast::Sender<RuntimeEvent> {
        self.runtime_tx.clone()
    }

    pub fn monitor(&self) -> PlaybackMonitor {
        self.player.monitor()
    }

    /// Cue track of the active stream, as seen by the frame loop.
    pub fn track_watch(&self) -> watch::Receiver<Option<ActiveTrack>> {
        self.track_tx.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn active_stream(&self) -> Option<&str> {
        self.arbiter.active()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn presence(&self) -> u32 {
        self.presence
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Frame loop over `scene` reading this pipeline's playback state.
    pub fn frame_loop(&self, scene: MemoryScene) -> FrameLoop {
        FrameLoop::new(
            scene,
            &self.config,
            self.monitor(),
            self.track_watch(),
            self.runtime_sender(),
        )
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.runtime_tx.send(event);
    }

    fn publish_track(&self) {
        let current = self.arbiter.active().and_then(|stream_id| {
            self.tracks.get(stream_id).map(|track| ActiveTrack {
                stream_id: stream_id.to_owned(),
                track,
            })
        });
        self.track_tx.send_replace(current);
    }

    fn note_deferred(&mut self, stream_id: &str) {
        if self.deferred.as_deref() == Some(stream_id) {
            return;
        }
        info!(stream_id, "playback waiting for a user gesture");
        self.deferred = Some(stream_id.to_owned());
        self.emit(RuntimeEvent::PlaybackDeferred {
            stream_id: stream_id.to_owned(),
        });
    }

    /// Handle one event from the agent connection.
    pub fn handle_agent_event(&mut self, event: AgentEvent) {
        if let AgentEvent::Said { id: Some(id), .. } = &event
            && !self.log.first_said(id)
        {
            debug!(message_id = %id, "assistant message already said");
            return;
        }
        let log_id = event.is_logged().then(|| self.log.append(event.clone()));

        match event {
            AgentEvent::AudioChunk {
                stream_id,
                chunk_base64,
            } => self.on_chunk(&stream_id, &chunk_base64),
            AgentEvent::AudioComplete { stream_id } => self.on_complete(&stream_id),
            AgentEvent::AudioError { message } => self.on_agent_error(message),
            AgentEvent::Said { text, .. } => {
                self.emit(RuntimeEvent::AssistantSaid {
                    log_id: log_id.unwrap_or_default(),
                    text,
                });
            }
            AgentEvent::Lipsync {
                stream_id,
                mouth_cues,
                phonemes,
            } => self.on_lipsync(stream_id, mouth_cues, phonemes.as_deref()),
            AgentEvent::Presence { count } => {
                debug!(count, "presence updated");
                self.presence = count;
            }
        }
    }

    fn on_chunk(&mut self, stream_id: &str, chunk_base64: &str) {
        let samples = match decode_base64_chunk(chunk_base64) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(stream_id, error = %e, "dropping undecodable audio chunk");
                return;
            }
        };

        match self.arbiter.on_chunk(stream_id) {
            ChunkDecision::Preempt { previous } => {
                self.player.interrupt();
                self.tracks.retire(&previous);
                self.tracks.revive(stream_id);
                if self.deferred.as_deref() == Some(previous.as_str()) {
                    self.deferred = None;
                }
                self.emit(RuntimeEvent::StreamPreempted {
                    previous,
                    stream_id: stream_id.to_owned(),
                });
                self.publish_track();
            }
            ChunkDecision::Start => {
                self.tracks.revive(stream_id);
                self.publish_track();
            }
            ChunkDecision::Continue => {}
        }

        if self.player.enqueue(stream_id, &samples) == EnqueueOutcome::Deferred {
            self.note_deferred(stream_id);
        }
    }

    fn on_complete(&mut self, stream_id: &str) {
        if self.arbiter.on_complete(stream_id) == CompletionDecision::Stale {
            return;
        }
        match self.player.complete(stream_id) {
            CompleteOutcome::Ignored => {
                // Nothing was ever queued for it.
                self.arbiter.release(stream_id);
                self.tracks.remove(stream_id);
                self.publish_track();
            }
            CompleteOutcome::Draining | CompleteOutcome::Finished => {
                if !self.player.gate().is_unlocked()
                    && self.player.state() == Some(StreamState::Buffering)
                {
                    self.note_deferred(stream_id);
                }
            }
        }
    }

    fn on_agent_error(&mut self, message: String) {
        warn!(error = %message, "agent reported an error");
        self.stop();
        self.emit(RuntimeEvent::AgentError { message });
    }

    fn on_lipsync(&mut self, stream_id: String, cues: Vec<VisemeCue>, phonemes: Option<&str>) {
        let track = match phonemes {
            Some(phonemes) if cues.is_empty() => {
                estimate_track(phonemes, self.config.lipsync.speech_rate)
            }
            _ => VisemeTrack::new(cues),
        };
        debug!(stream_id = %stream_id, cues = track.len(), "lip-sync track received");
        if self.tracks.insert(stream_id.clone(), track) {
            self.publish_track();
        } else {
            debug!(stream_id = %stream_id, "dropping track for superseded stream");
        }
    }

    /// Whether the player's current stream is `stream_id` and still audible or queued.
    fn is_live(&self, stream_id: &str) -> bool {
        let monitor = self.player.monitor();
        monitor.stream_id().as_deref() == Some(stream_id)
            && !monitor.state().is_some_and(StreamState::is_finished)
    }

    /// Handle a notification from the player.
    pub fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started { stream_id } => {
                if self.deferred.as_deref() == Some(stream_id.as_str()) {
                    self.deferred = None;
                }
                self.publish_track();
                self.emit(RuntimeEvent::StreamStarted { stream_id });
            }
            PlaybackEvent::Level { amplitude } => {
                self.emit(RuntimeEvent::AudioLevel { amplitude });
            }
            PlaybackEvent::Finished {
                stream_id,
                elapsed_secs,
            } => {
                // A same-id stream may already have replaced the finished one.
                if !self.is_live(&stream_id) && self.arbiter.release(&stream_id) {
                    self.tracks.remove(&stream_id);
                    self.publish_track();
                }
                self.emit(RuntimeEvent::StreamCompleted {
                    stream_id,
                    elapsed_secs,
                });
            }
            PlaybackEvent::Interrupted { stream_id } => {
                self.emit(RuntimeEvent::StreamInterrupted { stream_id });
            }
        }
    }

    /// Handle pending player notifications without running the event loop.
    pub fn drain_playback_events(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(rx) = self.playback_rx.as_mut() {
            while let Ok(event) = rx.try_recv() {
                pending.push(event);
            }
        }
        let n = pending.len();
        for event in pending {
            self.handle_playback_event(event);
        }
        n
    }

    /// Handle one UI command.
    pub async fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::Gesture(gesture) => self.unlock(gesture),
            PipelineCommand::UserSaid(text) => self.user_said(&text).await,
            PipelineCommand::Stop => {
                if let Some(stream_id) = self.stop() {
                    info!(stream_id = %stream_id, "playback stopped by user");
                }
            }
        }
    }

    fn unlock(&mut self, gesture: Gesture) {
        match self.player.unlock() {
            Ok(true) => {
                info!(?gesture, "audio unlocked");
                self.deferred = None;
                self.emit(RuntimeEvent::AudioUnlocked);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "audio unlock failed; waiting for the next gesture"),
        }
    }

    async fn user_said(&mut self, text: &str) {
        let Some(message) = UserSaid::new(&self.identity, text, self.presence) else {
            debug!("ignoring blank user message");
            return;
        };
        if self.config.session.interrupt_on_user_message {
            self.stop();
        }
        let Some(dispatcher) = self.dispatcher.clone() else {
            warn!("no agent dispatcher attached; user message dropped");
            return;
        };
        match dispatcher.user_said(message.clone()).await {
            Ok(()) => self.emit(RuntimeEvent::Dispatched { message }),
            Err(e) => {
                warn!(error = %e, "failed to send user message");
                self.emit(RuntimeEvent::AgentError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Silence playback and forget the active stream. Returns the stream that was stopped.
    pub fn stop(&mut self) -> Option<String> {
        let interrupted = self.player.interrupt();
        let active = self.arbiter.clear();
        self.tracks.clear();
        self.deferred = None;
        self.publish_track();
        interrupted.or(active)
    }

    /// Whether completed audio is still audibly draining.
    fn playing_out(&self) -> bool {
        self.arbiter.is_draining() && self.player.gate().is_unlocked()
    }

    /// Run until cancelled, or until both inputs close and queued audio has played out.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline has already been run.
    pub async fn run(
        mut self,
        mut agent_rx: mpsc::Receiver<AgentEvent>,
        mut commands: mpsc::UnboundedReceiver<PipelineCommand>,
    ) -> Result<()> {
        let Some(mut playback_rx) = self.playback_rx.take() else {
            return Err(AvatarError::Channel("pipeline already ran".into()));
        };
        let cancel = self.cancel.clone();
        let mut agent_open = true;
        let mut commands_open = true;
        info!("avatar pipeline running");

        loop {
            if !agent_open && !commands_open && !self.playing_out() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                event = agent_rx.recv(), if agent_open => match event {
                    Some(event) => self.handle_agent_event(event),
                    None => {
                        debug!("agent event channel closed");
                        agent_open = false;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("command channel closed");
                        commands_open = false;
                    }
                },
                Some(event) = playback_rx.recv() => self.handle_playback_event(event),
                else => break,
            }
        }

        self.stop();
        info!("avatar pipeline stopped");
        Ok(())
    }
}

/// Per-frame driver for the animator and the idle sequencer.
pub struct FrameLoop {
    scene: MemoryScene,
    animator: FacialAnimator,
    sequencer: IdleSequencer,
    monitor: PlaybackMonitor,
    tracks: watch::Receiver<Option<ActiveTrack>>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    emit_frames: bool,
}

impl FrameLoop {
    pub fn new(
        mut scene: MemoryScene,
        config: &AvatarConfig,
        monitor: PlaybackMonitor,
        tracks: watch::Receiver<Option<ActiveTrack>>,
        runtime_tx: broadcast::Sender<RuntimeEvent>,
    ) -> Self {
        let animator = FacialAnimator::from_scene(&mut scene, config);
        Self {
            scene,
            animator,
            sequencer: IdleSequencer::new(&config.idle),
            monitor,
            tracks,
            runtime_tx,
            emit_frames: config.render.emit_frames,
        }
    }

    /// Replace the animator, e.g. with a seeded one.
    #[must_use]
    pub fn with_animator(mut self, animator: FacialAnimator) -> Self {
        self.animator = animator;
        self
    }

    pub fn scene(&self) -> &MemoryScene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut MemoryScene {
        &mut self.scene
    }

    pub fn sequencer(&self) -> &IdleSequencer {
        &self.sequencer
    }

    /// Start the idle loop at `now`.
    pub fn start(&mut self, now: Duration) {
        self.sequencer.start(&mut self.scene, now);
    }

    /// Render one frame at `now`, `dt` seconds after the previous one.
    pub fn tick(&mut self, now: Duration, dt: f32) -> FrameReport {
        let playing = self.monitor.playing_stream_id();
        let track = self
            .tracks
            .borrow()
            .as_ref()
            .filter(|active| playing.as_deref() == Some(active.stream_id.as_str()))
            .map(|active| Arc::clone(&active.track));

        let input = FrameInput {
            elapsed_secs: self.monitor.elapsed_secs(),
            track: track.as_deref(),
            amplitude: self.monitor.amplitude(),
            delta_secs: dt,
        };

        self.sequencer.advance(&mut self.scene, now);
        self.scene.advance(dt);
        let report = self.animator.update(&mut self.scene, &input);

        if self.emit_frames {
            let influences = self
                .scene
                .active_influences()
                .into_iter()
                .map(|(mesh, target, value)| MorphInfluence {
                    mesh,
                    target,
                    value,
                })
                .collect();
            let _ = self.runtime_tx.send(RuntimeEvent::Frame { influences });
        }
        report
    }

    /// Tick at `frame_rate` until cancelled; returns the scene.
    pub async fn run(mut self, frame_rate: u32, cancel: CancellationToken) -> MemoryScene {
        let period = Duration::from_secs_f64(1.0 / f64::from(frame_rate.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let origin = tokio::time::Instant::now();
        let mut last = origin;
        self.start(Duration::ZERO);
        debug!(frame_rate, "frame loop running");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = tokio::time::Instant::now();
                    let dt = now.duration_since(last).as_secs_f32();
                    last = now;
                    self.tick(now.duration_since(origin), dt);
                }
            }
        }

        self.sequencer.cancel();
        self.scene
    }
}
