//! Session orchestrator for Storyloom.
//!
//! `GamePlayer` is the single state machine clients interact with. It
//! owns the `GamePlayerState` aggregate and one explicit `ActiveTurn`
//! record per in-flight message, drives session creation / continuation /
//! action sending, and arbitrates between the SSE stream and the poll
//! fallback so exactly one of them is authoritative for text at any time.
//!
//! Concurrency model: the SSE consumption loop and poll ticks run as
//! tokio tasks holding clones of the player. All state mutation happens
//! under two short-lived mutexes (turn first, then state; never held
//! across an await). Every resumption point re-checks the turn's
//! cancellation token before touching shared state, so stale completions
//! after `reset()` or a newer `connect_to_stream` are no-ops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use storyloom_types::error::SessionError;
use storyloom_types::event::SessionEvent;
use storyloom_types::message::{
    AudioStatus, ImageStatus, MessageDescriptor, MessageKind, SceneMessage,
};
use storyloom_types::session::{GamePlayerState, SessionPhase};
use storyloom_types::stream::{MessageStatus, StreamChunk};

use crate::adapter::SessionAdapter;
use crate::audio::AudioAssembler;
use crate::config::PlayerConfig;
use crate::event::SessionEventBus;
use crate::poller;
use crate::tracker::ChannelTracker;
use crate::transport::MessageTransport;
use crate::watchdog::SilenceWatchdog;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_image_hash() -> String {
    Uuid::now_v7().simple().to_string()
}

/// What the engine needs to know to consume one message's stream.
#[derive(Debug, Clone)]
struct StreamTarget {
    message_id: String,
    expect_image: bool,
    expect_audio: bool,
}

impl StreamTarget {
    fn from_descriptor(descriptor: &MessageDescriptor) -> Self {
        Self {
            message_id: descriptor.id.clone(),
            expect_image: descriptor.has_image,
            expect_audio: descriptor.has_audio,
        }
    }
}

/// Explicit per-turn state, replacing the original's co-mutating
/// timer/flag captures. Owned by the orchestrator; the SSE loop and the
/// poller reach it only through the orchestrator's guarded helpers.
struct ActiveTurn {
    message_id: String,
    /// Player message to attribute a backend-reported failure to.
    player_message_id: Option<String>,
    sse_active: bool,
    poll_active: bool,
    tracker: ChannelTracker,
    cancel: CancellationToken,
    audio: AudioAssembler,
    /// Preview frame held back by the throttle, flushed on imageDone.
    pending_preview: Option<String>,
    last_preview_at: Option<Instant>,
}

/// Result of applying one stream chunk.
enum ChunkOutcome {
    /// Keep consuming.
    Continue,
    /// All expected channels terminal; the loop must exit.
    Complete,
    /// Backend-reported turn failure; the loop must exit immediately.
    Fatal,
    /// The turn was superseded or reset; nothing was mutated.
    Stale,
}

struct Inner {
    state: Mutex<GamePlayerState>,
    turn: Mutex<Option<ActiveTurn>>,
}

/// The session orchestrator.
///
/// Cheap to clone (all fields are shared handles); background tasks hold
/// clones. Construct one per logical play-through surface.
pub struct GamePlayer<A, T> {
    adapter: Arc<A>,
    transport: Arc<T>,
    config: PlayerConfig,
    events: SessionEventBus,
    inner: Arc<Inner>,
}

impl<A, T> Clone for GamePlayer<A, T> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            events: self.events.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> GamePlayer<A, T>
where
    A: SessionAdapter + 'static,
    T: MessageTransport + 'static,
{
    pub fn new(adapter: A, transport: T, config: PlayerConfig) -> Self {
        Self {
            adapter: Arc::new(adapter),
            transport: Arc::new(transport),
            config,
            events: SessionEventBus::new(256),
            inner: Arc::new(Inner {
                state: Mutex::new(GamePlayerState::default()),
                turn: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current aggregate state.
    pub fn state(&self) -> GamePlayerState {
        lock(&self.inner.state).clone()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------

    /// Create a new session. Valid only from `idle`.
    ///
    /// The create response must seed the transcript with at least one
    /// message; an empty response is a session-level fatal error.
    pub async fn start_session(&self) -> Result<(), SessionError> {
        self.enter_starting()?;

        let created = match self.adapter.create_session().await {
            Ok(created) => created,
            Err(e) => {
                self.fail_session(e.to_string());
                return Err(e.into());
            }
        };

        let Some(first) = created.messages.first().cloned() else {
            let err = SessionError::EmptyCreateResponse;
            self.fail_session(err.to_string());
            return Err(err);
        };

        let phase = if created.api_key_present {
            SessionPhase::Playing
        } else {
            SessionPhase::NeedsApiKey
        };

        {
            let mut state = lock(&self.inner.state);
            state.session_id = Some(created.id.clone());
            state.game = Some(created.game.clone());
            state.theme = created.theme.clone();
            state.status_fields = first.status_fields.clone();
            state.messages.push(SceneMessage::streaming_placeholder(&first));
            state.is_waiting_for_response = true;
            state.phase = phase;
        }
        self.events.publish(SessionEvent::PhaseChanged { phase });
        self.events.publish(SessionEvent::MessageAppended {
            message_id: first.id.clone(),
        });

        // Cache-invalidation side effects are owned by the API layer.
        let adapter = Arc::clone(&self.adapter);
        let session_id = created.id.clone();
        tokio::spawn(async move {
            adapter.on_session_created(&session_id).await;
        });

        if first.stream {
            self.connect_to_stream(StreamTarget::from_descriptor(&first), None);
        } else {
            self.finalize_static_message(&first.id);
        }
        Ok(())
    }

    /// Submit a player action.
    ///
    /// At-most-one-outstanding-turn: ignored (with no observable effect)
    /// when no session exists or a response is already awaited. An
    /// adapter failure marks the player message itself as errored --
    /// message-scoped, so the UI can offer a retry without tearing the
    /// session down.
    pub async fn send_action(&self, message_text: &str) {
        let (session_id, player_id, status_fields) = {
            let mut state = lock(&self.inner.state);
            let Some(session_id) = state.session_id.clone() else {
                debug!("send_action ignored: no active session");
                return;
            };
            if state.is_waiting_for_response {
                debug!("send_action ignored: a turn is already outstanding");
                return;
            }
            // A fresh submission clears stale retry affordances.
            for msg in state
                .messages
                .iter_mut()
                .filter(|m| m.kind == MessageKind::Player)
            {
                msg.error = None;
                msg.error_code = None;
            }
            let player_id = Uuid::now_v7().to_string();
            state
                .messages
                .push(SceneMessage::player(player_id.clone(), message_text.to_string()));
            state.is_waiting_for_response = true;
            (session_id, player_id, state.status_fields.clone())
        };
        self.events.publish(SessionEvent::MessageAppended {
            message_id: player_id.clone(),
        });

        match self
            .adapter
            .send_action(&session_id, message_text, &status_fields)
            .await
        {
            Ok(descriptor) => {
                {
                    let mut state = lock(&self.inner.state);
                    // The session may have been reset while the call was
                    // in flight; a stale response must not mutate state.
                    if state.session_id.as_deref() != Some(session_id.as_str()) {
                        return;
                    }
                    if !descriptor.status_fields.is_empty() {
                        state.status_fields = descriptor.status_fields.clone();
                    }
                    state
                        .messages
                        .push(SceneMessage::streaming_placeholder(&descriptor));
                }
                self.events.publish(SessionEvent::MessageAppended {
                    message_id: descriptor.id.clone(),
                });
                if descriptor.stream {
                    self.connect_to_stream(
                        StreamTarget::from_descriptor(&descriptor),
                        Some(player_id),
                    );
                } else {
                    self.finalize_static_message(&descriptor.id);
                }
            }
            Err(e) => {
                warn!(error = %e, "send_action failed, marking player message");
                {
                    let mut state = lock(&self.inner.state);
                    if let Some(msg) = state.messages.iter_mut().find(|m| m.id == player_id) {
                        msg.error = Some(e.to_string());
                        msg.error_code = Some("send_failed".to_string());
                    }
                    state.is_waiting_for_response = false;
                }
                self.events.publish(SessionEvent::TurnFailed {
                    message_id: player_id,
                    error: e.to_string(),
                    error_code: Some("send_failed".to_string()),
                });
            }
        }
    }

    /// Resubmit the most recent failed player action.
    ///
    /// Removes the errored message from the transcript first and yields
    /// once so observers see the removal before the resubmission lands.
    pub async fn retry_last_action(&self) {
        let removed = {
            let mut state = lock(&self.inner.state);
            let Some(pos) = state
                .messages
                .iter()
                .rposition(|m| m.kind == MessageKind::Player && m.error.is_some())
            else {
                debug!("retry_last_action ignored: no failed player message");
                return;
            };
            state.messages.remove(pos)
        };
        self.events.publish(SessionEvent::MessageRemoved {
            message_id: removed.id.clone(),
        });

        tokio::task::yield_now().await;
        self.send_action(&removed.text).await;
    }

    /// Rehydrate an existing session after reload or navigation. Valid
    /// only from `idle`.
    ///
    /// If the conversation was mid-turn, the streaming message's text is
    /// reset before SSE reconnection (new deltas append from scratch, no
    /// duplicated prefix). If the stream was already fully consumed the
    /// reconnect fails with a non-OK status and falls back to polling.
    /// A finished message with a still-pending image triggers a one-shot
    /// status query -- text completion does not imply image completion.
    pub async fn load_existing_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.enter_starting()?;

        let loaded = match self.adapter.load_session(session_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.fail_session(e.to_string());
                return Err(e.into());
            }
        };

        let phase = if loaded.api_key_id.is_some() {
            SessionPhase::Playing
        } else {
            SessionPhase::NeedsApiKey
        };

        let mut resume: Option<StreamTarget> = None;
        let mut reconcile_image: Option<String> = None;
        {
            let mut state = lock(&self.inner.state);
            state.session_id = Some(loaded.id.clone());
            state.game = Some(loaded.game.clone());
            state.theme = loaded.theme.clone();
            state.messages = loaded
                .messages
                .into_iter()
                .map(|m| m.into_scene_message())
                .collect();
            let mut status_fields_update = None;
            let mut waiting_for_response = false;
            if let Some(last) = state.messages.last_mut() {
                status_fields_update = Some(last.status_fields.clone());
                if last.is_streaming {
                    // Deltas re-stream from the start; a retained prefix
                    // would be duplicated.
                    last.text.clear();
                    waiting_for_response = true;
                    resume = Some(StreamTarget {
                        message_id: last.id.clone(),
                        expect_image: last.image_status == ImageStatus::Generating,
                        expect_audio: false,
                    });
                } else if last.image_status == ImageStatus::Generating {
                    reconcile_image = Some(last.id.clone());
                }
            }
            if let Some(status_fields) = status_fields_update {
                state.status_fields = status_fields;
            }
            if waiting_for_response {
                state.is_waiting_for_response = true;
            }
            state.phase = phase;
        }
        self.events.publish(SessionEvent::PhaseChanged { phase });

        if let Some(target) = resume {
            self.connect_to_stream(target, None);
        } else if let Some(message_id) = reconcile_image {
            match self.transport.fetch_status(&message_id).await {
                Ok(status) => {
                    self.apply_status_snapshot(&message_id, &status);
                }
                Err(e) => {
                    debug!(message_id = %message_id, error = %e, "image status reconcile failed");
                }
            }
        }
        Ok(())
    }

    /// Dismiss a recoverable mid-session error notice.
    pub fn clear_stream_error(&self) {
        lock(&self.inner.state).stream_error = None;
    }

    /// Abort any in-flight work and return to the initial idle snapshot.
    ///
    /// Safe from any phase, including concurrently with an in-flight
    /// request: cancelling the turn token prevents stale responses from
    /// mutating state afterwards.
    pub fn reset(&self) {
        {
            let mut turn = lock(&self.inner.turn);
            if let Some(turn) = turn.take() {
                turn.cancel.cancel();
            }
        }
        *lock(&self.inner.state) = GamePlayerState::default();
        self.events.publish(SessionEvent::SessionReset);
    }

    // -----------------------------------------------------------------
    // Stream consumption
    // -----------------------------------------------------------------

    /// Install a fresh turn for `target` and spawn its consumption loop.
    ///
    /// Exactly one SSE connection is live at a time: any previous turn is
    /// cancelled, explicitly, before the new connect begins.
    fn connect_to_stream(&self, target: StreamTarget, player_message_id: Option<String>) {
        let cancel = {
            let mut turn = lock(&self.inner.turn);
            if let Some(old) = turn.take() {
                debug!(message_id = %old.message_id, "superseding in-flight turn");
                old.cancel.cancel();
            }
            let cancel = CancellationToken::new();
            *turn = Some(ActiveTurn {
                message_id: target.message_id.clone(),
                player_message_id: player_message_id.clone(),
                sse_active: false,
                poll_active: false,
                tracker: ChannelTracker::new(target.expect_image, target.expect_audio),
                cancel: cancel.clone(),
                audio: AudioAssembler::new(),
                pending_preview: None,
                last_preview_at: None,
            });
            cancel
        };

        let this = self.clone();
        tokio::spawn(async move {
            this.run_stream(target.message_id, cancel).await;
        });
    }

    async fn run_stream(self, message_id: String, cancel: CancellationToken) {
        let headers = tokio::select! {
            _ = cancel.cancelled() => return,
            headers = self.adapter.stream_headers() => headers,
        };

        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.transport.open_stream(&message_id, headers) => opened,
        };

        let mut chunks = match opened {
            Ok(stream) => stream,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                // Transport-transient: never surfaced, polling takes over.
                debug!(message_id = %message_id, error = %e, "stream connect failed, activating poll fallback");
                if !cancel.is_cancelled() {
                    self.start_polling(&message_id);
                }
                return;
            }
        };

        self.with_turn(&message_id, |turn| turn.sse_active = true);

        let watchdog = {
            let this = self.clone();
            let id = message_id.clone();
            SilenceWatchdog::arm(self.config.silence_timeout, &cancel, move || {
                debug!(message_id = %id, "sse silent, activating poll fallback");
                this.start_polling(&id);
            })
        };

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    watchdog.disarm();
                    return;
                }
                item = chunks.next() => item,
            };

            match item {
                None => {
                    watchdog.disarm();
                    let complete = {
                        let mut turn = lock(&self.inner.turn);
                        match turn
                            .as_mut()
                            .filter(|t| t.message_id == message_id && !t.cancel.is_cancelled())
                        {
                            Some(turn) => {
                                turn.sse_active = false;
                                turn.tracker.all_terminal()
                            }
                            None => return,
                        }
                    };
                    if complete {
                        self.finish_turn(&message_id);
                    } else {
                        // Closed without explicit completion; unstick the UI.
                        debug!(message_id = %message_id, "stream ended before completion");
                        lock(&self.inner.state).is_waiting_for_response = false;
                    }
                    return;
                }
                Some(Err(e)) => {
                    watchdog.disarm();
                    self.with_turn(&message_id, |turn| turn.sse_active = false);
                    if !e.is_cancelled() && !cancel.is_cancelled() {
                        debug!(message_id = %message_id, error = %e, "stream dropped, activating poll fallback");
                        self.start_polling(&message_id);
                    }
                    return;
                }
                Some(Ok(chunk)) => {
                    watchdog.reset();
                    match self.apply_chunk(&message_id, &chunk) {
                        ChunkOutcome::Continue => {}
                        ChunkOutcome::Complete => {
                            watchdog.disarm();
                            self.finish_turn(&message_id);
                            return;
                        }
                        ChunkOutcome::Fatal => {
                            watchdog.disarm();
                            self.abort_turn(&message_id);
                            return;
                        }
                        ChunkOutcome::Stale => {
                            watchdog.disarm();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Apply one stream chunk under the merge rules. Each optional field
    /// is checked independently; nothing is assumed about combinations.
    fn apply_chunk(&self, message_id: &str, chunk: &StreamChunk) -> ChunkOutcome {
        let mut events: Vec<SessionEvent> = Vec::new();
        let outcome = {
            let mut turn_guard = lock(&self.inner.turn);
            let Some(turn) = turn_guard
                .as_mut()
                .filter(|t| t.message_id == message_id && !t.cancel.is_cancelled())
            else {
                return ChunkOutcome::Stale;
            };

            if let Some(error) = &chunk.error {
                // Backend-reported turn failure: fatal for the turn, not
                // the session. The placeholder goes away and the error is
                // attributed to the originating player message.
                turn.tracker.fail();
                let player_message_id = turn.player_message_id.clone();
                let mut state = lock(&self.inner.state);
                state.messages.retain(|m| m.id != message_id);
                if let Some(msg) = player_message_id
                    .as_deref()
                    .and_then(|pid| state.messages.iter_mut().find(|m| m.id == pid))
                {
                    msg.error = Some(error.clone());
                    msg.error_code = chunk.error_code.clone();
                }
                state.is_waiting_for_response = false;
                state.stream_error = Some(error.clone());
                events.push(SessionEvent::TurnFailed {
                    message_id: player_message_id.unwrap_or_else(|| message_id.to_string()),
                    error: error.clone(),
                    error_code: chunk.error_code.clone(),
                });
                ChunkOutcome::Fatal
            } else {
                let mut state = lock(&self.inner.state);
                if let Some(pos) = state.messages.iter().position(|m| m.id == message_id) {
                    if let Some(text) = chunk.text.as_deref().filter(|t| !t.is_empty()) {
                        turn.tracker.text_active();
                        state.messages[pos].text.push_str(text);
                        events.push(SessionEvent::TextDelta {
                            message_id: message_id.to_string(),
                            text: text.to_string(),
                        });
                    }
                    if chunk.text_done {
                        turn.tracker.finish_text();
                        state.messages[pos].is_streaming = false;
                        state.is_waiting_for_response = false;
                    }
                    if let Some(fields) = &chunk.status_fields {
                        state.messages[pos].status_fields = fields.clone();
                        state.status_fields = fields.clone();
                        events.push(SessionEvent::StatusFieldsReplaced {
                            message_id: message_id.to_string(),
                        });
                    }
                    if let Some(data) = &chunk.image_data {
                        turn.tracker.image_active();
                        let now = Instant::now();
                        let due = turn.last_preview_at.is_none_or(|at| {
                            now.duration_since(at) >= self.config.image_preview_min_interval
                        });
                        if due {
                            turn.last_preview_at = Some(now);
                            turn.pending_preview = None;
                            let msg = &mut state.messages[pos];
                            msg.image_status = ImageStatus::Generating;
                            msg.image_preview = Some(data.clone());
                            msg.image_hash = Some(next_image_hash());
                            events.push(SessionEvent::ImageUpdated {
                                message_id: message_id.to_string(),
                                status: ImageStatus::Generating,
                                image_hash: msg.image_hash.clone(),
                            });
                        } else {
                            // Throttled: hold the frame, flush on imageDone.
                            turn.pending_preview = Some(data.clone());
                        }
                    }
                    if chunk.image_done {
                        turn.tracker.finish_image();
                        let msg = &mut state.messages[pos];
                        if let Some(frame) = turn.pending_preview.take() {
                            msg.image_preview = Some(frame);
                        }
                        msg.image_status = ImageStatus::Complete;
                        msg.image_hash = Some(next_image_hash());
                        events.push(SessionEvent::ImageUpdated {
                            message_id: message_id.to_string(),
                            status: ImageStatus::Complete,
                            image_hash: msg.image_hash.clone(),
                        });
                    }
                    if let Some(data) = &chunk.audio_data {
                        turn.tracker.audio_active();
                        turn.audio.push(data);
                        state.messages[pos].audio_status = AudioStatus::Loading;
                    }
                    if chunk.audio_done {
                        turn.tracker.finish_audio();
                        let msg = &mut state.messages[pos];
                        msg.audio = turn.audio.finish();
                        msg.audio_status = AudioStatus::Ready;
                        events.push(SessionEvent::AudioReady {
                            message_id: message_id.to_string(),
                        });
                    }
                }

                if turn.tracker.all_terminal() {
                    ChunkOutcome::Complete
                } else {
                    ChunkOutcome::Continue
                }
            }
        };
        for event in events {
            self.events.publish(event);
        }
        outcome
    }

    // -----------------------------------------------------------------
    // Poll fallback
    // -----------------------------------------------------------------

    /// Activate polling for a message. Idempotent for the active target;
    /// a no-op for anything that is not the current turn.
    fn start_polling(&self, message_id: &str) {
        let cancel = {
            let mut turn = lock(&self.inner.turn);
            let Some(turn) = turn
                .as_mut()
                .filter(|t| t.message_id == message_id && !t.cancel.is_cancelled())
            else {
                return;
            };
            if turn.poll_active {
                return;
            }
            turn.poll_active = true;
            turn.cancel.clone()
        };
        self.events.publish(SessionEvent::PollingStarted {
            message_id: message_id.to_string(),
        });

        let this = self.clone();
        let id = message_id.to_string();
        tokio::spawn(async move {
            this.run_poll(id, cancel).await;
        });
    }

    async fn run_poll(self, message_id: String, cancel: CancellationToken) {
        // Give SSE a head start before the first snapshot.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(self.config.poll_initial_delay) => {}
        }

        let mut failures: u32 = 0;
        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                fetched = self.transport.fetch_status(&message_id) => fetched,
            };

            match fetched {
                Ok(status) => {
                    failures = 0;
                    if self.apply_status_snapshot(&message_id, &status) {
                        self.finish_turn(&message_id);
                        return;
                    }
                }
                Err(e) => {
                    failures += 1;
                    debug!(message_id = %message_id, failures, error = %e, "poll tick failed");
                    if failures >= self.config.poll_failure_budget {
                        // Leave the message in its last-known state
                        // rather than spinning forever.
                        warn!(message_id = %message_id, "poll failure budget exhausted");
                        {
                            let mut state = lock(&self.inner.state);
                            state.stream_error =
                                Some("lost connection to the game server".to_string());
                            state.is_waiting_for_response = false;
                        }
                        self.with_turn(&message_id, |turn| turn.poll_active = false);
                        self.events.publish(SessionEvent::StreamError {
                            message: "lost connection to the game server".to_string(),
                        });
                        return;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Apply a poll snapshot under the merge rules.
    ///
    /// Returns true when the snapshot reports the turn complete (text
    /// done and image resolved) and polling should stop. Also used for
    /// the one-shot image reconcile after `load_existing_session`, where
    /// no turn is active.
    fn apply_status_snapshot(&self, message_id: &str, status: &MessageStatus) -> bool {
        let mut events: Vec<SessionEvent> = Vec::new();
        {
            let mut turn_guard = lock(&self.inner.turn);
            let turn = turn_guard
                .as_mut()
                .filter(|t| t.message_id == message_id && !t.cancel.is_cancelled());
            let sse_active = turn.as_ref().is_some_and(|t| t.sse_active);

            let mut state = lock(&self.inner.state);
            let applied = {
                let Some(msg) = state.messages.iter_mut().find(|m| m.id == message_id) else {
                    return true;
                };
                let text_len_before = msg.text.len();
                let applied = poller::apply_snapshot(msg, status, sse_active);

                if applied.text_grew {
                    events.push(SessionEvent::TextDelta {
                        message_id: message_id.to_string(),
                        text: msg.text[text_len_before..].to_string(),
                    });
                }
                if applied.image_changed {
                    events.push(SessionEvent::ImageUpdated {
                        message_id: message_id.to_string(),
                        status: msg.image_status,
                        image_hash: msg.image_hash.clone(),
                    });
                }
                applied
            };
            if applied.fields_changed {
                state.status_fields = status.status_fields.clone().unwrap_or_default();
                events.push(SessionEvent::StatusFieldsReplaced {
                    message_id: message_id.to_string(),
                });
            }
            if applied.text_done {
                state.is_waiting_for_response = false;
            }

            if let Some(turn) = turn {
                if applied.text_done {
                    turn.tracker.finish_text();
                }
                match status.image_status {
                    ImageStatus::Complete | ImageStatus::None => turn.tracker.finish_image(),
                    ImageStatus::Error => turn.tracker.fail_image(),
                    ImageStatus::Generating => {}
                }
            }
        }
        for event in events {
            self.events.publish(event);
        }
        status.is_complete()
    }

    // -----------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------

    fn enter_starting(&self) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.inner.state);
            if state.phase != SessionPhase::Idle {
                return Err(SessionError::InvalidPhase {
                    expected: "idle",
                    actual: state.phase.to_string(),
                });
            }
            state.phase = SessionPhase::Starting;
        }
        self.events.publish(SessionEvent::PhaseChanged {
            phase: SessionPhase::Starting,
        });
        Ok(())
    }

    fn fail_session(&self, message: String) {
        {
            let mut state = lock(&self.inner.state);
            state.phase = SessionPhase::Error;
            state.error = Some(message);
            state.is_waiting_for_response = false;
        }
        self.events.publish(SessionEvent::PhaseChanged {
            phase: SessionPhase::Error,
        });
    }

    /// Finalize a message whose turn never streams (descriptor said so).
    fn finalize_static_message(&self, message_id: &str) {
        {
            let mut state = lock(&self.inner.state);
            if let Some(msg) = state.messages.iter_mut().find(|m| m.id == message_id) {
                msg.is_streaming = false;
            }
            state.is_waiting_for_response = false;
        }
        self.events.publish(SessionEvent::TurnCompleted {
            message_id: message_id.to_string(),
        });
    }

    /// Terminal completion: tear down the turn (cancelling its watchdog
    /// and poller) and clear the wait flag. First caller wins; the losing
    /// side of an SSE/poll race sees the turn gone and does nothing.
    fn finish_turn(&self, message_id: &str) {
        {
            let mut turn = lock(&self.inner.turn);
            match turn.as_ref() {
                Some(t) if t.message_id == message_id => {
                    t.cancel.cancel();
                    *turn = None;
                }
                _ => return,
            }
        }
        {
            let mut state = lock(&self.inner.state);
            if let Some(msg) = state.messages.iter_mut().find(|m| m.id == message_id) {
                msg.is_streaming = false;
            }
            state.is_waiting_for_response = false;
        }
        self.events.publish(SessionEvent::TurnCompleted {
            message_id: message_id.to_string(),
        });
    }

    /// Tear down the turn after a fatal chunk. No completion event; the
    /// failure was already published and attributed.
    fn abort_turn(&self, message_id: &str) {
        let mut turn = lock(&self.inner.turn);
        if let Some(t) = turn.as_ref().filter(|t| t.message_id == message_id) {
            t.cancel.cancel();
            *turn = None;
        }
    }

    fn with_turn<F: FnOnce(&mut ActiveTurn)>(&self, message_id: &str, f: F) {
        let mut turn = lock(&self.inner.turn);
        if let Some(turn) = turn
            .as_mut()
            .filter(|t| t.message_id == message_id && !t.cancel.is_cancelled())
        {
            f(turn);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
