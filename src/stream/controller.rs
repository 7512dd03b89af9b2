//! Connection supervision: session renewal, stream reads and reconnect pacing.
//!
//! One [`ReconnectController`] drives one run of the client. It owns the
//! current [`Session`] and is the only writer of [`ConnectionState`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::auth::{AuthError, Session, SessionManager};
use crate::config::RealtimeOptions;
use crate::retry::ReconnectBackoff;
use crate::stream::dispatch::{EventDispatcher, SubscriptionId};
use crate::stream::event::{DecodedFrame, EventDecoder};
use crate::stream::frame::{FrameDecoder, FrameError, RawFrame};
use crate::stream::transport::{ChunkStream, StreamTransport, TransportError};

/// Connection lifecycle published by the supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Streaming,
    Backoff,
}

/// The session cannot be recovered without new credentials.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("session can no longer be renewed: {source}")]
pub struct FatalAuthError {
    pub source: AuthError,
}

/// Out-of-band reports for the application. Counts only, never payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamNotice {
    /// A frame payload was corrupt and skipped.
    DecodeSkipped { total: u64 },
    /// The frame stream was malformed and the connection was dropped.
    FrameStreamReset { total: u64 },
    /// A subscriber returned an error or panicked.
    HandlerFailed {
        subscription: SubscriptionId,
        total: u64,
    },
    /// The run ended because authentication cannot be recovered.
    Fatal(FatalAuthError),
}

/// Bounded sender for [`StreamNotice`]s.
///
/// Notices that do not fit, for example because nobody took the receiver,
/// are dropped and counted instead of queued.
#[derive(Clone, Debug)]
pub struct NoticeSink {
    tx: mpsc::Sender<StreamNotice>,
    dropped: Arc<AtomicU64>,
}

impl NoticeSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamNotice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    pub fn send(&self, notice: StreamNotice) {
        match self.tx.try_send(notice) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(notice)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(event = "notice_dropped", total, notice = ?notice);
            }
        }
    }

    /// Notices discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// How a controller run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    Fatal(FatalAuthError),
}

/// Shared slot exposing the controller's current session to readers.
pub type SessionSlot = Arc<RwLock<Option<Session>>>;

struct TrackerShared {
    generation: u64,
    current: watch::Sender<ConnectionState>,
    log: mpsc::Sender<ConnectionState>,
}

/// Publishes connection state for one run.
///
/// Every tracker is bound to a run generation. Once the client moves on to a
/// new generation, updates from stale trackers are ignored.
#[derive(Clone)]
pub struct StateTracker {
    shared: Arc<Mutex<TrackerShared>>,
    generation: u64,
}

impl StateTracker {
    /// Returns the tracker with the receivers for the current state and the
    /// transition log. The log keeps at most `log_capacity` unread entries;
    /// later transitions are dropped until it is drained.
    pub fn channel(
        log_capacity: usize,
    ) -> (
        Self,
        watch::Receiver<ConnectionState>,
        mpsc::Receiver<ConnectionState>,
    ) {
        let (current, current_rx) = watch::channel(ConnectionState::Disconnected);
        let (log, log_rx) = mpsc::channel(log_capacity.max(1));
        let tracker = Self {
            shared: Arc::new(Mutex::new(TrackerShared {
                generation: 0,
                current,
                log,
            })),
            generation: 0,
        };
        (tracker, current_rx, log_rx)
    }

    /// Publishes `state`. Returns false if this tracker has been superseded.
    pub fn set(&self, state: ConnectionState) -> bool {
        let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.generation != self.generation {
            return false;
        }
        publish(&shared, state);
        true
    }

    /// Invalidates every existing tracker and returns one for a new run.
    pub fn next_generation(&self) -> StateTracker {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.generation += 1;
        Self {
            shared: Arc::clone(&self.shared),
            generation: shared.generation,
        }
    }

    /// Invalidates every existing tracker and publishes `Disconnected`.
    pub fn shut_down(&self) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.generation += 1;
        publish(&shared, ConnectionState::Disconnected);
    }

    /// Last published state, whichever generation published it.
    pub fn current(&self) -> ConnectionState {
        let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let state = *shared.current.borrow();
        state
    }
}

fn publish(shared: &TrackerShared, state: ConnectionState) {
    let changed = shared.current.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });
    if changed {
        if let Err(TrySendError::Full(state)) = shared.log.try_send(state) {
            trace!(event = "state_log_full", state = ?state);
        }
    }
}

enum StreamEnd {
    Shutdown,
    Transport(TransportError),
    Frame(FrameError),
    Idle,
}

enum Cycle {
    Shutdown,
    Backoff(String),
    Fatal(AuthError),
}

/// Supervises transport, decoders and dispatcher for one run.
pub struct ReconnectController<M, T> {
    sessions: Arc<M>,
    transport: Arc<T>,
    dispatcher: EventDispatcher,
    options: RealtimeOptions,
    state: StateTracker,
    notices: NoticeSink,
    session: SessionSlot,
    backoff: ReconnectBackoff,
    events: EventDecoder,
    frame_resets: u64,
    needs_renewal: bool,
    renewed_since_frame: bool,
}

impl<M, T> ReconnectController<M, T>
where
    M: SessionManager,
    T: StreamTransport,
{
    pub fn new(
        sessions: Arc<M>,
        transport: Arc<T>,
        dispatcher: EventDispatcher,
        options: RealtimeOptions,
        state: StateTracker,
        notices: NoticeSink,
        session: SessionSlot,
    ) -> Self {
        let backoff = ReconnectBackoff::new(
            options.min_backoff,
            options.max_backoff,
            options.backoff_jitter,
        );
        Self {
            sessions,
            transport,
            dispatcher,
            options,
            state,
            notices,
            session,
            backoff,
            events: EventDecoder::new(),
            frame_resets: 0,
            needs_renewal: false,
            renewed_since_frame: false,
        }
    }

    /// Runs until `shutdown` flips to true (or its sender is dropped), or
    /// until authentication fails for good.
    pub async fn run(mut self, session: Session, mut shutdown: watch::Receiver<bool>) -> RunOutcome {
        self.store_session(session);

        loop {
            if *shutdown.borrow() {
                return self.finish(RunOutcome::Stopped);
            }

            let reason = match self.cycle(&mut shutdown).await {
                Cycle::Shutdown => return self.finish(RunOutcome::Stopped),
                Cycle::Fatal(source) => {
                    let fatal = FatalAuthError { source };
                    warn!(event = "stream_auth_fatal", error = %fatal);
                    self.notices.send(StreamNotice::Fatal(fatal.clone()));
                    return self.finish(RunOutcome::Fatal(fatal));
                }
                Cycle::Backoff(reason) => reason,
            };

            self.state.set(ConnectionState::Backoff);
            let delay = self.backoff.next_delay();
            info!(
                event = "stream_backoff",
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                reason = %reason
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return self.finish(RunOutcome::Stopped),
            }
        }
    }

    async fn cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> Cycle {
        self.state.set(ConnectionState::Connecting);
        let Some(session) = self.current_session() else {
            return Cycle::Fatal(AuthError::Expired);
        };

        self.state.set(ConnectionState::Authenticating);
        let session = if self.needs_renewal || !self.sessions.is_valid(&session) {
            let renewed = tokio::select! {
                renewed = self.sessions.renew(&session) => renewed,
                _ = wait_for_shutdown(shutdown) => return Cycle::Shutdown,
            };
            match renewed {
                Ok(renewed) => {
                    debug!(event = "stream_session_renewed");
                    self.needs_renewal = false;
                    self.renewed_since_frame = true;
                    self.store_session(renewed.clone());
                    renewed
                }
                Err(AuthError::NetworkError(reason)) => {
                    return Cycle::Backoff(format!("renewal failed: {reason}"))
                }
                Err(err) => return Cycle::Fatal(err),
            }
        } else {
            session
        };

        let resume_from = if self.options.resume_supported {
            self.dispatcher.cursor().snapshot().last_seen_event_id
        } else {
            None
        };
        let opened = tokio::select! {
            opened = self.transport.open(&session, resume_from.as_deref()) => opened,
            _ = wait_for_shutdown(shutdown) => return Cycle::Shutdown,
        };
        let mut chunks = match opened {
            Ok(chunks) => chunks,
            Err(err) => return self.transport_failed(err),
        };

        self.state.set(ConnectionState::Streaming);
        info!(event = "stream_connected", resumed = resume_from.is_some());
        let connected_at = Instant::now();
        let end = self.stream(&mut chunks, shutdown).await;
        chunks.close();
        if connected_at.elapsed() >= self.options.stable_after {
            self.backoff.reset();
        }

        match end {
            StreamEnd::Shutdown => Cycle::Shutdown,
            StreamEnd::Transport(err) => self.transport_failed(err),
            StreamEnd::Frame(err) => {
                self.frame_resets += 1;
                warn!(event = "frame_stream_reset", total = self.frame_resets, error = %err);
                self.notices.send(StreamNotice::FrameStreamReset {
                    total: self.frame_resets,
                });
                Cycle::Backoff(err.to_string())
            }
            StreamEnd::Idle => Cycle::Backoff(format!(
                "no frames for {}ms",
                self.options.idle_timeout.as_millis()
            )),
        }
    }

    fn transport_failed(&mut self, err: TransportError) -> Cycle {
        if err == TransportError::AuthRejected {
            if self.renewed_since_frame {
                return Cycle::Fatal(AuthError::Expired);
            }
            self.needs_renewal = true;
        }
        Cycle::Backoff(err.to_string())
    }

    async fn stream(
        &mut self,
        chunks: &mut ChunkStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        let mut last_frame = Instant::now();
        let mut decoder = FrameDecoder::new(self.options.max_frame_bytes);
        let mut frames = Vec::new();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => return StreamEnd::Shutdown,
                _ = sleep_until(last_frame + self.options.idle_timeout) => return StreamEnd::Idle,
                item = chunks.next() => {
                    let chunk = match item {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(err)) => return StreamEnd::Transport(err),
                        None => return StreamEnd::Transport(TransportError::Closed),
                    };
                    let pushed = decoder.push(&chunk, &mut frames);
                    if !frames.is_empty() {
                        last_frame = Instant::now();
                        self.renewed_since_frame = false;
                        self.handle_frames(frames.drain(..));
                    }
                    if let Err(err) = pushed {
                        return StreamEnd::Frame(err);
                    }
                }
            }
        }
    }

    fn handle_frames(&mut self, frames: impl Iterator<Item = RawFrame>) {
        let mut batch = Vec::new();
        for frame in frames {
            match self.events.decode(&frame) {
                Ok(DecodedFrame::Event(event)) => batch.push(event),
                Ok(DecodedFrame::Heartbeat) => trace!(event = "stream_heartbeat"),
                Ok(DecodedFrame::ClientConnection { connection_id }) => {
                    debug!(event = "stream_client_connection", connection_id = %connection_id);
                }
                Err(err) => {
                    let total = self.events.skipped();
                    warn!(event = "frame_skipped", total, error = %err);
                    self.notices.send(StreamNotice::DecodeSkipped { total });
                }
            }
        }
        self.dispatcher.dispatch_batch(batch);
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Session) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        self.state.set(ConnectionState::Disconnected);
        debug!(event = "stream_run_finished", outcome = ?outcome);
        outcome
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionState, NoticeSink, StateTracker, StreamNotice};

    #[test]
    fn tracker_logs_transitions_once() {
        let (tracker, current, mut log) = StateTracker::channel(8);
        let run = tracker.next_generation();

        assert!(run.set(ConnectionState::Connecting));
        assert!(run.set(ConnectionState::Connecting));
        assert!(run.set(ConnectionState::Streaming));

        assert_eq!(*current.borrow(), ConnectionState::Streaming);
        assert_eq!(log.try_recv().expect("log"), ConnectionState::Connecting);
        assert_eq!(log.try_recv().expect("log"), ConnectionState::Streaming);
        assert!(log.try_recv().is_err());
    }

    #[test]
    fn stale_tracker_cannot_publish_after_shutdown() {
        let (tracker, current, _log) = StateTracker::channel(8);
        let run = tracker.next_generation();
        run.set(ConnectionState::Streaming);

        tracker.shut_down();
        assert!(!run.set(ConnectionState::Backoff));
        assert_eq!(*current.borrow(), ConnectionState::Disconnected);
        assert_eq!(tracker.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn unread_state_log_stays_bounded() {
        let (tracker, current, mut log) = StateTracker::channel(2);
        let run = tracker.next_generation();
        for _ in 0..50 {
            run.set(ConnectionState::Connecting);
            run.set(ConnectionState::Backoff);
        }

        assert_eq!(*current.borrow(), ConnectionState::Backoff);
        assert_eq!(log.try_recv().expect("log"), ConnectionState::Connecting);
        assert_eq!(log.try_recv().expect("log"), ConnectionState::Backoff);
        assert!(log.try_recv().is_err());

        run.set(ConnectionState::Streaming);
        assert_eq!(log.try_recv().expect("log"), ConnectionState::Streaming);
    }

    #[test]
    fn full_notice_queue_drops_and_counts() {
        let (sink, mut notices) = NoticeSink::channel(2);
        for total in 1..=5 {
            sink.send(StreamNotice::DecodeSkipped { total });
        }

        assert_eq!(sink.dropped(), 3);
        assert_eq!(notices.try_recv(), Ok(StreamNotice::DecodeSkipped { total: 1 }));
        assert_eq!(notices.try_recv(), Ok(StreamNotice::DecodeSkipped { total: 2 }));
        assert!(notices.try_recv().is_err());

        drop(notices);
        sink.send(StreamNotice::DecodeSkipped { total: 6 });
        assert_eq!(sink.dropped(), 3);
    }
}
