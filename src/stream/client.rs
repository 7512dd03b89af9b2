//! Public realtime client.
//!
//! [`RealtimeClient`] authenticates, then spawns a background worker that
//! owns the stream connection and reconnects until stopped. Events reach the
//! application through subscriptions; connection state and notices are
//! exposed as channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::{AuthError, Credentials, Session, SessionManager, VoyagerSessionManager};
use crate::config::RealtimeOptions;
use crate::stream::controller::{
    ConnectionState, FatalAuthError, NoticeSink, ReconnectController, RunOutcome, SessionSlot,
    StateTracker, StreamNotice,
};
use crate::stream::dispatch::{
    DispatchStats, EventDispatcher, HandlerResult, StreamCursor, SubscriptionHandle,
};
use crate::stream::event::{Event, EventKind};
use crate::stream::transport::{HttpStreamTransport, StreamTransport, TransportError};

/// Errors building the default HTTP-backed client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("session manager setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("stream transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

struct ActiveRun {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Realtime messaging client for one account.
pub struct RealtimeClient<M = VoyagerSessionManager, T = HttpStreamTransport> {
    sessions: Arc<M>,
    transport: Arc<T>,
    options: RealtimeOptions,
    dispatcher: EventDispatcher,
    state: StateTracker,
    state_rx: watch::Receiver<ConnectionState>,
    status_rx: Mutex<Option<mpsc::Receiver<ConnectionState>>>,
    notices: NoticeSink,
    notices_rx: Mutex<Option<mpsc::Receiver<StreamNotice>>>,
    session: SessionSlot,
    last_fatal: Arc<Mutex<Option<FatalAuthError>>>,
    /// Bumped by every `stop`, so a `start` still authenticating can tell it
    /// was cancelled.
    epoch: AtomicU64,
    run: Mutex<Option<ActiveRun>>,
}

impl RealtimeClient {
    /// Creates a client against the production LinkedIn endpoints.
    pub fn new(options: RealtimeOptions) -> Result<Self, ClientBuildError> {
        let sessions = VoyagerSessionManager::new(&options)?;
        let transport = HttpStreamTransport::new(&options)?;
        Ok(Self::with_components(sessions, transport, options))
    }
}

impl<M, T> RealtimeClient<M, T>
where
    M: SessionManager,
    T: StreamTransport,
{
    /// Creates a client over explicit session and transport implementations.
    pub fn with_components(sessions: M, transport: T, options: RealtimeOptions) -> Self {
        let (notices, notices_rx) = NoticeSink::channel(options.notice_buffer);
        let (state, state_rx, status_rx) = StateTracker::channel(options.status_buffer);
        let dispatcher = EventDispatcher::with_notices(options.dedup_window, notices.clone());

        Self {
            sessions: Arc::new(sessions),
            transport: Arc::new(transport),
            options,
            dispatcher,
            state,
            state_rx,
            status_rx: Mutex::new(Some(status_rx)),
            notices,
            notices_rx: Mutex::new(Some(notices_rx)),
            session: Arc::new(RwLock::new(None)),
            last_fatal: Arc::new(Mutex::new(None)),
            epoch: AtomicU64::new(0),
            run: Mutex::new(None),
        }
    }

    /// Authenticates and starts streaming in the background.
    ///
    /// A running client is stopped first. Authentication errors are returned
    /// directly and leave the client disconnected. A `stop` (or another
    /// `start`) issued while this call is still authenticating cancels it; it
    /// then returns `Ok` without streaming. Must be called within a tokio
    /// runtime.
    pub async fn start(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.stop();
        let epoch = self.epoch.load(Ordering::SeqCst);

        let session = self.sessions.authenticate(credentials).await?;

        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(event = "realtime_client_start_cancelled");
            return Ok(());
        }
        info!(event = "realtime_client_started", account_id = %session.account_id());
        *self.last_fatal.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = ReconnectController::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.transport),
            self.dispatcher.clone(),
            self.options.clone(),
            self.state.next_generation(),
            self.notices.clone(),
            Arc::clone(&self.session),
        );
        let last_fatal = Arc::clone(&self.last_fatal);

        self.dispatcher.start();
        let task = tokio::spawn(async move {
            if let RunOutcome::Fatal(fatal) = controller.run(session, shutdown_rx).await {
                *last_fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(fatal);
            }
        });
        let previous = run.replace(ActiveRun {
            shutdown: shutdown_tx,
            task,
        });
        drop(run);
        if let Some(previous) = previous {
            stop_run(previous);
        }
        Ok(())
    }

    /// Stops streaming. No subscriber callback runs after this returns.
    ///
    /// Idempotent, and safe to call from inside a subscriber.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let active = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.dispatcher.stop();
        if let Some(active) = active {
            stop_run(active);
            debug!(event = "realtime_client_stopped");
        }
        self.state.shut_down();
    }

    /// Registers a callback for every event. Handlers run on the stream
    /// worker and should return quickly.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler)
    }

    /// Registers a callback for one [`EventKind`].
    pub fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_kind(kind, handler)
    }

    /// Registers a queue; the subscription ends when the receiver is dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        self.dispatcher.subscribe_channel()
    }

    /// Removes a subscription. Its callback never runs after this returns.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that always holds the current connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Takes the state transition log. Returns `None` after the first call.
    ///
    /// The log holds `status_buffer` unread entries; transitions beyond that
    /// are dropped until it is drained.
    pub fn take_status(&self) -> Option<mpsc::Receiver<ConnectionState>> {
        self.status_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Takes the notice receiver. Returns `None` after the first call.
    pub fn take_notices(&self) -> Option<mpsc::Receiver<StreamNotice>> {
        self.notices_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Snapshot of the session the stream is currently using.
    pub fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The reason the last run ended, if it ended on authentication.
    pub fn last_fatal(&self) -> Option<FatalAuthError> {
        self.last_fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notices dropped because the notice queue was full.
    pub fn dropped_notices(&self) -> u64 {
        self.notices.dropped()
    }

    pub fn cursor(&self) -> StreamCursor {
        self.dispatcher.cursor().snapshot()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn options(&self) -> &RealtimeOptions {
        &self.options
    }
}

impl<M, T> Drop for RealtimeClient<M, T> {
    fn drop(&mut self) {
        if let Some(active) = self
            .run
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            stop_run(active);
        }
    }
}

fn stop_run(active: ActiveRun) {
    let _ = active.shutdown.send(true);
    active.task.abort();
}
