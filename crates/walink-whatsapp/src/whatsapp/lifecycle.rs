//! Connection lifecycle management.
//!
//! A [`ConnectionManager`] owns the transport handle and the connection
//! state. `initialize` spawns one supervisor task per session; the task
//! opens the transport and retries transient closes with exponential
//! back-off until the session ends.
//!
//! Every mutation the supervisor makes is tagged with the session
//! generation it was spawned for. `disconnect` and `logout` bump the
//! generation, so a cancelled supervisor can never touch newer state.

use crate::whatsapp::cache::ClientCaches;
use crate::whatsapp::config::ClientConfig;
use crate::whatsapp::credentials::CredentialStore;
use crate::whatsapp::error::{WaError, WaResult};
use crate::whatsapp::jid;
use crate::whatsapp::pairing::PairingMethod;
use crate::whatsapp::transport::{ConnectOptions, Transport, TransportHandle, TransportSession};
use crate::whatsapp::types::{
    ClientEvent, CloseError, CloseReason, ConnectionPhase, ConnectionState, ConnectionUpdate,
    DisconnectStatus, TransportEvent,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

/// Outcome shared by every caller waiting on one session's `initialize`.
#[derive(Debug, Clone)]
enum InitStatus {
    Pending,
    Ready,
    Failed(WaError),
}

struct Session {
    generation: u64,
    cancel: watch::Sender<bool>,
    outcome: watch::Sender<InitStatus>,
}

struct Inner {
    generation: u64,
    handle: Option<Arc<dyn TransportHandle>>,
    session: Option<Session>,
}

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    caches: Arc<ClientCaches>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ClientEvent>,
    reconnects: AtomicU32,
}

/// How a single transport attempt ended.
enum AttemptEnd {
    /// `disconnect` or `logout` took over; nothing left to do.
    Cancelled,
    /// Retry after back-off. `opened` resets the failure streak.
    Transient { opened: bool, cause: WaError },
    /// Stop the session in `state`, rejecting a pending `initialize`.
    Terminal(ConnectionState, WaError),
}

#[derive(Default)]
struct AttemptState {
    opened: bool,
    pairing_requested: bool,
}

/// Drives the transport through connect, retry, and teardown.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        caches: Arc<ClientCaches>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                store,
                caches,
                inner: Mutex::new(Inner {
                    generation: 0,
                    handle: None,
                    session: None,
                }),
                state_tx,
                events_tx,
                reconnects: AtomicU32::new(0),
            }),
        }
    }

    /// Start (or join) a session and wait until the link opens.
    ///
    /// Concurrent callers share one supervisor and one outcome. Rejects with
    /// `LoggedOut`, `ReconnectExhausted`, `CredentialIo`, the transport's
    /// error, or `DisconnectedDuringInit`.
    pub async fn initialize(&self) -> WaResult<()> {
        self.shared.config.validate()?;

        let mut outcome_rx = {
            let mut inner = self.shared.inner.lock().await;
            let active = inner
                .session
                .as_ref()
                .map(|s| (s.generation, s.outcome.subscribe()));
            match active {
                Some((generation, outcome_rx)) => {
                    debug!("Joining active session {}", generation);
                    outcome_rx
                }
                None => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let (cancel_tx, cancel_rx) = watch::channel(false);
                    let (outcome_tx, outcome_rx) = watch::channel(InitStatus::Pending);
                    inner.session = Some(Session {
                        generation,
                        cancel: cancel_tx,
                        outcome: outcome_tx,
                    });
                    self.shared.reconnects.store(0, Ordering::SeqCst);
                    self.shared.set_state(ConnectionState::Connecting);
                    info!("Starting session {}", generation);
                    tokio::spawn(supervise(self.shared.clone(), generation, cancel_rx));
                    outcome_rx
                }
            }
        };

        wait_for_outcome(&mut outcome_rx).await
    }

    /// Stop the session and close the transport, keeping credentials.
    pub async fn disconnect(&self) {
        match self.stop_session().await {
            Some(handle) => {
                handle.end().await;
                info!("Disconnected");
            }
            None => debug!("Disconnect without an open transport"),
        }
    }

    /// Unlink the device and purge stored credentials.
    pub async fn logout(&self) -> WaResult<()> {
        if let Some(handle) = self.stop_session().await {
            if let Err(e) = handle.logout().await {
                warn!("Transport logout failed: {}", e);
            }
            handle.end().await;
        }
        self.shared.caches.clear().await;
        self.shared.store.purge().await?;
        info!(
            "Logged out; credentials at {} purged",
            self.shared.store.location()
        );
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Retries scheduled in the current session.
    pub fn reconnect_count(&self) -> u32 {
        self.shared.reconnects.load(Ordering::SeqCst)
    }

    /// The live transport handle, only while the link is open.
    pub async fn open_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        let inner = self.shared.inner.lock().await;
        if self.shared.state_tx.borrow().is_open() {
            inner.handle.clone()
        } else {
            None
        }
    }

    /// Cancel the supervisor, settle waiters, and take the handle.
    async fn stop_session(&self) -> Option<Arc<dyn TransportHandle>> {
        let mut inner = self.shared.inner.lock().await;
        let session = inner.session.take();
        let handle = inner.handle.take();

        if session.is_none()
            && handle.is_none()
            && *self.shared.state_tx.borrow() == ConnectionState::Disconnected
        {
            return None;
        }

        inner.generation += 1;
        if let Some(session) = session {
            session.cancel.send_replace(true);
            if settle(&session.outcome, InitStatus::Failed(WaError::disconnected_during_init())) {
                warn!("Session {} cancelled while initialization was pending", session.generation);
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        handle
    }
}

impl Shared {
    /// Publish a state change. Callers hold the `inner` lock.
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next.clone());
        if prev != next {
            info!("Connection state {} -> {}", prev, next);
            self.emit(ClientEvent::ConnectionStateChanged(next));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    async fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let inner = self.inner.lock().await;
        if inner.generation != generation {
            return false;
        }
        self.set_state(state);
        true
    }

    async fn install_handle(&self, generation: u64, handle: Arc<dyn TransportHandle>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return false;
        }
        inner.handle = Some(handle);
        true
    }

    /// Drop the attempt's handle. A session that had opened goes back to
    /// pending, so `initialize` callers wait for the next open.
    async fn release_handle(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.handle = None;
        if let Some(ref session) = inner.session {
            session.outcome.send_if_modified(|current| {
                if matches!(current, InitStatus::Ready) {
                    *current = InitStatus::Pending;
                    true
                } else {
                    false
                }
            });
        }
    }

    async fn mark_open(&self, generation: u64) {
        let inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        self.set_state(ConnectionState::Open);
        if let Some(ref session) = inner.session {
            if settle(&session.outcome, InitStatus::Ready) {
                info!("Session {} initialized", generation);
            }
        }
    }

    async fn init_pending(&self, generation: u64) -> bool {
        let inner = self.inner.lock().await;
        match inner.session {
            Some(ref s) if s.generation == generation && inner.generation == generation => {
                matches!(*s.outcome.borrow(), InitStatus::Pending)
            }
            _ => false,
        }
    }

    /// End the session for good.
    async fn finish(&self, generation: u64, state: ConnectionState, err: WaError) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.handle = None;
        self.set_state(state);
        if let Some(session) = inner.session.take() {
            if !settle(&session.outcome, InitStatus::Failed(err.clone())) {
                warn!("Session {} ended: {}", generation, err);
            }
        }
    }
}

fn settle(outcome: &watch::Sender<InitStatus>, status: InitStatus) -> bool {
    outcome.send_if_modified(move |current| {
        if matches!(current, InitStatus::Pending) {
            *current = status;
            true
        } else {
            false
        }
    })
}

async fn wait_for_outcome(rx: &mut watch::Receiver<InitStatus>) -> WaResult<()> {
    loop {
        let status = rx.borrow_and_update().clone();
        match status {
            InitStatus::Ready => return Ok(()),
            InitStatus::Failed(e) => return Err(e),
            InitStatus::Pending => {}
        }
        if rx.changed().await.is_err() {
            let last = rx.borrow().clone();
            return match last {
                InitStatus::Ready => Ok(()),
                InitStatus::Failed(e) => Err(e),
                InitStatus::Pending => Err(WaError::disconnected_during_init()),
            };
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Session supervisor: one attempt per loop iteration.
async fn supervise(shared: Arc<Shared>, generation: u64, mut cancel: watch::Receiver<bool>) {
    let policy = shared.config.reconnect.clone();
    let mut failures: u32 = 0;
    let mut opened_before = false;

    loop {
        match run_attempt(&shared, generation, &mut cancel, opened_before).await {
            AttemptEnd::Cancelled => {
                debug!("Supervisor {} cancelled", generation);
                return;
            }
            AttemptEnd::Terminal(state, err) => {
                error!("Session {} failed: {}", generation, err);
                shared.finish(generation, state, err).await;
                return;
            }
            AttemptEnd::Transient { opened, cause } => {
                debug!("Session {} attempt ended: {}", generation, cause);
                if opened {
                    opened_before = true;
                    failures = 0;
                }
                failures += 1;

                if policy.exhausted(failures) {
                    let err =
                        WaError::reconnect_exhausted(failures - 1).with_details(cause.to_string());
                    shared
                        .finish(generation, ConnectionState::Closed(CloseReason::Transient), err)
                        .await;
                    return;
                }
                if !shared
                    .transition(generation, ConnectionState::Closed(CloseReason::Transient))
                    .await
                {
                    return;
                }

                let delay = policy.delay_for(failures);
                info!("Reconnecting in {:?} (attempt {})", delay, failures);
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                shared.reconnects.fetch_add(1, Ordering::SeqCst);
                if !shared.transition(generation, ConnectionState::Connecting).await {
                    return;
                }
            }
        }
    }
}

async fn run_attempt(
    shared: &Arc<Shared>,
    generation: u64,
    cancel: &mut watch::Receiver<bool>,
    opened_before: bool,
) -> AttemptEnd {
    let auth = match shared.store.load().await {
        Ok(auth) => auth,
        Err(e) => return AttemptEnd::Terminal(ConnectionState::Failed(e.message.clone()), e),
    };
    if auth.is_fresh() {
        info!("No saved credentials; pairing required");
    }

    let options = ConnectOptions {
        browser: shared.config.browser.clone(),
        print_qr_in_terminal: false,
    };
    let deadline = tokio::time::sleep(shared.config.open_timeout());
    tokio::pin!(deadline);

    let connected = tokio::select! {
        biased;
        _ = cancelled(cancel) => return AttemptEnd::Cancelled,
        res = shared.transport.connect(auth, shared.config.version, &options) => res,
        _ = &mut deadline => Err(WaError::transport("Transport connect timed out").with_details(
            format!("no session within {}s", shared.config.open_timeout_secs),
        )),
    };

    let TransportSession { handle, mut events } = match connected {
        Ok(session) => session,
        Err(e) if opened_before => {
            warn!("Transport connect failed, will retry: {}", e);
            return AttemptEnd::Transient {
                opened: false,
                cause: e,
            };
        }
        Err(e) => return AttemptEnd::Terminal(ConnectionState::Failed(e.message.clone()), e),
    };

    if !shared.install_handle(generation, handle.clone()).await {
        handle.end().await;
        return AttemptEnd::Cancelled;
    }

    let mut attempt = AttemptState::default();

    let end = loop {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => return AttemptEnd::Cancelled,
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(end) =
                        handle_event(shared, generation, &handle, event, &mut attempt).await
                    {
                        break end;
                    }
                }
                None => {
                    warn!("Transport event stream ended");
                    break AttemptEnd::Transient {
                        opened: attempt.opened,
                        cause: WaError::transient("Transport event stream ended"),
                    };
                }
            },
            _ = &mut deadline, if !attempt.opened => {
                let cause = WaError::transient(format!(
                    "Connection did not open within {}s",
                    shared.config.open_timeout_secs
                ))
                .with_details(format!("status {}", DisconnectStatus::ConnectionLost.code()));
                warn!("{}", cause);
                break AttemptEnd::Transient {
                    opened: false,
                    cause,
                };
            }
        }
    };

    shared.release_handle(generation).await;
    handle.end().await;
    end
}

async fn handle_event(
    shared: &Arc<Shared>,
    generation: u64,
    handle: &Arc<dyn TransportHandle>,
    event: TransportEvent,
    attempt: &mut AttemptState,
) -> Option<AttemptEnd> {
    match event {
        TransportEvent::CredsUpdate(creds) => {
            if let Err(e) = shared.store.save(&creds).await {
                error!("Failed to persist credentials: {}", e);
                if shared.init_pending(generation).await {
                    return Some(AttemptEnd::Terminal(
                        ConnectionState::Failed(e.message.clone()),
                        e,
                    ));
                }
            }
            None
        }
        TransportEvent::ConnectionUpdate(update) => {
            on_connection_update(shared, generation, handle, update, attempt).await
        }
        TransportEvent::MessagesUpsert { messages, kind } => {
            debug!("{} message(s) upserted ({:?})", messages.len(), kind);
            shared.caches.put_inbound(&messages).await;
            for message in messages {
                shared.emit(ClientEvent::Message(message));
            }
            None
        }
        TransportEvent::GroupsUpsert(groups) => {
            shared.caches.put_groups(&groups).await;
            shared.emit(ClientEvent::GroupsUpsert(groups));
            None
        }
        TransportEvent::GroupsUpdate(updates) => {
            shared.caches.apply_group_updates(&updates).await;
            shared.emit(ClientEvent::GroupsUpdate(updates));
            None
        }
    }
}

async fn on_connection_update(
    shared: &Arc<Shared>,
    generation: u64,
    handle: &Arc<dyn TransportHandle>,
    update: ConnectionUpdate,
    attempt: &mut AttemptState,
) -> Option<AttemptEnd> {
    if let Some(qr) = update.qr {
        match shared.config.pairing_method {
            PairingMethod::QrCode => {
                info!("QR code received; scan it from the linked-devices screen");
                shared.emit(ClientEvent::Qr(qr));
            }
            PairingMethod::PhoneNumber if !attempt.pairing_requested => {
                attempt.pairing_requested = true;
                let phone = shared
                    .config
                    .phone_number
                    .as_deref()
                    .map(jid::digits_only)
                    .unwrap_or_default();
                match handle.request_pairing_code(&phone).await {
                    Ok(code) => {
                        info!("Pairing code issued for {}", phone);
                        shared.emit(ClientEvent::PairingCode(code));
                    }
                    Err(e) => error!("Failed to request pairing code: {}", e),
                }
            }
            PairingMethod::PhoneNumber => {}
        }
    }

    if let Some(code) = update.pairing_code {
        shared.emit(ClientEvent::PairingCode(code));
    }

    match update.phase {
        Some(ConnectionPhase::Open) => {
            if !attempt.opened {
                attempt.opened = true;
                shared.mark_open(generation).await;
            }
            None
        }
        Some(ConnectionPhase::Close) => {
            let close_error = update.close_error;
            let reason = CloseError::classify(close_error.as_ref());
            let status = close_error.as_ref().and_then(|e| e.status_code);
            let message = close_error.as_ref().map(|e| e.message.as_str()).unwrap_or("");
            warn!(
                "Connection closed (status {:?}, {}): {:?}",
                status, message, reason
            );
            match reason {
                CloseReason::LoggedOut => {
                    if let Err(e) = shared.store.purge().await {
                        error!("Failed to purge credentials: {}", e);
                    }
                    shared.caches.clear().await;
                    Some(AttemptEnd::Terminal(
                        ConnectionState::Closed(CloseReason::LoggedOut),
                        WaError::logged_out(&shared.store.location()),
                    ))
                }
                CloseReason::Transient => Some(AttemptEnd::Transient {
                    opened: attempt.opened,
                    cause: WaError::transient(format!("Connection closed: {}", message))
                        .with_details(match status {
                            Some(code) => format!("status {}", code),
                            None => "no status".to_string(),
                        }),
                }),
            }
        }
        Some(ConnectionPhase::Connecting) | None => None,
    }
}
