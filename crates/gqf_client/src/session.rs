//! Subscription sessions.
//!
//! A [`Session`] owns the live state of one subscription key: its
//! connection state, the last data received and the last error. Transports
//! talk to it through a [`TransportSink`] minted for each connection
//! attempt. A sink from an attempt that has since been superseded is inert,
//! which keeps at most one connection feeding the session.
//!
//! ```text
//!            restart / ensure_started
//!   Pending ───────────────────────────▶ (connecting)
//!      ▲                                      │ first update
//!      │ restart                              ▼
//!   Closed ◀──── close / unsubscribe ──── Connected
//! ```
//!
//! Observers never mutate the session. They read snapshots through
//! [`Session::watch`] or get called back through [`Session::on_change`].

use crate::config::Environment;
use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult};
use crate::key::OperationKey;
use crate::operation::SubscriptionDescriptor;
use crate::transport::SubscriptionTransport;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No live connection yet. Initial state.
    Pending,
    /// A connection delivered at least one result.
    Connected,
    /// Torn down. A restart brings it back to `Pending`.
    Closed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable view of a session, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub data: Option<Value>,
    pub error: Option<ClientError>,
    /// The connection attempt whose results the session accepts.
    pub attempt: u64,
    /// Results delivered over the session's lifetime, counting repeats
    /// of the same data.
    pub updates: u64,
    /// True while an attempt is waiting for its first result.
    pub connecting: bool,
    /// The most recent attempt that reached `Connected`.
    pub last_connected_attempt: Option<u64>,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            state: SessionState::Pending,
            data: None,
            error: None,
            attempt: 0,
            updates: 0,
            connecting: false,
            last_connected_attempt: None,
        }
    }
}

/// A teardown callback registered by a transport.
pub type TeardownHook = Box<dyn FnOnce() -> ClientResult<()> + Send>;

struct Inner {
    state: SessionState,
    data: Option<Value>,
    error: Option<ClientError>,
    hooks: Vec<TeardownHook>,
    /// The attempt whose sink may drive the session.
    epoch: u64,
    /// Highest epoch handed out. Never reused.
    attempts: u64,
    /// Bumped by every caller-driven lifecycle change.
    generation: u64,
    updates: u64,
    connecting: bool,
    last_connected_attempt: Option<u64>,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            data: self.data.clone(),
            error: self.error.clone(),
            attempt: self.epoch,
            updates: self.updates,
            connecting: self.connecting,
            last_connected_attempt: self.last_connected_attempt,
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.attempts += 1;
        self.epoch = self.attempts;
        self.epoch
    }

    /// Marks the session closed and hands back the hooks to run.
    fn take_for_close(&mut self) -> Vec<TeardownHook> {
        self.state = SessionState::Closed;
        self.connecting = false;
        std::mem::take(&mut self.hooks)
    }
}

enum Begin {
    /// The environment cannot hold connections.
    Skip,
    Connect(u64),
}

enum Join {
    Wait(u64),
    Begin(Begin),
}

/// A refresh in flight: the connection being replaced.
struct Replaced {
    epoch: u64,
    generation: u64,
    hooks: Vec<TeardownHook>,
}

/// The live state of one subscription key.
pub struct Session {
    key: OperationKey,
    descriptor: SubscriptionDescriptor,
    context: OperationContext,
    transport: Arc<dyn SubscriptionTransport>,
    environment: Environment,
    inner: Mutex<Inner>,
    tx: watch::Sender<SessionSnapshot>,
}

impl Session {
    pub fn new(
        key: OperationKey,
        descriptor: SubscriptionDescriptor,
        context: OperationContext,
        transport: Arc<dyn SubscriptionTransport>,
        environment: Environment,
    ) -> Arc<Self> {
        let (tx, _) = watch::channel(SessionSnapshot::initial());
        Arc::new(Self {
            key,
            descriptor,
            context,
            transport,
            environment,
            inner: Mutex::new(Inner {
                state: SessionState::Pending,
                data: None,
                error: None,
                hooks: Vec::new(),
                epoch: 0,
                attempts: 0,
                generation: 0,
                updates: 0,
                connecting: false,
                last_connected_attempt: None,
            }),
            tx,
        })
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    /// The context the session connects with.
    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn data(&self) -> Option<Value> {
        self.inner.lock().data.clone()
    }

    pub fn error(&self) -> Option<ClientError> {
        self.inner.lock().error.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    /// Number of teardown hooks registered by the live connection.
    pub fn hook_count(&self) -> usize {
        self.inner.lock().hooks.len()
    }

    /// A receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// Calls `callback` with each new snapshot until the listener is
    /// cancelled or dropped. Bursts of changes may be coalesced into the
    /// latest one.
    ///
    /// Fails with `INTERNAL_ERROR` outside a tokio runtime.
    pub fn on_change<F>(&self, mut callback: F) -> ClientResult<ChangeListener>
    where
        F: FnMut(&SessionSnapshot) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::internal("change listeners must be registered inside a tokio runtime")
        })?;
        let mut rx = self.tx.subscribe();
        let handle = runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                callback(&snapshot);
            }
        });
        Ok(ChangeListener { handle })
    }

    fn publish(&self, inner: &Inner) {
        self.tx.send_replace(inner.snapshot());
    }

    fn run_hooks(&self, hooks: Vec<TeardownHook>) {
        for hook in hooks {
            if let Err(err) = hook() {
                let err = ClientError::teardown_hook_failure("a teardown hook failed").with_source(err);
                warn!(key = %self.key, error = %err, "ignoring teardown hook failure");
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Tears down any live or in-flight connection and connects again.
    ///
    /// Resolves once a connection delivers its first result. Fails if the
    /// transport rejects the attempt or the session closes before
    /// connecting. In a server-only environment resolves at once, leaving
    /// the session `Pending`.
    pub async fn restart(self: &Arc<Self>) -> ClientResult<()> {
        let (stale, begin) = {
            let mut inner = self.inner.lock();
            let stale = if inner.state == SessionState::Connected || inner.connecting {
                inner.take_for_close()
            } else {
                Vec::new()
            };
            (stale, self.begin_locked(&mut inner))
        };
        self.run_hooks(stale);
        self.run_begin(begin).await
    }

    /// Reconnects, tearing the old connection down only once the new one is
    /// live.
    ///
    /// If the new attempt fails, the old connection stays live and the
    /// session is `Connected` again, with the failure kept as its `error`.
    /// When another caller restarted or unsubscribed in the meantime, the
    /// old connection is torn down instead.
    pub async fn refresh(self: &Arc<Self>) -> ClientResult<()> {
        let swap = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Pending => None,
                SessionState::Closed => Some(None),
                SessionState::Connected => {
                    let epoch = inner.epoch;
                    let hooks = inner.take_for_close();
                    let begin = self.begin_locked(&mut inner);
                    let replaced = Replaced {
                        epoch,
                        generation: inner.generation,
                        hooks,
                    };
                    Some(Some((replaced, begin)))
                }
            }
        };

        match swap {
            None => {
                warn!(key = %self.key, "refresh called before the subscription started");
                Ok(())
            }
            Some(None) => self.restart().await,
            Some(Some((replaced, begin))) => match self.run_begin(begin).await {
                Ok(()) => {
                    debug!(key = %self.key, hooks = replaced.hooks.len(), "tearing down the replaced connection");
                    self.run_hooks(replaced.hooks);
                    Ok(())
                }
                Err(err) => {
                    self.resume(replaced);
                    Err(err)
                }
            },
        }
    }

    /// Hands the session back to the connection a failed refresh meant to
    /// replace.
    fn resume(&self, replaced: Replaced) {
        let stale = {
            let mut inner = self.inner.lock();
            if inner.generation != replaced.generation {
                debug!(key = %self.key, "session changed during a failed refresh; dropping the old connection");
                replaced.hooks
            } else {
                warn!(key = %self.key, attempt = replaced.epoch, "refresh failed; keeping the previous connection");
                inner.state = SessionState::Connected;
                inner.connecting = false;
                inner.epoch = replaced.epoch;
                inner.last_connected_attempt = Some(replaced.epoch);
                let leftover = std::mem::replace(&mut inner.hooks, replaced.hooks);
                self.publish(&inner);
                leftover
            }
        };
        self.run_hooks(stale);
    }

    /// Joins a connected or connecting session, or starts one that is idle
    /// or closed.
    pub async fn ensure_started(self: &Arc<Self>) -> ClientResult<()> {
        let join = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Connected => None,
                _ if inner.connecting => Some(Join::Wait(inner.epoch)),
                _ => Some(Join::Begin(self.begin_locked(&mut inner))),
            }
        };

        match join {
            None => Ok(()),
            Some(Join::Wait(epoch)) => self.wait_connected(epoch).await,
            Some(Join::Begin(begin)) => self.run_begin(begin).await,
        }
    }

    /// Closes the session and runs the teardown hooks. Safe to call
    /// repeatedly.
    pub fn unsubscribe(&self) {
        let hooks = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let hooks = inner.take_for_close();
            self.publish(&inner);
            hooks
        };
        debug!(key = %self.key, hooks = hooks.len(), "unsubscribed");
        self.run_hooks(hooks);
    }

    fn begin_locked(&self, inner: &mut Inner) -> Begin {
        inner.generation += 1;
        if inner.state == SessionState::Closed {
            inner.hooks.clear();
            inner.state = SessionState::Pending;
        }
        if self.environment == Environment::ServerOnly {
            debug!(key = %self.key, "not connecting in a server-only environment");
            self.publish(inner);
            return Begin::Skip;
        }
        inner.error = None;
        let epoch = inner.next_epoch();
        inner.connecting = true;
        self.publish(inner);
        Begin::Connect(epoch)
    }

    async fn run_begin(self: &Arc<Self>, begin: Begin) -> ClientResult<()> {
        match begin {
            Begin::Skip => Ok(()),
            Begin::Connect(epoch) => self.connect(epoch).await,
        }
    }

    async fn connect(self: &Arc<Self>, epoch: u64) -> ClientResult<()> {
        let sink = TransportSink {
            session: Arc::downgrade(self),
            epoch,
        };
        info!(key = %self.key, attempt = epoch, url = %self.descriptor.url, "connecting subscription");

        if let Err(err) = self
            .transport
            .connect(sink, self.descriptor.clone(), self.context.clone())
        {
            self.fail_attempt(epoch, err.clone());
            return Err(err);
        }
        self.wait_connected(epoch).await
    }

    /// Rolls back an attempt whose transport failed synchronously.
    fn fail_attempt(&self, epoch: u64, err: ClientError) {
        let hooks = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return;
            }
            warn!(key = %self.key, attempt = epoch, error = %err, "subscription transport failed to start");
            inner.state = SessionState::Pending;
            inner.connecting = false;
            if inner.last_connected_attempt == Some(epoch) {
                inner.last_connected_attempt = None;
            }
            inner.error = Some(err);
            // Orphan the sink handed to the failed transport.
            inner.next_epoch();
            let hooks = std::mem::take(&mut inner.hooks);
            self.publish(&inner);
            hooks
        };
        self.run_hooks(hooks);
    }

    /// Waits until an attempt at or after `epoch` connects, or the session
    /// settles without connecting.
    async fn wait_connected(&self, epoch: u64) -> ClientResult<()> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|snapshot| {
                snapshot
                    .last_connected_attempt
                    .is_some_and(|connected| connected >= epoch)
                    || snapshot.state == SessionState::Closed
                    || (snapshot.state == SessionState::Pending && !snapshot.connecting)
            })
            .await
            .map(|snapshot| {
                let connected = snapshot
                    .last_connected_attempt
                    .is_some_and(|connected| connected >= epoch);
                (connected, snapshot.error.clone())
            });

        match settled {
            Ok((true, _)) => Ok(()),
            Ok((false, error)) => Err(ClientError::connect_failure(error)),
            Err(_) => Err(ClientError::connection_closed("session dropped while connecting")),
        }
    }

    // =========================================================================
    // Transport callbacks
    // =========================================================================

    fn apply_update(&self, epoch: u64, data: Value, is_final: bool) {
        let hooks = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                debug!(key = %self.key, attempt = epoch, "dropping update from a superseded connection");
                return;
            }
            match inner.state {
                SessionState::Closed => {
                    warn!(key = %self.key, "update arrived after the subscription closed; dropping it");
                    return;
                }
                SessionState::Pending => {
                    inner.state = SessionState::Connected;
                    inner.connecting = false;
                    inner.last_connected_attempt = Some(epoch);
                    debug!(key = %self.key, attempt = epoch, "subscription connected");
                }
                SessionState::Connected => {}
            }
            inner.data = Some(data);
            inner.updates += 1;
            let hooks = if is_final {
                inner.take_for_close()
            } else {
                Vec::new()
            };
            self.publish(&inner);
            hooks
        };
        self.run_hooks(hooks);
    }

    fn apply_close(&self, epoch: u64, error: Option<ClientError>) {
        let hooks = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                debug!(key = %self.key, attempt = epoch, "dropping close from a superseded connection");
                return;
            }
            if inner.state == SessionState::Closed {
                return;
            }
            match &error {
                Some(err) => debug!(key = %self.key, error = %err, "subscription closed with an error"),
                None => debug!(key = %self.key, "subscription completed"),
            }
            if error.is_some() {
                inner.error = error;
            }
            let hooks = inner.take_for_close();
            self.publish(&inner);
            hooks
        };
        self.run_hooks(hooks);
    }

    fn register_hook(&self, epoch: u64, hook: TeardownHook) {
        let run_now = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state == SessionState::Closed {
                Some(hook)
            } else {
                inner.hooks.push(hook);
                None
            }
        };
        if let Some(hook) = run_now {
            debug!(key = %self.key, attempt = epoch, "connection already torn down; running hook now");
            self.run_hooks(vec![hook]);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        let inner = self.inner.lock();
        inner.epoch == epoch && inner.state != SessionState::Closed
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("attempt", &inner.epoch)
            .field("hooks", &inner.hooks.len())
            .finish()
    }
}

/// The callbacks one connection attempt uses to drive its session.
///
/// Once the attempt is superseded or the session is gone, `update` and
/// `close` do nothing and `on_unsubscribe` runs its hook immediately.
#[derive(Clone)]
pub struct TransportSink {
    session: Weak<Session>,
    epoch: u64,
}

impl TransportSink {
    /// Delivers a result.
    pub fn update(&self, data: Value) {
        if let Some(session) = self.session.upgrade() {
            session.apply_update(self.epoch, data, false);
        }
    }

    /// Delivers a result and closes the session.
    pub fn update_final(&self, data: Value) {
        if let Some(session) = self.session.upgrade() {
            session.apply_update(self.epoch, data, true);
        }
    }

    /// Registers a teardown callback, run when the session closes.
    pub fn on_unsubscribe<F>(&self, hook: F)
    where
        F: FnOnce() -> ClientResult<()> + Send + 'static,
    {
        match self.session.upgrade() {
            Some(session) => session.register_hook(self.epoch, Box::new(hook)),
            None => {
                if let Err(err) = hook() {
                    warn!(error = %err, "ignoring teardown hook failure");
                }
            }
        }
    }

    /// Ends the connection. An error is kept as the session's `error`.
    pub fn close(&self, error: Option<ClientError>) {
        if let Some(session) = self.session.upgrade() {
            session.apply_close(self.epoch, error);
        }
    }

    /// False once this attempt no longer owns the session.
    pub fn is_current(&self) -> bool {
        self.session
            .upgrade()
            .is_some_and(|session| session.is_current(self.epoch))
    }

    pub fn attempt(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink")
            .field("attempt", &self.epoch)
            .finish()
    }
}

/// A running [`Session::on_change`] listener. Dropping it stops the
/// listener.
#[derive(Debug)]
pub struct ChangeListener {
    handle: JoinHandle<()>,
}

impl ChangeListener {
    /// Stops the listener. Callbacks already running finish first.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
