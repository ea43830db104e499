//! # SwKit Service Worker Lifecycle
//!
//! Service worker lifecycle host and handlers for SwKit.
//!
//! ## Features
//!
//! - **Scope**: worker-global-scope model with lifecycle listener registration
//! - **Extendable events**: `install` and `activate` with `wait_until`
//! - **Worker control**: `skip_waiting()`, `clients().claim()`
//! - **Driver**: host-side state machine awaiting deferred operations
//! - **Handlers**: the two-listener set a worker script registers at startup
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerScope (worker global scope)
//!     │
//!     ├── listeners (install, activate)
//!     ├── skip_waiting() ────────► PendingOp
//!     └── ClientsHandle
//!             └── claim() ───────► PendingOp
//!
//! Lifecycle driver
//!     Parsed ─► Installing ─► Installed ─► Activating ─► Activated
//!                   │
//!                   └─► Redundant (install failure)
//! ```
//!
//! Module initialization for a worker script is modeled by
//! [`register_lifecycle_handlers`]: it attaches the install handler (log,
//! defer completion on a skip-waiting request) and the activate handler
//! (log, claim open clients) to a scope the embedder owns.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use swkit_common::SwKitError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

// ==================== Errors ====================

/// Errors that can occur in lifecycle operations.
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    #[error("State error: {0}")]
    StateError(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Client error: {0}")]
    ClientError(String),
}

impl From<LifecycleError> for SwKitError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        SwKitError::lifecycle_with_source(message, err)
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script loaded but not yet installing.
    #[default]
    Parsed,
    /// Installing (install event in flight).
    Installing,
    /// Installed, not yet active.
    Installed,
    /// Activating (activate event in flight).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (install failed or worker replaced).
    Redundant,
}

/// Lifecycle event types delivered to the worker scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventType {
    Install,
    Activate,
}

impl std::fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEventType::Install => write!(f, "install"),
            LifecycleEventType::Activate => write!(f, "activate"),
        }
    }
}

/// How the activate handler settles its claim-clients request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimMode {
    /// Return the claim operation from the handler. The dispatcher discards
    /// handler return values, so activation timing is unaffected.
    #[default]
    Detached,
    /// Register the claim with the event via `wait_until`, so activation
    /// completes only once the claim settles.
    Extended,
}

// ==================== Pending Operations ====================

/// A deferred unit of work the host can await before advancing the
/// lifecycle.
pub type PendingOp = Pin<Box<dyn Future<Output = Result<(), LifecycleError>> + Send>>;

/// An already-settled pending operation.
pub fn resolved_op() -> PendingOp {
    Box::pin(async { Ok(()) })
}

// ==================== Extendable Event ====================

/// A lifecycle event whose completion can be extended with pending
/// operations.
pub struct ExtendableEvent {
    event_type: LifecycleEventType,
    pending: Vec<PendingOp>,
}

impl ExtendableEvent {
    /// Create a new event.
    pub fn new(event_type: LifecycleEventType) -> Self {
        Self {
            event_type,
            pending: Vec::new(),
        }
    }

    /// The event type.
    pub fn event_type(&self) -> LifecycleEventType {
        self.event_type
    }

    /// Register a pending operation. The host will not consider the event
    /// handled until the operation settles.
    pub fn wait_until<F>(&mut self, op: F)
    where
        F: Future<Output = Result<(), LifecycleError>> + Send + 'static,
    {
        self.pending.push(Box::pin(op));
    }

    /// Number of registered pending operations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Take the registered operations for awaiting.
    pub fn take_pending(&mut self) -> Vec<PendingOp> {
        std::mem::take(&mut self.pending)
    }
}

impl std::fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("event_type", &self.event_type)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ==================== Client ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A client (open page or worker within the scope).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controlled_by: Option<ServiceWorkerId>,
}

impl Client {
    /// Create a visible, uncontrolled window client.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controlled_by: None,
        }
    }

    /// Check if any worker controls this client.
    pub fn is_controlled(&self) -> bool {
        self.controlled_by.is_some()
    }
}

/// Options for [`ClientsHandle::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Include clients not controlled by this worker.
    pub include_uncontrolled: bool,
    /// Client type to match.
    pub client_type: ClientType,
}

// ==================== Lifecycle Events ====================

/// Host notifications emitted by the scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Worker state changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// The worker requested immediate activation.
    SkipWaitingRequested { worker_id: ServiceWorkerId },
    /// The worker claimed its clients.
    ClientsClaimed {
        worker_id: ServiceWorkerId,
        claimed: usize,
    },
}

// ==================== Worker Scope ====================

/// Callback invoked when a lifecycle event is dispatched. A returned
/// pending operation is discarded by the dispatcher; use
/// [`ExtendableEvent::wait_until`] to extend the event instead.
pub type ListenerCallback =
    Box<dyn Fn(&ServiceWorkerScope, &mut ExtendableEvent) -> Option<PendingOp> + Send + Sync>;

struct ListenerEntry {
    id: u64,
    event_type: LifecycleEventType,
    callback: ListenerCallback,
}

struct ScopeInner {
    worker_id: ServiceWorkerId,
    script_url: Url,
    state: RwLock<ServiceWorkerState>,
    state_changed_at: RwLock<Instant>,
    listeners: RwLock<Vec<Arc<ListenerEntry>>>,
    next_listener_id: AtomicU64,
    skip_waiting_requested: AtomicBool,
    skip_waiting_count: AtomicU64,
    clients: RwLock<HashMap<String, Client>>,
    claim_count: AtomicU64,
    event_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

/// The worker global scope: the object a worker script registers its
/// lifecycle listeners against. Cloning yields another handle to the same
/// scope.
#[derive(Clone)]
pub struct ServiceWorkerScope {
    inner: Arc<ScopeInner>,
}

impl std::fmt::Debug for ServiceWorkerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorkerScope")
            .field("worker_id", &self.inner.worker_id)
            .field("script_url", &self.inner.script_url)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceWorkerScope {
    /// Create a new scope for a worker script, returning the scope and the
    /// host notification receiver.
    pub fn new(script_url: Url) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                inner: Arc::new(ScopeInner {
                    worker_id: ServiceWorkerId::new(),
                    script_url,
                    state: RwLock::new(ServiceWorkerState::Parsed),
                    state_changed_at: RwLock::new(Instant::now()),
                    listeners: RwLock::new(Vec::new()),
                    next_listener_id: AtomicU64::new(1),
                    skip_waiting_requested: AtomicBool::new(false),
                    skip_waiting_count: AtomicU64::new(0),
                    clients: RwLock::new(HashMap::new()),
                    claim_count: AtomicU64::new(0),
                    event_tx,
                }),
            },
            event_rx,
        )
    }

    /// Worker ID.
    pub fn id(&self) -> ServiceWorkerId {
        self.inner.worker_id
    }

    /// Script URL.
    pub fn script_url(&self) -> &Url {
        &self.inner.script_url
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        *self.inner.state.read().unwrap()
    }

    /// Time of the last state change.
    pub fn state_changed_at(&self) -> Instant {
        *self.inner.state_changed_at.read().unwrap()
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state() == ServiceWorkerState::Redundant
    }

    /// Add a lifecycle event listener. Returns an ID usable with
    /// [`remove_listener`](Self::remove_listener).
    pub fn add_listener(&self, event_type: LifecycleEventType, callback: ListenerCallback) -> u64 {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().unwrap().push(Arc::new(ListenerEntry {
            id,
            event_type,
            callback,
        }));

        trace!("Added listener {} for {}", id, event_type);
        id
    }

    /// Remove a listener by ID.
    pub fn remove_listener(&self, listener_id: u64) -> bool {
        let mut listeners = self.inner.listeners.write().unwrap();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != listener_id);
        listeners.len() != before
    }

    /// Number of listeners registered for an event type.
    pub fn listener_count(&self, event_type: LifecycleEventType) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap()
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .count()
    }

    /// Request immediate activation, bypassing the waiting phase. The
    /// request takes effect when called; the returned operation settles when
    /// the request is recorded.
    pub fn skip_waiting(&self) -> PendingOp {
        self.inner.skip_waiting_requested.store(true, Ordering::Relaxed);
        self.inner.skip_waiting_count.fetch_add(1, Ordering::Relaxed);

        let _ = self.inner.event_tx.send(LifecycleEvent::SkipWaitingRequested {
            worker_id: self.inner.worker_id,
        });

        debug!(worker_id = ?self.inner.worker_id, "Skip-waiting requested");
        resolved_op()
    }

    /// Whether skip-waiting has been requested.
    pub fn skip_waiting_requested(&self) -> bool {
        self.inner.skip_waiting_requested.load(Ordering::Relaxed)
    }

    /// Number of skip-waiting requests issued.
    pub fn skip_waiting_count(&self) -> u64 {
        self.inner.skip_waiting_count.load(Ordering::Relaxed)
    }

    /// Handle to the client registry.
    pub fn clients(&self) -> ClientsHandle {
        ClientsHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Dispatch a lifecycle event to registered listeners and return the
    /// event with any `wait_until` operations collected. Listener return
    /// values are discarded.
    ///
    /// Dispatch holds no locks while listeners run; listeners may register
    /// or remove listeners, but changes only apply to later dispatches.
    pub fn dispatch(&self, event_type: LifecycleEventType) -> ExtendableEvent {
        let listeners: Vec<Arc<ListenerEntry>> = self
            .inner
            .listeners
            .read()
            .unwrap()
            .iter()
            .filter(|entry| entry.event_type == event_type)
            .cloned()
            .collect();

        let mut event = ExtendableEvent::new(event_type);
        debug!(event = %event_type, listeners = listeners.len(), "Dispatching lifecycle event");

        for entry in listeners {
            if let Some(op) = (entry.callback)(self, &mut event) {
                trace!("Listener {} returned a pending operation; dropping it", entry.id);
                drop(op);
            }
        }

        event
    }
}

// ==================== Clients ====================

/// Clients API attached to a worker scope.
#[derive(Clone)]
pub struct ClientsHandle {
    inner: Arc<ScopeInner>,
}

impl std::fmt::Debug for ClientsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientsHandle")
            .field("worker_id", &self.inner.worker_id)
            .field("clients", &self.inner.clients.read().unwrap().len())
            .finish()
    }
}

impl ClientsHandle {
    /// Add a client to the registry.
    pub fn add(&self, client: Client) {
        trace!("Client {} registered", client.id);
        self.inner.clients.write().unwrap().insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&self, id: &str) -> Option<Client> {
        self.inner.clients.write().unwrap().remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<Client> {
        self.inner.clients.read().unwrap().get(id).cloned()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.inner.clients.read().unwrap().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.clients.read().unwrap().is_empty()
    }

    /// Match clients by type and control status.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        self.inner
            .clients
            .read()
            .unwrap()
            .values()
            .filter(|client| {
                let type_matches = match options.client_type {
                    ClientType::All => true,
                    t => client.client_type == t,
                };
                let control_matches = options.include_uncontrolled
                    || client.controlled_by == Some(self.inner.worker_id);
                type_matches && control_matches
            })
            .cloned()
            .collect()
    }

    /// Take control of all registered clients. The claim takes effect when
    /// called; the returned operation settles when control is recorded.
    pub fn claim(&self) -> PendingOp {
        let claimed = {
            let mut clients = self.inner.clients.write().unwrap();
            for client in clients.values_mut() {
                client.controlled_by = Some(self.inner.worker_id);
            }
            clients.len()
        };

        self.inner.claim_count.fetch_add(1, Ordering::Relaxed);

        let _ = self.inner.event_tx.send(LifecycleEvent::ClientsClaimed {
            worker_id: self.inner.worker_id,
            claimed,
        });

        debug!(worker_id = ?self.inner.worker_id, claimed, "Clients claimed");
        resolved_op()
    }

    /// Number of claim requests issued.
    pub fn claim_count(&self) -> u64 {
        self.inner.claim_count.load(Ordering::Relaxed)
    }
}

// ==================== Lifecycle Handlers ====================

/// Install handler: emit the diagnostic line and defer installation
/// completion on a skip-waiting request.
pub fn handle_install(scope: &ServiceWorkerScope, event: &mut ExtendableEvent) {
    info!("Service Worker installed");
    event.wait_until(scope.skip_waiting());
}

/// Activate handler: emit the diagnostic line and claim open clients.
///
/// In [`ClaimMode::Detached`] the claim operation is returned to the
/// dispatcher, which discards it; the claim itself still takes effect. In
/// [`ClaimMode::Extended`] the claim is registered with the event instead.
pub fn handle_activate(
    scope: &ServiceWorkerScope,
    event: &mut ExtendableEvent,
    mode: ClaimMode,
) -> Option<PendingOp> {
    info!("Service Worker activated");
    let claim = scope.clients().claim();

    match mode {
        ClaimMode::Detached => Some(claim),
        ClaimMode::Extended => {
            event.wait_until(claim);
            None
        }
    }
}

/// Register both lifecycle handlers on a scope. This is the worker script's
/// module initialization: call once after constructing the scope, before
/// driving the lifecycle.
pub fn register_lifecycle_handlers(scope: &ServiceWorkerScope, mode: ClaimMode) {
    scope.add_listener(
        LifecycleEventType::Install,
        Box::new(|scope, event| {
            handle_install(scope, event);
            None
        }),
    );

    scope.add_listener(
        LifecycleEventType::Activate,
        Box::new(move |scope, event| handle_activate(scope, event, mode)),
    );

    debug!(worker_id = ?scope.id(), ?mode, "Lifecycle handlers registered");
}

// ==================== Lifecycle Driver ====================

impl ServiceWorkerScope {
    fn set_state(&self, state: ServiceWorkerState) {
        *self.inner.state.write().unwrap() = state;
        *self.inner.state_changed_at.write().unwrap() = Instant::now();

        let _ = self.inner.event_tx.send(LifecycleEvent::StateChange {
            worker_id: self.inner.worker_id,
            new_state: state,
        });

        trace!(worker_id = ?self.inner.worker_id, state = ?state, "State change");
    }

    /// Run the install phase: dispatch `install` and await every operation
    /// registered with the event. A failed operation marks the worker
    /// redundant.
    pub async fn install(&self) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != ServiceWorkerState::Parsed {
            return Err(LifecycleError::StateError(format!(
                "install requires a parsed worker, current state is {:?}",
                state
            )));
        }

        self.set_state(ServiceWorkerState::Installing);
        let mut event = self.dispatch(LifecycleEventType::Install);

        for op in event.take_pending() {
            if let Err(err) = op.await {
                warn!(error = %err, "Install aborted by failed deferred operation");
                self.set_state(ServiceWorkerState::Redundant);
                return Err(LifecycleError::InstallFailed(err.to_string()));
            }
        }

        self.set_state(ServiceWorkerState::Installed);
        Ok(())
    }

    /// Run the activate phase: dispatch `activate` and await registered
    /// operations. A failed operation does not demote the worker; the
    /// failure is logged and activation completes.
    pub async fn activate(&self) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != ServiceWorkerState::Installed {
            return Err(LifecycleError::StateError(format!(
                "activate requires an installed worker, current state is {:?}",
                state
            )));
        }

        self.set_state(ServiceWorkerState::Activating);
        let mut event = self.dispatch(LifecycleEventType::Activate);

        for op in event.take_pending() {
            if let Err(err) = op.await {
                warn!(error = %err, "Deferred operation failed during activation");
            }
        }

        self.set_state(ServiceWorkerState::Activated);
        Ok(())
    }

    /// Run the full lifecycle: install, then activate. With a skip-waiting
    /// request the waiting phase is bypassed; without one there is no prior
    /// worker to wait on, so activation proceeds either way.
    pub async fn run(&self) -> Result<(), LifecycleError> {
        self.install().await?;

        if self.skip_waiting_requested() {
            debug!(worker_id = ?self.id(), "Skip-waiting requested; bypassing the waiting phase");
        }

        self.activate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sw_url() -> Url {
        Url::parse("https://example.com/sw.js").unwrap()
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[test]
    fn test_scope_creation() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());

        assert_eq!(scope.state(), ServiceWorkerState::Parsed);
        assert!(!scope.is_active());
        assert!(!scope.skip_waiting_requested());
        assert_eq!(scope.skip_waiting_count(), 0);
        assert!(scope.clients().is_empty());
    }

    #[test]
    fn test_listener_registration_and_removal() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());

        let id = scope.add_listener(LifecycleEventType::Install, Box::new(|_, _| None));
        assert_eq!(scope.listener_count(LifecycleEventType::Install), 1);
        assert_eq!(scope.listener_count(LifecycleEventType::Activate), 0);

        assert!(scope.remove_listener(id));
        assert!(!scope.remove_listener(id));
        assert_eq!(scope.listener_count(LifecycleEventType::Install), 0);
    }

    #[test]
    fn test_registrar_attaches_two_handlers() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());

        register_lifecycle_handlers(&scope, ClaimMode::default());

        assert_eq!(scope.listener_count(LifecycleEventType::Install), 1);
        assert_eq!(scope.listener_count(LifecycleEventType::Activate), 1);
    }

    #[test]
    fn test_install_handler_defers_skip_waiting() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        register_lifecycle_handlers(&scope, ClaimMode::default());

        let event = scope.dispatch(LifecycleEventType::Install);

        assert_eq!(event.pending_count(), 1);
        assert_eq!(scope.skip_waiting_count(), 1);
        assert!(scope.skip_waiting_requested());
    }

    #[test]
    fn test_activate_handler_claims_clients() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        let clients = scope.clients();
        clients.add(Client::window("page-1", Url::parse("https://example.com/").unwrap()));
        clients.add(Client::window("page-2", Url::parse("https://example.com/map").unwrap()));
        register_lifecycle_handlers(&scope, ClaimMode::default());

        let event = scope.dispatch(LifecycleEventType::Activate);

        assert_eq!(event.pending_count(), 0);
        assert_eq!(clients.claim_count(), 1);
        assert_eq!(clients.get("page-1").unwrap().controlled_by, Some(scope.id()));
        assert_eq!(clients.get("page-2").unwrap().controlled_by, Some(scope.id()));
    }

    #[test]
    fn test_activate_handler_returns_claim_op() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        let mut event = ExtendableEvent::new(LifecycleEventType::Activate);

        let op = handle_activate(&scope, &mut event, ClaimMode::Detached);

        assert!(op.is_some());
        assert_eq!(event.pending_count(), 0);
        assert_eq!(scope.clients().claim_count(), 1);
    }

    #[test]
    fn test_activate_handler_extended_defers_claim() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        let mut event = ExtendableEvent::new(LifecycleEventType::Activate);

        let op = handle_activate(&scope, &mut event, ClaimMode::Extended);

        assert!(op.is_none());
        assert_eq!(event.pending_count(), 1);
        assert_eq!(scope.clients().claim_count(), 1);
    }

    #[test]
    fn test_repeated_dispatch_is_idempotent() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        register_lifecycle_handlers(&scope, ClaimMode::default());

        for _ in 0..3 {
            let event = scope.dispatch(LifecycleEventType::Install);
            assert_eq!(event.pending_count(), 1);
        }
        assert_eq!(scope.skip_waiting_count(), 3);

        for _ in 0..2 {
            scope.dispatch(LifecycleEventType::Activate);
        }
        assert_eq!(scope.clients().claim_count(), 2);
    }

    #[test]
    fn test_clients_add_get_remove() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        let clients = scope.clients();

        clients.add(Client::window("page-1", Url::parse("https://example.com/").unwrap()));
        assert_eq!(clients.len(), 1);

        let client = clients.get("page-1").unwrap();
        assert_eq!(client.client_type, ClientType::Window);
        assert!(!client.is_controlled());

        assert!(clients.remove("page-1").is_some());
        assert!(clients.get("page-1").is_none());
    }

    #[test]
    fn test_match_all_controlled_filter() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        let clients = scope.clients();
        clients.add(Client::window("a", Url::parse("https://example.com/").unwrap()));
        clients.add(Client::window("b", Url::parse("https://example.com/b").unwrap()));

        assert!(clients.match_all(ClientMatchOptions::default()).is_empty());

        let all = clients.match_all(ClientMatchOptions {
            include_uncontrolled: true,
            ..Default::default()
        });
        assert_eq!(all.len(), 2);

        let _ = clients.claim();

        let controlled = clients.match_all(ClientMatchOptions::default());
        assert_eq!(controlled.len(), 2);
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());

        let event = scope.dispatch(LifecycleEventType::Install);
        assert_eq!(event.pending_count(), 0);
    }

    #[test]
    fn test_state_serializes_for_diagnostics() {
        let json = serde_json::to_string(&ServiceWorkerState::Activated).unwrap();
        assert_eq!(json, "\"Activated\"");
    }

    #[test]
    fn test_lifecycle_event_serializes() {
        let event = LifecycleEvent::ClientsClaimed {
            worker_id: ServiceWorkerId::new(),
            claimed: 2,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ClientsClaimed"));
        assert!(json.contains("\"claimed\":2"));
    }

    #[test]
    fn test_error_converts_to_swkit_error() {
        let err: SwKitError = LifecycleError::StateError("bad transition".to_string()).into();
        assert_eq!(err.category(), "lifecycle");
    }

    #[tokio::test]
    async fn test_full_lifecycle_reaches_activated() {
        init_tracing();
        let (scope, mut rx) = ServiceWorkerScope::new(sw_url());
        scope
            .clients()
            .add(Client::window("page-1", Url::parse("https://example.com/").unwrap()));
        register_lifecycle_handlers(&scope, ClaimMode::default());

        scope.run().await.unwrap();

        assert!(scope.is_active());
        assert_eq!(scope.skip_waiting_count(), 1);
        assert_eq!(scope.clients().claim_count(), 1);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(
            events[0],
            LifecycleEvent::StateChange {
                new_state: ServiceWorkerState::Installing,
                ..
            }
        ));
        assert!(matches!(events[1], LifecycleEvent::SkipWaitingRequested { .. }));
        assert!(matches!(
            events[2],
            LifecycleEvent::StateChange {
                new_state: ServiceWorkerState::Installed,
                ..
            }
        ));
        assert!(matches!(
            events[3],
            LifecycleEvent::StateChange {
                new_state: ServiceWorkerState::Activating,
                ..
            }
        ));
        assert!(matches!(events[4], LifecycleEvent::ClientsClaimed { claimed: 1, .. }));
        assert!(matches!(
            events[5],
            LifecycleEvent::StateChange {
                new_state: ServiceWorkerState::Activated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_install_failure_marks_redundant() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        scope.add_listener(
            LifecycleEventType::Install,
            Box::new(|_, event| {
                event.wait_until(async {
                    Err(LifecycleError::OperationFailed("precache failed".to_string()))
                });
                None
            }),
        );

        let result = scope.install().await;

        assert!(matches!(result, Err(LifecycleError::InstallFailed(_))));
        assert!(scope.is_redundant());
    }

    #[tokio::test]
    async fn test_activate_requires_installed_worker() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());

        let result = scope.activate().await;

        assert!(matches!(result, Err(LifecycleError::StateError(_))));
    }

    #[tokio::test]
    async fn test_double_install_rejected() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        register_lifecycle_handlers(&scope, ClaimMode::default());

        scope.install().await.unwrap();
        let result = scope.install().await;

        assert!(matches!(result, Err(LifecycleError::StateError(_))));
    }

    #[tokio::test]
    async fn test_activate_extension_failure_still_activates() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        scope.add_listener(
            LifecycleEventType::Activate,
            Box::new(|_, event| {
                event.wait_until(async {
                    Err(LifecycleError::OperationFailed("claim refused".to_string()))
                });
                None
            }),
        );

        scope.install().await.unwrap();
        scope.activate().await.unwrap();

        assert!(scope.is_active());
    }

    #[tokio::test]
    async fn test_extended_mode_full_lifecycle() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        scope
            .clients()
            .add(Client::window("page-1", Url::parse("https://example.com/").unwrap()));
        register_lifecycle_handlers(&scope, ClaimMode::Extended);

        scope.run().await.unwrap();

        assert!(scope.is_active());
        assert_eq!(scope.clients().claim_count(), 1);
        assert!(scope.clients().get("page-1").unwrap().is_controlled());
    }

    #[tokio::test]
    async fn test_state_change_timestamps_advance() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());
        let created = scope.state_changed_at();
        register_lifecycle_handlers(&scope, ClaimMode::default());

        scope.install().await.unwrap();

        assert!(scope.state_changed_at() >= created);
        assert_eq!(scope.state(), ServiceWorkerState::Installed);
    }

    #[tokio::test]
    async fn test_skip_waiting_op_resolves() {
        let (scope, _rx) = ServiceWorkerScope::new(sw_url());

        scope.skip_waiting().await.unwrap();

        assert!(scope.skip_waiting_requested());
        assert_eq!(scope.skip_waiting_count(), 1);
    }
}
