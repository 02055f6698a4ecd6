//! Real-time WebSocket channel
//!
//! Clients connect to `/ws/{namespace}`. The first connection to a
//! namespace with a configured `out` handler starts that handler as a
//! background task; the namespace's running flag is claimed with a
//! compare-and-set so concurrent first connections start it once. The
//! flag is released when the handler returns, so a later connection
//! starts it again. A namespace with no clients and no running handler
//! is dropped from the hub.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use appshell_core::config::{Direction, RealtimeHandlerConfig};
use appshell_core::{ClientMessage, ServerMessage};

use crate::error::return_error;
use crate::state::AppState;

/// Events buffered per namespace before slow clients start lagging
const CHANNEL_CAPACITY: usize = 100;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A background task bound to a namespace
pub type RealtimeHandler = Arc<dyn Fn(RealtimeContext) -> HandlerFuture + Send + Sync>;

/// Wrap an async function as a [`RealtimeHandler`]
pub fn handler<F, Fut>(f: F) -> RealtimeHandler
where
    F: Fn(RealtimeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Handle given to a running background handler
#[derive(Clone)]
pub struct RealtimeContext {
    namespace: String,
    sender: broadcast::Sender<ServerMessage>,
    shutdown: watch::Receiver<bool>,
}

impl RealtimeContext {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Send an event to every client of the namespace. Returns the number
    /// of clients that will receive it.
    pub fn emit(&self, event: &str, data: Value) -> usize {
        self.sender.send(ServerMessage::emit(event, data)).unwrap_or(0)
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events sent to the namespace, including those from clients
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.sender.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once the hub is stopped
    pub async fn stopped(&self) {
        wait_stopped(self.shutdown.clone()).await;
    }
}

struct Namespace {
    sender: broadcast::Sender<ServerMessage>,
    running: AtomicBool,
}

impl Namespace {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            running: AtomicBool::new(false),
        }
    }
}

/// Releases a namespace's running flag when the handler task ends,
/// including by panic
struct RunningGuard(Arc<Namespace>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

struct Binding {
    handler_name: String,
    handler: Option<RealtimeHandler>,
}

struct HubInner {
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
    bindings: HashMap<String, Binding>,
    shutdown: watch::Sender<bool>,
}

/// Per-namespace broadcast channels and background handlers
#[derive(Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    /// Bind configured namespaces to the registered handlers
    pub fn new(config: &[RealtimeHandlerConfig], handlers: &BTreeMap<String, RealtimeHandler>) -> Self {
        let mut bindings = HashMap::new();
        for entry in config {
            tracing::info!("Adding realtime handler: {:?}", entry);
            if entry.direction != Direction::Out {
                tracing::warn!(
                    "Realtime handler '{}' for namespace {} is inbound only, not started on connect",
                    entry.handler,
                    entry.namespace
                );
                continue;
            }
            bindings.insert(
                entry.namespace.clone(),
                Binding {
                    handler_name: entry.handler.clone(),
                    handler: handlers.get(&entry.handler).cloned(),
                },
            );
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                namespaces: Mutex::new(HashMap::new()),
                bindings,
                shutdown,
            }),
        }
    }

    fn namespaces(&self) -> MutexGuard<'_, HashMap<String, Arc<Namespace>>> {
        self.inner
            .namespaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn existing(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces().get(name).cloned()
    }

    /// Subscribe a new client to `namespace` and start its handler if it
    /// is not already running
    pub fn connect(&self, namespace: &str) -> broadcast::Receiver<ServerMessage> {
        // subscribed under the lock; release checks the receiver count
        let (ns, receiver) = {
            let mut namespaces = self.namespaces();
            let ns = Arc::clone(
                namespaces
                    .entry(namespace.to_string())
                    .or_insert_with(|| Arc::new(Namespace::new())),
            );
            let receiver = ns.sender.subscribe();
            (ns, receiver)
        };
        self.start_handler(namespace, ns);
        receiver
    }

    /// Forget `namespace` once it has no clients and no running handler.
    /// Callers drop their receiver first.
    pub fn release(&self, namespace: &str) {
        let mut namespaces = self.namespaces();
        let idle = namespaces
            .get(namespace)
            .is_some_and(|ns| ns.sender.receiver_count() == 0 && !ns.running.load(Ordering::Acquire));
        if idle {
            namespaces.remove(namespace);
            tracing::debug!("Namespace {} released", namespace);
        }
    }

    #[cfg(test)]
    fn namespace_count(&self) -> usize {
        self.namespaces().len()
    }

    fn start_handler(&self, name: &str, ns: Arc<Namespace>) {
        let Some(binding) = self.inner.bindings.get(name) else {
            tracing::debug!("No realtime handler configured for namespace {}", name);
            return;
        };
        let Some(handler) = &binding.handler else {
            tracing::error!(
                "Realtime handler '{}' for namespace {} is not registered",
                binding.handler_name,
                name
            );
            return;
        };
        if self.is_stopped() {
            return;
        }
        if ns
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Background handler for namespace {} already running", name);
            return;
        }

        tracing::info!("Starting background handler '{}' for namespace {}", binding.handler_name, name);
        let ctx = RealtimeContext {
            namespace: name.to_string(),
            sender: ns.sender.clone(),
            shutdown: self.inner.shutdown.subscribe(),
        };
        let task = handler(ctx);
        let guard = RunningGuard(ns);
        let hub = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            task.await;
            drop(guard);
            hub.release(&name);
        });
    }

    /// True while the background handler of `namespace` is running
    pub fn is_running(&self, namespace: &str) -> bool {
        self.existing(namespace)
            .is_some_and(|ns| ns.running.load(Ordering::Acquire))
    }

    /// Send an event to every client of `namespace`
    pub fn emit(&self, namespace: &str, event: &str, data: Value) -> usize {
        self.existing(namespace)
            .and_then(|ns| ns.sender.send(ServerMessage::emit(event, data)).ok())
            .unwrap_or(0)
    }

    pub fn client_count(&self, namespace: &str) -> usize {
        self.existing(namespace)
            .map_or(0, |ns| ns.sender.receiver_count())
    }

    /// Stop the channel: clients get `closing` and are disconnected,
    /// handlers see the stop signal. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        let was_stopped = self.inner.shutdown.send_replace(true);
        if !was_stopped {
            tracing::info!("Realtime channel stopping");
        }
        !was_stopped
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Resolves once [`RealtimeHub::stop`] has been called
    pub async fn stopped(&self) {
        wait_stopped(self.inner.shutdown.subscribe()).await;
    }
}

async fn wait_stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(namespace): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if state.hub.is_stopped() {
        return return_error(StatusCode::SERVICE_UNAVAILABLE);
    }
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_websocket(socket, namespace, hub))
        .into_response()
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, namespace: String, hub: RealtimeHub) {
    let client_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("Client {} connected to namespace {}", client_id, namespace);

    let mut events = hub.connect(&namespace);
    let (mut sender, mut receiver) = socket.split();
    let stopped = hub.stopped();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(msg) => {
                        if send_message(&mut sender, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Client {} lagging, skipped {} events", client_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
                            Ok(ClientMessage::Emit { event, data }) => {
                                hub.emit(&namespace, &event, data);
                                None
                            }
                            Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
                        };
                        if let Some(reply) = reply {
                            if send_message(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Client {} disconnected", client_id);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!("Client {} socket error: {}", client_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            _ = &mut stopped => {
                let _ = send_message(&mut sender, &ServerMessage::Closing).await;
                break;
            }
        }
    }

    let _ = sender.close().await;
    drop(events);
    hub.release(&namespace);
    tracing::info!("Client {} cleaned up", client_id);
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn binding(namespace: &str, handler: &str, direction: Direction) -> RealtimeHandlerConfig {
        RealtimeHandlerConfig {
            namespace: namespace.into(),
            handler: handler.into(),
            direction,
        }
    }

    /// Handler counting its starts, running until the hub stops
    fn counting(starts: Arc<AtomicUsize>) -> RealtimeHandler {
        handler(move |ctx: RealtimeContext| {
            let starts = Arc::clone(&starts);
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                ctx.stopped().await;
            }
        })
    }

    #[tokio::test]
    async fn test_concurrent_connects_start_one_handler() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut handlers = BTreeMap::new();
        handlers.insert("ticker".to_string(), counting(Arc::clone(&starts)));
        let hub = RealtimeHub::new(&[binding("/live", "ticker", Direction::Out)], &handlers);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move { hub.connect("/live") }));
        }
        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(hub.is_running("/live"));
        assert_eq!(hub.client_count("/live"), 16);
        hub.stop();
    }

    #[tokio::test]
    async fn test_handler_restarts_after_finishing() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        let mut handlers = BTreeMap::new();
        handlers.insert(
            "once".to_string(),
            handler(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        let hub = RealtimeHub::new(&[binding("ns", "once", Direction::Out)], &handlers);

        let _first = hub.connect("ns");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!hub.is_running("ns"));

        let _second = hub.connect("ns");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_emit_reaches_namespace_clients_only() {
        let hub = RealtimeHub::new(&[], &BTreeMap::new());
        let mut live = hub.connect("live");
        let mut other = hub.connect("other");

        assert_eq!(hub.emit("live", "tick", json!(1)), 1);
        assert_eq!(live.recv().await.unwrap(), ServerMessage::emit("tick", json!(1)));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbound_and_unregistered_handlers_do_not_start() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut handlers = BTreeMap::new();
        handlers.insert("ticker".to_string(), counting(Arc::clone(&starts)));
        let hub = RealtimeHub::new(
            &[
                binding("in", "ticker", Direction::In),
                binding("missing", "nope", Direction::Out),
            ],
            &handlers,
        );

        let _a = hub.connect("in");
        let _b = hub.connect("missing");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_idle_namespaces_are_released() {
        let hub = RealtimeHub::new(&[], &BTreeMap::new());
        for i in 0..32 {
            let name = format!("scan-{i}");
            let receiver = hub.connect(&name);
            drop(receiver);
            hub.release(&name);
        }
        assert_eq!(hub.namespace_count(), 0);

        assert_eq!(hub.emit("never", "tick", json!(1)), 0);
        assert_eq!(hub.client_count("never"), 0);
        assert!(!hub.is_running("never"));
        assert_eq!(hub.namespace_count(), 0);
    }

    #[tokio::test]
    async fn test_release_keeps_namespaces_in_use() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut handlers = BTreeMap::new();
        handlers.insert("ticker".to_string(), counting(Arc::clone(&starts)));
        let hub = RealtimeHub::new(&[binding("live", "ticker", Direction::Out)], &handlers);

        let listener = hub.connect("chat");
        let worker = hub.connect("live");
        drop(worker);
        tokio::time::sleep(Duration::from_millis(50)).await;

        hub.release("chat");
        hub.release("live");
        assert_eq!(hub.namespace_count(), 2);

        hub.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.namespace_count(), 1);
        drop(listener);
        hub.release("chat");
        assert_eq!(hub.namespace_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_observed_once() {
        let hub = RealtimeHub::new(&[], &BTreeMap::new());
        assert!(!hub.is_stopped());
        assert!(hub.stop());
        assert!(!hub.stop());
        tokio::time::timeout(Duration::from_secs(1), hub.stopped())
            .await
            .unwrap();
    }
}
