//! # Instance Registry
//!
//! Central store for hosted sessions. Maps registered type names to their
//! factories and method tables, and holds every live instance together with the
//! event queues of its peers.
//!
//! This is also where the route semantics live: the HTTP server and the
//! in-process transport are thin adapters over the methods below.
//!
//! Uses DashMap for concurrent access without a global lock, so peers of
//! different instances never contend.

use std::collections::BTreeMap;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::args::Args;
use crate::handles::EventId;
use crate::handles::FutureId;
use crate::handles::InstanceId;
use crate::handles::PeerId;
use crate::method::CallError;
use crate::method::CallResult;
use crate::method::MethodTable;
use crate::queue;
use crate::queue::EventView;
use crate::queue::PeerEventQueue;
use crate::session::PeerHandle;
use crate::session::Session;
use crate::session::SessionType;

/// Peer ids are drawn from this range.
pub const PEER_ID_RANGE: Range<u64> = 1000..10000;

/// Random draws attempted before peer allocation gives up.
pub const PEER_ID_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    TypeNotFound(String),
    InstanceNotFound(InstanceId),
    PeerNotFound(PeerId),
    MethodNotFound(String),
    /// No free peer id was found within the retry bound.
    PeerIdsExhausted(InstanceId),
    Queue(queue::Error),
}

impl Error {
    /// HTTP status an adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::TypeNotFound(_)
            | Self::InstanceNotFound(_)
            | Self::PeerNotFound(_)
            | Self::MethodNotFound(_) => 404,
            Self::PeerIdsExhausted(_) | Self::Queue(_) => 503,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeNotFound(name) => write!(f, "Session type not found: {}", name),
            Self::InstanceNotFound(id) => write!(f, "Instance not found: {}", id),
            Self::PeerNotFound(id) => write!(f, "Peer not found: {}", id),
            Self::MethodNotFound(name) => write!(f, "Method not found: {}", name),
            Self::PeerIdsExhausted(id) => write!(f, "No free peer id left on instance {}", id),
            Self::Queue(e) => write!(f, "Queue error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<queue::Error> for Error {
    fn from(e: queue::Error) -> Self {
        Self::Queue(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A registered session type with its concrete type erased.
trait SessionClass: Send + Sync {
    fn create(&self) -> Arc<dyn LiveSession>;
}

/// A running session with its concrete type erased.
trait LiveSession: Send + Sync {
    fn has_method(&self, name: &str) -> bool;
    fn invoke(&self, method: String, args: Args) -> BoxFuture<'static, CallResult>;
    fn peer_connected(&self, peer: PeerHandle) -> BoxFuture<'static, ()>;
}

impl<S: Session> SessionClass for SessionType<S> {
    fn create(&self) -> Arc<dyn LiveSession> {
        Arc::new(Bound {
            session: Arc::new((self.factory)()),
            methods: self.methods.clone(),
        })
    }
}

struct Bound<S> {
    session: Arc<S>,
    methods: Arc<MethodTable<S>>,
}

impl<S: Session> LiveSession for Bound<S> {
    fn has_method(&self, name: &str) -> bool {
        self.methods.get(name).is_some()
    }

    fn invoke(&self, method: String, args: Args) -> BoxFuture<'static, CallResult> {
        let session = self.session.clone();
        let methods = self.methods.clone();
        async move {
            AssertUnwindSafe(methods.invoke(session, &method, args))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(CallError::Application(format!("method '{}' panicked", method))))
        }
        .boxed()
    }

    fn peer_connected(&self, peer: PeerHandle) -> BoxFuture<'static, ()> {
        self.session.clone().peer_connected(peer)
    }
}

/// One running session and the queues of its peers.
pub struct Instance {
    id: InstanceId,
    type_name: String,
    session: Arc<dyn LiveSession>,
    peers: DashMap<PeerId, Arc<PeerEventQueue>>,
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    fn queue(&self, peer: PeerId) -> Result<Arc<PeerEventQueue>> {
        self.peers
            .get(&peer)
            .map(|entry| entry.value().clone())
            .ok_or(Error::PeerNotFound(peer))
    }

    /// Claims a random unused id from `range` and installs a fresh queue for it.
    fn allocate_peer(&self, rng: &mut impl Rng, range: Range<u64>, attempts: usize) -> Result<(PeerId, Arc<PeerEventQueue>)> {
        for _ in 0..attempts {
            let pid = PeerId(rng.gen_range(range.clone()));
            if let Entry::Vacant(slot) = self.peers.entry(pid) {
                let queue = Arc::new(PeerEventQueue::new());
                slot.insert(queue.clone());
                return Ok((pid, queue));
            }
        }
        Err(Error::PeerIdsExhausted(self.id))
    }
}

/// Registry of session types and their live instances.
pub struct InstanceRegistry {
    types: DashMap<String, Arc<dyn SessionClass>>,
    instances: DashMap<InstanceId, Arc<Instance>>,
    next_instance_id: AtomicU64,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
            instances: DashMap::new(),
            next_instance_id: AtomicU64::new(1),
        }
    }

    /// Makes a session type available under its name. Re-registering a name
    /// replaces the factory for future instances only.
    pub fn register<S: Session>(&self, session_type: SessionType<S>) {
        info!(session_type = %session_type.name, "registered session type");
        self.types.insert(session_type.name.clone(), Arc::new(session_type));
    }

    /// Builder-style variant of [`InstanceRegistry::register`].
    #[must_use]
    pub fn with<S: Session>(self, session_type: SessionType<S>) -> Self {
        self.register(session_type);
        self
    }

    /// Creates a new instance of `type_name`.
    pub fn new_instance(&self, type_name: &str) -> Result<InstanceId> {
        let class = self
            .types
            .get(type_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TypeNotFound(type_name.to_string()))?;

        let id = InstanceId(self.next_instance_id.fetch_add(1, Ordering::Relaxed));
        let instance = Instance {
            id,
            type_name: type_name.to_string(),
            session: class.create(),
            peers: DashMap::new(),
        };
        self.instances.insert(id, Arc::new(instance));

        info!(instance = %id, session_type = %type_name, "created instance");
        Ok(id)
    }

    /// Looks up an instance, checking it belongs to `type_name`.
    pub fn instance(&self, type_name: &str, id: InstanceId) -> Result<Arc<Instance>> {
        self.instances
            .get(&id)
            .map(|entry| entry.value().clone())
            .filter(|instance| instance.type_name == type_name)
            .ok_or(Error::InstanceNotFound(id))
    }

    /// Creates a peer on an instance and starts the session's connect hook for it.
    pub fn new_peer(&self, type_name: &str, instance: InstanceId) -> Result<PeerId> {
        let instance = self.instance(type_name, instance)?;
        let (pid, queue) = instance.allocate_peer(&mut rand::thread_rng(), PEER_ID_RANGE, PEER_ID_ATTEMPTS)?;

        info!(instance = %instance.id, peer = %pid, "peer connected");
        tokio::spawn(instance.session.peer_connected(PeerHandle::new(pid, queue)));

        Ok(pid)
    }

    pub fn events(&self, type_name: &str, instance: InstanceId, peer: PeerId) -> Result<Vec<EventView>> {
        let queue = self.instance(type_name, instance)?.queue(peer)?;
        Ok(queue.list_events())
    }

    /// Acks an event. Unknown event ids are ignored so duplicate acks are harmless.
    pub fn ack_event(&self, type_name: &str, instance: InstanceId, peer: PeerId, event: EventId, result: Value) -> Result<()> {
        let queue = self.instance(type_name, instance)?.queue(peer)?;
        if let Err(e) = queue.ack_event(event, result) {
            debug!(peer = %peer, error = %e, "ignoring ack");
        }
        Ok(())
    }

    pub fn futures(&self, type_name: &str, instance: InstanceId, peer: PeerId) -> Result<BTreeMap<FutureId, Value>> {
        let queue = self.instance(type_name, instance)?.queue(peer)?;
        Ok(queue.list_futures())
    }

    /// Acks a future. Unknown future ids are ignored.
    pub fn ack_future(&self, type_name: &str, instance: InstanceId, peer: PeerId, future: FutureId) -> Result<()> {
        let queue = self.instance(type_name, instance)?.queue(peer)?;
        if let Err(e) = queue.ack_future(future) {
            debug!(peer = %peer, error = %e, "ignoring future ack");
        }
        Ok(())
    }

    /// Runs a session method and returns its result. A failing method yields its
    /// error as a string result rather than an `Err`.
    pub async fn invoke(&self, type_name: &str, instance: InstanceId, method: &str, args: Args) -> Result<Value> {
        let instance = self.instance(type_name, instance)?;
        if !instance.session.has_method(method) {
            return Err(Error::MethodNotFound(method.to_string()));
        }

        debug!(instance = %instance.id, method = %method, "invoking");
        let result = instance.session.invoke(method.to_string(), args).await;
        Ok(settle(method, result))
    }

    /// Starts a session method on behalf of `peer` and returns at once with the
    /// id of the future its result will appear under.
    pub fn invoke_long_running(
        &self,
        type_name: &str,
        instance: InstanceId,
        peer: PeerId,
        method: &str,
        args: Args,
    ) -> Result<FutureId> {
        let instance = self.instance(type_name, instance)?;
        if !instance.session.has_method(method) {
            return Err(Error::MethodNotFound(method.to_string()));
        }

        let (future, slot) = instance.queue(peer)?.post_future()?;
        debug!(instance = %instance.id, peer = %peer, future = %future, method = %method, "invoking long-running");

        let call = instance.session.invoke(method.to_string(), args);
        let method = method.to_string();
        tokio::spawn(async move {
            let value = settle(&method, call.await);
            // the slot only closes if the queue itself is gone
            let _ = slot.send(value);
        });

        Ok(future)
    }
}

/// Turns a session method outcome into the value handed back to the peer.
fn settle(method: &str, result: CallResult) -> Value {
    match result {
        Ok(value) => value,
        Err(e) => {
            if let CallError::Application(msg) = &e {
                warn!(method = %method, error = %msg, "session method failed");
            }
            e.into_value()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;
    use std::collections::HashSet;

    struct Counter;

    #[async_trait::async_trait]
    impl Session for Counter {}

    async fn double(args: Args) -> CallResult {
        let n: i64 = args.get(0, "n")?;
        Ok(json!(n * 2))
    }

    async fn fail() -> CallResult {
        Err(CallError::Application("boom".into()))
    }

    async fn explode() -> CallResult {
        panic!("counter bug")
    }

    fn registry() -> InstanceRegistry {
        let methods = MethodTable::new()
            .sync("double", |_, args| double(args))
            .sync("fail", |_, _| fail())
            .sync("explode", |_, _| explode());
        InstanceRegistry::new().with(SessionType::new("counter", || Counter, methods))
    }

    #[tokio::test]
    async fn test_unknown_type_and_instance() {
        let reg = registry();
        assert_eq!(reg.new_instance("nope"), Err(Error::TypeNotFound("nope".into())));

        let id = reg.new_instance("counter").unwrap();
        assert!(reg.instance("counter", id).is_ok());
        assert_eq!(reg.instance("other", id).err(), Some(Error::InstanceNotFound(id)));
        assert_eq!(reg.new_peer("counter", InstanceId(999)), Err(Error::InstanceNotFound(InstanceId(999))));
    }

    #[tokio::test]
    async fn test_peer_ids_unique_and_in_range() {
        let reg = registry();
        let id = reg.new_instance("counter").unwrap();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let pid = reg.new_peer("counter", id).unwrap();
            assert!(PEER_ID_RANGE.contains(&pid.0));
            assert!(seen.insert(pid), "peer id {} handed out twice", pid);
        }
    }

    #[tokio::test]
    async fn test_peer_allocation_exhausts() {
        let reg = registry();
        let id = reg.new_instance("counter").unwrap();
        let instance = reg.instance("counter", id).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        instance.allocate_peer(&mut rng, 1000..1002, 1000).unwrap();
        instance.allocate_peer(&mut rng, 1000..1002, 1000).unwrap();
        let exhausted = instance.allocate_peer(&mut rng, 1000..1002, 1000);
        assert_eq!(exhausted.err(), Some(Error::PeerIdsExhausted(id)));
        assert_eq!(instance.peer_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_invoke_surfaces_failures_as_strings() {
        let reg = registry();
        let id = reg.new_instance("counter").unwrap();

        assert_eq!(reg.invoke("counter", id, "double", Args::new().arg(21)).await, Ok(json!(42)));
        assert_eq!(reg.invoke("counter", id, "fail", Args::new()).await, Ok(json!("boom")));
        assert!(matches!(
            reg.invoke("counter", id, "double", Args::new()).await,
            Ok(Value::String(msg)) if msg.contains("missing")
        ));
        assert_eq!(
            reg.invoke("counter", id, "missing", Args::new()).await,
            Err(Error::MethodNotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_panicking_method_answers_with_string() {
        let reg = registry();
        let id = reg.new_instance("counter").unwrap();
        let pid = reg.new_peer("counter", id).unwrap();

        assert_eq!(
            reg.invoke("counter", id, "explode", Args::new()).await,
            Ok(json!("method 'explode' panicked"))
        );

        let future = reg
            .invoke_long_running("counter", id, pid, "explode", Args::new())
            .unwrap();
        let value = loop {
            if let Some(value) = reg.futures("counter", id, pid).unwrap().remove(&future) {
                break value;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(value, json!("method 'explode' panicked"));

        // the instance keeps serving after a panic
        assert_eq!(reg.invoke("counter", id, "double", Args::new().arg(2)).await, Ok(json!(4)));
    }

    #[tokio::test]
    async fn test_long_running_invoke_resolves_future() {
        let reg = registry();
        let id = reg.new_instance("counter").unwrap();
        let pid = reg.new_peer("counter", id).unwrap();

        let future = reg
            .invoke_long_running("counter", id, pid, "double", Args::new().kwarg("n", 4))
            .unwrap();

        let value = loop {
            if let Some(value) = reg.futures("counter", id, pid).unwrap().remove(&future) {
                break value;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(value, json!(8));

        reg.ack_future("counter", id, pid, future).unwrap();
        // duplicate acks are fine
        reg.ack_future("counter", id, pid, future).unwrap();
        assert!(reg.futures("counter", id, pid).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_ack_is_noop() {
        let reg = registry();
        let id = reg.new_instance("counter").unwrap();
        let pid = reg.new_peer("counter", id).unwrap();

        reg.ack_event("counter", id, pid, EventId(17), json!(1)).unwrap();
        assert_eq!(
            reg.ack_event("counter", id, PeerId(1), EventId(1), json!(1)),
            Err(Error::PeerNotFound(PeerId(1)))
        );
    }
}
