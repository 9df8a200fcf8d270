//! # Sessions and Peer Handles
//!
//! A session is the stateful object that peers connect to. It is described to the
//! registry by a [`SessionType`]: a name, a factory, and the table of methods
//! peers may invoke on it.
//!
//! The session talks to each connected peer through a [`PeerHandle`]. Calling a
//! method on the handle posts an event into that peer's queue and suspends until
//! the peer acks it. There is no timeout: a peer that never acks leaves the
//! caller waiting.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::args::Args;
use crate::handles::PeerId;
use crate::method::MethodTable;
use crate::queue;
use crate::queue::PeerEventQueue;

#[derive(Debug, Clone)]
pub enum Error {
    Queue(queue::Error),
    /// The queue holding the pending call was dropped before the peer replied.
    Disconnected(PeerId),
    /// The peer replied with a value of the wrong shape.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue(e) => write!(f, "Queue error: {}", e),
            Self::Disconnected(pid) => write!(f, "Peer {} disconnected before replying", pid),
            Self::Decode(msg) => write!(f, "Unexpected reply: {}", msg),
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

/// Behaviour the registry needs from a hosted session beyond its method table.
#[async_trait::async_trait]
pub trait Session: Send + Sync + 'static {
    /// Called once for every new peer, on its own task.
    async fn peer_connected(self: Arc<Self>, _peer: PeerHandle) {}
}

/// Session-side proxy for one remote peer.
#[derive(Clone)]
pub struct PeerHandle {
    id: PeerId,
    queue: Arc<PeerEventQueue>,
}

impl PeerHandle {
    pub(crate) fn new(id: PeerId, queue: Arc<PeerEventQueue>) -> Self {
        Self { id, queue }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Calls `method` on the peer and waits for its ack.
    ///
    /// If the peer method failed, the result is the failure rendered as a string.
    pub async fn call(&self, method: &str, args: Args) -> Result<Value> {
        let (_, rx) = self.queue.post_event(method, args)?;
        rx.await.map_err(|_| Error::Disconnected(self.id))
    }

    /// Like [`PeerHandle::call`], deserializing the reply.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: Args) -> Result<T> {
        let value = self.call(method, args).await?;
        serde_json::from_value(value).map_err(|e| Error::Decode(format!("{}: {}", method, e)))
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle").field("id", &self.id).finish()
    }
}

/// Everything the registry needs to host sessions of one type.
pub struct SessionType<S> {
    pub(crate) name: String,
    pub(crate) factory: Arc<dyn Fn() -> S + Send + Sync>,
    pub(crate) methods: Arc<MethodTable<S>>,
}

impl<S: Session> SessionType<S> {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn() -> S + Send + Sync + 'static,
        methods: MethodTable<S>,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            methods: Arc::new(methods),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &MethodTable<S> {
        &self.methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_call_resolves_on_ack() {
        let queue = Arc::new(PeerEventQueue::new());
        let handle = PeerHandle::new(PeerId(1234), queue.clone());

        let caller = tokio::spawn({
            let handle = handle.clone();
            async move { handle.call_as::<i64>("sum", Args::new().arg(1).arg(2).kwarg("x", 3)).await }
        });

        // wait for the event to land
        let event = loop {
            if let Some(event) = queue.list_events().into_iter().next() {
                break event;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(event.call, "sum");
        assert_eq!(event.args.positional, vec![json!(1), json!(2)]);

        queue.ack_event(event.id, json!(6)).unwrap();
        assert_eq!(caller.await.unwrap().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_unacked_call_keeps_waiting() {
        let queue = Arc::new(PeerEventQueue::new());
        let handle = PeerHandle::new(PeerId(1000), queue.clone());

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            handle.call("noop", Args::new()),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(queue.list_events().len(), 1);
    }
}
