//! # Protocol Client
//!
//! This module provides the `Client` abstraction used by the peer side.
//! It encapsulates building routes, transport invocation, and decoding of the
//! replies into typed values.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::args::Args;
use crate::handles::EventId;
use crate::handles::FutureId;
use crate::handles::InstanceId;
use crate::handles::PeerId;
use crate::queue::EventView;
use crate::transport;
use crate::transport::Route;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    /// The server replied with JSON of an unexpected shape.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Typed access to the protocol routes over any transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Decode(format!("{}: {}", what, e)))
}

/// Parses a `{"<id>": ...}` listing, skipping entries whose key is not an id.
fn keyed(what: &str, value: Value) -> Result<Vec<(u64, Value)>> {
    let entries = match value {
        Value::Object(map) => map,
        // an empty listing may come back as null
        Value::Null => return Ok(Vec::new()),
        other => return Err(Error::Decode(format!("{}: expected object, got {}", what, other))),
    };

    let mut parsed = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        match key.parse::<u64>() {
            Ok(id) => parsed.push((id, entry)),
            Err(_) => warn!(key = %key, "skipping {} entry with a non-numeric id", what),
        }
    }
    parsed.sort_by_key(|(id, _)| *id);
    Ok(parsed)
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn new_instance(&self) -> Result<InstanceId> {
        decode("instance id", self.transport.call(Route::NewInstance).await?)
    }

    pub async fn new_peer(&self, instance: InstanceId) -> Result<PeerId> {
        decode("peer id", self.transport.call(Route::NewPeer { instance }).await?)
    }

    /// Pending events in ascending id order.
    pub async fn events(&self, instance: InstanceId, peer: PeerId) -> Result<Vec<EventView>> {
        let listing = self.transport.call(Route::Events { instance, peer }).await?;

        let mut events = Vec::new();
        for (id, entry) in keyed("event", listing)? {
            match EventView::from_wire(EventId(id), &entry) {
                Some(event) => events.push(event),
                None => warn!(event = id, "skipping malformed event"),
            }
        }
        Ok(events)
    }

    pub async fn ack_event(&self, instance: InstanceId, peer: PeerId, event: EventId, result: Value) -> Result<()> {
        self.transport
            .call(Route::AckEvent { instance, peer, event, result })
            .await?;
        Ok(())
    }

    /// Resolved futures by id.
    pub async fn futures(&self, instance: InstanceId, peer: PeerId) -> Result<BTreeMap<FutureId, Value>> {
        let listing = self.transport.call(Route::Futures { instance, peer }).await?;
        Ok(keyed("future", listing)?
            .into_iter()
            .map(|(id, value)| (FutureId(id), value))
            .collect())
    }

    pub async fn ack_future(&self, instance: InstanceId, peer: PeerId, future: FutureId) -> Result<()> {
        self.transport
            .call(Route::AckFuture { instance, peer, future })
            .await?;
        Ok(())
    }

    /// Invokes a session method and returns its result.
    pub async fn invoke(&self, instance: InstanceId, method: &str, args: Args) -> Result<Value> {
        let route = Route::Invoke {
            instance,
            method: method.to_string(),
            args,
            long_running_for: None,
        };
        Ok(self.transport.call(route).await?)
    }

    /// Starts a long-running session method for `peer`; returns the future id
    /// its result will be listed under.
    pub async fn invoke_long_running(&self, instance: InstanceId, peer: PeerId, method: &str, args: Args) -> Result<FutureId> {
        let route = Route::Invoke {
            instance,
            method: method.to_string(),
            args,
            long_running_for: Some(peer),
        };
        decode("future id", self.transport.call(route).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned replies and records the routes it was asked for.
    struct ScriptedTransport {
        replies: Mutex<Vec<Value>>,
        seen: Mutex<Vec<Route>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn call(&self, route: Route) -> transport::Result<Value> {
            self.seen.lock().unwrap().push(route);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(transport::Error::ConnectionLost("script exhausted".into()));
            }
            Ok(replies.remove(0))
        }
    }

    #[tokio::test]
    async fn test_events_sorted_numerically() {
        let transport = ScriptedTransport::new(vec![json!({
            "10": ["b", [], {}],
            "9": ["a", [1], {"x": 2}],
            "junk": ["c", [], {}],
            "11": "not an event"
        })]);
        let client = Client::new(transport.clone());

        let events = client.events(InstanceId(1), PeerId(1000)).await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![EventId(9), EventId(10)]);
        assert_eq!(events[0].args.keyword.get("x"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_long_running_invoke_tags_peer() {
        let transport = ScriptedTransport::new(vec![json!(3)]);
        let client = Client::new(transport.clone());

        let future = client
            .invoke_long_running(InstanceId(1), PeerId(4242), "slow", Args::new())
            .await
            .unwrap();
        assert_eq!(future, FutureId(3));

        let seen = transport.seen.lock().unwrap();
        assert!(matches!(
            &seen[0],
            Route::Invoke { long_running_for: Some(PeerId(4242)), method, .. } if method == "slow"
        ));
    }

    #[tokio::test]
    async fn test_bad_ids_are_decode_errors() {
        let transport = ScriptedTransport::new(vec![json!("seven")]);
        let client = Client::new(transport);
        assert!(matches!(client.new_instance().await, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let client = Client::new(ScriptedTransport::new(vec![]));
        assert!(matches!(
            client.futures(InstanceId(1), PeerId(1000)).await,
            Err(Error::Transport(transport::Error::ConnectionLost(_)))
        ));
    }
}
