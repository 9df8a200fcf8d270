//! # Peer Event Queue
//!
//! The session-side mailbox for one peer. It stores two kinds of entries, each
//! with its own monotonically increasing id:
//!
//! - **Events**: calls the session wants the peer to run. Each holds the sending
//!   half of a oneshot; acking the event sends the peer's result to the caller
//!   and removes the entry.
//! - **Futures**: results of long-running calls the peer made into the session.
//!   Each is a single-use slot written once by the completing call and removed
//!   when the peer acks (deletes) it.
//!
//! ## Invariants
//!
//! - Ids start at 1, strictly increase and are never reused.
//! - An entry stays listed until it is acked, so a poll may deliver it again.
//!   Running it at most once is the dispatcher's job.
//! - Acking an unknown id returns a `NotFound` error that callers drop.
//!
//! The state sits behind a mutex that is never held across an await point.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde_json::Map;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use crate::args::Args;
use crate::handles::EventId;
use crate::handles::FutureId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    EventNotFound(EventId),
    FutureNotFound(FutureId),
    /// The id counter ran out.
    Exhausted,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventNotFound(id) => write!(f, "event {} not found", id),
            Self::FutureNotFound(id) => write!(f, "future {} not found", id),
            Self::Exhausted => write!(f, "queue ids exhausted"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Value a future resolves to when its producer went away without writing it.
const ABANDONED_FUTURE: &str = "call abandoned before producing a result";

/// A pending session-to-peer call.
struct Event {
    call: String,
    args: Args,
    reply: oneshot::Sender<Value>,
}

/// A snapshot of a pending event, as delivered to the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct EventView {
    pub id: EventId,
    pub call: String,
    pub args: Args,
}

impl EventView {
    /// Wire form of a listed event: `[call, [positional...], {keyword...}]`.
    pub fn to_wire(&self) -> Value {
        Value::Array(vec![
            Value::String(self.call.clone()),
            Value::Array(self.args.positional.clone()),
            Value::Object(self.args.keyword.clone()),
        ])
    }

    /// Parses one listed event. Missing or mistyped argument slots are empty.
    pub fn from_wire(id: EventId, value: &Value) -> Option<Self> {
        let parts = value.as_array()?;
        let call = parts.first()?.as_str()?.to_string();
        let positional = parts
            .get(1)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let keyword = parts
            .get(2)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);

        Some(Self { id, call, args: Args { positional, keyword } })
    }
}

/// Wire form of an event listing: `{"<id>": [call, [args], {kwargs}], ...}`.
pub fn events_to_wire(events: &[EventView]) -> Value {
    let listed: Map<String, Value> = events
        .iter()
        .map(|event| (event.id.to_string(), event.to_wire()))
        .collect();
    Value::Object(listed)
}

/// Wire form of a future listing: `{"<id>": value, ...}`.
pub fn futures_to_wire(futures: BTreeMap<FutureId, Value>) -> Value {
    let listed: Map<String, Value> = futures
        .into_iter()
        .map(|(id, value)| (id.to_string(), value))
        .collect();
    Value::Object(listed)
}

enum FutureSlot {
    Pending(oneshot::Receiver<Value>),
    Resolved(Value),
}

#[derive(Default)]
struct Inner {
    last_event: u64,
    events: BTreeMap<EventId, Event>,
    last_future: u64,
    futures: BTreeMap<FutureId, FutureSlot>,
}

/// Ordered store of pending events and futures for one peer.
#[derive(Default)]
pub struct PeerEventQueue {
    inner: Mutex<Inner>,
}

impl PeerEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a call for the peer. The receiver yields the peer's result once the
    /// event is acked.
    pub fn post_event(&self, call: impl Into<String>, args: Args) -> Result<(EventId, oneshot::Receiver<Value>)> {
        let call = call.into();
        let (reply, rx) = oneshot::channel();

        let mut inner = self.lock();
        let next = inner.last_event.checked_add(1).ok_or(Error::Exhausted)?;
        inner.last_event = next;
        let id = EventId(next);
        debug!(event = %id, call = %call, "posted event");
        inner.events.insert(id, Event { call, args, reply });

        Ok((id, rx))
    }

    /// Snapshot of pending events in ascending id order.
    pub fn list_events(&self) -> Vec<EventView> {
        self.lock()
            .events
            .iter()
            .map(|(id, event)| EventView {
                id: *id,
                call: event.call.clone(),
                args: event.args.clone(),
            })
            .collect()
    }

    /// Delivers `result` to the caller waiting on event `id` and removes it.
    pub fn ack_event(&self, id: EventId, result: Value) -> Result<()> {
        let event = self.lock().events.remove(&id).ok_or(Error::EventNotFound(id))?;
        debug!(event = %id, call = %event.call, "acked event");

        // the caller may have stopped waiting; that is not the peer's problem
        if event.reply.send(result).is_err() {
            trace!(event = %id, "event caller already gone");
        }
        Ok(())
    }

    /// Reserves a future slot. The sender is written once by whoever completes
    /// the underlying call.
    pub fn post_future(&self) -> Result<(FutureId, oneshot::Sender<Value>)> {
        let (tx, rx) = oneshot::channel();

        let mut inner = self.lock();
        let next = inner.last_future.checked_add(1).ok_or(Error::Exhausted)?;
        inner.last_future = next;
        let id = FutureId(next);
        inner.futures.insert(id, FutureSlot::Pending(rx));
        debug!(future = %id, "posted future");

        Ok((id, tx))
    }

    /// Resolved futures by id. Unresolved slots are polled but not listed.
    pub fn list_futures(&self) -> BTreeMap<FutureId, Value> {
        let mut inner = self.lock();
        let mut resolved = BTreeMap::new();

        for (id, slot) in inner.futures.iter_mut() {
            if let FutureSlot::Pending(rx) = slot {
                let value = match rx.try_recv() {
                    Ok(value) => value,
                    Err(oneshot::error::TryRecvError::Empty) => continue,
                    Err(oneshot::error::TryRecvError::Closed) => Value::String(ABANDONED_FUTURE.into()),
                };
                *slot = FutureSlot::Resolved(value);
            }

            if let FutureSlot::Resolved(value) = slot {
                resolved.insert(*id, value.clone());
            }
        }

        resolved
    }

    /// Removes future `id`.
    pub fn ack_future(&self, id: FutureId) -> Result<()> {
        self.lock()
            .futures
            .remove(&id)
            .map(|_| debug!(future = %id, "acked future"))
            .ok_or(Error::FutureNotFound(id))
    }
}
