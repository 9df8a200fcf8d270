//! # Remote Dispatcher
//!
//! Runs inside the peer process. Each poll cycle:
//!
//! 1. Retries acks that failed to reach the server earlier.
//! 2. Fetches the pending events and the resolved futures.
//! 3. Hands every resolved future with a waiter to that waiter, then deletes it
//!    on the server. Futures whose waiter has not registered yet stay listed.
//! 4. Runs every event not already in flight. Synchronous methods run inline and
//!    are acked before the loop moves on; long-running methods are spawned.
//! 5. Retires the events whose ack went through. When nothing was found it
//!    sleeps for the poll interval, otherwise it polls again straight away.
//!
//! ## Invariants
//!
//! - An event id stays in `in_flight` from the moment it starts until its ack
//!   has been accepted, so a stale listing never runs it twice.
//! - Failures of a peer method are posted as string results. Only an exit
//!   request ends the loop, after its own ack has been posted.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::DashSet;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::client;
use crate::client::Client;
use crate::config::ClientConfig;
use crate::config::DEFAULT_POLL_INTERVAL;
use crate::handles::EventId;
use crate::handles::InstanceId;
use crate::handles::PeerId;
use crate::method::CallError;
use crate::method::CallingConvention;
use crate::method::Conventions;
use crate::method::MethodTable;
use crate::proxy::SessionProxy;
use crate::proxy::Waiters;
use crate::queue::EventView;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    Client(client::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client(e) => write!(f, "Client error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Self::Client(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fluent setup for a [`Dispatcher`]: where to connect, as whom, and how to
/// call the session.
pub struct DispatcherBuilder {
    client: Client,
    instance: Option<InstanceId>,
    peer: Option<PeerId>,
    poll_interval: Duration,
    conventions: Conventions,
}

impl DispatcherBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            client: Client::new(transport),
            instance: None,
            peer: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            conventions: Conventions::new(),
        }
    }

    /// Takes instance, peer and poll interval from a client config.
    #[must_use]
    pub fn config(self, config: &ClientConfig) -> Self {
        self.instance(config.instance)
            .peer(config.peer)
            .poll_interval(config.poll_interval)
    }

    #[must_use]
    pub fn instance(mut self, instance: Option<InstanceId>) -> Self {
        self.instance = instance;
        self
    }

    #[must_use]
    pub fn peer(mut self, peer: Option<PeerId>) -> Self {
        self.peer = peer;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Calling conventions of the session's methods, used by [`SessionProxy::call`].
    #[must_use]
    pub fn session_conventions(mut self, conventions: Conventions) -> Self {
        self.conventions = conventions;
        self
    }

    /// Creates the instance and peer if needed, then builds the peer object
    /// around its session proxy.
    ///
    /// A peer id is only reused when an instance id was given as well.
    pub async fn connect<P, F>(self, methods: MethodTable<P>, make_peer: F) -> Result<Dispatcher<P>>
    where
        P: Send + Sync + 'static,
        F: FnOnce(SessionProxy) -> P,
    {
        let (instance, peer) = match self.instance {
            Some(instance) => (instance, self.peer),
            None => {
                let instance = self.client.new_instance().await?;
                info!(instance = %instance, "created instance");
                (instance, None)
            }
        };

        let peer = match peer {
            Some(peer) => peer,
            None => {
                let peer = self.client.new_peer(instance).await?;
                info!(instance = %instance, peer = %peer, "registered peer");
                peer
            }
        };

        let waiters = Arc::new(Waiters::new());
        let proxy = SessionProxy::new(
            self.client.clone(),
            instance,
            peer,
            Arc::new(self.conventions),
            waiters.clone(),
        );
        let target = Arc::new(make_peer(proxy.clone()));

        Ok(Dispatcher {
            shared: Arc::new(Shared {
                client: self.client,
                instance,
                peer,
                target,
                methods: Arc::new(methods),
                completed: DashSet::new(),
                unacked: DashMap::new(),
                exit_code: OnceLock::new(),
            }),
            proxy,
            waiters,
            poll_interval: self.poll_interval,
            in_flight: HashSet::new(),
        })
    }
}

/// State shared between the poll loop and the tasks it spawns.
struct Shared<P> {
    client: Client,
    instance: InstanceId,
    peer: PeerId,
    target: Arc<P>,
    methods: Arc<MethodTable<P>>,
    /// Events whose ack was accepted since the last cycle.
    completed: DashSet<EventId>,
    /// Results that ran but could not be acked yet.
    unacked: DashMap<EventId, Value>,
    exit_code: OnceLock<i32>,
}

/// The peer-side poll loop.
pub struct Dispatcher<P> {
    shared: Arc<Shared<P>>,
    proxy: SessionProxy,
    waiters: Arc<Waiters>,
    poll_interval: Duration,
    in_flight: HashSet<EventId>,
}

impl<P: Send + Sync + 'static> Dispatcher<P> {
    pub fn instance_id(&self) -> InstanceId {
        self.shared.instance
    }

    pub fn peer_id(&self) -> PeerId {
        self.shared.peer
    }

    pub fn proxy(&self) -> &SessionProxy {
        &self.proxy
    }

    pub fn target(&self) -> &Arc<P> {
        &self.shared.target
    }

    /// Polls and dispatches until a peer method requests exit; returns its code.
    ///
    /// Poll failures are logged and retried after the poll interval.
    pub async fn run(mut self) -> i32 {
        info!(instance = %self.shared.instance, peer = %self.shared.peer, "dispatching");

        loop {
            let found = match self.poll_once().await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "poll failed");
                    false
                }
            };

            if let Some(code) = self.shared.exit_code.get() {
                info!(code = *code, "dispatcher stopping");
                return *code;
            }

            if !found {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Runs one poll cycle. Returns whether any event or future was found.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let shared = &self.shared;
        retry_unacked(shared).await;

        let events = shared.client.events(shared.instance, shared.peer).await?;
        let futures = shared.client.futures(shared.instance, shared.peer).await?;
        let mut found = false;

        for (future, value) in futures {
            let Some((_, waiter)) = self.waiters.remove(&future) else {
                trace!(future = %future, "no waiter yet");
                continue;
            };
            found = true;
            if waiter.send(value).is_err() {
                debug!(future = %future, "waiter gone");
            }
            if let Err(e) = shared.client.ack_future(shared.instance, shared.peer, future).await {
                // deleting is best-effort; the waiter already has its value
                warn!(future = %future, error = %e, "failed to ack future");
            }
        }

        for event in events {
            if self.in_flight.contains(&event.id) {
                continue;
            }
            found = true;
            self.in_flight.insert(event.id);

            match shared.methods.convention(&event.call) {
                CallingConvention::Sync => {
                    execute(shared.clone(), event).await;
                    if shared.exit_code.get().is_some() {
                        break;
                    }
                }
                CallingConvention::LongRunning => {
                    tokio::spawn(execute(shared.clone(), event));
                }
            }
        }

        let retired: Vec<EventId> = shared.completed.iter().map(|id| *id).collect();
        for id in retired {
            shared.completed.remove(&id);
            self.in_flight.remove(&id);
        }

        Ok(found)
    }

    /// Number of events started but not yet acked.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Runs one event's method and acks its result.
async fn execute<P: Send + Sync + 'static>(shared: Arc<Shared<P>>, event: EventView) {
    let EventView { id, call, args } = event;
    debug!(event = %id, call = %call, "launching");

    let outcome = AssertUnwindSafe(shared.methods.invoke(shared.target.clone(), &call, args))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(CallError::Application(format!("method '{}' panicked", call))));

    let mut exit = None;
    let reply = match outcome {
        Ok(value) => value,
        Err(CallError::Exit(code)) => {
            exit = Some(code);
            CallError::Exit(code).into_value()
        }
        Err(e) => {
            warn!(event = %id, call = %call, error = %e, "peer method failed");
            e.into_value()
        }
    };

    match shared.client.ack_event(shared.instance, shared.peer, id, reply.clone()).await {
        Ok(()) => {
            shared.completed.insert(id);
        }
        Err(e) => {
            warn!(event = %id, error = %e, "failed to ack event, will retry");
            shared.unacked.insert(id, reply);
        }
    }

    if let Some(code) = exit {
        info!(event = %id, code, "exit requested");
        if shared.exit_code.set(code).is_err() {
            debug!(event = %id, code, "exit already requested, keeping the first code");
        }
    }
}

async fn retry_unacked<P>(shared: &Shared<P>) {
    let pending: Vec<(EventId, Value)> = shared
        .unacked
        .iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();

    for (id, reply) in pending {
        match shared.client.ack_event(shared.instance, shared.peer, id, reply).await {
            Ok(()) => {
                shared.unacked.remove(&id);
                shared.completed.insert(id);
            }
            Err(e) => {
                warn!(event = %id, error = %e, "ack retry failed");
                return;
            }
        }
    }
}
