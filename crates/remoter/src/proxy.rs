//! # Session Proxy
//!
//! The peer's handle on the session. A synchronous call is one request/response
//! round trip. A long-running call returns a future id at once; the proxy parks a
//! oneshot under that id and the dispatcher's poll loop fills it in when the
//! session lists the future as resolved.
//!
//! ## Invariants
//!
//! - A long-running call only completes while a dispatcher for the same peer
//!   is polling. Issue it from a long-running peer method, never from a
//!   synchronous one.
//! - Each future id has at most one waiter; the dispatcher removes it when it
//!   delivers the value.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::args::Args;
use crate::client;
use crate::client::Client;
use crate::handles::FutureId;
use crate::handles::InstanceId;
use crate::handles::PeerId;
use crate::method::CallError;
use crate::method::CallingConvention;
use crate::method::Conventions;

#[derive(Debug, Clone)]
pub enum Error {
    Client(client::Error),
    /// The waiter for a long-running call was dropped before its future resolved.
    Abandoned(FutureId),
    /// The session replied with a value of the wrong shape.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client(e) => write!(f, "Client error: {}", e),
            Self::Abandoned(id) => write!(f, "Future {} abandoned before resolving", id),
            Self::Decode(msg) => write!(f, "Unexpected reply: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Self::Client(e)
    }
}

/// Lets peer methods propagate session call failures with `?`.
impl From<Error> for CallError {
    fn from(e: Error) -> Self {
        CallError::Application(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Oneshot senders for long-running calls awaiting their future, by future id.
pub(crate) type Waiters = DashMap<FutureId, oneshot::Sender<Value>>;

/// Peer-side proxy for the session instance.
#[derive(Clone)]
pub struct SessionProxy {
    client: Client,
    instance: InstanceId,
    peer: PeerId,
    conventions: Arc<Conventions>,
    waiters: Arc<Waiters>,
}

impl SessionProxy {
    pub(crate) fn new(
        client: Client,
        instance: InstanceId,
        peer: PeerId,
        conventions: Arc<Conventions>,
        waiters: Arc<Waiters>,
    ) -> Self {
        Self {
            client,
            instance,
            peer,
            conventions,
            waiters,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    /// Calls `method` using the calling convention the session declared for it.
    /// Methods the proxy has no declaration for are called synchronously.
    pub async fn call(&self, method: &str, args: Args) -> Result<Value> {
        let convention = self.conventions.get(method).copied().unwrap_or_default();
        match convention {
            CallingConvention::Sync => self.call_sync(method, args).await,
            CallingConvention::LongRunning => self.call_long_running(method, args).await,
        }
    }

    /// Like [`SessionProxy::call`], deserializing the reply.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: Args) -> Result<T> {
        let value = self.call(method, args).await?;
        serde_json::from_value(value).map_err(|e| Error::Decode(format!("{}: {}", method, e)))
    }

    /// One blocking round trip; returns the session method's result.
    pub async fn call_sync(&self, method: &str, args: Args) -> Result<Value> {
        Ok(self.client.invoke(self.instance, method, args).await?)
    }

    /// Starts `method` on the session and waits for its future to be delivered
    /// by the poll loop.
    pub async fn call_long_running(&self, method: &str, args: Args) -> Result<Value> {
        let future = self
            .client
            .invoke_long_running(self.instance, self.peer, method, args)
            .await?;

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(future, tx);
        debug!(future = %future, method = %method, "waiting on future");

        rx.await.map_err(|_| Error::Abandoned(future))
    }
}
