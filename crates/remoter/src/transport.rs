//! # Transport Abstraction
//!
//! A minimal, async interface for a peer process to reach the session server.
//!
//! ## Philosophy
//!
//! - **Route-Oriented**: The transport knows the seven routes of the protocol and
//!   moves JSON values along them. It knows nothing about events, futures or
//!   calling conventions; that lives in the client, proxy and dispatcher.
//! - **Peer-Initiated**: Every interaction is "send a request, await a reply".
//!   The session never reaches the peer except through replies to its polls.

pub mod http;
pub mod local;

pub use http::HttpTransport;
pub use local::LocalTransport;

use serde_json::Value;

use crate::args::Args;
use crate::handles::EventId;
use crate::handles::FutureId;
use crate::handles::InstanceId;
use crate::handles::PeerId;

/// Header that marks an invocation as long-running and names the issuing peer.
pub const ASYNC_HEADER: &str = "X-Remoter-Async";

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The server is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The server answered, but refused the request.
    Rejected { status: u16, message: String },
    /// The reply body was not valid JSON.
    Decode(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Rejected { status, message } => write!(f, "Rejected with status {}: {}", status, message),
            Self::Decode(msg) => write!(f, "Malformed reply: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One request of the protocol, relative to the transport's session type.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// `POST /{type}`
    NewInstance,
    /// `POST /{type}/{instance}/player`
    NewPeer { instance: InstanceId },
    /// `GET /{type}/{instance}/player/{pid}/e`
    Events { instance: InstanceId, peer: PeerId },
    /// `POST /{type}/{instance}/player/{pid}/e/{event}`
    AckEvent { instance: InstanceId, peer: PeerId, event: EventId, result: Value },
    /// `GET /{type}/{instance}/player/{pid}/f`
    Futures { instance: InstanceId, peer: PeerId },
    /// `DELETE /{type}/{instance}/player/{pid}/f/{future}`
    AckFuture { instance: InstanceId, peer: PeerId, future: FutureId },
    /// `POST /{type}/{instance}/{method}`, tagged with [`ASYNC_HEADER`] when
    /// `long_running_for` is set.
    Invoke {
        instance: InstanceId,
        method: String,
        args: Args,
        long_running_for: Option<PeerId>,
    },
}

/// A mechanism to send a request to the session server and receive its reply.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a request and waits for the decoded JSON reply.
    ///
    /// # invariants
    /// - An empty reply body decodes as `Value::Null`.
    /// - Must return `Err` if the server is unreachable or refuses the request.
    async fn call(&self, route: Route) -> Result<Value>;
}
