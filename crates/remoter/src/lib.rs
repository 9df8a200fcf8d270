//! # remoter
//!
//! Bidirectional RPC between a hosted session and its peers, where the peer
//! initiates every exchange by polling.
//!
//! ## Architecture
//!
//! - **Session side**: an [`InstanceRegistry`] hosts session instances. Each
//!   peer of an instance owns a [`PeerEventQueue`]; the session calls a peer by
//!   posting an event through its [`PeerHandle`] and waits for the ack.
//! - **Peer side**: a [`Dispatcher`] polls its queue, runs each event against
//!   the peer's [`MethodTable`], acks the result, and delivers resolved futures
//!   to long-running [`SessionProxy`] calls.
//! - **Wire**: a [`Transport`] moves routes between the two. [`HttpTransport`]
//!   talks to a [`TransportServer`]; [`LocalTransport`] calls a registry in the
//!   same process.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use remoter::{DispatcherBuilder, HttpTransport, MethodTable};
//!
//! struct Echo;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = Arc::new(HttpTransport::new("http://localhost:8080", "echo"));
//! let dispatcher = DispatcherBuilder::new(transport)
//!     .connect(MethodTable::new().with_builtins(), |_proxy| Echo)
//!     .await?;
//!
//! std::process::exit(dispatcher.run().await);
//! # }
//! ```
//!
//! ## Wire format
//!
//! - Event listing: `{"<id>": [call, [positional...], {keyword...}]}`
//! - Future listing: `{"<id>": value}`
//! - Invocation body: `{"": [positional...], "<name>": value...}`

pub mod args;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod handles;
pub mod method;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;


pub use crate::args::Args;
pub use crate::client::Client;
pub use crate::config::ClientConfig;
pub use crate::config::ServerConfig;
pub use crate::dispatcher::Dispatcher;
pub use crate::dispatcher::DispatcherBuilder;
pub use crate::handles::EventId;
pub use crate::handles::FutureId;
pub use crate::handles::InstanceId;
pub use crate::handles::PeerId;
pub use crate::method::CallError;
pub use crate::method::CallResult;
pub use crate::method::CallingConvention;
pub use crate::method::Conventions;
pub use crate::method::MethodTable;
pub use crate::proxy::SessionProxy;
pub use crate::queue::PeerEventQueue;
pub use crate::registry::InstanceRegistry;
pub use crate::server::TransportServer;
pub use crate::session::PeerHandle;
pub use crate::session::Session;
pub use crate::session::SessionType;
pub use crate::transport::HttpTransport;
pub use crate::transport::LocalTransport;
pub use crate::transport::Transport;
