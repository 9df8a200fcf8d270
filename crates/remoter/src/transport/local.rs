//! In-process transport that calls an [`InstanceRegistry`] directly.
//!
//! Used to run a session and its peers in one process, and by the test suite.

use std::sync::Arc;

use serde_json::Value;

use super::Error;
use super::Result;
use super::Route;
use super::Transport;
use crate::queue;
use crate::registry;
use crate::registry::InstanceRegistry;

pub struct LocalTransport {
    registry: Arc<InstanceRegistry>,
    type_name: String,
}

impl LocalTransport {
    pub fn new(registry: Arc<InstanceRegistry>, type_name: impl Into<String>) -> Self {
        Self {
            registry,
            type_name: type_name.into(),
        }
    }
}

fn rejected(e: registry::Error) -> Error {
    Error::Rejected {
        status: e.status_code(),
        message: e.to_string(),
    }
}

fn encode<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn call(&self, route: Route) -> Result<Value> {
        let registry = &self.registry;
        let name = self.type_name.as_str();

        match route {
            Route::NewInstance => encode(registry.new_instance(name).map_err(rejected)?),
            Route::NewPeer { instance } => encode(registry.new_peer(name, instance).map_err(rejected)?),
            Route::Events { instance, peer } => {
                let events = registry.events(name, instance, peer).map_err(rejected)?;
                Ok(queue::events_to_wire(&events))
            }
            Route::AckEvent { instance, peer, event, result } => {
                registry.ack_event(name, instance, peer, event, result).map_err(rejected)?;
                Ok(Value::Null)
            }
            Route::Futures { instance, peer } => {
                let futures = registry.futures(name, instance, peer).map_err(rejected)?;
                Ok(queue::futures_to_wire(futures))
            }
            Route::AckFuture { instance, peer, future } => {
                registry.ack_future(name, instance, peer, future).map_err(rejected)?;
                Ok(Value::Null)
            }
            Route::Invoke { instance, method, args, long_running_for: None } => {
                registry.invoke(name, instance, &method, args).await.map_err(rejected)
            }
            Route::Invoke { instance, method, args, long_running_for: Some(peer) } => {
                let future = registry
                    .invoke_long_running(name, instance, peer, &method, args)
                    .map_err(rejected)?;
                encode(future)
            }
        }
    }
}
