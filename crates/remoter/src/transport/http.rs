//! [`reqwest`]-backed implementation of [`Transport`].

use reqwest::Method;
use serde_json::Value;
use tracing::trace;

use super::ASYNC_HEADER;
use super::Error;
use super::Result;
use super::Route;
use super::Transport;

/// Talks to a session server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    type_url: String,
}

impl HttpTransport {
    /// `base_url` is the server root (`http://localhost:8080`), `type_name` the
    /// registered session type every route is relative to.
    pub fn new(base_url: &str, type_name: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, type_name)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, type_name: &str) -> Self {
        Self {
            client,
            type_url: format!("{}/{}", base_url.trim_end_matches('/'), type_name),
        }
    }

    fn request(&self, route: Route) -> reqwest::RequestBuilder {
        match route {
            Route::NewInstance => self.client.request(Method::POST, self.type_url.clone()),
            Route::NewPeer { instance } => self
                .client
                .request(Method::POST, format!("{}/{}/player", self.type_url, instance)),
            Route::Events { instance, peer } => self
                .client
                .request(Method::GET, format!("{}/{}/player/{}/e", self.type_url, instance, peer)),
            Route::AckEvent { instance, peer, event, result } => self
                .client
                .request(Method::POST, format!("{}/{}/player/{}/e/{}", self.type_url, instance, peer, event))
                .json(&result),
            Route::Futures { instance, peer } => self
                .client
                .request(Method::GET, format!("{}/{}/player/{}/f", self.type_url, instance, peer)),
            Route::AckFuture { instance, peer, future } => self
                .client
                .request(Method::DELETE, format!("{}/{}/player/{}/f/{}", self.type_url, instance, peer, future)),
            Route::Invoke { instance, method, args, long_running_for } => {
                let builder = self
                    .client
                    .request(Method::POST, format!("{}/{}/{}", self.type_url, instance, method))
                    .json(&args.into_body());
                match long_running_for {
                    Some(peer) => builder.header(ASYNC_HEADER, peer.to_string()),
                    None => builder,
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn call(&self, route: Route) -> Result<Value> {
        trace!(route = ?route, "sending");

        let response = self
            .request(route)
            .send()
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| Error::Io(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|e| Error::Decode(e.to_string()))
    }
}
