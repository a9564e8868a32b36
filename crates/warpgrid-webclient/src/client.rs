//! Entry point: hands out request builders bound to one transport.

use std::sync::Arc;

use crate::config::ClientOptions;
use crate::engine::RequestEngine;
use crate::header::HeaderMap;
use crate::request::{HttpRequest, Method, Target};
use crate::transport::{TcpTransport, Transport};

/// A web client.
///
/// Cheap to clone; clones share the transport and options. Every
/// request opens its own connection.
///
/// ```no_run
/// # async fn demo() -> warpgrid_webclient::Result<()> {
/// use warpgrid_webclient::{BodyCodec, WebClient};
///
/// let client = WebClient::new();
/// let resp = client
///     .get("localhost", 8080, "/wines")
///     .put_header("Accept", "application/json")
///     .codec(BodyCodec::json_value())
///     .send()
///     .await?;
/// println!("{} {}", resp.status(), resp.body());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WebClient {
    engine: Arc<RequestEngine>,
    options: Arc<ClientOptions>,
}

impl WebClient {
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Self {
        let transport = TcpTransport::new(options.write_queue_depth);
        Self::with_transport(options, Arc::new(transport))
    }

    /// Send through a custom [`Transport`].
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            engine: Arc::new(RequestEngine::new(transport)),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// A builder for `method` on `host:port` at `path` (path plus query).
    pub fn request(
        &self,
        method: Method,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> HttpRequest {
        let mut target = Target::new(host, port, path);
        target.tls = self.options.tls;

        let mut headers = HeaderMap::new();
        if let Some(agent) = &self.options.user_agent {
            headers.insert("User-Agent", agent.clone());
        }
        for (name, value) in &self.options.default_headers {
            headers.set(name.clone(), value.clone());
        }

        HttpRequest::new(
            self.engine.clone(),
            method,
            target,
            headers,
            self.options.default_timeout_duration(),
        )
    }

    pub fn get(&self, host: impl Into<String>, port: u16, path: impl Into<String>) -> HttpRequest {
        self.request(Method::Get, host, port, path)
    }

    pub fn head(&self, host: impl Into<String>, port: u16, path: impl Into<String>) -> HttpRequest {
        self.request(Method::Head, host, port, path)
    }

    pub fn delete(&self, host: impl Into<String>, port: u16, path: impl Into<String>) -> HttpRequest {
        self.request(Method::Delete, host, port, path)
    }

    pub fn post(&self, host: impl Into<String>, port: u16, path: impl Into<String>) -> HttpRequest {
        self.request(Method::Post, host, port, path)
    }

    pub fn put(&self, host: impl Into<String>, port: u16, path: impl Into<String>) -> HttpRequest {
        self.request(Method::Put, host, port, path)
    }

    pub fn patch(&self, host: impl Into<String>, port: u16, path: impl Into<String>) -> HttpRequest {
        self.request(Method::Patch, host, port, path)
    }

    pub fn options_request(
        &self,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> HttpRequest {
        self.request(Method::Options, host, port, path)
    }
}

impl Default for WebClient {
    fn default() -> Self {
        Self::new()
    }
}
