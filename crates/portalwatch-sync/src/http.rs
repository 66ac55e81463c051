//! Blocking reqwest transport with a shared cookie jar.

use std::sync::Arc;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use tracing::debug;

use crate::SyncError;
use crate::config::PortalConfig;
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

/// Real network transport for a [`crate::PortalSession`].
pub struct ReqwestTransport {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
}

impl ReqwestTransport {
    /// Build a client with the configured timeout and certificate policy.
    pub fn new(config: &PortalConfig) -> Result<Self, SyncError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Transport(format!("invalid base URL {:?}: {e}", config.base_url)))?;
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            jar,
            base_url,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let jwt_header = response
            .headers()
            .get("jwt")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().map_err(|e| TransportError(e.to_string()))?;
        debug!(url = %request.url, status, bytes = body.len(), "response received");

        Ok(HttpResponse {
            status,
            final_url,
            jwt_header,
            body,
        })
    }

    fn cookie_count(&self) -> usize {
        self.jar
            .cookies(&self.base_url)
            .and_then(|header| {
                header
                    .to_str()
                    .ok()
                    .map(|s| s.split(';').filter(|c| !c.trim().is_empty()).count())
            })
            .unwrap_or(0)
    }
}
