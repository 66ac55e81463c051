//! The seam between session logic and the HTTP stack.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Sent as `application/x-www-form-urlencoded` when non-empty.
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            form,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after redirects were followed.
    pub final_url: String,
    /// Value of the `jwt` response header, if any.
    pub jwt_header: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The portal signals an expired session by redirecting to its login page.
    pub fn redirected_to_login(&self) -> bool {
        self.final_url.to_lowercase().contains("login")
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// The request never produced a response (DNS, TLS, timeout, reset).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends requests, following redirects and keeping cookies between calls.
pub trait Transport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Cookies currently held for the portal.
    fn cookie_count(&self) -> usize;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_redirect_detection_is_case_insensitive() {
        let resp = HttpResponse {
            status: 200,
            final_url: "https://p.example/Login.jsp?expired=1".into(),
            jwt_header: None,
            body: String::new(),
        };
        assert!(resp.redirected_to_login());
        assert!(resp.is_success());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest::get("u").header("Authorization", "Bearer t");
        assert_eq!(req.header_value("authorization"), Some("Bearer t"));
        assert_eq!(req.header_value("referer"), None);
    }
}
