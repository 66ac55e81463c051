//! Portal endpoints, login parameters, and credentials.

use std::fmt;
use std::time::Duration;

/// Username and password for the portal login form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// `None` unless both parts are non-blank.
    pub fn new(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password))
                if !username.trim().is_empty() && !password.is_empty() =>
            {
                Some(Self { username, password })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the session needs to talk to one portal.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub login_page: String,
    pub login_api: String,
    pub main_page: String,
    pub data_api: String,
    /// Path template; `{doc_id}` is substituted.
    pub detail_api: String,
    pub application: String,
    pub otp: String,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl PortalConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            login_page: "/login.jsp".into(),
            login_api: "/services/LoginServices/loginWeb".into(),
            main_page: "/ext_main.jsp?locale=el".into(),
            data_api: "/services/DataServices/getListData".into(),
            detail_api: "/services/DataServices/fetchDataTableRecord/7/{doc_id}".into(),
            application: "2".into(),
            otp: String::new(),
            credentials: None,
            timeout: Duration::from_secs(15),
            accept_invalid_certs: false,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn login_page_url(&self) -> String {
        self.url(&self.login_page)
    }

    pub fn login_api_url(&self) -> String {
        self.url(&self.login_api)
    }

    pub fn main_page_url(&self) -> String {
        self.url(&self.main_page)
    }

    pub fn data_api_url(&self) -> String {
        self.url(&self.data_api)
    }

    pub fn detail_url(&self, doc_id: &str) -> String {
        self.url(&self.detail_api.replace("{doc_id}", doc_id))
    }
}
