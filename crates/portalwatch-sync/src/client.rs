//! Drives the session state machine over a [`Transport`].

use chrono::Utc;
use portalwatch_core::{DetailFieldMap, DetailFields};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::pager::{ListPage, ListParams, PageSource};
use crate::session::{SessionAction, SessionEvent, SessionFailure, SessionState, transition};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::SyncError;

/// Attempts per authenticated request: the first call plus one retry
/// after a forced re-login.
pub const MAX_ATTEMPTS: usize = 2;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:145.0) Gecko/20100101 Firefox/145.0";

#[derive(Deserialize)]
struct LoginReply {
    #[serde(default)]
    success: bool,
    jwt: Option<String>,
    token: Option<String>,
    message: Option<String>,
}

/// An authenticated portal session.
pub struct PortalSession<T> {
    config: PortalConfig,
    transport: T,
    state: SessionState,
}

impl<T: Transport> PortalSession<T> {
    pub fn new(config: PortalConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            state: SessionState::Anonymous,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn apply(&mut self, event: SessionEvent) -> SessionAction {
        let from = self.state.as_str();
        let (next, action) = transition(std::mem::take(&mut self.state), event);
        debug!(from, to = next.as_str(), ?action, "session transition");
        self.state = next;
        action
    }

    /// Log in from scratch. `false` on missing credentials (without touching
    /// the network), on rejection, and on network failure.
    pub fn login(&mut self) -> bool {
        if self.config.credentials.is_none() {
            warn!("login skipped: no credentials configured");
            return false;
        }
        self.apply(SessionEvent::LoginStarted);
        let event = self.login_exchange();
        matches!(self.apply(event), SessionAction::LoadMainPage)
    }

    fn login_exchange(&mut self) -> SessionEvent {
        let Some(credentials) = self.config.credentials.clone() else {
            return SessionEvent::LoginRejected {
                message: "no credentials configured".into(),
            };
        };
        info!(username = %credentials.username, "logging in");

        let login_page = self.config.login_page_url();
        if let Err(e) = self.transport.send(&HttpRequest::get(&login_page)) {
            warn!(error = %e, "login page unreachable");
            return SessionEvent::LoginUnreachable { reason: e.0 };
        }

        let form = vec![
            ("username".to_string(), credentials.username),
            ("password".to_string(), credentials.password),
            ("application".to_string(), self.config.application.clone()),
            ("otp".to_string(), self.config.otp.clone()),
        ];
        let request = xhr(HttpRequest::post_form(self.config.login_api_url(), form), &login_page)
            .header("Origin", self.config.base_url.clone());
        let response = match self.transport.send(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "login request failed");
                return SessionEvent::LoginUnreachable { reason: e.0 };
            }
        };

        let mut token = response.jwt_header.clone().filter(|t| !t.is_empty());
        if matches!(response.status, 401 | 403) {
            warn!(status = response.status, "login rejected");
            return SessionEvent::LoginRejected {
                message: format!("HTTP {}", response.status),
            };
        }
        if !response.is_success() {
            warn!(status = response.status, "login failed");
            return SessionEvent::LoginUnreachable {
                reason: format!("HTTP {}", response.status),
            };
        }

        match response.json::<LoginReply>() {
            Ok(reply) => {
                if let Some(t) = reply.jwt.or(reply.token).filter(|t| !t.is_empty()) {
                    token = Some(t);
                }
                if reply.success {
                    info!(has_token = token.is_some(), "login succeeded");
                    SessionEvent::LoginSucceeded { token }
                } else {
                    let message = reply.message.unwrap_or_else(|| "unknown reason".into());
                    warn!(%message, "login rejected");
                    SessionEvent::LoginRejected { message }
                }
            }
            Err(_) if self.transport.cookie_count() > 1 => {
                info!("login reply was not JSON; continuing with session cookies");
                SessionEvent::LoginSucceeded { token }
            }
            Err(e) => {
                warn!(error = %e, "unreadable login reply");
                SessionEvent::LoginUnreachable {
                    reason: format!("unreadable login reply: {e}"),
                }
            }
        }
    }

    /// GET the main page so the portal initialises its view state. Safe to
    /// call repeatedly once logged in; before that nothing is sent and the
    /// call returns false.
    pub fn load_main_page(&mut self) -> bool {
        if !self.state.is_authenticated() {
            warn!("main page requested before login");
            return false;
        }
        let loaded = self.request_main_page();
        self.apply(if loaded {
            SessionEvent::MainPageLoaded
        } else {
            SessionEvent::MainPageFailed
        });
        loaded
    }

    fn request_main_page(&mut self) -> bool {
        let request = HttpRequest::get(self.config.main_page_url())
            .header("User-Agent", "Mozilla/5.0")
            .header("Accept", "text/html");
        match self.transport.send(&request) {
            Ok(response) if response.status == 200 => true,
            Ok(response) => {
                warn!(status = response.status, "main page failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "main page unreachable");
                false
            }
        }
    }

    /// Drive the state machine until a request may be sent.
    fn ensure_ready(&mut self) -> Result<bool, SyncError> {
        if !self.state.is_authenticated() && self.config.credentials.is_none() {
            return Err(SyncError::MissingCredentials);
        }
        let mut action = self.apply(SessionEvent::FetchRequested);
        loop {
            action = match action {
                SessionAction::Login => {
                    let event = self.login_exchange();
                    self.apply(event)
                }
                SessionAction::LoadMainPage => {
                    let event = if self.request_main_page() {
                        SessionEvent::MainPageLoaded
                    } else {
                        SessionEvent::MainPageFailed
                    };
                    self.apply(event)
                }
                SessionAction::SendRequest => return Ok(true),
                SessionAction::Fail(SessionFailure::LoginRejected(message)) => {
                    return Err(SyncError::AuthenticationFailed(message));
                }
                SessionAction::Fail(failure) => {
                    warn!(?failure, "session not ready");
                    return Ok(false);
                }
                SessionAction::Restart | SessionAction::Ignore => return Ok(false),
            };
        }
    }

    /// Authenticated GET with bounded re-login on a redirect to the login page.
    fn authenticated_get(
        &mut self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Option<HttpResponse>, SyncError> {
        for attempt in 1..=MAX_ATTEMPTS {
            if !self.ensure_ready()? {
                return Ok(None);
            }
            let mut request = xhr(HttpRequest::get(url), &self.config.main_page_url());
            request.query = query.to_vec();
            if let Some(token) = self.state.token() {
                request = request.header("Authorization", format!("Bearer {token}"));
            }

            let response = match self.transport.send(&request) {
                Ok(response) => response,
                Err(e) => {
                    warn!(url, error = %e, "request failed");
                    return Ok(None);
                }
            };
            if response.redirected_to_login() {
                self.apply(SessionEvent::LoginRedirectObserved);
                warn!(url, attempt, "redirected to login; session expired");
                continue;
            }
            if !response.is_success() {
                warn!(url, status = response.status, "request returned an error status");
                return Ok(None);
            }
            return Ok(Some(response));
        }
        warn!(url, attempts = MAX_ATTEMPTS, "still redirected to login after re-login");
        Ok(None)
    }

    /// One page of the list API.
    pub fn fetch_list(&mut self, params: &ListParams) -> Result<Option<ListPage>, SyncError> {
        let mut query = params.to_query();
        query.push(("_dc".to_string(), Utc::now().timestamp_millis().to_string()));
        let url = self.config.data_api_url();
        let Some(response) = self.authenticated_get(&url, &query)? else {
            return Ok(None);
        };
        match response.json::<ListPage>() {
            Ok(page) => Ok(Some(page)),
            Err(e) => {
                warn!(error = %e, "list response was not valid JSON");
                Ok(None)
            }
        }
    }

    /// Raw detail payload for one document.
    pub fn fetch_detail(&mut self, doc_id: &str) -> Result<Option<Value>, SyncError> {
        let doc_id = doc_id.trim();
        if doc_id.is_empty() {
            return Ok(None);
        }
        let url = self.config.detail_url(doc_id);
        let Some(response) = self.authenticated_get(&url, &[])? else {
            return Ok(None);
        };
        match response.json::<Value>() {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!(doc_id, error = %e, "detail response was not valid JSON");
                Ok(None)
            }
        }
    }

    /// Detail fields for one document, `None` when the lookup or the payload failed.
    pub fn lookup_detail(
        &mut self,
        doc_id: &str,
        fields: &DetailFieldMap,
    ) -> Result<Option<DetailFields>, SyncError> {
        Ok(self
            .fetch_detail(doc_id)?
            .and_then(|payload| DetailFields::from_payload(&payload, fields)))
    }
}

impl<T: Transport> PageSource for PortalSession<T> {
    fn fetch_page(&mut self, params: &ListParams) -> Result<Option<ListPage>, SyncError> {
        self.fetch_list(params)
    }
}

fn xhr(request: HttpRequest, referer: &str) -> HttpRequest {
    request
        .header("User-Agent", USER_AGENT)
        .header("Accept", "*/*")
        .header("Accept-Language", "el")
        .header("X-Requested-With", "XMLHttpRequest")
        .header("Referer", referer)
}
