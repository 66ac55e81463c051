//! Session lifecycle as a pure transition function.
//!
//! ```text
//! Anonymous --FetchRequested--> Authenticating --LoginSucceeded--> Authenticated
//! Authenticated --MainPageLoaded--> PageReady --FetchRequested--> (send)
//! any --LoginRedirectObserved--> Anonymous
//! ```
//!
//! [`transition`] never performs I/O. The driver in [`crate::client`] carries
//! out the returned [`SessionAction`] and feeds the outcome back as the next
//! [`SessionEvent`].

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticating,
    /// Logged in. The token is optional: some portals rely on cookies alone.
    Authenticated { token: Option<String> },
    /// Logged in and the main page has initialised server-side view state.
    PageReady { token: Option<String> },
}

impl SessionState {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Authenticated { token } | Self::PageReady { token } => token.as_deref(),
            Self::Anonymous | Self::Authenticating => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. } | Self::PageReady { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated { .. } => "authenticated",
            Self::PageReady { .. } => "page_ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A caller wants to issue an authenticated request.
    FetchRequested,
    /// An explicit login was requested, whatever the current state.
    LoginStarted,
    LoginSucceeded { token: Option<String> },
    /// The portal answered and said no.
    LoginRejected { message: String },
    /// The login exchange did not complete.
    LoginUnreachable { reason: String },
    MainPageLoaded,
    MainPageFailed,
    /// A response's final URL was the login page.
    LoginRedirectObserved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Login,
    LoadMainPage,
    /// Ready: send the pending request.
    SendRequest,
    /// The session was invalidated; start over from `Anonymous`.
    Restart,
    Fail(SessionFailure),
    /// The event does not apply in this state.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    LoginRejected(String),
    LoginUnreachable(String),
    MainPageUnavailable,
}

/// Compute the next state and the action the driver must take.
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, SessionAction) {
    use SessionAction as A;
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (_, E::LoginRedirectObserved) => (S::Anonymous, A::Restart),
        (_, E::LoginStarted) => (S::Authenticating, A::Login),

        (S::Anonymous, E::FetchRequested) | (S::Authenticating, E::FetchRequested) => {
            (S::Authenticating, A::Login)
        }
        (S::Authenticating, E::LoginSucceeded { token }) => {
            (S::Authenticated { token }, A::LoadMainPage)
        }
        (S::Authenticating, E::LoginRejected { message }) => {
            (S::Anonymous, A::Fail(SessionFailure::LoginRejected(message)))
        }
        (S::Authenticating, E::LoginUnreachable { reason }) => {
            (S::Anonymous, A::Fail(SessionFailure::LoginUnreachable(reason)))
        }

        (S::Authenticated { token }, E::FetchRequested) => (S::Authenticated { token }, A::LoadMainPage),
        (S::Authenticated { token }, E::MainPageLoaded) => (S::PageReady { token }, A::SendRequest),
        (S::Authenticated { token }, E::MainPageFailed) => (
            S::Authenticated { token },
            A::Fail(SessionFailure::MainPageUnavailable),
        ),

        (S::PageReady { token }, E::FetchRequested) => (S::PageReady { token }, A::SendRequest),

        (state, _) => (state, A::Ignore),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(state: SessionState, event: SessionEvent) -> (SessionState, SessionAction) {
        transition(state, event)
    }

    #[test]
    fn happy_path_reaches_page_ready() {
        let (s, a) = step(SessionState::Anonymous, SessionEvent::FetchRequested);
        assert_eq!((s.clone(), a), (SessionState::Authenticating, SessionAction::Login));

        let (s, a) = step(s, SessionEvent::LoginSucceeded { token: Some("t".into()) });
        assert_eq!(a, SessionAction::LoadMainPage);
        assert_eq!(s.token(), Some("t"));

        let (s, a) = step(s, SessionEvent::MainPageLoaded);
        assert_eq!(s, SessionState::PageReady { token: Some("t".into()) });
        assert_eq!(a, SessionAction::SendRequest);

        let (s, a) = step(s, SessionEvent::FetchRequested);
        assert_eq!(a, SessionAction::SendRequest);
        assert_eq!(s.as_str(), "page_ready");
    }

    #[test]
    fn redirect_clears_token_from_any_state() {
        for state in [
            SessionState::Anonymous,
            SessionState::Authenticating,
            SessionState::Authenticated { token: Some("t".into()) },
            SessionState::PageReady { token: Some("t".into()) },
        ] {
            let (s, a) = step(state, SessionEvent::LoginRedirectObserved);
            assert_eq!(s, SessionState::Anonymous);
            assert_eq!(s.token(), None);
            assert_eq!(a, SessionAction::Restart);
        }
    }

    #[test]
    fn login_failures_return_to_anonymous() {
        let (s, a) = step(
            SessionState::Authenticating,
            SessionEvent::LoginRejected { message: "bad password".into() },
        );
        assert_eq!(s, SessionState::Anonymous);
        assert_eq!(a, SessionAction::Fail(SessionFailure::LoginRejected("bad password".into())));

        let (_, a) = step(
            SessionState::Authenticating,
            SessionEvent::LoginUnreachable { reason: "timeout".into() },
        );
        assert!(matches!(a, SessionAction::Fail(SessionFailure::LoginUnreachable(_))));
    }

    #[test]
    fn main_page_failure_keeps_login() {
        let authed = SessionState::Authenticated { token: None };
        let (s, a) = step(authed.clone(), SessionEvent::MainPageFailed);
        assert_eq!(s, authed);
        assert_eq!(a, SessionAction::Fail(SessionFailure::MainPageUnavailable));

        let (_, a) = step(s, SessionEvent::FetchRequested);
        assert_eq!(a, SessionAction::LoadMainPage);
    }

    #[test]
    fn explicit_login_drops_current_session() {
        let (s, a) = step(
            SessionState::PageReady { token: Some("old".into()) },
            SessionEvent::LoginStarted,
        );
        assert_eq!(s, SessionState::Authenticating);
        assert_eq!(a, SessionAction::Login);
    }

    #[test]
    fn stray_events_are_ignored() {
        let (s, a) = step(SessionState::Anonymous, SessionEvent::MainPageLoaded);
        assert_eq!((s, a), (SessionState::Anonymous, SessionAction::Ignore));
        let ready = SessionState::PageReady { token: None };
        let (s, a) = step(ready.clone(), SessionEvent::LoginSucceeded { token: Some("x".into()) });
        assert_eq!((s, a), (ready, SessionAction::Ignore));
    }
}
