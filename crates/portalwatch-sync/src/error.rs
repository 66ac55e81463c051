use thiserror::Error;

/// Failures the caller is expected to act on.
///
/// Transient problems (timeouts, 5xx, undecodable bodies) are not errors:
/// fetches report them as `Ok(None)`.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("portal credentials are not configured")]
    MissingCredentials,
    #[error("portal rejected the login: {0}")]
    AuthenticationFailed(String),
    #[error("expected KEY=VALUE, got {0:?}")]
    InvalidParam(String),
    #[error("HTTP client setup failed: {0}")]
    Transport(String),
}
