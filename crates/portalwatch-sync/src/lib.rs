//! Portal access: session state machine, paginated list fetching, and
//! per-document detail lookups. The real HTTP transport is behind the `http`
//! feature.

mod client;
mod config;
mod error;
pub mod pager;
pub mod session;
pub mod transport;

#[cfg(feature = "http")]
pub mod http;

pub use client::{MAX_ATTEMPTS, PortalSession};
pub use config::{Credentials, PortalConfig};
pub use error::SyncError;
pub use pager::{FetchedList, ListPage, ListParams, MAX_PAGES, PageSource, fetch_all};
pub use session::{SessionAction, SessionEvent, SessionState, transition};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};

#[cfg(feature = "http")]
pub use http::ReqwestTransport;
