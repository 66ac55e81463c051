//! Walking the list API page by page until the reported total is reached.

use portalwatch_core::value::lenient_count;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::SyncError;

/// Upper bound on requests per [`fetch_all`] call, for servers that keep
/// reporting a total they never deliver.
pub const MAX_PAGES: usize = 200;

/// Ordered list-API query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pairs: Vec<(String, String)>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query used for the incoming-request queue.
    pub fn incoming_defaults() -> Self {
        [
            ("isPoll", "false"),
            ("queryId", "6"),
            ("queryOwner", "2"),
            ("isCase", "false"),
            ("stateId", "welcomeGrid-23_dashboard0"),
            ("page", "1"),
            ("start", "0"),
            ("limit", "200"),
        ]
        .into_iter()
        .fold(Self::new(), |params, (k, v)| params.with(k, v))
    }

    /// Parse `KEY=VALUE` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for pair in pairs {
            let (key, value) = parse_pair(pair.as_ref())?;
            params.set(&key, value);
        }
        Ok(params)
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Replace `key` in place, or append it.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Apply every pair of `overrides` on top of these parameters.
    pub fn merged(mut self, overrides: &ListParams) -> Self {
        for (k, v) in &overrides.pairs {
            self.set(k, v.clone());
        }
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.get("limit").and_then(|v| v.trim().parse().ok())
    }

    /// Pairs as sent on the wire. Boolean-looking values are lower-cased.
    pub fn to_query(&self) -> Vec<(String, String)> {
        self.pairs
            .iter()
            .map(|(k, v)| {
                let v = if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false") {
                    v.to_ascii_lowercase()
                } else {
                    v.clone()
                };
                (k.clone(), v)
            })
            .collect()
    }
}

/// Split one `KEY=VALUE` argument.
fn parse_pair(raw: &str) -> Result<(String, String), SyncError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(SyncError::InvalidParam(raw.to_string())),
    }
}

/// One list-API response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_total")]
    pub total: Option<usize>,
}

fn lenient_total<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    Ok(lenient_count(&Value::deserialize(deserializer)?))
}

/// Anything that can serve one page of list results.
pub trait PageSource {
    /// `Ok(None)` for a transient failure.
    fn fetch_page(&mut self, params: &ListParams) -> Result<Option<ListPage>, SyncError>;
}

/// All rows collected by [`fetch_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedList {
    pub records: Vec<Value>,
    pub total: usize,
    /// False when a later page failed, came back empty, or the page cap was hit.
    pub complete: bool,
    pub requests: usize,
}

/// Fetch the first page, then keep advancing `start` until `total` rows are
/// collected.
///
/// `Ok(None)` only when the first page fails. A failure on a later page
/// returns what was collected so far.
pub fn fetch_all<S: PageSource + ?Sized>(
    source: &mut S,
    params: &ListParams,
) -> Result<Option<FetchedList>, SyncError> {
    let mut params = params.clone();
    let first = match source.fetch_page(&params)? {
        Some(page) if page.success => page,
        _ => return Ok(None),
    };

    let total = first.total.unwrap_or(first.data.len());
    let mut out = FetchedList {
        records: first.data,
        total,
        complete: true,
        requests: 1,
    };

    while out.records.len() < total {
        if out.requests >= MAX_PAGES {
            warn!(requests = out.requests, collected = out.records.len(), total, "page cap reached");
            out.complete = false;
            break;
        }
        params.set("start", out.records.len().to_string());
        out.requests += 1;
        let page = match source.fetch_page(&params)? {
            Some(page) if page.success && !page.data.is_empty() => page,
            _ => {
                warn!(collected = out.records.len(), total, "pagination stopped early");
                out.complete = false;
                break;
            }
        };
        out.records.extend(page.data);
        info!(collected = out.records.len(), total, "fetched page");
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Serves `total` numbered rows in pages of `limit`, honouring `start`.
    struct FakeList {
        total: usize,
        reported_total: usize,
        limit: usize,
        fail_at: Option<usize>,
        calls: Vec<usize>,
    }

    impl FakeList {
        fn new(total: usize, limit: usize) -> Self {
            Self {
                total,
                reported_total: total,
                limit,
                fail_at: None,
                calls: Vec::new(),
            }
        }
    }

    impl PageSource for FakeList {
        fn fetch_page(&mut self, params: &ListParams) -> Result<Option<ListPage>, SyncError> {
            let start: usize = params.get("start").unwrap_or("0").parse().unwrap();
            self.calls.push(start);
            if self.fail_at == Some(self.calls.len()) {
                return Ok(None);
            }
            let end = (start + self.limit).min(self.total);
            let data = (start..end).map(|i| json!({ "n": i })).collect();
            Ok(Some(ListPage {
                success: true,
                data,
                total: Some(self.reported_total),
            }))
        }
    }

    fn params(limit: usize) -> ListParams {
        ListParams::new().with("start", "0").with("limit", limit.to_string())
    }

    #[test]
    fn converges_in_ceil_total_over_limit() {
        for (total, limit) in [(450, 200), (400, 200), (1, 200), (0, 50), (1000, 7)] {
            let mut source = FakeList::new(total, limit);
            let fetched = fetch_all(&mut source, &params(limit)).unwrap().unwrap();
            assert_eq!(fetched.records.len(), total);
            assert_eq!(fetched.requests, total.div_ceil(limit).max(1));
            assert!(fetched.complete);
        }
    }

    #[test]
    fn start_advances_by_collected_count() {
        let mut source = FakeList::new(5, 2);
        fetch_all(&mut source, &params(2)).unwrap();
        assert_eq!(source.calls, vec![0, 2, 4]);
    }

    #[test]
    fn later_failure_keeps_partial_rows() {
        let mut source = FakeList::new(10, 3);
        source.fail_at = Some(3);
        let fetched = fetch_all(&mut source, &params(3)).unwrap().unwrap();
        assert_eq!(fetched.records.len(), 6);
        assert!(!fetched.complete);
    }

    #[test]
    fn first_failure_is_none() {
        let mut source = FakeList::new(10, 3);
        source.fail_at = Some(1);
        assert!(fetch_all(&mut source, &params(3)).unwrap().is_none());
    }

    #[test]
    fn inflated_total_stops_on_empty_page() {
        let mut source = FakeList::new(4, 2);
        source.reported_total = 1_000_000;
        let fetched = fetch_all(&mut source, &params(2)).unwrap().unwrap();
        assert_eq!(fetched.records.len(), 4);
        assert_eq!(fetched.requests, 3);
        assert!(!fetched.complete);
    }

    #[test]
    fn page_cap_bounds_a_server_that_never_runs_dry() {
        struct Endless;
        impl PageSource for Endless {
            fn fetch_page(&mut self, _: &ListParams) -> Result<Option<ListPage>, SyncError> {
                Ok(Some(ListPage {
                    success: true,
                    data: vec![json!({})],
                    total: Some(usize::MAX),
                }))
            }
        }
        let fetched = fetch_all(&mut Endless, &params(1)).unwrap().unwrap();
        assert_eq!(fetched.requests, MAX_PAGES);
        assert_eq!(fetched.records.len(), MAX_PAGES);
        assert!(!fetched.complete);
    }

    #[test]
    fn total_accepts_numeric_strings() {
        let page: ListPage =
            serde_json::from_str(r#"{"success": true, "data": [], "total": "42"}"#).unwrap();
        assert_eq!(page.total, Some(42));
        let page: ListPage = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(page.total, None);
    }

    #[test]
    fn params_lowercase_booleans_and_keep_order() {
        let params = ListParams::from_pairs(["isPoll=False", "queryId=6", "flag=TRUE"]).unwrap();
        assert_eq!(
            params.to_query(),
            vec![
                ("isPoll".to_string(), "false".to_string()),
                ("queryId".to_string(), "6".to_string()),
                ("flag".to_string(), "true".to_string()),
            ]
        );
        assert!(matches!(
            ListParams::from_pairs(["novalue"]),
            Err(SyncError::InvalidParam(raw)) if raw == "novalue"
        ));
        assert!(matches!(
            ListParams::from_pairs(["ok=1", " =2"]),
            Err(SyncError::InvalidParam(_))
        ));
    }

    #[test]
    fn incoming_defaults_and_overrides() {
        let params = ListParams::incoming_defaults()
            .merged(&ListParams::new().with("limit", "50").with("extra", "1"));
        assert_eq!(params.get("queryId"), Some("6"));
        assert_eq!(params.limit(), Some(50));
        assert_eq!(params.get("extra"), Some("1"));
        assert_eq!(params.to_query()[0].0, "isPoll");
    }
}
