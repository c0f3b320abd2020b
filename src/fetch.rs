//! Paged Fetcher
//!
//! Issues one logical list operation, following the continuation token until
//! exhausted and accumulating the payload array of every page.

use crate::api::{ApiClient, Envelope};
use crate::error::{ApiError, CollectError};
use crate::kind::{Kind, Pagination};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Envelope keys that never hold the payload
pub const STANDARD_KEYS: &[&str] = &[
    "ResponseMetadata",
    "MaxResults",
    "IsTruncated",
    "MaxItems",
    "Marker",
    "NextMarker",
    "NextToken",
    "maxResults",
    "nextToken",
];

/// Where a request is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Account-wide; sent to the home region
    Global,
    Region(String),
}

impl Scope {
    /// Label used in logs and error messages
    pub fn label(&self) -> &str {
        match self {
            Scope::Global => "global",
            Scope::Region(region) => region,
        }
    }
}

/// Parameters for one paginated call chain
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub kind: String,
    pub scope: Scope,
    pub params: Envelope,
}

impl FetchRequest {
    pub fn new(kind: &Kind, scope: Scope) -> Self {
        Self {
            kind: kind.name.clone(),
            scope,
            params: Envelope::new(),
        }
    }

    /// Set one request parameter (e.g. a fan-out parent id)
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// Sender half of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half of a cancellation signal; cheap to clone
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Create a connected handle/signal pair
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Follows continuation tokens for one kind's operation
#[derive(Clone)]
pub struct PagedFetcher {
    client: Arc<dyn ApiClient>,
    home_region: String,
    timeout: Option<Duration>,
    cancel: CancelSignal,
}

impl PagedFetcher {
    pub fn new(client: Arc<dyn ApiClient>, home_region: &str) -> Self {
        Self {
            client,
            home_region: home_region.to_string(),
            timeout: None,
            cancel: CancelSignal::never(),
        }
    }

    /// Bound every single call by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch all pages of `kind` for `request`, in order.
    ///
    /// Shape mismatches fail with [`CollectError::UnexpectedShape`]; remote
    /// failures with [`CollectError::RegionUnsupported`]. Nothing is retried.
    pub async fn fetch(&self, kind: &Kind, request: FetchRequest) -> Result<Vec<Value>, CollectError> {
        let region = match &request.scope {
            Scope::Global => self.home_region.as_str(),
            Scope::Region(region) => region.as_str(),
        };

        let mut params = kind.request_params.clone();
        params.extend(request.params);

        let mut dialect = kind.pagination;
        let mut items = Vec::new();
        let mut pages = 0usize;

        loop {
            let envelope = self.call_once(kind, &request.scope, region, &params).await?;
            pages += 1;

            items.extend(extract_payload(kind, &envelope)?);

            if dialect == Pagination::Auto {
                dialect = Pagination::detect(&envelope);
            }

            match next_page(kind, dialect, &envelope)? {
                Some((param, token)) => {
                    if params.get(param).and_then(|v| v.as_str()) == Some(token.as_str()) {
                        return Err(CollectError::UnexpectedShape {
                            kind: kind.name.clone(),
                            reason: format!("continuation token {} repeated", token),
                        });
                    }
                    params.insert(param.to_string(), Value::String(token));
                }
                None => break,
            }
        }

        tracing::debug!(
            "{}/{}: {} items in {} pages",
            kind.name,
            request.scope.label(),
            items.len(),
            pages
        );

        Ok(items)
    }

    async fn call_once(
        &self,
        kind: &Kind,
        scope: &Scope,
        region: &str,
        params: &Envelope,
    ) -> Result<Envelope, CollectError> {
        if self.cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        let call = async {
            let call = self.client.call(&kind.operation, region, params);
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout(limit)),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CollectError::Cancelled),
            result = call => result.map_err(|source| CollectError::RegionUnsupported {
                kind: kind.name.clone(),
                region: scope.label().to_string(),
                source,
            }),
        }
    }
}

/// Pick the payload array out of an envelope
pub fn extract_payload(kind: &Kind, envelope: &Envelope) -> Result<Vec<Value>, CollectError> {
    let key = match &kind.payload_key {
        Some(key) => key.as_str(),
        None => {
            let keys: Vec<&str> = envelope
                .keys()
                .map(String::as_str)
                .filter(|k| !STANDARD_KEYS.contains(k) && !kind.cleanup_keys.contains(*k))
                .collect();

            if keys.len() != 1 {
                return Err(CollectError::UnexpectedShape {
                    kind: kind.name.clone(),
                    reason: format!(
                        "expected one payload key, found {:?} in {:?}",
                        keys,
                        envelope.keys().collect::<Vec<_>>()
                    ),
                });
            }
            keys[0]
        }
    };

    match envelope.get(key) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(CollectError::UnexpectedShape {
            kind: kind.name.clone(),
            reason: format!("payload {} is not an array", key),
        }),
        None => Err(CollectError::UnexpectedShape {
            kind: kind.name.clone(),
            reason: format!("payload key {} missing", key),
        }),
    }
}

/// Continuation parameter and token for the next page, if any
fn next_page(
    kind: &Kind,
    dialect: Pagination,
    envelope: &Envelope,
) -> Result<Option<(&'static str, String)>, CollectError> {
    let (token_key, param) = match dialect {
        Pagination::Auto | Pagination::None => return Ok(None),
        Pagination::Marker => ("NextMarker", "Marker"),
        Pagination::Token if envelope.contains_key("nextToken") => ("nextToken", "nextToken"),
        Pagination::Token => ("NextToken", "NextToken"),
    };

    let truncated = envelope.get("IsTruncated");
    if truncated.is_some_and(|flag| !is_truthy(flag)) {
        return Ok(None);
    }

    match envelope.get(token_key).and_then(|v| v.as_str()) {
        Some(token) if !token.is_empty() => Ok(Some((param, token.to_string()))),
        _ if truncated.is_some_and(is_truthy) => Err(CollectError::UnexpectedShape {
            kind: kind.name.clone(),
            reason: format!("truncated page without {}", token_key),
        }),
        _ => Ok(None),
    }
}

/// Booleans as the provider spells them: `true`, `"true"`, `1`
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OperationRef;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays scripted envelopes and records requests
    struct Pages {
        pages: Mutex<Vec<Value>>,
        requests: Mutex<Vec<Envelope>>,
    }

    impl Pages {
        fn new(pages: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ApiClient for Pages {
        async fn call(
            &self,
            _operation: &OperationRef,
            _region: &str,
            params: &Envelope,
        ) -> Result<Envelope, ApiError> {
            self.requests.lock().unwrap().push(params.clone());
            match self.pages.lock().unwrap().pop() {
                Some(Value::Object(map)) => Ok(map),
                _ => Err(ApiError::Service("no more pages".to_string())),
            }
        }
    }

    fn obj(value: Value) -> Envelope {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_payload_inferred_after_cleanup() {
        let kind = Kind::global("links", "route53", "get_hosted_zone").cleanup("HostedZone");
        let envelope = obj(json!({
            "ResponseMetadata": {},
            "HostedZone": {"Id": "Z1"},
            "VPCs": [{"VPCId": "vpc-1"}]
        }));
        let items = extract_payload(&kind, &envelope).unwrap();
        assert_eq!(items, vec![json!({"VPCId": "vpc-1"})]);
    }

    #[test]
    fn test_two_payload_keys_is_shape_error() {
        let kind = Kind::global("links", "route53", "get_hosted_zone");
        let envelope = obj(json!({"HostedZone": {}, "VPCs": []}));
        assert!(matches!(
            extract_payload(&kind, &envelope),
            Err(CollectError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_explicit_payload_key_must_be_array() {
        let kind = Kind::regional("vpcs", "ec2", "describe_vpcs").payload_key("Vpcs");
        let envelope = obj(json!({"Vpcs": {"not": "array"}, "Extra": []}));
        assert!(matches!(
            extract_payload(&kind, &envelope),
            Err(CollectError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_marker_stops_when_not_truncated() {
        let kind = Kind::global("zones", "route53", "list_hosted_zones");
        let envelope = obj(json!({"IsTruncated": "False", "NextMarker": "m2"}));
        assert_eq!(next_page(&kind, Pagination::Marker, &envelope).unwrap(), None);
    }

    #[test]
    fn test_truncated_without_marker_is_shape_error() {
        let kind = Kind::global("zones", "route53", "list_hosted_zones");
        let envelope = obj(json!({"IsTruncated": true}));
        assert!(next_page(&kind, Pagination::Marker, &envelope).is_err());
    }

    #[test]
    fn test_lowercase_token_is_echoed() {
        let kind = Kind::regional("shares", "ram", "get_resource_shares");
        let envelope = obj(json!({"resourceShares": [], "nextToken": "t2"}));
        assert_eq!(
            next_page(&kind, Pagination::Token, &envelope).unwrap(),
            Some(("nextToken", "t2".to_string()))
        );
    }

    #[tokio::test]
    async fn test_marker_pages_are_followed_in_order() {
        let api = Pages::new(vec![
            json!({"HostedZones": [1, 2], "IsTruncated": true, "NextMarker": "m2", "MaxItems": "2"}),
            json!({"HostedZones": [3], "IsTruncated": true, "NextMarker": "m3", "Marker": "m2"}),
            json!({"HostedZones": [4], "IsTruncated": false, "Marker": "m3"}),
        ]);
        let kind = Kind::global("zones", "route53", "list_hosted_zones");
        let fetcher = PagedFetcher::new(api.clone(), "us-east-1");

        let items = fetcher
            .fetch(&kind, FetchRequest::new(&kind, Scope::Global))
            .await
            .unwrap();

        assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4)]);
        let requests = api.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].get("Marker").is_none());
        assert_eq!(requests[1]["Marker"], "m2");
        assert_eq!(requests[2]["Marker"], "m3");
    }

    #[tokio::test]
    async fn test_token_pages_are_followed_in_order() {
        let api = Pages::new(vec![
            json!({"Vpcs": [{"VpcId": "vpc-1"}], "NextToken": "t2", "ResponseMetadata": {}}),
            json!({"Vpcs": [{"VpcId": "vpc-2"}, {"VpcId": "vpc-3"}], "NextToken": "t3"}),
            json!({"Vpcs": [{"VpcId": "vpc-4"}]}),
        ]);
        let kind = Kind::regional("vpcs", "ec2", "describe_vpcs");
        let fetcher = PagedFetcher::new(api.clone(), "us-east-1");

        let items = fetcher
            .fetch(&kind, FetchRequest::new(&kind, Scope::Region("eu-west-1".into())))
            .await
            .unwrap();

        let ids: Vec<&str> = items.iter().filter_map(|v| v["VpcId"].as_str()).collect();
        assert_eq!(ids, vec!["vpc-1", "vpc-2", "vpc-3", "vpc-4"]);
        let requests = api.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].get("NextToken").is_none());
        assert_eq!(requests[1]["NextToken"], "t2");
        assert_eq!(requests[2]["NextToken"], "t3");
    }

    #[tokio::test]
    async fn test_repeated_token_is_rejected() {
        let api = Pages::new(vec![
            json!({"Vpcs": [1], "NextToken": "same"}),
            json!({"Vpcs": [2], "NextToken": "same"}),
        ]);
        let kind = Kind::regional("vpcs", "ec2", "describe_vpcs");
        let fetcher = PagedFetcher::new(api, "us-east-1");
        let result = fetcher
            .fetch(&kind, FetchRequest::new(&kind, Scope::Region("eu-west-1".into())))
            .await;
        assert!(matches!(result, Err(CollectError::UnexpectedShape { .. })));
    }

    #[tokio::test]
    async fn test_remote_error_is_region_unsupported() {
        let api = Pages::new(vec![]);
        let kind = Kind::regional("endpoints", "route53resolver", "list_resolver_endpoints");
        let fetcher = PagedFetcher::new(api, "us-east-1");
        let result = fetcher
            .fetch(&kind, FetchRequest::new(&kind, Scope::Region("sa-east-1".into())))
            .await;
        match result {
            Err(CollectError::RegionUnsupported { region, .. }) => assert_eq!(region, "sa-east-1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let api = Pages::new(vec![json!({"Vpcs": []})]);
        let kind = Kind::regional("vpcs", "ec2", "describe_vpcs");
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let fetcher = PagedFetcher::new(api.clone(), "us-east-1").with_cancel(signal);
        let result = fetcher
            .fetch(&kind, FetchRequest::new(&kind, Scope::Global))
            .await;
        assert!(matches!(result, Err(CollectError::Cancelled)));
        assert!(api.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_never_signal_stays_quiet() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let fired = tokio_test::block_on(async {
            tokio::time::timeout(Duration::from_millis(10), signal.cancelled())
                .await
                .is_ok()
        });
        assert!(!fired);
    }
}
