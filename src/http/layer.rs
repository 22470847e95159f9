//! Request gate adapter.
//!
//! A tower layer that translates an inbound request into a multi-tier
//! gate call and the decision into transport-level headers and status.
//! Holds no state of its own: identity comes from the resolver, limits
//! from the gate. Denied requests never reach the inner service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use tower::{Layer, Service};

use crate::limiter::{LimitDecision, MultiTierGate};
use crate::policy::Operation;

use super::identity::IdentityResolver;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";
pub const TYPE_HEADER: &str = "x-ratelimit-type";

/// Maps request paths to gated operations.
///
/// Paths with no mapping bypass the gate entirely.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(String, Operation)>,
}

impl RouteTable {
    pub fn new(routes: Vec<(String, Operation)>) -> Self {
        Self { routes }
    }

    /// The operation gated at `path`, longest prefix wins.
    pub fn operation_for(&self, path: &str) -> Option<Operation> {
        self.routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, operation)| *operation)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            ("/api/journals/suggest".to_string(), Operation::JournalSuggest),
            ("/api/imports/csv".to_string(), Operation::CsvImport),
            ("/api/predictions".to_string(), Operation::AiPredict),
            ("/api/reports/export".to_string(), Operation::ReportExport),
        ])
    }
}

/// Tower layer applying the multi-tier gate in front of a service.
#[derive(Clone)]
pub struct GateLayer {
    gate: Arc<MultiTierGate>,
    resolver: Arc<dyn IdentityResolver>,
    routes: Arc<RouteTable>,
}

impl GateLayer {
    pub fn new(
        gate: Arc<MultiTierGate>,
        resolver: Arc<dyn IdentityResolver>,
        routes: RouteTable,
    ) -> Self {
        Self {
            gate,
            resolver,
            routes: Arc::new(routes),
        }
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService {
            inner,
            gate: self.gate.clone(),
            resolver: self.resolver.clone(),
            routes: self.routes.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GateService<S> {
    inner: S,
    gate: Arc<MultiTierGate>,
    resolver: Arc<dyn IdentityResolver>,
    routes: Arc<RouteTable>,
}

impl<S> Service<Request<Body>> for GateService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let resolver = self.resolver.clone();
        let routes = self.routes.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let operation = match routes.operation_for(request.uri().path()) {
                Some(operation) => operation,
                None => return inner.call(request).await,
            };

            let identity = resolver.resolve(request.headers());
            let source_addr = source_address(&request);

            let decision = gate
                .check_limit(&identity.id, operation, &source_addr, identity.tier)
                .await;

            if !decision.allowed {
                return Ok(reject(&decision));
            }

            let mut response = inner.call(request).await?;
            apply_limit_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

/// Client address from forwarded headers or the connection.
fn source_address(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Stamp the standard X-RateLimit headers onto a response.
fn apply_limit_headers(headers: &mut HeaderMap, decision: &LimitDecision) {
    let mut put = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    put(LIMIT_HEADER, decision.limit.to_string());
    put(REMAINING_HEADER, decision.remaining.to_string());
    put(RESET_HEADER, decision.reset_at.to_rfc3339());
    put(TYPE_HEADER, decision.dimension.as_str().to_string());
}

/// Build the 429 response for a denied request.
fn reject(decision: &LimitDecision) -> Response {
    let retry_after = (decision.reset_at - Utc::now()).num_seconds().max(1);

    let body = json!({
        "limit": decision.limit,
        "remaining": decision.remaining,
        "reset": decision.reset_at.to_rfc3339(),
        "retryAfter": retry_after,
        "dimension": decision.dimension,
    });

    let mut response =
        (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    apply_limit_headers(response.headers_mut(), decision);
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::HeaderIdentityResolver;
    use crate::policy::{LimitPolicy, PolicyTable, SecondaryLimits};
    use crate::store::MemoryStore;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn secondary() -> SecondaryLimits {
        SecondaryLimits {
            burst: LimitPolicy {
                max_requests: 100,
                window_secs: 1,
            },
            source: LimitPolicy {
                max_requests: 1000,
                window_secs: 60,
            },
            global: LimitPolicy {
                max_requests: 10_000,
                window_secs: 60,
            },
        }
    }

    fn app_with_limit(limit: u64) -> (Arc<MemoryStore>, Router) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let policy = PolicyTable::uniform(limit, 60, secondary());
        let gate = Arc::new(MultiTierGate::new(policy, store.clone(), clock));

        let layer = GateLayer::new(
            gate,
            Arc::new(HeaderIdentityResolver),
            RouteTable::default(),
        );
        let app = Router::new()
            .route("/api/predictions", post(|| async { "predicted" }))
            .route("/health", axum::routing::get(|| async { "ok" }))
            .layer(layer);
        (store, app)
    }

    fn gated_request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/predictions")
            .header("x-api-identity", "tenant-1")
            .header("x-plan-tier", "standard")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_route_table_prefix_match() {
        let routes = RouteTable::default();
        assert_eq!(
            routes.operation_for("/api/predictions/journal"),
            Some(Operation::AiPredict)
        );
        assert_eq!(routes.operation_for("/health"), None);
    }

    #[tokio::test]
    async fn test_allowed_request_gets_limit_headers() {
        let (_store, app) = app_with_limit(5);

        let response = app.oneshot(gated_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[LIMIT_HEADER], "5");
        assert_eq!(headers[REMAINING_HEADER], "4");
        assert_eq!(headers[TYPE_HEADER], "identity");
        assert!(headers.contains_key(RESET_HEADER));
    }

    #[tokio::test]
    async fn test_denied_request_is_429_with_body() {
        let (_store, app) = app_with_limit(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(gated_request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(gated_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[REMAINING_HEADER], "0");
        assert!(response.headers().contains_key(RETRY_AFTER));

        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["limit"], 2);
        assert_eq!(body["remaining"], 0);
        assert_eq!(body["dimension"], "identity");
        assert!(body["retryAfter"].as_i64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_unmapped_path_bypasses_gate() {
        let (_store, app) = app_with_limit(1);

        // Well past the limit if it were gated
        for _ in 0..5 {
            let request = Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key(LIMIT_HEADER));
        }
    }

    #[tokio::test]
    async fn test_store_outage_allows_everything() {
        let (store, app) = app_with_limit(1);
        store.set_available(false);

        for _ in 0..10 {
            let response = app.clone().oneshot(gated_request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
