mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;

use novel_engine_admission::config::RateLimitConfig;
use novel_engine_admission::core::{ClientIdentity, RateLimiter};
use novel_engine_admission::middleware::AdmissionLayer;
use test_utils::{lenient_ddos, limiter_with_ddos, BROWSER_AGENT};

fn app(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/api/stories", get(|| async { "stories" }))
        .route(
            "/api/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .layer(AdmissionLayer::new(limiter))
}

fn request(peer: [u8; 4], path: &str) -> Request<Body> {
    let mut req = Request::builder()
        .uri(path)
        .header("user-agent", BROWSER_AGENT)
        .header("accept", "application/json")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 41000))));
    req
}

fn shared_limiter(config: RateLimitConfig) -> Arc<RateLimiter> {
    let (limiter, _clock) = limiter_with_ddos(config, lenient_ddos());
    Arc::new(limiter)
}

async fn body_json(body: &mut axum::body::BoxBody) -> serde_json::Value {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn admitted_request_gets_rate_headers() {
    let app = app(shared_limiter(RateLimitConfig::default()));

    let response = app
        .oneshot(request([203, 0, 113, 50], "/api/stories"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
    let request_id = response.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[test_log::test(tokio::test)]
async fn throttled_request_gets_429_contract() {
    let app = app(shared_limiter(RateLimitConfig {
        requests_per_minute: 2,
        burst_size: 2,
        ..RateLimitConfig::default()
    }));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request([203, 0, 113, 51], "/api/stories"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let mut response = app
        .oneshot(request([203, 0, 113, 51], "/api/stories"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let headers = response.headers();
    assert_eq!(headers["retry-after"], "60");
    assert_eq!(headers["x-ratelimit-limit"], "2");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    assert_eq!(headers["x-ratelimit-reset"], "60");

    let body = body_json(response.body_mut()).await;
    assert_eq!(body["error"]["code"], "E-RATE-LIMITED");
    assert!(!body.to_string().contains("minute"));
}

#[tokio::test]
async fn blacklisted_peer_gets_403() {
    let app = app(shared_limiter(RateLimitConfig {
        blacklist_addresses: vec!["203.0.113.52".to_string()],
        ..RateLimitConfig::default()
    }));

    let mut response = app
        .oneshot(request([203, 0, 113, 52], "/api/stories"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["retry-after"], "3600");
    assert!(response.headers().get("x-ratelimit-limit").is_none());
    let body = body_json(response.body_mut()).await;
    assert_eq!(body["error"]["code"], "E-ACCESS-DENIED");
}

#[tokio::test]
async fn forwarded_header_selects_client() {
    let limiter = shared_limiter(RateLimitConfig {
        blacklist_addresses: vec!["198.51.100.9".to_string()],
        ..RateLimitConfig::default()
    });
    let app = app(limiter);

    let mut req = request([10, 0, 0, 1], "/api/stories");
    req.headers_mut()
        .insert("x-forwarded-for", "198.51.100.9, 10.0.0.1".parse().unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn server_errors_are_reported_as_failures() {
    let limiter = shared_limiter(RateLimitConfig::default());
    let app = app(Arc::clone(&limiter));

    for path in ["/api/broken", "/api/broken", "/api/stories"] {
        app.clone()
            .oneshot(request([203, 0, 113, 53], path))
            .await
            .unwrap();
    }

    let identity = ClientIdentity::new("203.0.113.53", Some(BROWSER_AGENT));
    let snapshot = limiter.client_snapshot(identity.key()).unwrap();
    assert_eq!(snapshot.total_requests, 3);
    assert_eq!(snapshot.failed_requests, 2);
}

#[tokio::test]
async fn missing_connect_info_is_still_limited() {
    let app = app(shared_limiter(RateLimitConfig {
        requests_per_minute: 1,
        burst_size: 1,
        ..RateLimitConfig::default()
    }));
    let bare = || {
        Request::builder()
            .uri("/api/stories")
            .header("user-agent", BROWSER_AGENT)
            .header("accept", "*/*")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(bare()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.oneshot(bare()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()["retry-after"], "60");
}

#[tokio::test]
async fn stats_count_admitted_requests() {
    let limiter = shared_limiter(RateLimitConfig::default());
    let app = app(Arc::clone(&limiter));

    let response = app
        .oneshot(request([203, 0, 113, 54], "/api/stories"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = limiter.stats();
    assert_eq!(stats.allowed, 1);
    assert_eq!(stats.tracked_clients, 1);
}
