//! Integration tests for rate limiting middleware.
//!
//! These tests verify the HTTP-level behavior of rate limiting,
//! including 429 responses and the exemption of health checks and
//! provider webhooks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use offramp_hex::{
    OfframpService,
    inbound::{HttpServer, ServerOptions},
};
use offramp_providers::ProviderRegistry;
use offramp_repo::MemoryRepo;
use tower::ServiceExt;

/// Helper to create a test server with a very low rate limit.
fn create_test_server(requests_per_minute: u32) -> HttpServer<MemoryRepo> {
    let service = OfframpService::new(MemoryRepo::new(), ProviderRegistry::new());
    HttpServer::new(
        Arc::new(service),
        ServerOptions {
            admin_token: Some("adm".into()),
            requests_per_minute,
            ..ServerOptions::default()
        },
    )
}

/// A request as it arrives from `peer` through the TCP listener.
fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn listings_request(peer: &str) -> Request<Body> {
    let request = Request::builder()
        .uri("/otc/listings")
        .body(Body::empty())
        .unwrap();
    from_peer(request, peer)
}

fn orders_request(peer: &str, bearer: &str, forwarded_for: &str) -> Request<Body> {
    let request = Request::builder()
        .uri("/offramp/orders")
        .header("authorization", format!("Bearer {bearer}"))
        .header("x-forwarded-for", forwarded_for)
        .body(Body::empty())
        .unwrap();
    from_peer(request, peer)
}

#[tokio::test]
async fn test_rate_limiting_returns_429_when_exceeded() {
    let app = create_test_server(3).router();

    for i in 1..=3 {
        let response = app
            .clone()
            .oneshot(listings_request("203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i);
    }

    let response = app
        .clone()
        .oneshot(listings_request("203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("application/json"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("Rate limit exceeded")
    );
    assert_eq!(json["code"], 429);
    assert_eq!(json["retry_after_seconds"], 60);
}

#[tokio::test]
async fn test_rate_limiting_per_client_isolation() {
    let app = create_test_server(1).router();

    let first = app.clone().oneshot(listings_request("198.51.100.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let limited = app.clone().oneshot(listings_request("198.51.100.1")).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app.clone().oneshot(listings_request("198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK, "another client has its own quota");
}

#[tokio::test]
async fn test_rotating_tokens_and_forwarded_headers_share_the_peer_quota() {
    let app = create_test_server(1).router();

    let first = app
        .clone()
        .oneshot(orders_request("198.51.100.7", "fake-0", "10.0.0.0"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

    for i in 1..20 {
        let response = app
            .clone()
            .oneshot(orders_request(
                "198.51.100.7",
                &format!("fake-{i}"),
                &format!("10.0.0.{i}"),
            ))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS,
            "request {i} picked a fresh bucket"
        );
    }
}

#[tokio::test]
async fn test_valid_admin_token_has_its_own_quota() {
    let app = create_test_server(1).router();

    let spent = app.clone().oneshot(listings_request("198.51.100.8")).await.unwrap();
    assert_eq!(spent.status(), StatusCode::OK);
    let limited = app.clone().oneshot(listings_request("198.51.100.8")).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    let admin = app
        .clone()
        .oneshot(orders_request("198.51.100.8", "adm", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(admin.status(), StatusCode::OK);

    let admin_again = app
        .clone()
        .oneshot(orders_request("203.0.113.99", "adm", "10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(admin_again.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limiting_exempts_health_and_webhooks() {
    let app = create_test_server(1).router();

    for _ in 0..10 {
        let health = from_peer(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
            "198.51.100.3",
        );
        let response = app.clone().oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Unconfigured webhooks fail, but never with 429.
    for _ in 0..5 {
        let webhook = from_peer(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/nowpayments")
                .header("x-nowpayments-sig", "abc")
                .body(Body::from("{}"))
                .unwrap(),
            "198.51.100.3",
        );
        let response = app.clone().oneshot(webhook).await.unwrap();
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
