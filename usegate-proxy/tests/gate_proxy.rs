//! End-to-end tests: real sockets, in-process proxy, stub backend.

mod helpers;

use helpers::{StubBackend, TestProxy, client, unused_port};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use usegate_proxy::proxy_config::ProxyConfig;
use usegate_proxy::server::DrainResult;

const START_CONVERSATION: &str = "/api/2.0/genie_dummy/spaces/start-conversation";

#[tokio::test]
async fn test_missing_header_is_400_for_any_method_and_path() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    let client = client();

    for (method, path) in [
        (Method::GET, "/api/items"),
        (Method::POST, START_CONVERSATION),
        (Method::PUT, "/api/items/7"),
        (Method::DELETE, "/api/items/7?force=true"),
        (Method::PATCH, "/nested/deeper/path"),
    ] {
        let response = client
            .request(method.clone(), proxy.url(path))
            .body("{\"message\":\"hi\"}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{method} {path}");

        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["detail"], "Missing required header: X-Use-Case-ID");
    }

    assert_eq!(backend.hits(), 0, "rejected requests must not reach the backend");
}

#[tokio::test]
async fn test_blank_header_counts_as_missing() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;

    let response = client()
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "   ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_allowed_use_cases_pass_through() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    let client = client();

    for id in ["100000", "100050"] {
        let response = client
            .post(proxy.url(START_CONVERSATION))
            .header("X-Use-Case-ID", id)
            .json(&serde_json::json!({ "message": "hello" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-backend"], "stub");
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["response"], "hello from the stub");
        assert_eq!(json["use_case_id"], id);
    }
    assert_eq!(backend.hits(), 2);
}

#[tokio::test]
async fn test_backend_status_passes_through() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;

    let response = client()
        .get(proxy.url("/status/418"))
        .header("X-Use-Case-ID", "100000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.text().await.unwrap(), "status 418");
}

#[tokio::test]
async fn test_unknown_use_case_is_403_with_allowlist() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;

    let response = client()
        .post(proxy.url(START_CONVERSATION))
        .header("X-Use-Case-ID", "999999")
        .json(&serde_json::json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["use_case_id"], "999999");
    assert_eq!(
        json["allowed_use_cases"],
        serde_json::json!(["100000", "100050", "101966", "102550", "103366"])
    );
    assert!(
        json["detail"]
            .as_str()
            .unwrap()
            .starts_with("Unauthorized use case: 999999. Allowed values: ")
    );
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_403_hides_allowlist_when_disclosure_disabled() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start_with(&backend.url(), ProxyConfig::default(), |doc| {
        doc.security.expose_allowed_use_cases = false;
    })
    .await;

    let response = client()
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "999999")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["detail"], "Unauthorized use case: 999999");
    assert!(json.get("allowed_use_cases").is_none());
}

#[tokio::test]
async fn test_matching_ignores_case_by_default() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    proxy.store.add("Team-Alpha", Some("mixed case id")).unwrap();

    let response = client()
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "TEAM-ALPHA")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_exempt_paths_served_without_header() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    let client = client();

    // Local endpoint.
    let response = client.get(proxy.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "healthy");

    // Exempt but not local: forwarded.
    let response = client
        .get(proxy.url("/docs/index.html"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["path"], "/docs/index.html");

    // Prefix rule respects segment boundaries.
    let response = client
        .get(proxy.url("/docsearch"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_forwarded_verbatim() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;

    let response = client()
        .put(proxy.url("/api/items/42?expand=true&page=2"))
        .header("X-Use-Case-ID", "101966")
        .header("X-Custom", "kept")
        .header("Authorization", "Bearer token")
        .body("payload-bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = backend.last_request().unwrap();
    assert_eq!(seen.method, Method::PUT);
    assert_eq!(seen.uri.path(), "/api/items/42");
    assert_eq!(seen.uri.query(), Some("expand=true&page=2"));
    assert_eq!(seen.body.as_ref(), b"payload-bytes");
    assert_eq!(seen.headers["x-use-case-id"], "101966");
    assert_eq!(seen.headers["x-custom"], "kept");
    assert_eq!(seen.headers["authorization"], "Bearer token");
    assert_eq!(seen.headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(seen.headers["host"], backend.addr.to_string());
}

#[tokio::test]
async fn test_backend_down_is_502() {
    let backend_url = format!("http://127.0.0.1:{}", unused_port());
    let proxy = TestProxy::start(&backend_url).await;

    let response = client()
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "100000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json: serde_json::Value = response.json().await.unwrap();
    assert!(
        json["detail"]
            .as_str()
            .unwrap()
            .starts_with("Backend service unavailable")
    );
}

#[tokio::test]
async fn test_slow_backend_is_504() {
    let backend = StubBackend::start().await;
    let config = ProxyConfig {
        response_timeout: Duration::from_millis(200),
        ..ProxyConfig::default()
    };
    let proxy = TestProxy::start_with(&backend.url(), config, |_| {}).await;

    let response = client()
        .get(proxy.url("/slow"))
        .header("X-Use-Case-ID", "100000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_store_mutation_visible_without_restart() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    let client = client();

    let send = |id: &'static str| {
        client
            .get(proxy.url("/api/items"))
            .header("X-Use-Case-ID", id)
            .send()
    };

    assert_eq!(send("200001").await.unwrap().status(), StatusCode::FORBIDDEN);
    proxy.store.add("200001", None).unwrap();
    assert_eq!(send("200001").await.unwrap().status(), StatusCode::OK);

    proxy.store.remove("100000").unwrap();
    assert_eq!(send("100000").await.unwrap().status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reload_endpoint_applies_file_edit() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    let client = client();

    proxy.edit_file(|doc| {
        doc.access_control
            .allowed_use_cases
            .push("300003".to_string());
    });

    let response = client
        .post(proxy.url("/config/reload"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "300003")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_count_decisions() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;
    let client = client();

    client
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "100000")
        .send()
        .await
        .unwrap();
    client.get(proxy.url("/api/items")).send().await.unwrap();

    let body = client
        .get(proxy.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains(r#"usegate_decisions_total{outcome="allow",reason="allowlisted"} 1"#));
    assert!(body.contains(r#"usegate_decisions_total{outcome="reject",reason="missing_header"} 1"#));
    assert!(body.contains("usegate_upstream_duration_seconds"));
}

#[tokio::test]
async fn test_connection_limit_answers_503() {
    let backend = StubBackend::start().await;
    let config = ProxyConfig {
        max_concurrent_connections: 0,
        ..ProxyConfig::default()
    };
    let proxy = TestProxy::start_with(&backend.url(), config, |_| {}).await;

    let response = client()
        .get(proxy.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["retry-after"], "1");
}

#[tokio::test]
async fn test_shutdown_drains_cleanly() {
    let backend = StubBackend::start().await;
    let proxy = TestProxy::start(&backend.url()).await;

    let response = client()
        .get(proxy.url("/api/items"))
        .header("X-Use-Case-ID", "100000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(proxy.stop().await, DrainResult::Complete);
}
