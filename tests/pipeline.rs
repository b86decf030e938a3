//! End-to-end tests for the decorated serving path.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method, StatusCode, Uri};
use response_pipeline::cache::{CacheStore, KeySelector, MemoryStore};
use response_pipeline::config::{ConfigHandle, PipelineConfig};
use response_pipeline::http::{BodyLog, Minifier, ResponseCache, Server};

mod common;

use common::{fetch, get, send, spawn_server, Counting};

const PAGE: [&str; 3] = ["<html>\n   <body>", "  <p>hi</p>\n", "</body>\n</html>"];
const MINIFIED: &str = "<html>\n<body> <p>hi</p>\n</body>\n</html>";

fn config(transform: bool) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.transform.enabled = transform;
    config
}

#[tokio::test]
async fn report_is_cached_until_bypassed() {
    let store = Arc::new(MemoryStore::new());
    let report = Counting::new("text/html; charset=utf-8", &["<p>report 7</p>"]);
    let mut server = Server::new(ConfigHandle::new(config(false)));
    server
        .configure(&[&ResponseCache::new(store.clone())])
        .get("/report", report.clone());
    let router = server.router();

    let first = get(&router, "/report?id=7").await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, "<p>report 7</p>");
    assert_eq!(report.calls(), 1);

    let key = KeySelector::default().select(&Method::GET, &Uri::from_static("/report?id=7"));
    assert_eq!(key.as_str(), "GET:/report?id=7");
    let entry = store.get(&key).await.unwrap().expect("entry stored");
    assert_eq!(&entry.body[..], b"<p>report 7</p>");

    let second = get(&router, "/report?id=7").await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body, "<p>report 7</p>");
    assert_eq!(second.headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(report.calls(), 1);

    let bypass = get(&router, "/report?id=7&ignoreCache=true").await;
    assert_eq!(bypass.body, "<p>report 7</p>");
    assert_eq!(report.calls(), 2);
}

#[tokio::test]
async fn error_responses_are_not_cached() {
    let store = Arc::new(MemoryStore::new());
    let failing = Counting::new("text/plain", &["boom"]).with_status(StatusCode::BAD_GATEWAY);
    let mut server = Server::new(ConfigHandle::new(config(false)));
    server
        .configure(&[&ResponseCache::new(store.clone())])
        .get("/flaky", failing.clone());
    let router = server.router();

    for _ in 0..2 {
        let reply = get(&router, "/flaky").await;
        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
        assert_eq!(reply.body, "boom");
    }
    assert_eq!(failing.calls(), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn failed_handler_after_first_write_is_not_cached() {
    let store = Arc::new(MemoryStore::new());
    let page = Counting::new("text/html", &PAGE).failing_after_first_chunk(1);
    let mut server = Server::new(ConfigHandle::new(config(false)));
    server
        .configure(&[&ResponseCache::new(store.clone())])
        .get("/page", page.clone());
    let router = server.router();

    let (status, body) = fetch(&router, "/page").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_err(), "truncated body must not end cleanly");
    assert!(store.is_empty());

    let retry = get(&router, "/page").await;
    assert_eq!(retry.body, PAGE.concat());
    assert_eq!(page.calls(), 2);

    let hit = get(&router, "/page").await;
    assert_eq!(hit.body, PAGE.concat());
    assert_eq!(page.calls(), 2);
}

#[tokio::test]
async fn post_bypasses_the_cache() {
    let store = Arc::new(MemoryStore::new());
    let handler = Counting::new("text/plain", &["created"]).with_status(StatusCode::CREATED);
    let mut server = Server::new(ConfigHandle::new(config(false)));
    server
        .configure(&[&ResponseCache::new(store.clone())])
        .post("/items", handler.clone());
    let router = server.router();

    send(&router, Method::POST, "/items").await;
    send(&router, Method::POST, "/items").await;
    assert_eq!(handler.calls(), 2);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cached_entries_expire_after_ttl() {
    let mut config = config(false);
    config.cache.ttl_secs = 1;
    let handler = Counting::new("text/plain", &["fresh"]);
    let mut server = Server::new(ConfigHandle::new(config));
    server
        .configure(&[&ResponseCache::memory()])
        .get("/ttl", handler.clone());
    let router = server.router();

    get(&router, "/ttl").await;
    get(&router, "/ttl").await;
    assert_eq!(handler.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    get(&router, "/ttl").await;
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn html_is_minified_when_transforms_are_enabled() {
    let page = Counting::new("text/html", &PAGE);
    let mut server = Server::new(ConfigHandle::new(config(true)));
    server
        .configure(&[&Minifier::default()])
        .get("/page", page.clone());

    let reply = get(&server.router(), "/page").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, MINIFIED);
    assert!(reply.headers.get(header::CONTENT_LENGTH).is_none());
}

#[tokio::test]
async fn disabled_transform_is_the_identity() {
    let page = Counting::new("text/html", &PAGE);
    let mut server = Server::new(ConfigHandle::new(config(false)));
    server
        .configure(&[&Minifier::default(), &BodyLog])
        .get("/page", page.clone());

    let reply = get(&server.router(), "/page").await;
    assert_eq!(reply.body, PAGE.concat());
}

#[tokio::test]
async fn unmatched_media_types_pass_through() {
    let image = Counting::new("image/svg+xml", &["<svg>  </svg>"]);
    let mut server = Server::new(ConfigHandle::new(config(true)));
    server
        .configure(&[&Minifier::default()])
        .get("/logo.svg", image);

    let reply = get(&server.router(), "/logo.svg").await;
    assert_eq!(reply.body, "<svg>  </svg>");
}

#[tokio::test]
async fn cache_stores_the_transformed_body() {
    let store = Arc::new(MemoryStore::new());
    let page = Counting::new("text/html", &PAGE);
    let mut server = Server::new(ConfigHandle::new(config(true)));
    // Registration order does not matter, layers do.
    server
        .configure(&[&Minifier::default(), &ResponseCache::new(store.clone())])
        .get("/page", page.clone());
    let router = server.router();

    assert_eq!(get(&router, "/page").await.body, MINIFIED);
    let key = KeySelector::default().select(&Method::GET, &Uri::from_static("/page"));
    let entry = store.get(&key).await.unwrap().expect("entry stored");
    assert_eq!(&entry.body[..], MINIFIED.as_bytes());

    let hit = get(&router, "/page").await;
    assert_eq!(hit.body, MINIFIED);
    assert_eq!(hit.headers[header::CONTENT_LENGTH], MINIFIED.len().to_string().as_str());
    assert_eq!(page.calls(), 1);
}

#[tokio::test]
async fn config_reload_applies_to_the_next_request() {
    let handle = ConfigHandle::new(config(false));
    let page = Counting::new("text/html", &PAGE);
    let mut server = Server::new(handle.clone());
    server
        .configure(&[&Minifier::default()])
        .get("/page", page);
    let router = server.router();

    assert_eq!(get(&router, "/page").await.body, PAGE.concat());
    handle.replace(config(true));
    assert_eq!(get(&router, "/page").await.body, MINIFIED);
}

#[tokio::test]
async fn serves_over_tcp_and_shuts_down() {
    let page = Counting::new("text/html", &PAGE);
    let mut server = Server::new(ConfigHandle::new(config(true)));
    server
        .configure(&[&BodyLog, &ResponseCache::memory(), &Minifier::default()])
        .get("/page", page.clone());

    let (addr, shutdown, task) = spawn_server(server).await;
    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .get(format!("http://{addr}/page"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.text().await.unwrap(), MINIFIED);
    }
    assert_eq!(page.calls(), 1);

    let missing = client
        .get(format!("http://{addr}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    drop(client);
    shutdown.trigger();
    task.await.unwrap().unwrap();
}
