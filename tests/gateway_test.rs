//! End-to-end behaviour of the cached gateway, in process and over TCP.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rttp_cache::cache::CacheConfig;
use rttp_cache::context::Context;
use rttp_cache::http::BodyError;
use rttp_cache::{
    Body, CacheBackend, Gateway, MemoryBackend, Method, Request, Response, Router, Server,
    StatusCode,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const ACCOUNT: &str = "/pipeline-service/client/account/secured";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn get(target: &str) -> Request {
    Request::new(Method::Get, target)
}

async fn body_json(res: Response) -> Value {
    serde_json::from_slice(&res.into_body().collect().await.unwrap()).unwrap()
}

async fn wait_for(backend: &MemoryBackend, key: &str) -> Option<String> {
    for _ in 0..200 {
        if let Some(value) = backend.get(key).await.unwrap() {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

// Origin with one streamed JSON account route that can be switched off.
fn account_origin(up: Arc<AtomicBool>, hits: Arc<AtomicUsize>) -> Router {
    let mut router = Router::new();
    router.get(ACCOUNT, move |_ctx: Context| {
        hits.fetch_add(1, Ordering::SeqCst);
        let up = up.load(Ordering::SeqCst);
        async move {
            if up {
                Response::new(StatusCode::Ok)
                    .header("Content-Type", "application/json")
                    .with_body(Body::from_chunks(["{\"id\":1,", "\"name\":\"A\"}"]))
            } else {
                Response::new(StatusCode::ServiceUnavailable)
            }
        }
    });
    router.post("/orders", |_ctx: Context| async {
        Response::json(StatusCode::Created, &json!({ "order": 1 }))
    });
    router.get("/actuator/health", |_ctx: Context| async {
        Response::json(StatusCode::Ok, &json!({ "status": "UP" }))
    });
    router
}

#[tokio::test]
async fn cached_get_is_served_from_fallback() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    let up = Arc::new(AtomicBool::new(true));
    let hits = Arc::new(AtomicUsize::new(0));
    let gateway = Gateway::builder(backend.clone())
        .router(account_origin(up, hits))
        .build();

    let res = gateway.handle(get(ACCOUNT)).await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(body_json(res).await, json!({ "id": 1, "name": "A" }));

    assert_eq!(
        wait_for(&backend, ACCOUNT).await.as_deref(),
        Some(r#"{"id":1,"name":"A"}"#)
    );

    let res = gateway.handle(get(&format!("/fallback{ACCOUNT}"))).await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.headers().get("content-type"), Some("application/json"));
    assert_eq!(body_json(res).await, json!({ "cache": { "id": 1, "name": "A" } }));
}

#[tokio::test]
async fn unknown_fallback_path_is_not_found() {
    init_tracing();
    let gateway = Gateway::builder(Arc::new(MemoryBackend::default())).build();

    let res = gateway.handle(get("/fallback/unknown/path")).await;
    assert_eq!(res.status(), StatusCode::NotFound);
    assert_eq!(body_json(res).await, json!({ "error": "Cache not found" }));
}

#[tokio::test]
async fn corrupt_entry_is_reported() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    backend.set("/x", "not json{", Duration::from_secs(60)).await.unwrap();
    let gateway = Gateway::builder(backend).build();

    let res = gateway.handle(get("/fallback/x")).await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
    assert_eq!(body_json(res).await, json!({ "error": "Invalid JSON data in cache" }));
}

#[tokio::test]
async fn post_and_actuator_are_not_cached() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    let gateway = Gateway::builder(backend.clone())
        .router(account_origin(
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(0)),
        ))
        .build();

    let res = gateway.handle(Request::new(Method::Post, "/orders")).await;
    assert_eq!(res.status(), StatusCode::Created);
    res.into_body().collect().await.unwrap();

    for _ in 0..3 {
        let res = gateway.handle(get("/actuator/health")).await;
        assert_eq!(body_json(res).await, json!({ "status": "UP" }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.get("/orders").await.unwrap(), None);
    assert_eq!(backend.get("/actuator/health").await.unwrap(), None);
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    let config = CacheConfig::default().ttl(Duration::from_millis(100));
    let gateway = Gateway::builder(backend.clone())
        .config(config)
        .router(account_origin(
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(0)),
        ))
        .build();

    gateway.handle(get(ACCOUNT)).await.into_body().collect().await.unwrap();
    assert!(wait_for(&backend, ACCOUNT).await.is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let res = gateway.handle(get(&format!("/fallback{ACCOUNT}"))).await;
    assert_eq!(res.status(), StatusCode::NotFound);
}

#[tokio::test]
async fn origin_outage_fails_over_to_cache() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    let up = Arc::new(AtomicBool::new(true));
    let hits = Arc::new(AtomicUsize::new(0));
    let gateway = Gateway::builder(backend.clone())
        .router(account_origin(Arc::clone(&up), Arc::clone(&hits)))
        .build();

    gateway.handle(get(ACCOUNT)).await.into_body().collect().await.unwrap();
    assert!(wait_for(&backend, ACCOUNT).await.is_some());

    up.store(false, Ordering::SeqCst);
    let res = gateway.handle(get(ACCOUNT)).await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(body_json(res).await, json!({ "cache": { "id": 1, "name": "A" } }));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // The 503 itself must not replace the cached entry.
    assert_eq!(
        backend.get(ACCOUNT).await.unwrap().as_deref(),
        Some(r#"{"id":1,"name":"A"}"#)
    );
}

#[tokio::test]
async fn aborted_origin_stream_is_not_cached() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    let mut router = Router::new();
    router.get("/flaky", |_ctx: Context| async {
        Response::new(StatusCode::Ok).with_body(Body::from_stream(futures_util::stream::iter(
            vec![
                Ok(Bytes::from_static(b"{\"a\":")),
                Err(BodyError::Aborted("upstream reset".into())),
            ],
        )))
    });
    let gateway = Gateway::builder(backend.clone()).router(router).build();

    let res = gateway.handle(get("/flaky")).await;
    assert!(res.into_body().collect().await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.get("/flaky").await.unwrap(), None);
}

// Reads one response off a connection that the server closes afterwards.
async fn exchange(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn serves_over_tcp() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::default());
    let gateway = Gateway::builder(backend.clone())
        .router(account_origin(
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(0)),
        ))
        .build();

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(gateway.serve(server));

    let raw = exchange(
        addr,
        &format!("GET {ACCOUNT} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(raw.contains("Transfer-Encoding: chunked\r\n"));
    assert!(raw.contains("Connection: close\r\n"));
    assert!(raw.contains("8\r\n{\"id\":1,\r\n"));
    assert!(raw.ends_with("0\r\n\r\n"));

    assert!(wait_for(&backend, ACCOUNT).await.is_some());

    let raw = exchange(
        addr,
        &format!("GET /fallback{ACCOUNT} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(raw.contains("Content-Type: application/json\r\n"));
    assert!(raw.ends_with(r#"{"cache":{"id":1,"name":"A"}}"#));
}
