//! Feed plumbing against a real HTTP server: connect, decode frames split
//! across chunks, and surface transport failures.

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use fleettop::error::FeedError;
use fleettop::stream::StreamHealth;
use fleettop::types::MetricSample;
use fleettop::FleetApi;
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use url::Url;

type FrameRx = fmpsc::UnboundedReceiver<Result<Bytes, Infallible>>;
type FrameSlot = Arc<Mutex<Option<FrameRx>>>;

fn sample_json(hostname: &str, cpu: f64) -> String {
    serde_json::to_string(&MetricSample {
        hostname: hostname.to_string(),
        agent_id: format!("agent-{hostname}"),
        cpu,
        ram: 30.0,
        disk: 55.0,
        timestamp: 1_700_000_000,
        ip_address: Some("10.40.0.11".into()),
    })
    .expect("serialize sample")
}

async fn serve_stream(slot: FrameSlot) -> Response {
    let rx = slot
        .lock()
        .expect("slot lock")
        .take()
        .expect("one connection per test");
    Response::builder()
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(rx))
        .unwrap()
}

// Serves the hand-fed frame channel on /v1/stats/stream and returns the
// bound address plus the frame sender.
async fn spawn_backend() -> (SocketAddr, fmpsc::UnboundedSender<Result<Bytes, Infallible>>) {
    let (tx, rx) = fmpsc::unbounded();
    let slot: FrameSlot = Arc::new(Mutex::new(Some(rx)));
    let app = Router::new().route(
        "/v1/stats/stream",
        get(move || serve_stream(slot.clone())),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, tx)
}

fn api_for(addr: SocketAddr) -> FleetApi {
    let base = Url::parse(&format!("http://{addr}/")).expect("base url");
    FleetApi::new(base).expect("client")
}

#[tokio::test]
async fn test_stream_metrics_decodes_server_frames() {
    let (addr, tx) = spawn_backend().await;
    let api = api_for(addr);
    let (utx, mut urx) = mpsc::unbounded_channel();
    let (etx, erx) = oneshot::channel();
    let sub = api.stream_metrics(
        move |v| {
            let _ = utx.send(v);
        },
        move |e| {
            let _ = etx.send(e);
        },
    );

    tx.unbounded_send(Ok(Bytes::from(format!(
        "data: {}\n\n",
        sample_json("edge-01", 42.0)
    ))))
    .unwrap();
    let v1 = timeout(Duration::from_secs(5), urx.recv())
        .await
        .expect("update within deadline")
        .expect("update");
    assert_eq!(v1.hosts.len(), 1);
    assert!((v1.host("edge-01").expect("present").cpu - 42.0).abs() < 1e-9);

    // keep-alive comment frames produce no update
    tx.unbounded_send(Ok(Bytes::from(": idle\n\n"))).unwrap();

    // one event split across two network chunks
    let wire = format!("data: {}\n\n", sample_json("core-02", 20.0));
    let (head, tail) = wire.split_at(17);
    tx.unbounded_send(Ok(Bytes::from(head.to_string()))).unwrap();
    tx.unbounded_send(Ok(Bytes::from(tail.to_string()))).unwrap();
    let v2 = timeout(Duration::from_secs(5), urx.recv())
        .await
        .expect("update within deadline")
        .expect("update");
    assert_eq!(v2.hosts.len(), 2);
    let avg = v2.averages.expect("averages");
    assert!((avg.cpu - 31.0).abs() < 1e-9);

    assert_eq!(sub.health(), StreamHealth::Streaming);
    assert_eq!(sub.dropped_events(), 0);

    // server hangup surfaces exactly one error and keeps the last snapshot
    drop(tx);
    let err = timeout(Duration::from_secs(5), erx)
        .await
        .expect("error within deadline")
        .expect("error delivered");
    assert!(matches!(err, FeedError::RemoteClosed));
    assert_eq!(sub.health(), StreamHealth::Errored);
    assert_eq!(sub.snapshot().hosts.len(), 2);
}

#[tokio::test]
async fn test_connect_rejects_non_event_stream_body() {
    let app = Router::new().route("/v1/stats/stream", get(|| async { "plain text" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let client = reqwest::Client::new();
    let url = Url::parse(&format!("http://{addr}/v1/stats/stream")).expect("url");
    let err = fleettop::sse::connect(&client, url, None)
        .await
        .expect_err("plain body rejected");
    match err {
        FeedError::NotEventStream(ct) => assert!(ct.starts_with("text/plain"), "got {ct}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_connect_surfaces_http_status() {
    let app = Router::new().route("/", get(|| async { "root" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let client = reqwest::Client::new();
    let url = Url::parse(&format!("http://{addr}/v1/stats/stream")).expect("url");
    let err = fleettop::sse::connect(&client, url, None)
        .await
        .expect_err("missing route rejected");
    assert!(matches!(err, FeedError::Status(404)));
}

#[tokio::test]
async fn test_connect_sends_bearer_token() {
    let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let app = Router::new().route(
        "/v1/stats/stream",
        get(move |headers: HeaderMap| {
            let record = record.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *record.lock().expect("record lock") = auth;
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from(": hello\n\n"))
                    .unwrap()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let client = reqwest::Client::new();
    let url = Url::parse(&format!("http://{addr}/v1/stats/stream")).expect("url");
    let mut feed = fleettop::sse::connect(&client, url, Some("tok-9"))
        .await
        .expect("connect");
    // drain the short body so the server has finished the exchange
    while let Some(frame) = feed.next().await {
        frame.expect("clean frame");
    }
    let auth = seen.lock().expect("seen lock").clone();
    assert_eq!(auth.as_deref(), Some("Bearer tok-9"));
}
