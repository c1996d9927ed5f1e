//! Subscription lifecycle: per-event updates, malformed-event tolerance,
//! single error episodes, and teardown guarantees.

use fleettop::aggregate::AggregateView;
use fleettop::error::FeedError;
use fleettop::stream::{StreamHealth, Subscription};
use fleettop::types::MetricSample;
use futures::channel::mpsc as fmpsc;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

type FeedItem = Result<String, FeedError>;

fn sample_json(hostname: &str, cpu: f64) -> String {
    serde_json::to_string(&MetricSample {
        hostname: hostname.to_string(),
        agent_id: format!("agent-{hostname}"),
        cpu,
        ram: 10.0,
        disk: 20.0,
        timestamp: 1_700_000_000,
        ip_address: None,
    })
    .expect("serialize sample")
}

// A feed the test drives by hand: send Ok(payload) frames, drop the sender
// to end the stream like a server hangup.
fn channel_feed() -> (
    fmpsc::UnboundedSender<FeedItem>,
    impl Future<Output = Result<fmpsc::UnboundedReceiver<FeedItem>, FeedError>>,
) {
    let (tx, rx) = fmpsc::unbounded::<FeedItem>();
    (tx, async move { Ok(rx) })
}

async fn recv_view(rx: &mut mpsc::UnboundedReceiver<AggregateView>) -> AggregateView {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("update within deadline")
        .expect("update channel open")
}

#[tokio::test]
async fn test_update_fires_per_event_with_fresh_snapshot() {
    let (tx, connect) = channel_feed();
    let (utx, mut urx) = mpsc::unbounded_channel();
    let sub = Subscription::spawn(
        connect,
        move |v| {
            let _ = utx.send(v);
        },
        |_e| {},
    );

    tx.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
    let v1 = recv_view(&mut urx).await;
    assert_eq!(v1.hosts.len(), 1);

    tx.unbounded_send(Ok(sample_json("core-02", 20.0))).unwrap();
    let v2 = recv_view(&mut urx).await;
    assert_eq!(v2.hosts.len(), 2);

    tx.unbounded_send(Ok(sample_json("edge-01", 55.0))).unwrap();
    let v3 = recv_view(&mut urx).await;
    let avg = v3.averages.expect("averages");
    assert!((avg.cpu - 37.5).abs() < 1e-9, "avg cpu {}", avg.cpu);

    assert_eq!(sub.health(), StreamHealth::Streaming);
    assert_eq!(sub.snapshot().hosts.len(), 2);
    assert_eq!(sub.dropped_events(), 0);
    sub.unsubscribe();
}

#[tokio::test]
async fn test_snapshot_empty_before_first_event() {
    let (tx, connect) = channel_feed();
    let sub = Subscription::spawn(connect, |_v| {}, |_e| {});
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sub.snapshot().is_empty());
    assert_eq!(sub.health(), StreamHealth::Streaming);
    drop(tx);
}

#[tokio::test]
async fn test_malformed_events_dropped_stream_continues() {
    let (tx, connect) = channel_feed();
    let (utx, mut urx) = mpsc::unbounded_channel();
    let errs = Arc::new(AtomicUsize::new(0));
    let e2 = errs.clone();
    let sub = Subscription::spawn(
        connect,
        move |v| {
            let _ = utx.send(v);
        },
        move |_e| {
            e2.fetch_add(1, Ordering::SeqCst);
        },
    );

    tx.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
    let _ = recv_view(&mut urx).await;

    // truncated JSON, non-JSON, and schema-mismatched JSON all drop
    tx.unbounded_send(Ok("{\"hostname\": \"edge".into())).unwrap();
    tx.unbounded_send(Ok("not even json".into())).unwrap();
    tx.unbounded_send(Ok("{\"cpu\": 1.0}".into())).unwrap();

    tx.unbounded_send(Ok(sample_json("core-02", 20.0))).unwrap();
    let v = recv_view(&mut urx).await;
    assert_eq!(v.hosts.len(), 2);
    assert_eq!(sub.dropped_events(), 3);
    assert_eq!(sub.health(), StreamHealth::Streaming);
    assert_eq!(errs.load(Ordering::SeqCst), 0, "malformed events are not errors");

    sub.unsubscribe();
}

#[tokio::test]
async fn test_remote_close_reports_error_once_and_freezes_state() {
    let (tx, connect) = channel_feed();
    let (utx, mut urx) = mpsc::unbounded_channel();
    let errs = Arc::new(AtomicUsize::new(0));
    let e2 = errs.clone();
    let (etx, erx) = oneshot::channel::<FeedError>();
    let sub = Subscription::spawn(
        connect,
        move |v| {
            let _ = utx.send(v);
        },
        move |e| {
            e2.fetch_add(1, Ordering::SeqCst);
            let _ = etx.send(e);
        },
    );

    tx.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
    let _ = recv_view(&mut urx).await;

    drop(tx); // server hangup
    let err = timeout(Duration::from_secs(5), erx)
        .await
        .expect("error within deadline")
        .expect("error delivered");
    assert!(matches!(err, FeedError::RemoteClosed));
    assert_eq!(sub.health(), StreamHealth::Errored);

    // aggregated state is retained, not cleared
    let snap = sub.snapshot();
    assert_eq!(snap.hosts.len(), 1);
    assert_eq!(snap.recent.len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(errs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_item_stops_event_processing() {
    let feed = futures::stream::iter(vec![
        Ok(sample_json("edge-01", 42.0)),
        Err(FeedError::Status(500)),
        // never reached
        Ok(sample_json("core-02", 20.0)),
    ]);
    let updates = Arc::new(AtomicUsize::new(0));
    let u2 = updates.clone();
    let (etx, erx) = oneshot::channel();
    let sub = Subscription::spawn(
        async move { Ok(feed) },
        move |_v| {
            u2.fetch_add(1, Ordering::SeqCst);
        },
        move |e| {
            let _ = etx.send(e);
        },
    );

    let err = timeout(Duration::from_secs(5), erx)
        .await
        .expect("error within deadline")
        .expect("error delivered");
    assert!(matches!(err, FeedError::Status(500)));
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(sub.snapshot().hosts.len(), 1);
    assert_eq!(sub.health(), StreamHealth::Errored);
}

#[tokio::test]
async fn test_connect_failure_reports_error() {
    let (etx, erx) = oneshot::channel();
    let sub = Subscription::spawn(
        async move {
            Err::<futures::stream::Empty<FeedItem>, _>(FeedError::Status(503))
        },
        |_v| {},
        move |e| {
            let _ = etx.send(e);
        },
    );
    let err = timeout(Duration::from_secs(5), erx)
        .await
        .expect("error within deadline")
        .expect("error delivered");
    assert!(matches!(err, FeedError::Status(503)));
    assert_eq!(sub.health(), StreamHealth::Errored);
    assert!(sub.snapshot().is_empty());
}

#[tokio::test]
async fn test_health_connecting_until_connect_resolves() {
    let sub = Subscription::spawn(
        futures::future::pending::<Result<futures::stream::Empty<FeedItem>, FeedError>>(),
        |_v| {},
        |_e| {},
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sub.health(), StreamHealth::Connecting);
    sub.unsubscribe();
    assert_eq!(sub.health(), StreamHealth::Closed);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_silences_callbacks() {
    let (tx, connect) = channel_feed();
    let updates = Arc::new(AtomicUsize::new(0));
    let errs = Arc::new(AtomicUsize::new(0));
    let (utx, mut urx) = mpsc::unbounded_channel();
    let u2 = updates.clone();
    let e2 = errs.clone();
    let sub = Subscription::spawn(
        connect,
        move |v| {
            u2.fetch_add(1, Ordering::SeqCst);
            let _ = utx.send(v);
        },
        move |_e| {
            e2.fetch_add(1, Ordering::SeqCst);
        },
    );

    tx.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
    let _ = recv_view(&mut urx).await;

    sub.unsubscribe();
    sub.unsubscribe(); // second teardown is a no-op
    assert_eq!(sub.health(), StreamHealth::Closed);

    // nothing sent after teardown reaches a callback
    let _ = tx.unbounded_send(Ok(sample_json("core-02", 20.0)));
    let _ = tx.unbounded_send(Ok("garbage".into()));
    drop(tx);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(errs.load(Ordering::SeqCst), 0);

    // last snapshot stays readable after teardown
    assert_eq!(sub.snapshot().hosts.len(), 1);
}

#[tokio::test]
async fn test_error_after_unsubscribe_is_not_reported() {
    let (tx, connect) = channel_feed();
    let errs = Arc::new(AtomicUsize::new(0));
    let e2 = errs.clone();
    let (utx, mut urx) = mpsc::unbounded_channel();
    let sub = Subscription::spawn(
        connect,
        move |v| {
            let _ = utx.send(v);
        },
        move |_e| {
            e2.fetch_add(1, Ordering::SeqCst);
        },
    );
    tx.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
    let _ = recv_view(&mut urx).await;

    sub.unsubscribe();
    drop(tx); // hangup lands after teardown
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(errs.load(Ordering::SeqCst), 0);
    assert_eq!(sub.health(), StreamHealth::Closed);
}

#[tokio::test]
async fn test_drop_tears_the_subscription_down() {
    let (tx, connect) = channel_feed();
    let updates = Arc::new(AtomicUsize::new(0));
    let (utx, mut urx) = mpsc::unbounded_channel();
    let u2 = updates.clone();
    {
        let _sub = Subscription::spawn(
            connect,
            move |v| {
                u2.fetch_add(1, Ordering::SeqCst);
                let _ = utx.send(v);
            },
            |_e| {},
        );
        tx.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
        let _ = recv_view(&mut urx).await;
    }
    let _ = tx.unbounded_send(Ok(sample_json("core-02", 20.0)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subscriptions_do_not_share_state() {
    let (tx_a, connect_a) = channel_feed();
    let (tx_b, connect_b) = channel_feed();
    let (utx_a, mut urx_a) = mpsc::unbounded_channel();
    let (utx_b, mut urx_b) = mpsc::unbounded_channel();
    let sub_a = Subscription::spawn(
        connect_a,
        move |v| {
            let _ = utx_a.send(v);
        },
        |_e| {},
    );
    let sub_b = Subscription::spawn(
        connect_b,
        move |v| {
            let _ = utx_b.send(v);
        },
        |_e| {},
    );

    tx_a.unbounded_send(Ok(sample_json("edge-01", 42.0))).unwrap();
    tx_b.unbounded_send(Ok(sample_json("core-02", 20.0))).unwrap();
    let va = recv_view(&mut urx_a).await;
    let vb = recv_view(&mut urx_b).await;

    assert!(va.host("edge-01").is_some());
    assert!(va.host("core-02").is_none());
    assert!(vb.host("core-02").is_some());
    assert!(vb.host("edge-01").is_none());

    sub_a.unsubscribe();
    // sub_b unaffected by a's teardown
    tx_b.unbounded_send(Ok(sample_json("core-02", 25.0))).unwrap();
    let vb2 = recv_view(&mut urx_b).await;
    assert!((vb2.host("core-02").expect("present").cpu - 25.0).abs() < 1e-9);
    sub_b.unsubscribe();
}
