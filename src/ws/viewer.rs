//! One task per connected viewer.
//!
//! The session reads from the snapshot watch channel, so a slow viewer only
//! ever receives the newest snapshot; intermediate ones are skipped, never
//! reordered.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::types::Snapshot;
use crate::ws::messages::encode_snapshot;

pub async fn serve_viewer(
    socket: WebSocket,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    shutdown: watch::Receiver<bool>,
    health: Arc<HealthState>,
) {
    health.viewer_connected();
    info!(viewers = health.viewers(), "Viewer connected");

    run_session(socket, snapshots, shutdown).await;

    health.viewer_disconnected();
    info!(viewers = health.viewers(), "Viewer disconnected");
}

async fn run_session(
    socket: WebSocket,
    mut snapshots: watch::Receiver<Arc<Snapshot>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut sender, mut receiver) = socket.split();

    let latest = snapshots.borrow_and_update().clone();
    if send_snapshot(&mut sender, &latest).await.is_err() {
        return;
    }

    loop {
        if *shutdown.borrow() {
            close(&mut sender).await;
            return;
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    // Publisher gone: the pipeline has stopped.
                    close(&mut sender).await;
                    return;
                }
                let latest = snapshots.borrow_and_update().clone();
                if send_snapshot(&mut sender, &latest).await.is_err() {
                    return;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Err(e)) => {
                    debug!("Viewer socket error: {e}");
                    return;
                }
                // Viewers have nothing to say; pings are answered by the socket layer.
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                close(&mut sender).await;
                return;
            }
        }
    }
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    snapshot: &Snapshot,
) -> Result<(), ()> {
    let text = match encode_snapshot(snapshot) {
        Ok(t) => t,
        Err(e) => {
            warn!(cycle = snapshot.cycle, "Failed to encode snapshot: {e}");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|e| {
        debug!(cycle = snapshot.cycle, "Viewer send failed: {e}");
    })
}

async fn close(sender: &mut SplitSink<WebSocket, Message>) {
    let frame = CloseFrame {
        code: close_code::AWAY,
        reason: "server shutting down".into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use futures_util::StreamExt;
    use tokio_tungstenite::{connect_async, tungstenite};

    use crate::api::health::HealthState;
    use crate::api::latency::LatencyStats;
    use crate::api::routes::{router, ApiState};
    use crate::state::SnapshotPublisher;
    use crate::types::Snapshot;

    use super::*;

    struct Server {
        url: String,
        publisher: SnapshotPublisher,
        shutdown: watch::Sender<bool>,
        health: Arc<HealthState>,
    }

    async fn start() -> Server {
        let (publisher, snapshots) = SnapshotPublisher::new(Snapshot::empty(Utc::now()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let health = Arc::new(HealthState::new());
        let app = router(ApiState {
            snapshots,
            health: Arc::clone(&health),
            latency: Arc::new(LatencyStats::new()),
            shutdown: shutdown_rx,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Server { url: format!("ws://{addr}/ws"), publisher, shutdown, health }
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        match msg {
            tungstenite::Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn viewer_gets_latest_on_connect_then_each_publish() {
        let server = start().await;
        server.publisher.publish(Vec::new(), false, Utc::now());

        let (mut ws, _) = connect_async(server.url.as_str()).await.unwrap();
        let first = next_json(&mut ws).await;
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["cycle"], 1);
        assert_eq!(first["stale"], false);

        server.publisher.publish(Vec::new(), true, Utc::now());
        let second = next_json(&mut ws).await;
        assert_eq!(second["cycle"], 2);
        assert_eq!(second["stale"], true);
    }

    #[tokio::test]
    async fn slow_viewer_skips_to_latest() {
        let server = start().await;
        let (mut ws, _) = connect_async(server.url.as_str()).await.unwrap();
        assert_eq!(next_json(&mut ws).await["cycle"], 0);

        // Let the session park on `changed()` before publishing a burst.
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..5 {
            server.publisher.publish(Vec::new(), false, Utc::now());
        }

        let mut last = 0;
        while last < 5 {
            let cycle = next_json(&mut ws).await["cycle"].as_u64().unwrap();
            assert!(cycle > last, "cycles never go backwards");
            last = cycle;
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    async fn shutdown_sends_close_frame() {
        let server = start().await;
        let (mut ws, _) = connect_async(server.url.as_str()).await.unwrap();
        next_json(&mut ws).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.health.viewers(), 1);
        server.shutdown.send(true).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("close within timeout")
            .expect("stream open")
            .expect("valid frame");
        assert!(matches!(msg, tungstenite::Message::Close(_)));
    }

    #[tokio::test]
    async fn client_close_ends_session() {
        let server = start().await;
        let (mut ws, _) = connect_async(server.url.as_str()).await.unwrap();
        next_json(&mut ws).await;
        ws.close(None).await.unwrap();

        let mut viewers = 1;
        for _ in 0..50 {
            viewers = server.health.viewers();
            if viewers == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(viewers, 0);
    }
}
