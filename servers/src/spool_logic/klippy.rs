use futures_util::{SinkExt, StreamExt};
use lib_spool::UsageAccumulator;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

const SUBSCRIBE_ID: i64 = 1;

/// Subscribes to the machine controller's status feed and forwards absolute
/// extruder positions into the accumulator. Reconnects on any failure.
pub async fn run(
    klippy_url: String,
    accumulator: Arc<UsageAccumulator>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        log::info!("Connecting to machine controller: {}", klippy_url);

        match connect_async(klippy_url.as_str()).await {
            Ok((ws_stream, _)) => {
                log::info!("Connected to machine controller");
                let (mut write, mut read) = ws_stream.split();

                let subscribe = json!({
                    "jsonrpc": "2.0",
                    "method": "printer.objects.subscribe",
                    "params": { "objects": { "toolhead": ["position"] } },
                    "id": SUBSCRIBE_ID,
                });
                if let Err(e) = write.send(WsMessage::Text(subscribe.to_string().into())).await {
                    log::error!("Failed to subscribe to position feed: {}", e);
                    if backoff(&mut shutdown).await {
                        return;
                    }
                    continue;
                }

                loop {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            log::info!("Position feed shutting down...");
                            let _ = write.close().await;
                            return;
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    handle_frame(text.as_str(), &accumulator).await;
                                }
                                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                                Some(Ok(WsMessage::Close(_))) | None => {
                                    log::warn!("Machine controller feed closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    log::error!("Machine controller read error: {}", e);
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::error!("Failed to connect to machine controller: {}", e);
            }
        }
        if backoff(&mut shutdown).await {
            break;
        }
    }
}

/// Waits out the reconnect delay. Returns true if shutdown arrived first.
async fn backoff(shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = shutdown.recv() => true,
        _ = sleep(Duration::from_secs(5)) => false,
    }
}

async fn handle_frame(text: &str, accumulator: &UsageAccumulator) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return;
    };
    // Subscription acknowledgement: seed the high-water mark from the
    // controller's current position without counting it as usage.
    if frame.get("id").and_then(Value::as_i64) == Some(SUBSCRIBE_ID) {
        match frame
            .get("result")
            .and_then(|r| r.get("status"))
            .and_then(eposition_from_status)
        {
            Some(epos) => {
                log::debug!("Initial epos: {}", epos);
                accumulator.seed(epos).await;
            }
            None => log::error!("Position feed subscription returned no extruder position"),
        }
        return;
    }
    // Status update notifications carry [status, timestamp] params.
    if frame.get("method").and_then(Value::as_str) == Some("notify_status_update") {
        if let Some(epos) = frame
            .get("params")
            .and_then(|p| p.get(0))
            .and_then(eposition_from_status)
        {
            accumulator.observe(epos).await;
        }
    }
}

/// The extruder position is the fourth component of the toolhead position.
fn eposition_from_status(status: &Value) -> Option<f64> {
    status
        .get("toolhead")
        .and_then(|t| t.get("position"))
        .and_then(|p| p.get(3))
        .and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eposition_from_status() {
        let status = json!({"toolhead": {"position": [0.0, 1.0, 2.0, 37.5]}});
        assert_eq!(eposition_from_status(&status), Some(37.5));
    }

    #[test]
    fn test_eposition_missing_component() {
        let status = json!({"toolhead": {"position": [0.0, 1.0]}});
        assert_eq!(eposition_from_status(&status), None);
        assert_eq!(eposition_from_status(&json!({})), None);
    }

    #[tokio::test]
    async fn test_subscribe_ack_seeds_without_usage() {
        let accumulator = UsageAccumulator::new();
        let ack = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_ID,
            "result": {
                "status": {"toolhead": {"position": [0.0, 0.0, 0.0, 100.0]}},
                "eventtime": 12.0,
            }
        });
        handle_frame(&ack.to_string(), &accumulator).await;
        assert_eq!(accumulator.pending().await, 0.0);

        let update = json!({
            "jsonrpc": "2.0",
            "method": "notify_status_update",
            "params": [{"toolhead": {"position": [0.0, 0.0, 0.0, 104.0]}}, 13.0]
        });
        handle_frame(&update.to_string(), &accumulator).await;
        assert_eq!(accumulator.pending().await, 4.0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect_backoff() {
        let (tx, rx) = broadcast::channel(1);
        let accumulator = Arc::new(UsageAccumulator::new());
        // Nothing listens on port 1, so the connect fails straight away and
        // the task sits in the reconnect delay.
        let task = tokio::spawn(run("ws://127.0.0.1:1/websocket".to_string(), accumulator, rx));
        sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("shutdown should interrupt the reconnect delay")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_frames_are_ignored() {
        let accumulator = UsageAccumulator::new();
        for text in [
            r#"{"jsonrpc": "2.0", "method": "notify_proc_stat_update", "params": [{}]}"#,
            "not json",
            r#"{"jsonrpc": "2.0", "method": "notify_status_update", "params": [{"heater_bed": {}}, 1.0]}"#,
        ] {
            handle_frame(text, &accumulator).await;
        }
        assert_eq!(accumulator.pending().await, 0.0);
    }
}
