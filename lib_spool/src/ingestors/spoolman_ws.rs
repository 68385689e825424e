//! # Spoolman Event Stream
//!
//! Self-healing websocket client for the Spoolman event feed. One background
//! task owns the whole session lifecycle: connect with a bounded timeout,
//! read loop with client keepalive probes, fixed-delay reconnect after any
//! disconnect, and a clean close on shutdown.
//!
//! The read loop is the single consumer of the stream, so event ordering is
//! preserved by construction. Anything that must not block it (the active
//! spool clear on a deletion event, the post-connect liveness check) runs on
//! short-lived spawned tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::SpoolmanConfig;
use crate::core::active_spool::ActiveSpool;
use crate::retrieve::spoolman_http::SpoolmanClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One decoded frame from the event feed. Unknown fields and shapes are
/// tolerated; only spool deletions are actionable.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    resource: String,
    #[serde(default, rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: Value,
}

/// Extracts the spool id from a deletion event, if the frame is one.
fn deleted_spool_id(text: &str) -> Option<i64> {
    let event: StreamEvent = serde_json::from_str(text).ok()?;
    if event.resource != "spool" || event.event_type != "deleted" {
        return None;
    }
    event.payload.get("id").and_then(Value::as_i64)
}

/// Why the read loop ended, for the outer reconnect loop.
enum SessionEnd {
    /// Stream closed or failed; schedule a reconnect after backoff.
    Dropped,
    /// Shutdown was requested; exit without reconnecting.
    Shutdown,
}

/// The streaming session manager.
///
/// State machine: `Disconnected → Connecting → Connected → Disconnected → …`
/// until [`SpoolmanStream::stop`] cancels the token, which is terminal.
pub struct SpoolmanStream {
    ws_url: String,
    connect_timeout: Duration,
    ping_interval: Duration,
    ping_timeout: Duration,
    reconnect_delay: Duration,
    active: Arc<ActiveSpool>,
    client: Arc<SpoolmanClient>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    /// The reconnect-loop task, joined with a grace period on stop.
    loop_task: Mutex<Option<JoinHandle<()>>>,
    /// The outstanding spool liveness check; superseded on each connect.
    check_task: StdMutex<Option<JoinHandle<()>>>,
}

impl SpoolmanStream {
    pub fn new(
        config: &SpoolmanConfig,
        ws_url: String,
        client: Arc<SpoolmanClient>,
        active: Arc<ActiveSpool>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ws_url,
            connect_timeout: config.connect_timeout,
            ping_interval: config.ping_interval,
            ping_timeout: config.ping_timeout,
            reconnect_delay: config.reconnect_delay,
            active,
            client,
            connected,
            cancel: CancellationToken::new(),
            loop_task: Mutex::new(None),
            check_task: StdMutex::new(None),
        }
    }

    /// Current stream liveness, gating dependent operations.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Launches the reconnect loop as a background task. Idempotent while
    /// the loop is still running.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.loop_task.lock().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let stream = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { stream.run().await }));
    }

    /// Requests shutdown: closes any live session, cancels the outstanding
    /// liveness check and waits briefly for the loop task to exit. A stuck
    /// task is tolerated; shutdown proceeds regardless. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.cancel_spool_check();
        let task = self.loop_task.lock().await.take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                log::warn!("Spoolman stream task did not exit within the grace period");
            }
        }
    }

    /// The reconnect loop. Runs until shutdown; every disconnect (including
    /// a failed connect) is followed by the fixed backoff delay.
    async fn run(self: Arc<Self>) {
        let mut log_connect = true;
        let mut last_error: Option<String> = None;
        while !self.cancel.is_cancelled() {
            if log_connect {
                log::info!("Connecting to Spoolman: {}", self.ws_url);
                log_connect = false;
            }
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                attempt = tokio::time::timeout(
                    self.connect_timeout,
                    connect_async(self.ws_url.as_str()),
                ) => attempt,
            };
            match attempt {
                Ok(Ok((ws, _response))) => {
                    self.connected.store(true, Ordering::SeqCst);
                    self.active.reset_error_suppression();
                    last_error = None;
                    log_connect = true;
                    log::info!("Connected to Spoolman spool manager");
                    // Handle deletions that happened while we were away.
                    if self.active.active_id().await.is_some() {
                        self.spawn_spool_check();
                    }
                    if let SessionEnd::Shutdown = self.read_loop(ws).await {
                        break;
                    }
                }
                Ok(Err(e)) => self.note_connect_failure(&mut last_error, e.to_string()),
                Err(_) => self.note_connect_failure(
                    &mut last_error,
                    format!("connect timed out after {:?}", self.connect_timeout),
                ),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Logs a connect failure unless it repeats the previous one verbatim.
    fn note_connect_failure(&self, last_error: &mut Option<String>, message: String) {
        if last_error.as_deref() != Some(message.as_str()) {
            log::error!("Failed to connect to Spoolman: {message}");
            *last_error = Some(message);
        }
    }

    /// Reads the session until it drops or shutdown is requested.
    async fn read_loop(&self, ws: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        let mut probe_timer = tokio::time::interval(self.ping_interval);
        let mut last_probe_ack = Instant::now();
        let end = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "server shutdown".into(),
                        })))
                        .await;
                    break SessionEnd::Shutdown;
                }
                _ = probe_timer.tick() => {
                    if last_probe_ack.elapsed() > self.ping_timeout {
                        log::warn!(
                            "No probe ack from Spoolman for {:.0}s, dropping session",
                            last_probe_ack.elapsed().as_secs_f64()
                        );
                        break SessionEnd::Dropped;
                    }
                    if write.send(Message::Ping(Bytes::new())).await.is_err() {
                        break SessionEnd::Dropped;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.decode_message(text.as_str()).await,
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        // Informational only; the probe timeout above is the
                        // sole enforcement.
                        last_probe_ack = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match &frame {
                            Some(f) => (Some(f.code), Some(f.reason.to_string())),
                            None => (None, None),
                        };
                        log::info!(
                            "Spoolman disconnected - code: {code:?}, reason: {reason:?}, \
                             probe ack elapsed: {:.1}s",
                            last_probe_ack.elapsed().as_secs_f64()
                        );
                        break SessionEnd::Dropped;
                    }
                    Some(Err(e)) => {
                        log::warn!(
                            "Spoolman stream read error: {e}, probe ack elapsed: {:.1}s",
                            last_probe_ack.elapsed().as_secs_f64()
                        );
                        break SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    None => {
                        log::info!("Spoolman stream closed by remote host");
                        break SessionEnd::Dropped;
                    }
                }
            }
        };
        self.connected.store(false, Ordering::SeqCst);
        end
    }

    /// Handles one text frame. A deletion of the active spool clears the
    /// selection on a spawned task so the read loop never blocks on the
    /// selection lock; the task checks the shutdown token so no work leaks
    /// past teardown.
    async fn decode_message(&self, text: &str) {
        let Some(deleted_id) = deleted_spool_id(text) else {
            return;
        };
        let Some(active_id) = self.active.active_id().await else {
            return;
        };
        if deleted_id != active_id {
            return;
        }
        let active = Arc::clone(&self.active);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            active.clear_deleted().await;
        });
    }

    /// Verifies that the selected spool still exists remotely. At most one
    /// check is outstanding; a newer connect supersedes it.
    fn spawn_spool_check(self: &Arc<Self>) {
        self.cancel_spool_check();
        let stream = Arc::clone(self);
        let task = tokio::spawn(async move {
            let Some(spool_id) = stream.active.active_id().await else {
                return;
            };
            match stream.client.get_spool(spool_id).await {
                Ok(resp) if resp.status == 404 => {
                    log::info!("Spool id {spool_id} not found, clearing active spool");
                    stream.active.clear_deleted().await;
                }
                Ok(resp) if !resp.success => {
                    log::info!("Attempt to check spool status failed: {}", resp.error_summary());
                }
                Ok(_) => log::info!("Found spool id {spool_id} on Spoolman instance"),
                Err(e) => log::info!("Attempt to check spool status failed: {e:#}"),
            }
        });
        *self.check_task.lock().expect("check task lock poisoned") = Some(task);
    }

    /// Aborts the outstanding liveness check, if one is still running.
    fn cancel_spool_check(&self) {
        let mut slot = self.check_task.lock().expect("check task lock poisoned");
        if let Some(task) = slot.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}
