//! # Active Spool Store
//!
//! Owns the currently selected spool id and the authoritative flush of
//! accumulated usage to Spoolman. Selection changes and flushes are
//! serialized under the selection lock; the accumulator keeps its own lock
//! so the high-frequency position path never waits on a selection change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::accumulator::UsageAccumulator;
use crate::retrieve::spoolman_http::SpoolmanClient;

/// Persistence seam for the active spool selection.
///
/// The engine persists exactly one value: the last selected spool id (or
/// `None`). Implementations are injected at construction, never looked up
/// ambiently.
pub trait SelectionStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<i64>>;
    fn save(&self, spool_id: Option<i64>) -> anyhow::Result<()>;
}

/// Notification broadcast to interested listeners on every selection change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpoolEvent {
    /// The active spool changed; `None` means the selection was cleared.
    ActiveSpoolSet { spool_id: Option<i64> },
}

/// The active-spool store.
///
/// All collaborators are constructor-injected: the REST client, the
/// accumulator, the persistence store, the notification channel and the
/// shared stream-liveness flag.
pub struct ActiveSpool {
    client: Arc<SpoolmanClient>,
    accumulator: Arc<UsageAccumulator>,
    store: Arc<dyn SelectionStore>,
    events: broadcast::Sender<SpoolEvent>,
    connected: Arc<AtomicBool>,
    /// Selection lock. Guards `spool_id` and serializes select/flush.
    spool_id: Mutex<Option<i64>>,
    /// Identity of the last logged flush failure, for duplicate suppression.
    last_flush_error: StdMutex<Option<String>>,
}

impl ActiveSpool {
    pub fn new(
        client: Arc<SpoolmanClient>,
        accumulator: Arc<UsageAccumulator>,
        store: Arc<dyn SelectionStore>,
        events: broadcast::Sender<SpoolEvent>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            accumulator,
            store,
            events,
            connected,
            spool_id: Mutex::new(None),
            last_flush_error: StdMutex::new(None),
        }
    }

    /// Restores the persisted selection. Called once at startup, before any
    /// other operation; emits no notification.
    pub async fn load(&self) -> anyhow::Result<()> {
        let persisted = self.store.load()?;
        *self.spool_id.lock().await = persisted;
        if let Some(id) = persisted {
            log::info!("Restored active spool id {id} from storage");
        }
        Ok(())
    }

    /// The currently selected spool, if any.
    pub async fn active_id(&self) -> Option<i64> {
        *self.spool_id.lock().await
    }

    /// Subscribes to selection-changed notifications.
    pub fn events(&self) -> broadcast::Receiver<SpoolEvent> {
        self.events.subscribe()
    }

    /// Selects a spool, or clears the selection with `None`. This is the
    /// callable equivalent of the selection endpoint's POST.
    pub async fn set_active(self: &Arc<Self>, spool_id: Option<i64>) {
        self.apply(spool_id, false).await;
    }

    /// Clears the selection because Spoolman no longer knows the spool
    /// (deletion event, or 404 from a check or flush). Pending usage for a
    /// deleted spool is not flushed.
    pub async fn clear_deleted(self: &Arc<Self>) {
        self.apply(None, true).await;
    }

    // Boxed so the recursive cycle through `flush_for`'s spawned
    // `clear_deleted` doesn't defeat the compiler's `Send` inference.
    fn apply(self: &Arc<Self>, new_id: Option<i64>, deleted: bool) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut current = self.spool_id.lock().await;
            if *current == new_id {
                log::info!("Spool id already set to {new_id:?}");
                return;
            }
            // Account for the outgoing spool before switching, unless Spoolman
            // already deleted it.
            if !deleted {
                if let Some(outgoing) = *current {
                    self.flush_for(outgoing).await;
                } else if new_id.is_some() {
                    // Nothing to flush; the new spool starts from zero.
                    self.accumulator.reset().await;
                }
            }
            *current = new_id;
            if let Err(e) = self.store.save(new_id) {
                log::error!("Failed to persist active spool selection: {e:#}");
            }
            let _ = self.events.send(SpoolEvent::ActiveSpoolSet { spool_id: new_id });
            log::info!("Setting active spool to {new_id:?}");
        })
    }

    /// Flushes pending usage for the current selection. No-op without a
    /// selection; the periodic sync task drives this.
    pub async fn flush(self: &Arc<Self>) {
        let spool_id = *self.spool_id.lock().await;
        match spool_id {
            Some(id) => self.flush_for(id).await,
            None => log::debug!("No active spool, skipping usage tracking"),
        }
    }

    /// Reports pending usage for one spool id. The accumulation lock is held
    /// across the request so the amount reported and the amount zeroed agree.
    ///
    /// While disconnected nothing is sent: usage keeps accumulating locally
    /// and the next periodic flush retries. Usage is never dropped on a
    /// transient failure.
    async fn flush_for(self: &Arc<Self>, spool_id: i64) {
        let mut usage = self.accumulator.lock().await;
        if usage.extruded <= 0.0 {
            return;
        }
        if !self.connected.load(Ordering::SeqCst) {
            log::debug!(
                "Spoolman not connected, retaining {:.3}mm of pending usage",
                usage.extruded
            );
            return;
        }
        let used_length = usage.extruded;
        log::debug!("Sending spool usage: id: {spool_id}, length: {used_length:.3}mm");
        match self.client.report_usage(spool_id, used_length).await {
            Ok(resp) if resp.success => {
                usage.extruded = 0.0;
                self.reset_error_suppression();
            }
            Ok(resp) if resp.status == 404 => {
                // Authoritative: the spool vanished remotely. Clear from a
                // spawned task so a flush inside a selection change cannot
                // deadlock on the selection lock.
                self.reset_error_suppression();
                log::info!("Spool id {spool_id} not found, clearing active spool");
                let store = Arc::clone(self);
                tokio::spawn(async move { store.clear_deleted().await });
            }
            Ok(resp) => self.log_flush_error(spool_id, resp.error_summary()),
            Err(e) => self.log_flush_error(spool_id, format!("{e:#}")),
        }
    }

    /// Logs a flush failure once per distinct error; repeats are suppressed
    /// until the error changes or any flush/connect succeeds.
    fn log_flush_error(&self, spool_id: i64, message: String) {
        let mut last = self.last_flush_error.lock().expect("suppression lock poisoned");
        if last.as_deref() != Some(message.as_str()) {
            log::info!("Failed to update extrusion for spool id {spool_id}: {message}");
            *last = Some(message);
        }
    }

    /// Clears error-log suppression. Also invoked by the stream on every
    /// successful connect.
    pub fn reset_error_suppression(&self) {
        *self.last_flush_error.lock().expect("suppression lock poisoned") = None;
    }

    /// Spawns the periodic sync task: flush attempts at a fixed cadence,
    /// independent of sample arrival, until the token is cancelled.
    pub fn spawn_sync_task(
        self: &Arc<Self>,
        sync_rate: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_rate);
            // The immediate first tick would flush at startup for no reason.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => store.flush().await,
                }
            }
        })
    }
}
