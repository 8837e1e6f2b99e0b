use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::instrument::WithSubscriber;

use crate::store::SessionStore;

/// Interval between two sweeps of a store without native expiry.
pub const SESSION_GC_INTERVAL: Duration = Duration::from_secs(60);

/// How long `stop` waits for the worker before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodically reaps expired sessions from a store that needs it.
///
/// At most one worker runs per collector. Errors from the store are logged
/// and the loop keeps going.
pub struct GarbageCollector {
    store: Arc<dyn SessionStore>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl GarbageCollector {
    /// Creates a stopped collector sweeping every [`SESSION_GC_INTERVAL`].
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_interval(store, SESSION_GC_INTERVAL)
    }

    /// Creates a stopped collector with a custom interval.
    pub fn with_interval(store: Arc<dyn SessionStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            worker: Mutex::new(None),
        }
    }

    /// Starts the worker if the store needs collection.
    ///
    /// Must be called from within a Tokio runtime. The worker logs through
    /// the subscriber that is current at this call. Calling it again while
    /// a worker runs does nothing.
    ///
    /// # Returns
    ///
    /// `true` if a worker is running after the call.
    pub fn start(&self) -> bool {
        if !self.store.need_session_gc() {
            tracing::debug!("Session store expires records natively, GC not started");
            return false;
        }

        let mut worker = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_some() {
            return true;
        }

        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(
            sweep_loop(self.store.clone(), self.interval, stopped).with_current_subscriber(),
        );

        *worker = Some(Worker { stop, handle });
        tracing::info!("✅ Session GC started (every {:?})", self.interval);
        true
    }

    /// Stops the worker and waits for it to exit. Does nothing if no
    /// worker was started.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(Worker { stop, mut handle }) = worker else {
            return;
        };

        let _ = stop.send(());

        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(_) => tracing::info!("Session GC stopped"),
            Err(_) => {
                tracing::warn!("Session GC did not stop within {:?}, aborting", STOP_TIMEOUT);
                handle.abort();
            }
        }
    }

    /// Whether a worker is currently running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }
}

async fn sweep_loop(store: Arc<dyn SessionStore>, period: Duration, mut stopped: oneshot::Receiver<()>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                match store.session_gc().await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::info!("🧹 Session GC reaped {} expired sessions", reaped),
                    Err(e) => tracing::error!("❌ Session GC failed: {}", e),
                }
            }
        }
    }
}
