//! Delayed switch to newly discovered sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::registry::SessionRegistry;

/// Switches to a session after a fixed delay unless superseded.
///
/// Each `schedule` bumps a generation counter; a timer only acts if its
/// generation is still current when it fires.
pub struct SwitchScheduler {
    registry: Arc<Mutex<SessionRegistry>>,
    delay: Duration,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SwitchScheduler {
    #[must_use]
    pub fn new(registry: Arc<Mutex<SessionRegistry>>, delay: Duration) -> Self {
        Self {
            registry,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            pending: Mutex::new(None),
        }
    }

    /// Switch to `id` once the delay elapses.
    pub fn schedule(&self, id: impl Into<String>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let id = id.into();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() || current.load(Ordering::SeqCst) != generation {
                return;
            }
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if registry.switch_to(&id).is_none() {
                tracing::debug!(id = %id, "Scheduled switch target vanished");
            }
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drop any pending switch.
    pub fn cancel_pending(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Cancel and wait for the pending timer. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{OutputSink, SwitchEvent};
    use std::path::Path;

    struct NullSink;

    impl OutputSink for NullSink {
        fn output(&self, _id: &str, _content: &str) {}
        fn switched(&self, _event: &SwitchEvent) {}
    }

    fn shared_registry() -> Arc<Mutex<SessionRegistry>> {
        let mut registry = SessionRegistry::new(10, Arc::new(NullSink)).with_primary("main");
        registry.add_session("main", "main", Path::new("/t/main.jsonl"));
        registry.add_session("s1", "s1", Path::new("/t/s1.jsonl"));
        registry.add_session("s2", "s2", Path::new("/t/s2.jsonl"));
        Arc::new(Mutex::new(registry))
    }

    fn active(registry: &Arc<Mutex<SessionRegistry>>) -> String {
        registry.lock().unwrap().active().unwrap().id.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_switches_after_delay() {
        let registry = shared_registry();
        let scheduler = SwitchScheduler::new(Arc::clone(&registry), Duration::from_millis(1500));

        scheduler.schedule("s1");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(active(&registry), "main");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(active(&registry), "s1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_schedule_supersedes() {
        let registry = shared_registry();
        let scheduler = SwitchScheduler::new(Arc::clone(&registry), Duration::from_millis(100));

        scheduler.schedule("s1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.schedule("s2");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(active(&registry), "s2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_and_stop() {
        let registry = shared_registry();
        let scheduler = SwitchScheduler::new(Arc::clone(&registry), Duration::from_millis(100));

        scheduler.schedule("s1");
        scheduler.cancel_pending();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(active(&registry), "main");

        scheduler.stop().await;
        scheduler.stop().await;
        scheduler.schedule("s2");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(active(&registry), "main");
    }
}
