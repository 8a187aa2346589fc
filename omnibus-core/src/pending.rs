//! Pending-request registry: correlation-id → waiter, timeout sweep,
//! cancellation (spec §4.4). A concurrent map plus a monotonic clock
//! abstraction, no per-request timer (spec §9), mirroring the teacher's use
//! of `tokio_util::sync::CancellationToken` for cooperative cancellation
//! (`r2e-scheduler/src/lib.rs`'s `SchedulerHandle`).

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{BusError, Result};

struct Entry {
    type_name: &'static str,
    expires_at: Instant,
    sink: oneshot::Sender<Result<Bytes>>,
}

/// Correlation-id keyed table of in-flight requests (spec §3, §4.4).
pub struct PendingRegistry {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl PendingRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// A correlation-id is unique at any moment; re-registration is
    /// rejected (spec §4.4 invariant).
    pub fn register(
        &self,
        correlation_id: impl Into<String>,
        type_name: &'static str,
        expires_at: Instant,
    ) -> Result<oneshot::Receiver<Result<Bytes>>> {
        let correlation_id = correlation_id.into();
        if self.entries.contains_key(&correlation_id) {
            return Err(BusError::Configuration(format!(
                "correlation id '{correlation_id}' already registered"
            )));
        }
        let (sink, rx) = oneshot::channel();
        self.entries.insert(
            correlation_id,
            Entry {
                type_name,
                expires_at,
                sink,
            },
        );
        Ok(rx)
    }

    /// Await a reply, racing the caller's cancellation signal. The first of
    /// {reply, cancellation} to land wins; the registry entry is evicted
    /// before this returns either way (spec §4.4).
    pub async fn await_reply(
        &self,
        correlation_id: &str,
        rx: oneshot::Receiver<Result<Bytes>>,
        cancel: CancellationToken,
    ) -> Result<Bytes> {
        tokio::select! {
            biased;
            res = rx => res.unwrap_or(Err(BusError::Disposed)),
            _ = cancel.cancelled() => {
                self.entries.remove(correlation_id);
                Err(BusError::Cancelled)
            }
        }
    }

    /// Evict an entry without completing its sink. Used when the transport
    /// produce for a just-registered request fails outright (spec §4.5
    /// step 5: "the pending request is unregistered immediately with the
    /// transport error" — the caller returns that error directly).
    pub fn unregister(&self, correlation_id: &str) -> bool {
        self.entries.remove(correlation_id).is_some()
    }

    /// Complete a pending entry with a reply value. Returns `false` if no
    /// such entry exists (already terminated or never registered).
    pub fn resolve(&self, correlation_id: &str, value: Bytes) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, entry)) => entry.sink.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Complete a pending entry with a failure.
    pub fn fail(&self, correlation_id: &str, err: BusError) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, entry)) => entry.sink.send(Err(err)).is_ok(),
            None => false,
        }
    }

    /// Scan and fail every entry whose deadline has passed. Idempotent,
    /// never blocks on waiters (spec §4.4).
    pub fn sweep_now(&self) -> usize {
        self.sweep(self.clock.now())
    }

    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = 0;
        for correlation_id in expired {
            if let Some((id, entry)) = self.entries.remove(&correlation_id) {
                let _ = entry.sink.send(Err(BusError::Timeout(format!(
                    "request '{id}' ({}) exceeded its deadline",
                    entry.type_name
                ))));
                swept += 1;
            }
        }
        swept
    }

    /// Fail every outstanding entry with `Cancelled` (used on bus dispose).
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for correlation_id in ids {
            if let Some((_, entry)) = self.entries.remove(&correlation_id) {
                let _ = entry.sink.send(Err(BusError::Cancelled));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn registry() -> (PendingRegistry, ManualClock) {
        let clock = ManualClock::new();
        (PendingRegistry::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn resolve_completes_pending_request() {
        let (registry, clock) = registry();
        let rx = registry
            .register("corr-1", "RequestA", clock.now() + Duration::from_secs(5))
            .unwrap();
        assert!(registry.resolve("corr-1", Bytes::from_static(b"reply")));
        assert_eq!(rx.await.unwrap().unwrap(), Bytes::from_static(b"reply"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_rejected() {
        let (registry, clock) = registry();
        registry
            .register("corr-1", "RequestA", clock.now() + Duration::from_secs(5))
            .unwrap();
        let err = registry
            .register("corr-1", "RequestA", clock.now() + Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
    }

    #[tokio::test]
    async fn sweep_times_out_expired_entries_only() {
        let (registry, clock) = registry();
        let rx_a = registry
            .register("a", "RequestA", clock.now() + Duration::from_secs(5))
            .unwrap();
        let rx_b = registry
            .register("b", "RequestB", clock.now() + Duration::from_secs(10))
            .unwrap();

        clock.advance(Duration::from_secs(6));
        let swept = registry.sweep(clock.now());

        assert_eq!(swept, 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(rx_a.await.unwrap().unwrap_err().kind(), "Timeout");
        drop(rx_b);
    }

    #[tokio::test]
    async fn cancel_all_fails_every_outstanding_entry() {
        let (registry, clock) = registry();
        let rx = registry
            .register("a", "RequestA", clock.now() + Duration::from_secs(5))
            .unwrap();
        registry.cancel_all();
        assert_eq!(registry.count(), 0);
        assert_eq!(rx.await.unwrap().unwrap_err().kind(), "Cancelled");
    }

    #[tokio::test]
    async fn cancellation_before_reply_leaves_no_leaked_entry() {
        let (registry, clock) = registry();
        let cancel = CancellationToken::new();
        let rx = registry
            .register("a", "RequestA", clock.now() + Duration::from_secs(5))
            .unwrap();
        cancel.cancel();
        let result = registry.await_reply("a", rx, cancel).await;
        assert_eq!(result.unwrap_err().kind(), "Cancelled");
        assert_eq!(registry.count(), 0);
    }
}
