//! `MemoryTransport` — the in-process reference implementation of
//! `omnibus_core::transport::Transport`.
//!
//! Grounded in the teacher's `LocalEventBus`
//! (`r2e-events/src/local.rs`): a path keeps a list of interested
//! consumers and dispatch happens by spawning a task per inbound message,
//! optionally gated by a semaphore for backpressure. The teacher keys
//! dispatch by `TypeId`; this transport is path-addressed instead, since
//! `Transport::bind_consumer` binds one invoker per path rather than per
//! Rust type.
//!
//! A path with no bound consumer buffers produced envelopes in a queue
//! instead of dropping them, so [`PullQueue`](omnibus_core::PullLoop) has
//! something concrete to drive (spec §4.7) without requiring every path to
//! register a push-style consumer up front.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use omnibus_core::{Ack, ConsumeOutcome, ConsumerInvoker, Envelope, Headers, Result, RoutingAttributes, Transport};

/// Default cap on concurrently in-flight push dispatches per transport
/// instance, mirroring the teacher's `LocalEventBus::DEFAULT_MAX_CONCURRENCY`.
pub const DEFAULT_MAX_CONCURRENCY: usize = 1024;

struct PathState {
    invoker: Option<ConsumerInvoker>,
    backlog: VecDeque<Envelope>,
}

impl PathState {
    fn empty() -> Self {
        Self {
            invoker: None,
            backlog: VecDeque::new(),
        }
    }
}

/// An in-process transport: `produce_to_path` either dispatches straight to
/// a bound consumer or, when no consumer is bound yet, buffers the envelope
/// so a later `bind_consumer` or a [`MemoryPullQueue`] can pick it up.
pub struct MemoryTransport {
    paths: DashMap<String, Arc<AsyncMutex<PathState>>>,
    semaphore: Option<Arc<Semaphore>>,
    started: AtomicBool,
}

impl MemoryTransport {
    /// A transport with the default concurrency ceiling.
    pub fn new() -> Arc<Self> {
        Self::with_concurrency(DEFAULT_MAX_CONCURRENCY)
    }

    /// A transport whose concurrently in-flight push dispatches are capped
    /// at `max_concurrency`.
    pub fn with_concurrency(max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            paths: DashMap::new(),
            semaphore: Some(Arc::new(Semaphore::new(max_concurrency))),
            started: AtomicBool::new(false),
        })
    }

    /// A transport with no dispatch concurrency limit, for tests that don't
    /// care about backpressure.
    pub fn unbounded() -> Arc<Self> {
        Arc::new(Self {
            paths: DashMap::new(),
            semaphore: None,
            started: AtomicBool::new(false),
        })
    }

    /// Returns a handle to `path`'s state that does not hold a DashMap shard
    /// guard, so callers can `.await` the inner mutex without risking a
    /// blocked shard under contention (the guard `entry()` used to hand back
    /// was itself acquired via a momentary shard write-lock in
    /// `or_insert_with`).
    fn state_for(&self, path: &str) -> Arc<AsyncMutex<PathState>> {
        if let Some(existing) = self.paths.get(path) {
            return existing.clone();
        }
        self.paths
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(PathState::empty())))
            .clone()
    }

    /// A pull-style queue view over `path`'s backlog, for tests and the demo
    /// binary that want to drive `omnibus_core::PullLoop` directly instead
    /// of binding a push consumer (spec §4.7).
    pub fn pull_queue(self: &Arc<Self>, path: impl Into<String>) -> Arc<MemoryPullQueue> {
        Arc::new(MemoryPullQueue {
            transport: self.clone(),
            path: path.into(),
        })
    }

    async fn try_pop(&self, path: &str) -> Option<Envelope> {
        let state = self.state_for(path);
        let mut guard = state.lock().await;
        guard.backlog.pop_front()
    }

    async fn dispatch(semaphore: Option<Arc<Semaphore>>, invoker: ConsumerInvoker, envelope: Envelope) {
        let _permit = match &semaphore {
            Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore never closed")),
            None => None,
        };
        let ack: Ack = Arc::new(|_ok| {});
        let outcome = invoker(envelope, ack).await;
        if let Some(err) = outcome.error {
            tracing::warn!(error = %err, "in-memory consumer dispatch failed");
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn provision_topology(&self) -> Result<()> {
        Ok(())
    }

    async fn produce_to_path(&self, bytes: bytes::Bytes, headers: Headers, path: &str, routing: RoutingAttributes) -> Result<()> {
        let envelope = Envelope {
            payload: bytes,
            headers,
            routing,
        };

        let state = self.state_for(path);
        let invoker = {
            let guard = state.lock().await;
            guard.invoker.clone()
        };

        match invoker {
            Some(invoker) => {
                tokio::spawn(Self::dispatch(self.semaphore.clone(), invoker, envelope));
            }
            None => {
                let mut guard = state.lock().await;
                guard.backlog.push_back(envelope);
            }
        }
        Ok(())
    }

    async fn bind_consumer(&self, path: &str, invoker: ConsumerInvoker) -> Result<()> {
        let state = self.state_for(path);
        let backlog = {
            let mut guard = state.lock().await;
            guard.invoker = Some(invoker.clone());
            std::mem::take(&mut guard.backlog)
        };
        for envelope in backlog {
            tokio::spawn(Self::dispatch(self.semaphore.clone(), invoker.clone(), envelope));
        }
        tracing::debug!(path, "consumer bound to in-memory transport");
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.paths.clear();
        Ok(())
    }
}

/// Adapts one path of a [`MemoryTransport`] to `omnibus_core::PullLoop`'s
/// `PullQueue` port, for paths consumed by the reference pull loop instead
/// of a bound push consumer.
pub struct MemoryPullQueue {
    transport: Arc<MemoryTransport>,
    path: String,
}

#[async_trait::async_trait]
impl omnibus_core::pull_loop::PullQueue for MemoryPullQueue {
    async fn try_pop(&self) -> Result<Option<Envelope>> {
        Ok(self.transport.try_pop(&self.path).await)
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnibus_core::pull_loop::PullQueue;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn noop_ack() -> Ack {
        Arc::new(|_ok| {})
    }

    #[tokio::test]
    async fn produce_dispatches_to_bound_consumer() {
        let transport = MemoryTransport::unbounded();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();

        let invoker: ConsumerInvoker = Arc::new(move |_envelope, _ack| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.fetch_add(1, AtomicOrdering::SeqCst);
                ConsumeOutcome::consumed(None)
            })
        });
        transport.bind_consumer("orders", invoker).await.unwrap();

        transport
            .produce_to_path(bytes::Bytes::from_static(b"{}"), Headers::new(), "orders", RoutingAttributes::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(received.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn produce_without_consumer_buffers_for_later_bind() {
        let transport = MemoryTransport::unbounded();
        transport
            .produce_to_path(bytes::Bytes::from_static(b"{}"), Headers::new(), "orders", RoutingAttributes::new())
            .await
            .unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let invoker: ConsumerInvoker = Arc::new(move |_envelope, _ack| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.fetch_add(1, AtomicOrdering::SeqCst);
                ConsumeOutcome::consumed(None)
            })
        });
        transport.bind_consumer("orders", invoker).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(received.load(AtomicOrdering::SeqCst), 1, "backlog must drain once a consumer binds");
    }

    #[tokio::test]
    async fn unbound_path_is_drainable_via_pull_queue() {
        let transport = MemoryTransport::unbounded();
        transport
            .produce_to_path(bytes::Bytes::from_static(b"hello"), Headers::new(), "work", RoutingAttributes::new())
            .await
            .unwrap();

        let queue = transport.pull_queue("work");
        let popped = queue.try_pop().await.unwrap().expect("one envelope queued");
        assert_eq!(popped.payload.as_ref(), b"hello");
        assert!(queue.try_pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispose_clears_all_paths() {
        let transport = MemoryTransport::unbounded();
        transport
            .produce_to_path(bytes::Bytes::from_static(b"x"), Headers::new(), "work", RoutingAttributes::new())
            .await
            .unwrap();
        transport.dispose().await.unwrap();

        let queue = transport.pull_queue("work");
        assert!(queue.try_pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_callback_is_invokable_without_panicking() {
        let ack = noop_ack();
        ack(true);
        ack(false);
    }
}
