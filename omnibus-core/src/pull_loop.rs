//! Reference pull-consumer loop (spec §4.7): a generic poll-based driver
//! for pull-style transports (queue servers), with cancellation, idle
//! back-off and per-processor error isolation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::headers::Envelope;

/// A pull-style source the loop drains with non-blocking pops.
#[async_trait::async_trait]
pub trait PullQueue: Send + Sync {
    async fn try_pop(&self) -> Result<Option<Envelope>>;
    fn path(&self) -> &str;
}

/// One step in a queue's processor list (spec §4.7: "dispatch to each
/// processor in order; continue past an individual processor failure").
#[async_trait::async_trait]
pub trait QueueProcessor: Send + Sync {
    async fn process(&self, envelope: Envelope) -> Result<()>;
}

struct QueueBinding {
    queue: Arc<dyn PullQueue>,
    processors: Vec<Arc<dyn QueueProcessor>>,
}

/// Owns a cancellation source and a single long-running task (spec §4.7).
pub struct PullLoop {
    queues: Vec<QueueBinding>,
    poll_delay: Duration,
    max_idle: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PullLoop {
    pub fn new(
        queues: Vec<(Arc<dyn PullQueue>, Vec<Arc<dyn QueueProcessor>>)>,
        poll_delay: Duration,
        max_idle: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queues: queues
                .into_iter()
                .map(|(queue, processors)| QueueBinding { queue, processors })
                .collect(),
            poll_delay,
            max_idle,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Start the loop task. Idempotent: calling twice while already running
    /// is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let this = self.clone();
        *task = Some(tokio::spawn(async move { this.run().await }));
    }

    async fn run(&self) {
        let mut idle_since = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut any_value = false;
            for binding in &self.queues {
                if self.cancel.is_cancelled() {
                    break;
                }
                match binding.queue.try_pop().await {
                    Ok(Some(envelope)) => {
                        any_value = true;
                        idle_since = Instant::now();
                        for processor in &binding.processors {
                            if let Err(err) = processor.process(envelope.clone()).await {
                                tracing::warn!(path = binding.queue.path(), error = %err, "queue processor failed");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(path = binding.queue.path(), error = %err, "queue poll failed");
                    }
                }
            }

            if !any_value && idle_since.elapsed() >= self.max_idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_delay) => {}
                    _ = self.cancel.cancelled() => break,
                }
            }
        }
    }

    /// Cancel the source and await the loop task; drains registered
    /// processors by dropping them (spec §4.7: "disposal drains registered
    /// processors").
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct VecQueue {
        path: &'static str,
        items: AsyncMutex<Vec<Envelope>>,
    }

    #[async_trait::async_trait]
    impl PullQueue for VecQueue {
        async fn try_pop(&self) -> Result<Option<Envelope>> {
            Ok(self.items.lock().await.pop())
        }

        fn path(&self) -> &str {
            self.path
        }
    }

    struct CountingProcessor {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl QueueProcessor for CountingProcessor {
        async fn process(&self, _envelope: Envelope) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingProcessor;

    #[async_trait::async_trait]
    impl QueueProcessor for FailingProcessor {
        async fn process(&self, _envelope: Envelope) -> Result<()> {
            Err(crate::error::BusError::Handler("boom".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queue_and_isolates_processor_failures() {
        let queue = Arc::new(VecQueue {
            path: "work",
            items: AsyncMutex::new(vec![Envelope::new(Bytes::from_static(b"1"))]),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let processors: Vec<Arc<dyn QueueProcessor>> =
            vec![Arc::new(FailingProcessor), Arc::new(CountingProcessor { count: count.clone() })];

        let pull_loop = PullLoop::new(vec![(queue, processors)], Duration::from_millis(10), Duration::from_millis(5));
        pull_loop.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        pull_loop.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 1, "surviving processor must still run after a failing one");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_cancellable_and_idempotent() {
        let queue = Arc::new(VecQueue {
            path: "empty",
            items: AsyncMutex::new(Vec::new()),
        });
        let pull_loop = PullLoop::new(vec![(queue, Vec::new())], Duration::from_millis(10), Duration::from_millis(5));
        pull_loop.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pull_loop.stop().await;
        pull_loop.stop().await;
        assert!(pull_loop.is_cancelled());
    }
}
