//! Master bus skeleton (spec §4.9): lifecycle, settings ownership,
//! disposal ordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::consumer::ConsumerPipeline;
use crate::error::{self, BusError, Result};
use crate::headers::Headers;
use crate::message::Message;
use crate::pending::PendingRegistry;
use crate::producer::ProducerPipeline;
use crate::registry::TypeRegistry;
use crate::transport::{ConsumeOutcome, ConsumerInvoker, Transport};

/// Owns the type registry, producer and consumer pipelines, pending-request
/// registry and transport handle for one logical bus (spec §3
/// "Ownership").
pub struct MasterBus {
    name: String,
    registry: Arc<TypeRegistry>,
    producer: ProducerPipeline,
    consumer: Arc<ConsumerPipeline>,
    pending: Arc<PendingRegistry>,
    transport: Arc<dyn Transport>,
    started: AtomicBool,
    disposed: AtomicBool,
    sweep_interval: Duration,
    sweep_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MasterBus {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        registry: Arc<TypeRegistry>,
        producer: ProducerPipeline,
        consumer: Arc<ConsumerPipeline>,
        pending: Arc<PendingRegistry>,
        transport: Arc<dyn Transport>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            producer,
            consumer,
            pending,
            transport,
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            sweep_interval,
            sweep_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn pending(&self) -> &Arc<PendingRegistry> {
        &self.pending
    }

    pub async fn publish<T>(&self, value: &T, path: Option<String>, headers: Option<Headers>) -> Result<()>
    where
        T: Message + serde::Serialize,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BusError::Disposed);
        }
        self.producer.publish(value, path, headers).await
    }

    pub async fn send<T, R>(
        &self,
        value: &T,
        path: Option<String>,
        headers: Option<Headers>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<R>
    where
        T: Message + serde::Serialize,
        R: Message + serde::de::DeserializeOwned,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BusError::Disposed);
        }
        self.producer.send(value, path, headers, timeout, cancel).await
    }

    /// `Start` is idempotent and safe to call concurrently (spec §4.9).
    /// Provisions topology, starts the transport, then binds every declared
    /// consumer path to the consumer pipeline.
    pub async fn start(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BusError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport.provision_topology().await?;
        self.transport.start().await?;

        for settings in self.registry.all_consumers() {
            let consumer = self.consumer.clone();
            let path = settings.path.clone();
            let invoker: ConsumerInvoker = Arc::new(move |envelope, ack| {
                let consumer = consumer.clone();
                let path = path.clone();
                Box::pin(async move {
                    let outcome = consumer.dispatch(envelope, &path).await;
                    ack(outcome.error.is_none());
                    outcome
                })
            });
            self.transport.bind_consumer(&settings.path, invoker).await?;
        }

        let reply_to_path = self.consumer.reply_to_path().to_string();
        if !reply_to_path.is_empty() {
            let pending = self.pending.clone();
            let invoker: ConsumerInvoker = Arc::new(move |envelope, ack| {
                let pending = pending.clone();
                Box::pin(async move {
                    let outcome = Self::dispatch_reply(&pending, envelope);
                    ack(outcome.error.is_none());
                    outcome
                })
            });
            self.transport.bind_consumer(&reply_to_path, invoker).await?;
        }

        self.spawn_sweeper();

        tracing::info!(bus = %self.name, "bus started");
        Ok(())
    }

    /// Periodically scans the pending-request registry for expired entries
    /// (spec §4.4's "coarse periodic tick"), stopped by `stop`/`dispose`.
    fn spawn_sweeper(&self) {
        let cancel = CancellationToken::new();
        let pending = self.pending.clone();
        let interval = self.sweep_interval;
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let swept = pending.sweep_now();
                        if swept > 0 {
                            tracing::debug!(swept, "pending-request sweep timed out entries");
                        }
                    }
                    _ = task_cancel.cancelled() => break,
                }
            }
        });
        *self.sweep_task.lock().unwrap() = Some((cancel, handle));
    }

    /// Completes the pending request named by the envelope's correlation id
    /// with either the reply payload or, when `ErrorKind`/`ErrorMessage`
    /// headers are present, the reconstructed failure (spec §4.4, §4.6 step
    /// 5's error-reply path).
    fn dispatch_reply(pending: &PendingRegistry, envelope: crate::headers::Envelope) -> ConsumeOutcome {
        let Some(correlation_id) = envelope.correlation_id().map(str::to_string) else {
            return ConsumeOutcome::failed(BusError::Consumer("reply envelope carries no correlation id".into()));
        };

        let completed = if let Some(kind) = envelope.headers.get("ErrorKind").and_then(|v| v.as_str()) {
            let message = envelope
                .headers
                .get("ErrorMessage")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            pending.fail(&correlation_id, error::from_wire(kind, message))
        } else {
            pending.resolve(&correlation_id, envelope.payload.clone())
        };

        if completed {
            ConsumeOutcome::consumed(None)
        } else {
            ConsumeOutcome::failed(BusError::Consumer(format!(
                "no pending request for correlation id '{correlation_id}'"
            )))
        }
    }

    /// `Stop` is idempotent and safe to call concurrently (spec §4.9).
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let sweeper = self.sweep_task.lock().unwrap().take();
        if let Some((cancel, handle)) = sweeper {
            cancel.cancel();
            let _ = handle.await;
        }
        self.transport.stop().await?;
        tracing::info!(bus = %self.name, "bus stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Idempotent; implies `stop` (spec §8 round-trip law).
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop().await?;
        self.pending.cancel_all();
        self.transport.dispose().await?;
        tracing::info!(bus = %self.name, "bus disposed");
        Ok(())
    }
}
