//! The transport port (spec §6): core→adapter lifecycle and produce calls,
//! adapter→core consumer dispatch. `async_trait` makes the port
//! dyn-compatible so a bus can hold `Arc<dyn Transport>`, the same
//! technique the teacher uses to keep `Repository<T, ID>` object-safe
//! (`r2e-data/src/repository.rs`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::headers::{Envelope, Headers, RoutingAttributes};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback the adapter invokes to ack/nack an inbound message independent
/// of the full consume outcome, matching spec §6's `(envelope, ack)` shape.
pub type Ack = Arc<dyn Fn(bool) + Send + Sync>;

/// Structured result of running the consumer pipeline on one envelope
/// (spec §4.6 step 6).
#[derive(Debug)]
pub struct ConsumeOutcome {
    pub error: Option<crate::error::BusError>,
    pub response: Option<Bytes>,
    pub consumed: bool,
}

impl ConsumeOutcome {
    pub fn consumed(response: Option<Bytes>) -> Self {
        Self {
            error: None,
            response,
            consumed: true,
        }
    }

    pub fn failed(error: crate::error::BusError) -> Self {
        Self {
            error: Some(error),
            response: None,
            consumed: false,
        }
    }
}

/// The callback the core hands to a transport so inbound envelopes can be
/// routed into the consumer pipeline (spec §6, adapter→core direction).
pub type ConsumerInvoker =
    Arc<dyn Fn(Envelope, Ack) -> BoxFuture<'static, ConsumeOutcome> + Send + Sync>;

/// Core→adapter port (spec §6). Concrete transport clients (a broker, a
/// queue server, ...) are external collaborators reached only through this
/// interface; none are implemented here (spec §1 non-goal) beyond the
/// reference `omnibus-memory::MemoryTransport`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Reconcile required paths/groups before starting (spec §4.9).
    async fn provision_topology(&self) -> Result<()>;

    async fn produce_to_path(
        &self,
        bytes: Bytes,
        headers: Headers,
        path: &str,
        routing: RoutingAttributes,
    ) -> Result<()>;

    /// Bind the consumer-dispatch callback for `path`. Concretizes spec
    /// §6's "adapter→core: invoke consumer pipeline with (envelope, ack) →
    /// outcome" into a method the core calls once per declared consumer
    /// path at start time; the adapter retains the invoker and calls it for
    /// every inbound envelope on that path.
    async fn bind_consumer(&self, path: &str, invoker: ConsumerInvoker) -> Result<()>;

    async fn dispose(&self) -> Result<()>;
}
