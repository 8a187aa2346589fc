//! `omnibus-core` — a transport-agnostic message bus runtime.
//!
//! The type registry, interceptor chain, pending-request registry,
//! producer/consumer pipelines, reference pull loop, hybrid router and
//! builder described by the runtime's design live here. Concrete transport
//! clients (a broker, a queue server, ...) are external collaborators
//! reached only through [`transport::Transport`]; `omnibus-memory` ships
//! the one reference implementation.

pub mod bus;
pub mod builder;
pub mod clock;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod headers;
pub mod hybrid;
pub mod interceptor;
pub mod message;
pub mod pending;
pub mod producer;
pub mod pull_loop;
pub mod registry;
pub mod resolver;
pub mod serializer;
pub mod settings;
pub mod transport;

pub use bus::MasterBus;
pub use builder::MessageBusBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use consumer::ConsumerPipeline;
pub use error::{BusError, Result};
pub use handler::{ConsumerHandler, FnConsumer, FnHandler};
pub use headers::{Envelope, HeaderValue, Headers, RoutingAttributes};
pub use hybrid::{HybridRouter, PublishExecutionMode};
pub use interceptor::{Chain, Interceptor, InterceptorContext, Next};
pub use message::Message;
pub use pending::PendingRegistry;
pub use producer::ProducerPipeline;
pub use pull_loop::{PullLoop, PullQueue, QueueProcessor};
pub use registry::{ConsumerEvents, ConsumerSettings, ProducerEvents, ProducerSettings, TypeRegistry};
pub use resolver::{DependencyResolver, MapResolver, MessageTypeResolver};
pub use serializer::{JsonSerializer, Serializer};
pub use settings::{BusSettings, GlobalEvents, RequestResponseSettings};
pub use transport::{Ack, ConsumeOutcome, ConsumerInvoker, Transport};
