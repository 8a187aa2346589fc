//! Fluent builder (spec §4.10, §6 "Configuration surface"), in the
//! teacher's single-phase `AppBuilder` idiom (`r2e-core/src/builder.rs`).
//! Unlike `AppBuilder<NoState>` → `AppBuilder<T>`, this settings tree has
//! no phase dependency, so one phase suffices.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::consumer::ConsumerPipeline;
use crate::error::{BusError, Result};
use crate::headers::Headers;
use crate::interceptor::Chain;
use crate::message::Message;
use crate::pending::PendingRegistry;
use crate::producer::ProducerPipeline;
use crate::registry::{ConsumerSettings, ProducerSettings, TypeRegistry};
use crate::resolver::DependencyResolver;
use crate::serializer::{JsonSerializer, Serializer};
use crate::settings::{BusSettings, RequestResponseSettings};
use crate::transport::Transport;
use crate::bus::MasterBus;

/// Declarative accumulation into a [`BusSettings`] tree plus a
/// [`TypeRegistry`] (spec §4.10).
pub struct MessageBusBuilder {
    settings: BusSettings,
    registry: Arc<TypeRegistry>,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
}

impl MessageBusBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            settings: BusSettings::new(name),
            registry: Arc::new(TypeRegistry::new()),
            transport: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.settings.serializer = Some(serializer);
        self
    }

    pub fn with_dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.settings.resolver = Some(resolver);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Injects a test-virtualizable clock (spec §4.4, §9). Production
    /// callers do not normally need this; `SystemClock` is the default.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_header_modifier(mut self, modifier: impl Fn(&mut Headers) + Send + Sync + 'static) -> Self {
        self.settings.global_events.header_modifier = Some(Arc::new(modifier));
        self
    }

    pub fn auto_start_consumers_enabled(mut self, enabled: bool) -> Self {
        self.settings.auto_start = enabled;
        self
    }

    pub fn per_message_scope_enabled(mut self, enabled: bool) -> Self {
        self.settings.per_message_scope = enabled;
        self
    }

    /// Overrides the pending-request sweeper's tick interval (spec §4.4).
    pub fn with_pending_sweep_interval(mut self, interval: Duration) -> Self {
        self.settings.pending_sweep_interval = interval;
        self
    }

    pub fn expect_request_responses(mut self, request_response: RequestResponseSettings) -> Self {
        self.settings.request_response = Some(request_response);
        self
    }

    pub fn with_global_producer_interceptors(mut self, interceptors: Vec<Arc<dyn crate::interceptor::Interceptor>>) -> Self {
        self.settings.global_producer_interceptors = interceptors;
        self
    }

    pub fn with_global_consumer_interceptors(mut self, interceptors: Vec<Arc<dyn crate::interceptor::Interceptor>>) -> Self {
        self.settings.global_consumer_interceptors = interceptors;
        self
    }

    /// `Produce(type, {...})` (spec §6). Fails *Configuration* if `T`
    /// already has a producer (spec §3 invariant).
    pub fn produce<T: Message>(self, settings: ProducerSettings) -> Result<Self> {
        self.registry.register_producer::<T>(settings)?;
        Ok(self)
    }

    /// Like [`Self::produce`] but also marks `T` as request-producing, so
    /// the hybrid router's uniqueness invariant (spec §4.8) applies to it.
    pub fn produce_request<T: Message>(self, settings: ProducerSettings) -> Result<Self> {
        self.registry.register_producer::<T>(settings)?;
        self.registry.mark_request_type::<T>();
        Ok(self)
    }

    /// `Consume(type, {...})` (spec §6).
    pub fn consume<T: Message>(self, settings: ConsumerSettings) -> Self {
        self.registry.register_consumer::<T>(settings);
        self
    }

    /// `Handle(req, resp, {...})` (spec §6). Fails *Configuration* if the
    /// settings carry no response type (spec §4.10 "handler without
    /// response type").
    pub fn handle<T: Message>(self, settings: ConsumerSettings) -> Result<Self> {
        if settings.response_type_name.is_none() {
            return Err(BusError::Configuration(format!(
                "handler for '{}' declared without a response type",
                T::type_name()
            )));
        }
        self.registry.register_consumer::<T>(settings);
        Ok(self)
    }

    /// `MergeFrom(parent)` (spec §4.10): copies producers/consumers (by
    /// sharing the parent's registry before any local declarations are
    /// made), serializer, resolver and request-response defaults, unless
    /// this builder already set them.
    pub fn merge_from(mut self, parent: &BusSettings) -> Self {
        self.settings.merge_from(parent);
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Runs build-time validation and returns the assembled bus.
    pub fn build(self) -> Result<MasterBus> {
        let transport = self
            .transport
            .ok_or_else(|| BusError::Configuration("no transport provided".to_string()))?;
        let serializer: Arc<dyn Serializer> = self
            .settings
            .serializer
            .clone()
            .unwrap_or_else(|| Arc::new(JsonSerializer));
        let request_response = self.settings.request_response.clone().unwrap_or_default();
        let pending = Arc::new(PendingRegistry::new(self.clock.clone()));

        let producer = ProducerPipeline::new(
            self.registry.clone(),
            serializer,
            transport.clone(),
            pending.clone(),
            self.clock.clone(),
            request_response.clone(),
            self.settings.global_events.clone(),
            self.settings.name.clone(),
            self.settings.global_producer_interceptors.clone(),
            self.settings.global_publish_interceptors.clone(),
            self.settings.global_send_interceptors.clone(),
        );

        let consumer_chain = Chain::new().extend(self.settings.global_consumer_interceptors.clone());
        let handler_chain = Chain::new()
            .extend(self.settings.global_consumer_interceptors.clone())
            .extend(self.settings.global_handler_interceptors.clone());
        let consumer = Arc::new(ConsumerPipeline::new(
            self.registry.clone(),
            transport.clone(),
            consumer_chain,
            handler_chain,
            request_response,
        ));

        Ok(MasterBus::new(
            self.settings.name,
            self.registry,
            producer,
            consumer,
            pending,
            transport,
            self.settings.pending_sweep_interval,
        ))
    }
}
