//! Type registry: message-type → producer/consumer settings resolution,
//! including polymorphic base-type fallback (spec §4.1).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::error::{BusError, Result};
use crate::handler::ConsumerHandler;
use crate::message::Message;

/// Context passed to `OnMessageProduced`/`OnMessageFault` hooks (spec.md
/// doesn't give a hook signature for §4.5 step 6; SPEC_FULL §4 supplements
/// this shape).
#[derive(Debug, Clone)]
pub struct ProduceContext {
    pub type_name: &'static str,
    pub path: String,
}

/// Context passed to `OnMessageConsumed` hooks.
#[derive(Debug, Clone)]
pub struct ConsumeContext {
    pub type_name: &'static str,
    pub path: String,
}

/// Context passed to `OnMessageFault` hooks.
#[derive(Debug, Clone)]
pub struct FaultContext {
    pub type_name: &'static str,
    pub path: String,
    pub error: String,
}

pub type ProducedHook = Arc<dyn Fn(&ProduceContext) + Send + Sync>;
pub type ConsumedHook = Arc<dyn Fn(&ConsumeContext) + Send + Sync>;
pub type FaultHook = Arc<dyn Fn(&FaultContext) + Send + Sync>;

/// Per-producer event hooks (spec §3 "per-producer event hooks").
#[derive(Clone, Default)]
pub struct ProducerEvents {
    pub on_message_produced: Option<ProducedHook>,
}

/// Per-consumer event hooks (spec §3 "consumer event hooks"), extended with
/// `on_message_fault` (SPEC_FULL §4).
#[derive(Clone, Default)]
pub struct ConsumerEvents {
    pub on_message_consumed: Option<ConsumedHook>,
    pub on_message_fault: Option<FaultHook>,
}

/// Producer settings for one declared message type (spec §3).
#[derive(Clone)]
pub struct ProducerSettings {
    pub type_name: &'static str,
    pub default_path: Option<String>,
    pub default_timeout: Option<Duration>,
    pub events: ProducerEvents,
    /// Transport-specific opaque attachments keyed by name (e.g. key/
    /// partition providers). Opaque to the core; transports downcast them.
    pub attachments: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ProducerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSettings")
            .field("type_name", &self.type_name)
            .field("default_path", &self.default_path)
            .field("default_timeout", &self.default_timeout)
            .field("attachments", &self.attachments.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProducerSettings {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            default_path: None,
            default_timeout: None,
            events: ProducerEvents::default(),
            attachments: HashMap::new(),
        }
    }

    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = Some(path.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_events(mut self, events: ProducerEvents) -> Self {
        self.events = events;
        self
    }
}

/// Consumer/handler settings for one declared message type (spec §3).
#[derive(Clone)]
pub struct ConsumerSettings {
    pub type_name: &'static str,
    /// `None` for pub/sub consumers; `Some` for request handlers.
    pub response_type_name: Option<&'static str>,
    pub path: String,
    pub group: Option<String>,
    pub instances: usize,
    pub events: ConsumerEvents,
    /// Whether this consumer is a request-responder (produces a reply).
    pub is_responder: bool,
    /// Reference to the user consumer/handler (spec §3: "reference to user
    /// consumer/handler factory").
    pub handler: Arc<dyn ConsumerHandler>,
}

impl ConsumerSettings {
    pub fn new(type_name: &'static str, path: impl Into<String>, handler: Arc<dyn ConsumerHandler>) -> Self {
        Self {
            type_name,
            response_type_name: None,
            path: path.into(),
            group: None,
            instances: 1,
            events: ConsumerEvents::default(),
            is_responder: false,
            handler,
        }
    }

    pub fn as_handler(mut self, response_type_name: &'static str) -> Self {
        self.response_type_name = Some(response_type_name);
        self.is_responder = true;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_events(mut self, events: ConsumerEvents) -> Self {
        self.events = events;
        self
    }
}

/// Message-type → settings resolution, with a per-concrete-type cache
/// (spec §4.1, §9: "precomputed cache keyed by concrete type, falling back
/// to the ancestry walk only on cache miss").
#[derive(Default)]
pub struct TypeRegistry {
    producers: DashMap<TypeId, Arc<ProducerSettings>>,
    producer_cache: DashMap<TypeId, Option<Arc<ProducerSettings>>>,
    consumers: DashMap<TypeId, Vec<Arc<ConsumerSettings>>>,
    names: DashMap<String, TypeId>,
    type_names: DashMap<TypeId, &'static str>,
    /// Types declared via a request-producing entry point (spec §4.8's
    /// "request-message capability"), used by the hybrid router's
    /// uniqueness invariant.
    request_types: DashMap<TypeId, ()>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare producer settings for `T`. Fails *Configuration* if `T`
    /// already has a producer declared (spec §3 invariant, §8 invariant 2).
    pub fn register_producer<T: Message>(&self, settings: ProducerSettings) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if self.producers.contains_key(&type_id) {
            return Err(BusError::Configuration(format!(
                "producer for type '{}' declared more than once",
                T::type_name()
            )));
        }
        self.names.insert(T::type_name().to_string(), type_id);
        self.type_names.insert(type_id, T::type_name());
        self.producers.insert(type_id, Arc::new(settings));
        self.producer_cache.clear();
        Ok(())
    }

    /// Declare a consumer/handler for `T`. Multiple consumers per type are
    /// permitted (spec §3: "0..N").
    pub fn register_consumer<T: Message>(&self, settings: ConsumerSettings) {
        let type_id = TypeId::of::<T>();
        self.names.insert(T::type_name().to_string(), type_id);
        self.type_names.insert(type_id, T::type_name());
        self.consumers.entry(type_id).or_default().push(Arc::new(settings));
    }

    /// Resolve producer settings for runtime type `T`: direct declaration
    /// wins, else nearest ancestor with settings (spec §4.1).
    pub fn resolve_producer<T: Message>(&self) -> Result<Arc<ProducerSettings>> {
        let type_id = TypeId::of::<T>();
        if let Some(cached) = self.producer_cache.get(&type_id) {
            return cached
                .clone()
                .ok_or_else(|| producer_miss(T::type_name()));
        }

        let resolved = self
            .producers
            .get(&type_id)
            .map(|entry| entry.clone())
            .or_else(|| {
                T::ancestor_type_ids()
                    .into_iter()
                    .find_map(|ancestor| self.producers.get(&ancestor).map(|entry| entry.clone()))
            });

        self.producer_cache.insert(type_id, resolved.clone());
        resolved.ok_or_else(|| producer_miss(T::type_name()))
    }

    /// Consumer settings declared directly for `T` (no ancestry fallback —
    /// consumers are resolved by the wire's message-type header or path,
    /// not by the producer's polymorphism rule; spec §4.6).
    pub fn consumers_for<T: Message>(&self) -> Vec<Arc<ConsumerSettings>> {
        self.consumers
            .get(&TypeId::of::<T>())
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Consumer settings declared for a message-type name (spec §6 message-
    /// type resolver: `ToType(name)`).
    pub fn consumers_for_name(&self, name: &str) -> Vec<Arc<ConsumerSettings>> {
        self.names
            .get(name)
            .and_then(|type_id| self.consumers.get(&type_id).map(|entry| entry.clone()))
            .unwrap_or_default()
    }

    /// `ToName`/`ToType` support (spec §6): has any producer or consumer
    /// ever been declared under this name.
    pub fn is_known_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Message-type resolver `ToType(name) → type` (spec §6).
    pub fn type_id_for_name(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).map(|entry| *entry)
    }

    /// Message-type resolver `ToName(type) → string` (spec §6).
    pub fn name_for_type_id(&self, type_id: TypeId) -> Option<&'static str> {
        self.type_names.get(&type_id).map(|entry| *entry)
    }

    /// Resolve consumer settings for an inbound envelope (spec §4.6 step 1):
    /// by message-type name when the header is present and known, falling
    /// back to a scan by path.
    pub fn find_consumer(&self, type_name: Option<&str>, path: &str) -> Option<Arc<ConsumerSettings>> {
        if let Some(name) = type_name {
            if let Some(found) = self
                .consumers_for_name(name)
                .into_iter()
                .find(|settings| settings.path == path)
            {
                return Some(found);
            }
        }
        self.consumers
            .iter()
            .flat_map(|entry| entry.value().clone())
            .find(|settings| settings.path == path)
    }

    /// All consumer settings declared on the registry, used to bind every
    /// declared path to its transport at bus start (spec §4.9).
    pub fn all_consumers(&self) -> Vec<Arc<ConsumerSettings>> {
        self.consumers.iter().flat_map(|entry| entry.value().clone()).collect()
    }

    /// Mark `T` as a request-producing type (spec §4.8's "request-message
    /// capability"). Called by the builder's request-declaring entry point,
    /// distinct from a plain publish declaration.
    pub fn mark_request_type<T: Message>(&self) {
        self.request_types.insert(TypeId::of::<T>(), ());
    }

    pub fn is_request_type<T: Message>(&self) -> bool {
        self.request_types.contains_key(&TypeId::of::<T>())
    }

    /// All `TypeId`s with a declared producer, for hybrid router
    /// construction (spec §4.8).
    pub fn producer_type_ids(&self) -> Vec<TypeId> {
        self.producers.iter().map(|entry| *entry.key()).collect()
    }

    /// All `TypeId`s declared as request-producing, for the hybrid
    /// router's uniqueness invariant (spec §4.8).
    pub fn request_type_ids(&self) -> Vec<TypeId> {
        self.request_types.iter().map(|entry| *entry.key()).collect()
    }
}

fn producer_miss(type_name: &str) -> BusError {
    BusError::Producer(format!("no producer declared for type '{type_name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_message;

    struct BaseEvent;
    struct DerivedEvent;
    struct UnrelatedEvent;

    impl_message!(BaseEvent, "BaseEvent");
    impl_message!(DerivedEvent, "DerivedEvent", ancestors = [BaseEvent]);
    impl_message!(UnrelatedEvent, "UnrelatedEvent");

    #[test]
    fn resolves_direct_producer() {
        let registry = TypeRegistry::new();
        registry
            .register_producer::<BaseEvent>(ProducerSettings::new("BaseEvent").with_default_path("base"))
            .unwrap();

        let settings = registry.resolve_producer::<BaseEvent>().unwrap();
        assert_eq!(settings.default_path.as_deref(), Some("base"));
    }

    #[test]
    fn derived_type_falls_back_to_base_producer() {
        let registry = TypeRegistry::new();
        registry
            .register_producer::<BaseEvent>(ProducerSettings::new("BaseEvent").with_default_path("base"))
            .unwrap();

        let settings = registry.resolve_producer::<DerivedEvent>().unwrap();
        assert_eq!(settings.type_name, "BaseEvent");
        assert_eq!(settings.default_path.as_deref(), Some("base"));
    }

    #[test]
    fn duplicate_producer_registration_is_configuration_error() {
        let registry = TypeRegistry::new();
        registry
            .register_producer::<BaseEvent>(ProducerSettings::new("BaseEvent"))
            .unwrap();
        let err = registry
            .register_producer::<BaseEvent>(ProducerSettings::new("BaseEvent"))
            .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn unrelated_type_without_producer_is_a_miss() {
        let registry = TypeRegistry::new();
        registry
            .register_producer::<BaseEvent>(ProducerSettings::new("BaseEvent"))
            .unwrap();
        let err = registry.resolve_producer::<UnrelatedEvent>().unwrap_err();
        assert_eq!(err.kind(), "Producer");
    }

    #[test]
    fn resolution_is_cached_across_calls() {
        let registry = TypeRegistry::new();
        registry
            .register_producer::<BaseEvent>(ProducerSettings::new("BaseEvent"))
            .unwrap();
        let first = registry.resolve_producer::<DerivedEvent>().unwrap();
        let second = registry.resolve_producer::<DerivedEvent>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
