//! Bus settings tree (spec §3, §4.10).

use std::sync::Arc;
use std::time::Duration;

use crate::headers::{HEADER_CORRELATION_ID, HEADER_ORIGINATOR, Headers};
use crate::interceptor::Interceptor;
use crate::registry::ProducedHook;
use crate::resolver::DependencyResolver;
use crate::serializer::Serializer;

/// Request-response defaults at the bus level (spec §3).
#[derive(Clone)]
pub struct RequestResponseSettings {
    pub reply_to_path: String,
    pub reply_group: Option<String>,
    pub default_timeout: Duration,
    pub correlation_id_header: String,
    pub originator_header: String,
}

impl Default for RequestResponseSettings {
    fn default() -> Self {
        Self {
            reply_to_path: String::new(),
            reply_group: None,
            default_timeout: Duration::from_secs(10),
            correlation_id_header: HEADER_CORRELATION_ID.to_string(),
            originator_header: HEADER_ORIGINATOR.to_string(),
        }
    }
}

/// Global hooks applied before per-type ones (spec §3: "global event
/// hooks"; §4.5 step 3: "run global header modifier hook").
#[derive(Clone, Default)]
pub struct GlobalEvents {
    pub header_modifier: Option<Arc<dyn Fn(&mut Headers) + Send + Sync>>,
    /// Bus-level `OnMessageProduced`, fired after the per-producer hook on
    /// every successful produce (spec §4.5 step 6: "exactly twice on
    /// success").
    pub on_message_produced: Option<ProducedHook>,
}

/// Root settings tree (spec §3 `MessageBusSettings`). Fields that
/// participate in `merge_from` (spec §4.10) are `Option` so a child that
/// left them unset can inherit the parent's value; fields that do not
/// participate (`per_message_scope`, `auto_start`) are plain values local
/// to each bus.
#[derive(Clone)]
pub struct BusSettings {
    pub name: String,
    pub request_response: Option<RequestResponseSettings>,
    pub serializer: Option<Arc<dyn Serializer>>,
    pub resolver: Option<Arc<dyn DependencyResolver>>,
    pub per_message_scope: bool,
    pub auto_start: bool,
    pub global_events: GlobalEvents,
    /// Generic producer interceptors, outermost in the chain (spec §4.3).
    pub global_producer_interceptors: Vec<Arc<dyn Interceptor>>,
    /// Publish-specific interceptors, nested inside producer interceptors.
    pub global_publish_interceptors: Vec<Arc<dyn Interceptor>>,
    /// Send-specific interceptors, nested inside producer interceptors.
    pub global_send_interceptors: Vec<Arc<dyn Interceptor>>,
    /// Consumer-level interceptors, outermost on the consume side.
    pub global_consumer_interceptors: Vec<Arc<dyn Interceptor>>,
    /// Handler-specific interceptors, nested inside consumer interceptors.
    pub global_handler_interceptors: Vec<Arc<dyn Interceptor>>,
    /// How often the background sweeper scans the pending-request registry
    /// for expired entries (spec §4.4: "bounded from above by the smallest
    /// outstanding timeout divided by 2; implementations may scan ... on a
    /// coarse periodic tick"). Does not participate in `merge_from`.
    pub pending_sweep_interval: Duration,
}

impl BusSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_response: None,
            serializer: None,
            resolver: None,
            per_message_scope: false,
            auto_start: true,
            global_events: GlobalEvents::default(),
            global_producer_interceptors: Vec::new(),
            global_publish_interceptors: Vec::new(),
            global_send_interceptors: Vec::new(),
            global_consumer_interceptors: Vec::new(),
            global_handler_interceptors: Vec::new(),
            pending_sweep_interval: Duration::from_millis(100),
        }
    }

    /// Copy serializer, resolver and request-response defaults from
    /// `parent` unless this settings tree already set them — child wins
    /// (spec §4.10).
    pub fn merge_from(&mut self, parent: &BusSettings) {
        if self.serializer.is_none() {
            self.serializer = parent.serializer.clone();
        }
        if self.resolver.is_none() {
            self.resolver = parent.resolver.clone();
        }
        if self.request_response.is_none() {
            self.request_response = parent.request_response.clone();
        }
        if self.global_producer_interceptors.is_empty() {
            self.global_producer_interceptors = parent.global_producer_interceptors.clone();
        }
        if self.global_publish_interceptors.is_empty() {
            self.global_publish_interceptors = parent.global_publish_interceptors.clone();
        }
        if self.global_send_interceptors.is_empty() {
            self.global_send_interceptors = parent.global_send_interceptors.clone();
        }
        if self.global_consumer_interceptors.is_empty() {
            self.global_consumer_interceptors = parent.global_consumer_interceptors.clone();
        }
        if self.global_handler_interceptors.is_empty() {
            self.global_handler_interceptors = parent.global_handler_interceptors.clone();
        }
    }
}
