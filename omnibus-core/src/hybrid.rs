//! Hybrid/composite router (spec §4.8): multiplexes one logical bus over N
//! child buses keyed by message type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::MasterBus;
use crate::error::{BusError, Result};
use crate::headers::Headers;
use crate::message::Message;

/// Publish fan-out policy when a type routes to more than one child bus
/// (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishExecutionMode {
    /// Await all children concurrently; failure of any is surfaced once
    /// all complete.
    Parallel,
    /// Iterate in list order; first failure aborts the remainder.
    Sequential,
}

/// Multi-bus composition (spec §4.8). Child-bus list is immutable after
/// construction (spec §5 "Shared resources").
pub struct HybridRouter {
    children: Vec<(String, Arc<MasterBus>)>,
    type_to_buses: HashMap<TypeId, Vec<usize>>,
    mode: PublishExecutionMode,
}

impl std::fmt::Debug for HybridRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRouter")
            .field("children", &self.children.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("mode", &self.mode)
            .finish()
    }
}

impl HybridRouter {
    /// Collects all producers of all child buses, groups by message type,
    /// and enforces that any request-message type is produced by exactly
    /// one child (spec §4.8, §8 invariant 6).
    pub fn new(children: Vec<(String, Arc<MasterBus>)>, mode: PublishExecutionMode) -> Result<Self> {
        let mut type_to_buses: HashMap<TypeId, Vec<usize>> = HashMap::new();
        for (index, (_, bus)) in children.iter().enumerate() {
            for type_id in bus.registry().producer_type_ids() {
                type_to_buses.entry(type_id).or_default().push(index);
            }
        }

        for (_, bus) in &children {
            for type_id in bus.registry().request_type_ids() {
                if type_to_buses.get(&type_id).map(Vec::len).unwrap_or(0) > 1 {
                    let name = bus.registry().name_for_type_id(type_id).unwrap_or("<unknown>");
                    return Err(BusError::Configuration(format!(
                        "request type '{name}' is declared as a producer on more than one child bus"
                    )));
                }
            }
        }

        Ok(Self {
            children,
            type_to_buses,
            mode,
        })
    }

    fn resolve_buses<T: Message>(&self) -> Result<&[usize]> {
        if let Some(buses) = self.type_to_buses.get(&TypeId::of::<T>()) {
            return Ok(buses);
        }
        for ancestor in T::ancestor_type_ids() {
            if let Some(buses) = self.type_to_buses.get(&ancestor) {
                return Ok(buses);
            }
        }
        Err(BusError::Configuration(format!(
            "no child bus declares a producer for type '{}'",
            T::type_name()
        )))
    }

    /// `Publish` fan-out (spec §4.8).
    pub async fn publish<T>(&self, value: &T, path: Option<String>, headers: Option<Headers>) -> Result<()>
    where
        T: Message + serde::Serialize + Sync,
    {
        let buses = self.resolve_buses::<T>()?;
        if buses.len() == 1 {
            return self.children[buses[0]].1.publish(value, path, headers).await;
        }

        match self.mode {
            PublishExecutionMode::Parallel => {
                let futures = buses
                    .iter()
                    .map(|&index| self.children[index].1.publish(value, path.clone(), headers.clone()));
                let results = futures_util::future::join_all(futures).await;
                results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
            }
            PublishExecutionMode::Sequential => {
                for &index in buses {
                    self.children[index].1.publish(value, path.clone(), headers.clone()).await?;
                }
                Ok(())
            }
        }
    }

    /// `Send`: route to the sole bus; forward the response unchanged
    /// (spec §4.8).
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
        let buses = self.resolve_buses::<T>()?;
        if buses.len() != 1 {
            return Err(BusError::Configuration(format!(
                "type '{}' does not route to a single child bus for request/response",
                T::type_name()
            )));
        }
        self.children[buses[0]].1.send(value, path, headers, timeout, cancel).await
    }

    /// Fans out to all children, awaiting all (spec §4.8).
    pub async fn start(&self) -> Result<()> {
        let futures = self.children.iter().map(|(_, bus)| bus.start());
        futures_util::future::join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()
            .map(|_| ())
    }

    pub async fn stop(&self) -> Result<()> {
        let futures = self.children.iter().map(|(_, bus)| bus.stop());
        futures_util::future::join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()
            .map(|_| ())
    }

    /// Disposes child buses sequentially, in reverse creation order, with
    /// per-child error isolation so one failing adapter cannot block the
    /// rest (spec §4.8, §9).
    pub async fn dispose(&self) {
        for (name, bus) in self.children.iter().rev() {
            if let Err(err) = bus.dispose().await {
                tracing::warn!(child = %name, error = %err, "child bus dispose failed");
            }
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::builder::MessageBusBuilder;
    use crate::headers::RoutingAttributes;
    use crate::impl_message;
    use crate::registry::ProducerSettings;
    use crate::serializer::{JsonSerializer, Serializer};
    use crate::transport::ConsumerInvoker;

    use super::*;

    /// Counts `produce_to_path` calls per path; never actually dispatches to
    /// a consumer, since these tests exercise routing, not delivery.
    #[derive(Default)]
    struct CountingTransport {
        calls: Mutex<HashMap<String, AtomicUsize>>,
    }

    impl CountingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn calls_for(&self, path: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .get(path)
                .map(|n| n.load(Ordering::SeqCst))
                .unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl crate::transport::Transport for CountingTransport {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn provision_topology(&self) -> Result<()> {
            Ok(())
        }

        async fn produce_to_path(
            &self,
            _bytes: bytes::Bytes,
            _headers: Headers,
            path: &str,
            _routing: RoutingAttributes,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn bind_consumer(&self, _path: &str, _invoker: ConsumerInvoker) -> Result<()> {
            Ok(())
        }

        async fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(serde::Serialize)]
    struct OrderPlaced;
    #[derive(serde::Serialize)]
    struct Refunded;
    impl_message!(OrderPlaced, "OrderPlaced");
    impl_message!(Refunded, "Refunded");

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Payload {
        n: u32,
    }
    impl_message!(Payload, "Payload");

    fn child(name: &str, transport: Arc<CountingTransport>) -> (String, Arc<MasterBus>) {
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let bus = MessageBusBuilder::new(name)
            .with_transport(transport)
            .with_serializer(serializer)
            .produce::<OrderPlaced>(ProducerSettings::new("OrderPlaced").with_default_path("orders"))
            .unwrap()
            .build()
            .unwrap();
        (name.to_string(), Arc::new(bus))
    }

    #[tokio::test]
    async fn publish_routes_to_sole_owning_child() {
        let transport_a = CountingTransport::new();
        let transport_b = CountingTransport::new();
        let a = child("a", transport_a.clone());
        let b = child("b", transport_b.clone());

        let router = HybridRouter::new(vec![a, b], PublishExecutionMode::Parallel).unwrap();
        router.publish(&OrderPlaced, None, None).await.unwrap();

        assert_eq!(transport_a.calls_for("orders"), 1);
        assert_eq!(transport_b.calls_for("orders"), 0);
    }

    #[tokio::test]
    async fn publish_fans_out_in_parallel_mode_when_multiple_children_declare_the_type() {
        let transport_a = CountingTransport::new();
        let transport_b = CountingTransport::new();
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let a_settings = ProducerSettings::new("OrderPlaced").with_default_path("orders");
        let b_settings = ProducerSettings::new("OrderPlaced").with_default_path("orders");
        let a_bus = MessageBusBuilder::new("a")
            .with_transport(transport_a.clone())
            .with_serializer(serializer.clone())
            .produce::<OrderPlaced>(a_settings)
            .unwrap()
            .build()
            .unwrap();
        let b_bus = MessageBusBuilder::new("b")
            .with_transport(transport_b.clone())
            .with_serializer(serializer)
            .produce::<OrderPlaced>(b_settings)
            .unwrap()
            .build()
            .unwrap();

        let router = HybridRouter::new(
            vec![("a".into(), Arc::new(a_bus)), ("b".into(), Arc::new(b_bus))],
            PublishExecutionMode::Parallel,
        )
        .unwrap();
        router.publish(&OrderPlaced, None, None).await.unwrap();

        assert_eq!(transport_a.calls_for("orders"), 1);
        assert_eq!(transport_b.calls_for("orders"), 1);
    }

    #[tokio::test]
    async fn publish_to_unregistered_type_is_a_configuration_error() {
        let transport_a = CountingTransport::new();
        let a = child("a", transport_a);

        let router = HybridRouter::new(vec![a], PublishExecutionMode::Parallel).unwrap();
        let err = router.publish(&Refunded, None, None).await.unwrap_err();
        assert_eq!(err.kind(), "Configuration");
    }

    #[tokio::test]
    async fn construction_rejects_a_request_type_declared_on_more_than_one_child() {
        let transport_a = CountingTransport::new();
        let transport_b = CountingTransport::new();
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let a_bus = MessageBusBuilder::new("a")
            .with_transport(transport_a)
            .with_serializer(serializer.clone())
            .produce_request::<OrderPlaced>(ProducerSettings::new("OrderPlaced").with_default_path("orders"))
            .unwrap()
            .build()
            .unwrap();
        let b_bus = MessageBusBuilder::new("b")
            .with_transport(transport_b)
            .with_serializer(serializer)
            .produce_request::<OrderPlaced>(ProducerSettings::new("OrderPlaced").with_default_path("orders"))
            .unwrap()
            .build()
            .unwrap();

        let err = HybridRouter::new(
            vec![("a".into(), Arc::new(a_bus)), ("b".into(), Arc::new(b_bus))],
            PublishExecutionMode::Parallel,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
        assert!(err.to_string().contains("more than one child bus"));
    }

    #[tokio::test]
    async fn send_errors_when_type_routes_to_more_than_one_child() {
        // Two children both declare a plain (non-request) producer for the
        // same type; that is legal at construction time, but `send` still
        // requires exactly one owning child to route a reply to.
        let transport_a = CountingTransport::new();
        let transport_b = CountingTransport::new();
        let a = child("a", transport_a);
        let b = child("b", transport_b);
        let router = HybridRouter::new(vec![a, b], PublishExecutionMode::Parallel).unwrap();

        let err = router
            .send::<OrderPlaced, Payload>(&OrderPlaced, None, None, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
        assert!(err.to_string().contains("does not route to a single child bus"));
    }

    #[tokio::test]
    async fn send_errors_when_type_has_no_declared_producer_anywhere() {
        let transport_a = CountingTransport::new();
        let a = child("a", transport_a);
        let router = HybridRouter::new(vec![a], PublishExecutionMode::Parallel).unwrap();

        let err = router
            .send::<Refunded, Payload>(&Refunded, None, None, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
    }

    #[tokio::test]
    async fn start_and_dispose_fan_out_to_every_child_and_are_idempotent() {
        let transport_a = CountingTransport::new();
        let a = child("a", transport_a);
        let router = HybridRouter::new(vec![a], PublishExecutionMode::Parallel).unwrap();
        router.start().await.unwrap();
        router.dispose().await;
        router.dispose().await;
    }

    #[tokio::test]
    async fn children_exposes_names_in_construction_order() {
        let transport_a = CountingTransport::new();
        let transport_b = CountingTransport::new();
        let a = child("a", transport_a);
        let b = child("b", transport_b);
        let router = HybridRouter::new(vec![a, b], PublishExecutionMode::Sequential).unwrap();
        assert_eq!(router.children().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
