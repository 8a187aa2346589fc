//! Wires a producer and a consumer through `MemoryTransport`, publishing one
//! event and sending one request/response round trip.

use std::sync::Arc;
use std::time::Duration;

use omnibus_core::{
    impl_message, ConsumerSettings, FnConsumer, FnHandler, JsonSerializer,
    MessageBusBuilder, ProducerSettings, RequestResponseSettings, Serializer,
};
use omnibus_memory::MemoryTransport;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    id: String,
    amount: i64,
}

impl_message!(OrderPlaced, "OrderPlaced");

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    nonce: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    nonce: u32,
}

impl_message!(Ping, "Ping");
impl_message!(Pong, "Pong");

#[tokio::main]
async fn main() -> omnibus_core::Result<()> {
    tracing_subscriber::fmt::init();

    let transport = MemoryTransport::new();
    let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);

    let bus = MessageBusBuilder::new("demo-bus")
        .with_transport(transport.clone())
        .with_serializer(serializer.clone())
        .expect_request_responses(RequestResponseSettings {
            reply_to_path: "demo-bus.replies".into(),
            default_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .produce::<OrderPlaced>(ProducerSettings::new("OrderPlaced").with_default_path("orders"))?
        .consume::<OrderPlaced>(ConsumerSettings::new(
            "OrderPlaced",
            "orders",
            Arc::new(FnConsumer::new(serializer.clone(), |order: OrderPlaced| async move {
                tracing::info!(id = %order.id, amount = order.amount, "order received");
                Ok(())
            })),
        ))
        .produce_request::<Ping>(ProducerSettings::new("Ping").with_default_path("pings"))?
        .handle::<Ping>(
            ConsumerSettings::new(
                "Ping",
                "pings",
                Arc::new(FnHandler::new(serializer.clone(), |ping: Ping| async move {
                    Ok(Pong { nonce: ping.nonce })
                })),
            )
            .as_handler("Pong"),
        )?
        .build()?;

    bus.start().await?;

    bus.publish(&OrderPlaced { id: "o-1".into(), amount: 4200 }, None, None).await?;

    let pong: Pong = bus
        .send(
            &Ping { nonce: 7 },
            None,
            None,
            Some(Duration::from_secs(1)),
            CancellationToken::new(),
        )
        .await?;
    tracing::info!(nonce = pong.nonce, "pong received");

    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.dispose().await?;
    Ok(())
}
