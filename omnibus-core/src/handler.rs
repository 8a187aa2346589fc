//! Type-erased consumer/handler dispatch (spec §4.6 step 4: "invokes the
//! user consumer" / "for a handler, it captures the response").
//!
//! The registry resolves settings by name, not by static type, so the
//! consumer pipeline needs a trait object that hides the user's concrete
//! `T`/`R` behind a uniform `handle(bytes, headers)` entry point — the same
//! erase-then-dispatch shape the teacher uses for `Box<dyn Any + Send>`
//! task definitions in `r2e-scheduler/src/lib.rs::start_scheduled_tasks`.

use std::future::Future;
use std::marker::PhantomData;

use bytes::Bytes;
use std::sync::Arc;

use crate::error::Result;
use crate::headers::Headers;
use crate::message::Message;
use crate::serializer::{self, Serializer};

/// Erased entry point the consumer pipeline calls once message-type
/// resolution (spec §4.6 step 1) has picked the matching settings.
#[async_trait::async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, bytes: &[u8], headers: &Headers) -> Result<Option<Bytes>>;
}

/// Adapts a pub/sub consumer closure `Fn(T) -> Result<()>` into a
/// [`ConsumerHandler`].
pub struct FnConsumer<T, F> {
    serializer: Arc<dyn Serializer>,
    func: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F, Fut> FnConsumer<T, F>
where
    T: Message + serde::de::DeserializeOwned,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(serializer: Arc<dyn Serializer>, func: F) -> Self {
        Self {
            serializer,
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<T, F, Fut> ConsumerHandler for FnConsumer<T, F>
where
    T: Message + serde::de::DeserializeOwned,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, bytes: &[u8], _headers: &Headers) -> Result<Option<Bytes>> {
        let value: T = serializer::deserialize(self.serializer.as_ref(), T::type_name(), bytes)?;
        (self.func)(value).await?;
        Ok(None)
    }
}

/// Adapts a request handler closure `Fn(T) -> Result<R>` into a
/// [`ConsumerHandler`] that serializes the response (spec §4.6 step 5).
pub struct FnHandler<T, R, F> {
    serializer: Arc<dyn Serializer>,
    func: F,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R, F, Fut> FnHandler<T, R, F>
where
    T: Message + serde::de::DeserializeOwned,
    R: Message + serde::Serialize,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send,
{
    pub fn new(serializer: Arc<dyn Serializer>, func: F) -> Self {
        Self {
            serializer,
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<T, R, F, Fut> ConsumerHandler for FnHandler<T, R, F>
where
    T: Message + serde::de::DeserializeOwned,
    R: Message + serde::Serialize,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send,
{
    async fn handle(&self, bytes: &[u8], _headers: &Headers) -> Result<Option<Bytes>> {
        let value: T = serializer::deserialize(self.serializer.as_ref(), T::type_name(), bytes)?;
        let response = (self.func)(value).await?;
        let bytes = self
            .serializer
            .serialize(R::type_name(), &response as &dyn erased_serde::Serialize)?;
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use crate::impl_message;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        id: String,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Pong {
        id: String,
    }

    impl_message!(Ping, "Ping");
    impl_message!(Pong, "Pong");

    #[tokio::test]
    async fn fn_consumer_invokes_closure_with_decoded_value() {
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let seen = Arc::new(tokio::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        let handler = FnConsumer::new(serializer.clone(), move |ping: Ping| {
            let seen = seen_clone.clone();
            async move {
                *seen.lock().await = Some(ping.id);
                Ok(())
            }
        });

        let bytes = serializer.serialize("Ping", &Ping { id: "1".into() }).unwrap();
        handler.handle(&bytes, &Headers::new()).await.unwrap();
        assert_eq!(seen.lock().await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn fn_handler_returns_serialized_response() {
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let handler = FnHandler::new(serializer.clone(), |ping: Ping| async move {
            Ok(Pong { id: ping.id })
        });

        let bytes = serializer.serialize("Ping", &Ping { id: "7".into() }).unwrap();
        let response = handler.handle(&bytes, &Headers::new()).await.unwrap().unwrap();
        let decoded: Pong = serializer::deserialize(serializer.as_ref(), "Pong", &response).unwrap();
        assert_eq!(decoded, Pong { id: "7".into() });
    }
}
