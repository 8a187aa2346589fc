//! Producer pipeline (spec §4.5): settings resolution, interceptor chain,
//! serialization, transport dispatch, request/response correlation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{BusError, Result};
use crate::headers::{
    HeaderValue, Headers, RoutingAttributes, HEADER_CORRELATION_ID, HEADER_EXPIRES,
    HEADER_MESSAGE_TYPE, HEADER_ORIGINATOR, HEADER_REPLY_TO,
};
use crate::interceptor::{Chain, Interceptor, InterceptorContext};
use crate::message::Message;
use crate::pending::PendingRegistry;
use crate::registry::{ProduceContext, TypeRegistry};
use crate::serializer::{self, Serializer};
use crate::settings::{GlobalEvents, RequestResponseSettings};
use crate::transport::Transport;

pub struct ProducerPipeline {
    registry: Arc<TypeRegistry>,
    serializer: Arc<dyn Serializer>,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRegistry>,
    clock: Arc<dyn Clock>,
    request_response: RequestResponseSettings,
    global_events: GlobalEvents,
    originator: String,
    publish_chain: Chain,
    send_chain: Chain,
}

impl ProducerPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TypeRegistry>,
        serializer: Arc<dyn Serializer>,
        transport: Arc<dyn Transport>,
        pending: Arc<PendingRegistry>,
        clock: Arc<dyn Clock>,
        request_response: RequestResponseSettings,
        global_events: GlobalEvents,
        originator: impl Into<String>,
        producer_interceptors: Vec<Arc<dyn Interceptor>>,
        publish_interceptors: Vec<Arc<dyn Interceptor>>,
        send_interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        let publish_chain = Chain::new()
            .extend(producer_interceptors.clone())
            .extend(publish_interceptors);
        let send_chain = Chain::new().extend(producer_interceptors).extend(send_interceptors);
        Self {
            registry,
            serializer,
            transport,
            pending,
            clock,
            request_response,
            global_events,
            originator: originator.into(),
            publish_chain,
            send_chain,
        }
    }

    fn build_headers(&self, caller_headers: Option<Headers>, type_name: &'static str) -> Headers {
        let mut headers = caller_headers.unwrap_or_default();
        if let Some(modifier) = &self.global_events.header_modifier {
            modifier(&mut headers);
        }
        headers.insert(HEADER_MESSAGE_TYPE.to_string(), HeaderValue::from(type_name));
        headers
    }

    /// Publish `value` (spec §4.5, the publish branch of step 5).
    pub async fn publish<T>(
        &self,
        value: &T,
        path: Option<String>,
        headers: Option<Headers>,
    ) -> Result<()>
    where
        T: Message + serde::Serialize,
    {
        let settings = self.registry.resolve_producer::<T>()?;
        let effective_path = path
            .or_else(|| settings.default_path.clone())
            .ok_or_else(|| {
                BusError::Configuration(format!(
                    "no path resolved for producer '{}'",
                    settings.type_name
                ))
            })?;

        let built_headers = self.build_headers(headers, settings.type_name);
        let ctx = InterceptorContext::new(settings.type_name, effective_path.clone(), built_headers.clone());

        let serializer = self.serializer.clone();
        let transport = self.transport.clone();
        let type_name = settings.type_name;
        let terminal_path = effective_path.clone();
        let terminal_headers = built_headers;

        // The terminal and a short-circuiting interceptor both resolve the
        // chain with `Ok(None)`, so the return value alone can't tell them
        // apart; this flag is the terminal announcing it actually ran.
        let produced = Arc::new(AtomicBool::new(false));
        let produced_flag = produced.clone();

        self.publish_chain
            .run(&ctx, move || {
                Box::pin(async move {
                    let bytes = serializer.serialize(type_name, value as &dyn erased_serde::Serialize)?;
                    transport
                        .produce_to_path(bytes, terminal_headers, &terminal_path, RoutingAttributes::new())
                        .await?;
                    produced_flag.store(true, Ordering::SeqCst);
                    Ok(None)
                })
            })
            .await?;

        if !produced.load(Ordering::SeqCst) {
            tracing::debug!(type_name, path = %effective_path, "publish short-circuited by interceptor chain");
            return Ok(());
        }

        if let Some(hook) = &settings.events.on_message_produced {
            hook(&ProduceContext {
                type_name,
                path: effective_path.clone(),
            });
        }
        if let Some(hook) = &self.global_events.on_message_produced {
            hook(&ProduceContext {
                type_name,
                path: effective_path.clone(),
            });
        }
        tracing::debug!(type_name, path = %effective_path, "message published");
        Ok(())
    }

    /// Send a request and await the correlated reply (spec §4.5, the send
    /// branch of step 5, and the "Request/send specifics" paragraph).
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
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        let settings = self.registry.resolve_producer::<T>()?;
        let effective_path = path
            .or_else(|| settings.default_path.clone())
            .ok_or_else(|| {
                BusError::Configuration(format!(
                    "no path resolved for producer '{}'",
                    settings.type_name
                ))
            })?;
        let timeout = timeout
            .or(settings.default_timeout)
            .unwrap_or(self.request_response.default_timeout);

        let correlation_id = Uuid::new_v4().to_string();
        let expires_at = self.clock.now() + timeout;
        let expires_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
            + timeout.as_millis() as i64;

        let mut built_headers = self.build_headers(headers, settings.type_name);
        built_headers.insert(HEADER_CORRELATION_ID.to_string(), HeaderValue::from(correlation_id.clone()));
        built_headers.insert(
            HEADER_REPLY_TO.to_string(),
            HeaderValue::from(self.request_response.reply_to_path.clone()),
        );
        built_headers.insert(HEADER_ORIGINATOR.to_string(), HeaderValue::from(self.originator.clone()));
        built_headers.insert(HEADER_EXPIRES.to_string(), HeaderValue::from(expires_epoch_ms));

        let rx = self.pending.register(correlation_id.clone(), settings.type_name, expires_at)?;

        let ctx = InterceptorContext::new(settings.type_name, effective_path.clone(), built_headers.clone());
        let serializer = self.serializer.clone();
        let transport = self.transport.clone();
        let type_name = settings.type_name;
        let terminal_path = effective_path.clone();
        let terminal_headers = built_headers;

        // See `publish`: the terminal and a short-circuiting interceptor
        // both resolve with `Ok(None)`, so this flag is how the terminal
        // announces it actually transmitted the request.
        let produced = Arc::new(AtomicBool::new(false));
        let produced_flag = produced.clone();

        let produce_result = self
            .send_chain
            .run(&ctx, move || {
                Box::pin(async move {
                    let bytes = serializer.serialize(type_name, value as &dyn erased_serde::Serialize)?;
                    transport
                        .produce_to_path(bytes, terminal_headers, &terminal_path, RoutingAttributes::new())
                        .await?;
                    produced_flag.store(true, Ordering::SeqCst);
                    Ok(None)
                })
            })
            .await;

        if let Err(err) = produce_result {
            self.pending.unregister(&correlation_id);
            return Err(err);
        }

        if produced.load(Ordering::SeqCst) {
            if let Some(hook) = &settings.events.on_message_produced {
                hook(&ProduceContext {
                    type_name,
                    path: effective_path.clone(),
                });
            }
            if let Some(hook) = &self.global_events.on_message_produced {
                hook(&ProduceContext {
                    type_name,
                    path: effective_path.clone(),
                });
            }
        } else {
            tracing::debug!(type_name, path = %effective_path, "send short-circuited by interceptor chain");
        }

        let reply_bytes = self.pending.await_reply(&correlation_id, rx, cancel).await?;
        let response = serializer::deserialize(self.serializer.as_ref(), R::type_name(), &reply_bytes)?;
        tracing::debug!(type_name, reply_type = R::type_name(), "request completed");
        Ok(response)
    }
}
