//! Consumer pipeline (spec §4.6): decode, interceptor chain, handler
//! dispatch, response production, structured outcome.

use std::sync::Arc;

use crate::error::BusError;
use crate::headers::{Envelope, HeaderValue, Headers, RoutingAttributes, HEADER_CORRELATION_ID};
use crate::interceptor::{Chain, InterceptorContext};
use crate::registry::{ConsumeContext, FaultContext, TypeRegistry};
use crate::settings::RequestResponseSettings;
use crate::transport::{ConsumeOutcome, Transport};

pub struct ConsumerPipeline {
    registry: Arc<TypeRegistry>,
    transport: Arc<dyn Transport>,
    consumer_chain: Chain,
    handler_chain: Chain,
    request_response: RequestResponseSettings,
}

impl ConsumerPipeline {
    pub fn new(
        registry: Arc<TypeRegistry>,
        transport: Arc<dyn Transport>,
        consumer_chain: Chain,
        handler_chain: Chain,
        request_response: RequestResponseSettings,
    ) -> Self {
        Self {
            registry,
            transport,
            consumer_chain,
            handler_chain,
            request_response,
        }
    }

    /// The path replies are produced to, so the bus can bind a matching
    /// reply listener at start (spec §4.4, §4.9).
    pub fn reply_to_path(&self) -> &str {
        &self.request_response.reply_to_path
    }

    /// Process one inbound envelope on `path` (spec §4.6).
    pub async fn dispatch(&self, envelope: Envelope, path: &str) -> ConsumeOutcome {
        let type_name = envelope.message_type();
        let settings = match self.registry.find_consumer(type_name, path) {
            Some(settings) => settings,
            None => {
                let name = type_name.unwrap_or("<unknown>");
                return ConsumeOutcome::failed(BusError::Consumer(format!(
                    "no consumer registered for type '{name}' on path '{path}'"
                )));
            }
        };

        let correlation_id = envelope.correlation_id().map(str::to_string);
        // The requester stamps `ReplyTo` with its own reply listener path
        // (spec §4.6 step 5's header-driven reply routing); the local
        // `request_response.reply_to_path` setting is only a fallback for a
        // request that never set the header.
        let reply_to = envelope
            .reply_to()
            .map(str::to_string)
            .unwrap_or_else(|| self.request_response.reply_to_path.clone());
        let chain = if settings.is_responder {
            &self.handler_chain
        } else {
            &self.consumer_chain
        };
        let ctx = InterceptorContext::new(settings.type_name, path.to_string(), envelope.headers.clone());
        let payload = envelope.payload.clone();
        let headers = envelope.headers.clone();
        let handler = settings.handler.clone();

        let outcome = chain
            .run(&ctx, move || Box::pin(async move { handler.handle(&payload, &headers).await }))
            .await;

        match outcome {
            Ok(response) => {
                if let (true, Some(response_bytes), Some(correlation_id)) =
                    (settings.is_responder, response.clone(), correlation_id.clone())
                {
                    if let Err(err) = self.reply(&reply_to, &correlation_id, response_bytes).await {
                        tracing::warn!(error = %err, "failed publishing reply to request");
                    }
                }
                if let Some(hook) = &settings.events.on_message_consumed {
                    hook(&ConsumeContext {
                        type_name: settings.type_name,
                        path: path.to_string(),
                    });
                }
                tracing::debug!(type_name = settings.type_name, path, "message consumed");
                ConsumeOutcome::consumed(response)
            }
            Err(err) => {
                if let Some(hook) = &settings.events.on_message_fault {
                    hook(&FaultContext {
                        type_name: settings.type_name,
                        path: path.to_string(),
                        error: err.to_string(),
                    });
                }
                if settings.is_responder {
                    if let Some(correlation_id) = correlation_id {
                        if let Err(reply_err) = self.reply_error(&reply_to, &correlation_id, &err).await {
                            tracing::warn!(error = %reply_err, "failed publishing error reply");
                        }
                    }
                }
                tracing::warn!(type_name = settings.type_name, path, error = %err, "message consume failed");
                ConsumeOutcome::failed(err)
            }
        }
    }

    async fn reply(&self, reply_to: &str, correlation_id: &str, response: bytes::Bytes) -> crate::error::Result<()> {
        let mut headers = Headers::new();
        headers.insert(HEADER_CORRELATION_ID.to_string(), HeaderValue::from(correlation_id));
        self.transport
            .produce_to_path(response, headers, reply_to, RoutingAttributes::new())
            .await
    }

    async fn reply_error(&self, reply_to: &str, correlation_id: &str, error: &BusError) -> crate::error::Result<()> {
        let mut headers = Headers::new();
        headers.insert(HEADER_CORRELATION_ID.to_string(), HeaderValue::from(correlation_id));
        headers.insert("ErrorKind".to_string(), HeaderValue::from(error.kind()));
        headers.insert("ErrorMessage".to_string(), HeaderValue::from(error.to_string()));
        self.transport
            .produce_to_path(bytes::Bytes::new(), headers, reply_to, RoutingAttributes::new())
            .await
    }
}
