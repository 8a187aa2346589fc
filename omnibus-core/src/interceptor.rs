//! Interceptor chain (spec §4.3): ordered composition of producer/publish/
//! send/consumer/handler interceptors into a next-call chain around a
//! terminal action, grounded in the teacher's `around(ctx, next)` pattern
//! (`r2e-core/src/interceptors.rs`'s `Interceptor<R, S>`). The core's
//! interceptors are not generic over an application state type the way the
//! teacher's are (this runtime has no DI container, spec §1 non-goal), so
//! state access is replaced by the plain `InterceptorContext`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::headers::Headers;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The nullary continuation an interceptor invokes to run the rest of the
/// chain. Not calling it short-circuits the pipeline (spec §4.3): for
/// produce the message is not transmitted, for consume the handler is not
/// invoked.
pub type Next<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<Option<Bytes>>> + Send + 'a>;

/// Context visible to every interceptor regardless of direction (produce,
/// publish, send, consume, handle); the same shape serves all five kinds
/// named in spec §4.3.
#[derive(Debug, Clone)]
pub struct InterceptorContext {
    pub type_name: &'static str,
    pub path: String,
    pub headers: Headers,
}

impl InterceptorContext {
    pub fn new(type_name: &'static str, path: impl Into<String>, headers: Headers) -> Self {
        Self {
            type_name,
            path: path.into(),
            headers,
        }
    }
}

/// A single middleware link. The same interface serves producer, publish,
/// send, consumer and handler interceptors; only the position in the
/// assembled chain differs (spec §4.3).
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync {
    async fn around(&self, ctx: &InterceptorContext, next: Next<'_>) -> Result<Option<Bytes>>;
}

/// Ordered, assembled chain: global hooks first, then per-type hooks (spec
/// §4.3). A producer pipeline builds one of these per message type and
/// memoises it (spec §9) rather than reassembling per call.
#[derive(Clone, Default)]
pub struct Chain {
    links: Vec<Arc<dyn Interceptor>>,
}

impl Chain {
    pub fn new() -> Self {
        Self { links: Vec::new() }
    }

    pub fn push(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.links.push(interceptor);
        self
    }

    pub fn extend(mut self, interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        self.links.extend(interceptors);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Run the chain around `terminal`, outermost link first. Exceptions
    /// (errors) thrown by an interceptor or the terminal action abort the
    /// chain and surface as the operation's failure (spec §4.3).
    pub fn run<'a, F>(&'a self, ctx: &'a InterceptorContext, terminal: F) -> BoxFuture<'a, Result<Option<Bytes>>>
    where
        F: FnOnce() -> BoxFuture<'a, Result<Option<Bytes>>> + Send + 'a,
    {
        self.run_from(0, ctx, Box::new(terminal))
    }

    fn run_from<'a>(
        &'a self,
        index: usize,
        ctx: &'a InterceptorContext,
        terminal: Next<'a>,
    ) -> BoxFuture<'a, Result<Option<Bytes>>> {
        match self.links.get(index) {
            None => terminal(),
            Some(link) => {
                let next: Next<'a> = Box::new(move || self.run_from(index + 1, ctx, terminal));
                Box::pin(link.around(ctx, next))
            }
        }
    }
}
