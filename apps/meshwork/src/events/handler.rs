//! Handler and middleware seams of the event bus.

use async_trait::async_trait;
use meshwork_core::{Event, MeshError};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Processes events of the types it is subscribed to.
///
/// The returned value becomes the `result` of a COMPLETED [`EventResult`];
/// an `Err` becomes a FAILED one.
///
/// [`EventResult`]: meshwork_core::EventResult
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name recorded on results.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<Value, MeshError>;
}

/// Transforms an event before it is stored. Returning `None` drops it.
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    async fn process(&self, event: Event) -> Option<Event>;
}

/// An [`EventHandler`] built from an async closure.
pub struct HandlerFn<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a named handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<HandlerFn<F>>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MeshError>> + Send + 'static,
{
    Arc::new(HandlerFn {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MeshError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Value, MeshError> {
        (self.f)(event.clone()).await
    }
}

/// An [`EventMiddleware`] built from a plain closure.
pub struct MiddlewareFn<F>(F);

pub fn middleware_fn<F>(f: F) -> Arc<MiddlewareFn<F>>
where
    F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
{
    Arc::new(MiddlewareFn(f))
}

#[async_trait]
impl<F> EventMiddleware for MiddlewareFn<F>
where
    F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
{
    async fn process(&self, event: Event) -> Option<Event> {
        (self.0)(event)
    }
}
