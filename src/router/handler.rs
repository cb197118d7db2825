//! Message handlers
//!
//! Handlers receive the concrete topic and the decoded payload. Closures can
//! be registered through [`handler_fn`].

use crate::error::HandlerError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Processes decoded messages for one route
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, topic: &str, message: T) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<T, F> {
    closure: F,
    _phantom: PhantomData<fn(T)>,
}

/// Wrap an async closure `(topic, message) -> Result<(), HandlerError>`
///
/// ```rust
/// use resilient_mqtt::error::HandlerError;
/// use resilient_mqtt::router::handler_fn;
///
/// let handler = handler_fn(|topic: String, reading: String| async move {
///     println!("{topic}: {reading}");
///     Ok::<(), HandlerError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<T, F, Fut>(closure: F) -> FnHandler<T, F>
where
    T: Send + 'static,
    F: Fn(String, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler {
        closure,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<T, F>
where
    T: Send + 'static,
    F: Fn(String, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, topic: &str, message: T) -> Result<(), HandlerError> {
        (self.closure)(topic.to_string(), message).await
    }
}
