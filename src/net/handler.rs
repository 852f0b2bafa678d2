//! The message handler contract between the connection layer and the router.

use std::future::Future;
use std::sync::Arc;

use crate::protocol::Message;

/// Error returned by a [`Handler`]; only its text reaches the logs.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Called once per decoded message.
///
/// `Ok(())` makes the connection send a positive confirmation, any error a
/// negative one.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, message: &Message) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

impl<H: Handler> Handler for Arc<H> {
    fn handle(&self, message: &Message) -> impl Future<Output = Result<(), HandlerError>> + Send {
        (**self).handle(message)
    }
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

/// Build a [`Handler`] from a closure receiving an owned copy of the message.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn(f)
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn handle(&self, message: &Message) -> impl Future<Output = Result<(), HandlerError>> + Send {
        (self.0)(message.clone())
    }
}

/// Middleware that logs every message as JSON before passing it on.
pub struct Logged<H> {
    inner: H,
}

impl<H: Handler> Logged<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for Logged<H> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let json = serde_json::to_string(message)?;
        tracing::info!(imei = %message.identifier(), elements = %json, "New data");
        self.inner.handle(message).await
    }
}
