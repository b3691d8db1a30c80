//! Connection-setup middleware.
//!
//! A [`MiddlewareChain`] runs once per accepted connection, before it is
//! registered. Members run in insertion order and the first error aborts
//! setup.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use pointcast_core::Peer;
use tracing::info;

use crate::errors::MiddlewareError;

/// One setup step.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Inspect or prepare the connection. An error refuses it.
    async fn on_connect(&self, peer: &Arc<dyn Peer>) -> Result<(), MiddlewareError>;
}

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run every layer in order, stopping at the first error.
    pub async fn run(&self, peer: &Arc<dyn Peer>) -> Result<(), MiddlewareError> {
        for layer in &self.layers {
            layer.on_connect(peer).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.layers.iter().map(|l| l.name()).collect();
        f.debug_struct("MiddlewareChain").field("layers", &names).finish()
    }
}

/// Logs every accepted connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_connect(&self, peer: &Arc<dyn Peer>) -> Result<(), MiddlewareError> {
        info!(conn_id = %peer.id(), "connection established");
        Ok(())
    }
}

/// Turns a panic in the wrapped middleware into [`MiddlewareError::Panicked`].
pub struct Recover<M> {
    inner: M,
}

impl<M: Middleware> Recover<M> {
    /// Wrap `inner`.
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M: Middleware> Middleware for Recover<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn on_connect(&self, peer: &Arc<dyn Peer>) -> Result<(), MiddlewareError> {
        match AssertUnwindSafe(self.inner.on_connect(peer)).catch_unwind().await {
            Ok(result) => result,
            Err(_panic) => {
                tracing::error!(middleware = self.inner.name(), conn_id = %peer.id(), "middleware panicked");
                Err(MiddlewareError::Panicked {
                    name: self.inner.name().to_string(),
                })
            }
        }
    }
}
