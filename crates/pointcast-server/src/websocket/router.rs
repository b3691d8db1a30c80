//! Action dispatch.
//!
//! The [`Router`] maps an action name to a [`MessageHandler`]. Lookup tries
//! the envelope's `action` first and falls back to its `type`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use pointcast_core::{Envelope, ErrorCode, RepositoryError};
use thiserror::Error;

use super::connection::{Connection, ConnectionError};
use super::manager::ManagerError;

/// Errors a handler can return.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not match what the handler expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// A manager operation failed.
    #[error(transparent)]
    Manager(#[from] ManagerError),
    /// Writing to the connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A collaborator the handler needs is gone.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl HandlerError {
    /// Wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::Repository(e) => e.code(),
            Self::Manager(e) => e.code(),
            Self::Connection(_) => ErrorCode::ConnectionClosed,
            Self::Unavailable(_) => ErrorCode::InternalError,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidPayload(error.to_string())
    }
}

/// Errors from [`Router::route`].
#[derive(Debug, Error)]
pub enum RouteError {
    /// Neither `action` nor `type` has a handler.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// The handler ran and failed.
    #[error("{action}: {source}")]
    Handler {
        /// Action that was dispatched.
        action: String,
        /// Handler failure.
        #[source]
        source: HandlerError,
    },
}

impl RouteError {
    /// Wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
            Self::Handler { source, .. } => source.code(),
        }
    }
}

/// Handles one action.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process `message` from `conn`.
    async fn handle(&self, conn: &Arc<Connection>, message: &Envelope) -> Result<(), HandlerError>;
}

/// Handler backed by a synchronous closure.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Arc<Connection>, &Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, conn: &Arc<Connection>, message: &Envelope) -> Result<(), HandlerError> {
        (self.0)(conn, message)
    }
}

/// Wrap a closure as a [`MessageHandler`].
pub fn handler_fn<F>(func: F) -> FnHandler<F>
where
    F: Fn(&Arc<Connection>, &Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(func)
}

/// Action name to handler table.
#[derive(Default)]
pub struct Router {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl Router {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any earlier one.
    pub fn handle(&self, action: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let _ = self.handlers.write().insert(action.into(), handler);
    }

    /// Whether `action` has a handler.
    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.read().contains_key(action)
    }

    /// Registered actions, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.read().keys().cloned().collect();
        actions.sort();
        actions
    }

    fn lookup(&self, message: &Envelope) -> Option<(String, Arc<dyn MessageHandler>)> {
        let handlers = self.handlers.read();
        if let Some(handler) = handlers.get(&message.action) {
            return Some((message.action.clone(), Arc::clone(handler)));
        }
        let kind = message.kind()?;
        handlers.get(kind).map(|h| (kind.to_owned(), Arc::clone(h)))
    }

    /// Dispatch `message`. The table lock is released before the handler runs.
    pub async fn route(&self, conn: &Arc<Connection>, message: &Envelope) -> Result<(), RouteError> {
        let Some((action, handler)) = self.lookup(message) else {
            let name = if message.action.is_empty() {
                message.kind().unwrap_or_default().to_owned()
            } else {
                message.action.clone()
            };
            return Err(RouteError::UnknownAction(name));
        };
        handler
            .handle(conn, message)
            .await
            .map_err(|source| RouteError::Handler { action, source })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("actions", &self.actions()).finish()
    }
}
