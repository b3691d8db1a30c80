//! Hook execution.
//!
//! [`HookEngine::execute`] runs every handler registered for the context's
//! [`HookType`] one after another. The first error ends the chain and is
//! returned to the caller. A panicking handler is reported as
//! [`HookError::Panicked`] instead of unwinding into the connection task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::HookError;
use crate::handler::HookHandler;
use crate::registry::HookRegistry;
use crate::types::{HookContext, HookType};

/// Runs registered hooks.
#[derive(Debug, Default)]
pub struct HookEngine {
    registry: RwLock<HookRegistry>,
    timeout: Option<Duration>,
}

impl HookEngine {
    /// Engine over an existing registry.
    #[must_use]
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            timeout: None,
        }
    }

    /// Fail any single handler that runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a handler.
    pub fn register(&self, handler: Arc<dyn HookHandler>) {
        self.registry.write().register(handler);
    }

    /// Remove a handler by name.
    pub fn unregister(&self, name: &str) -> bool {
        self.registry.write().unregister(name)
    }

    /// Whether any handler is registered for `hook_type`.
    pub fn has_hooks(&self, hook_type: HookType) -> bool {
        !self.registry.read().get_handlers(hook_type).is_empty()
    }

    /// Total registered handlers.
    pub fn count(&self) -> usize {
        self.registry.read().count()
    }

    /// Run the chain for `context.hook_type`, stopping at the first error.
    pub async fn execute(&self, context: &HookContext) -> Result<(), HookError> {
        let handlers = self.registry.read().get_handlers(context.hook_type);
        for handler in handlers {
            let name = handler.name().to_string();
            let run = AssertUnwindSafe(handler.handle(context)).catch_unwind();
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(hook = %name, hook_type = %context.hook_type, "hook timed out");
                        return Err(HookError::Timeout {
                            name,
                            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                },
                None => run.await,
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    debug!(hook = %name, hook_type = %context.hook_type, error = %error, "hook stopped chain");
                    return Err(error);
                }
                Err(_panic) => {
                    warn!(hook = %name, hook_type = %context.hook_type, "hook panicked");
                    return Err(HookError::Panicked { name });
                }
            }
        }
        Ok(())
    }
}
