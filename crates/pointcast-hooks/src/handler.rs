//! Hook handler trait.
//!
//! Handlers are registered with the [`HookRegistry`](crate::registry::HookRegistry)
//! and executed by the [`HookEngine`](crate::engine::HookEngine).

use async_trait::async_trait;

use crate::errors::HookError;
use crate::types::{HookContext, HookType};

/// A lifecycle hook handler.
///
/// Higher priority handlers run first. Default priority is 0. Returning an
/// error stops the remaining handlers for that event.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Unique name for this handler.
    fn name(&self) -> &str;

    /// Which lifecycle event this handler responds to.
    fn hook_type(&self) -> HookType;

    /// Execution priority. Higher runs first. Default: 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Run the handler.
    async fn handle(&self, context: &HookContext) -> Result<(), HookError>;
}

/// Handler backed by a synchronous closure.
pub struct FnHook<F> {
    name: String,
    hook_type: HookType,
    priority: i32,
    func: F,
}

impl<F> FnHook<F> {
    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Wrap a closure as a [`HookHandler`].
pub fn hook_fn<F>(name: impl Into<String>, hook_type: HookType, func: F) -> FnHook<F>
where
    F: Fn(&HookContext) -> Result<(), HookError> + Send + Sync,
{
    FnHook {
        name: name.into(),
        hook_type,
        priority: 0,
        func,
    }
}

#[async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(&HookContext) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn hook_type(&self) -> HookType {
        self.hook_type
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn handle(&self, context: &HookContext) -> Result<(), HookError> {
        (self.func)(context)
    }
}
