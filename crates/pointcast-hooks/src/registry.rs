//! Hook registry.
//!
//! Keeps a priority-sorted list of [`HookHandler`]s per [`HookType`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::handler::HookHandler;
use crate::types::HookType;

/// Registry of lifecycle hook handlers, sorted by priority (descending)
/// within each type.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookType, Vec<Arc<dyn HookHandler>>>,
}

impl HookRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook handler. A handler with the same name and type is
    /// replaced.
    pub fn register(&mut self, handler: Arc<dyn HookHandler>) {
        let hook_type = handler.hook_type();
        let name = handler.name().to_string();

        let handlers = self.hooks.entry(hook_type).or_default();
        handlers.retain(|h| h.name() != name);

        debug!(name = %name, hook_type = %hook_type, priority = handler.priority(), "registering hook");
        handlers.push(handler);

        // Stable sort keeps registration order among equal priorities
        handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    /// Unregister a handler by name across all types.
    pub fn unregister(&mut self, name: &str) -> bool {
        let mut found = false;
        for handlers in self.hooks.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.name() != name);
            found |= handlers.len() < before;
        }
        if found {
            debug!(name = %name, "unregistered hook");
        }
        found
    }

    /// Handlers for a hook type, highest priority first.
    #[must_use]
    pub fn get_handlers(&self, hook_type: HookType) -> Vec<Arc<dyn HookHandler>> {
        self.hooks.get(&hook_type).cloned().unwrap_or_default()
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hook_count", &self.count())
            .finish()
    }
}
