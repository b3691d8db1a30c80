//! Hook and middleware error types.

use thiserror::Error;

/// Errors returned by hook handlers.
#[derive(Debug, Error)]
pub enum HookError {
    /// Handler refused the event.
    #[error("hook '{name}' rejected: {message}")]
    Rejected {
        /// Hook name.
        name: String,
        /// Reason given by the handler.
        message: String,
    },

    /// Handler did not finish in time.
    #[error("hook '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Hook name.
        name: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Handler panicked.
    #[error("hook '{name}' panicked")]
    Panicked {
        /// Hook name.
        name: String,
    },
}

impl HookError {
    /// Shorthand for [`HookError::Rejected`].
    pub fn rejected(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Errors that abort connection setup.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// Middleware refused the connection.
    #[error("middleware '{name}' refused connection: {message}")]
    Refused {
        /// Middleware name.
        name: String,
        /// Reason.
        message: String,
    },

    /// Middleware panicked.
    #[error("middleware '{name}' panicked")]
    Panicked {
        /// Middleware name.
        name: String,
    },
}

impl MiddlewareError {
    /// Shorthand for [`MiddlewareError::Refused`].
    pub fn refused(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Refused {
            name: name.into(),
            message: message.into(),
        }
    }
}
