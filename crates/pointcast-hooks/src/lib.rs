//! # pointcast-hooks
//!
//! Extensibility points around a connection's lifecycle.
//!
//! **Hooks** fire at named events ([`HookType`]): connect, disconnect, each
//! inbound message, room join and leave, and errors. Handlers for one event
//! run sequentially in priority order and the first error stops the chain;
//! the caller decides what that error aborts.
//!
//! **Middleware** runs once when a connection is set up, before it is
//! registered. Any middleware can refuse the connection by returning an
//! error.

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod handler;
pub mod middleware;
pub mod registry;
pub mod types;

pub use engine::HookEngine;
pub use errors::{HookError, MiddlewareError};
pub use handler::{HookHandler, hook_fn};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, Recover};
pub use registry::HookRegistry;
pub use types::{HookContext, HookPayload, HookType};
