//! WebSocket connection layer.
//!
//! - [`transport`]: the frame source/sink seam over a socket
//! - [`connection`]: one client with its inbound and outbound pumps
//! - [`room`]: broadcast groups
//! - [`router`]: action dispatch
//! - [`manager`]: lifecycle, registries, hooks and shutdown

pub mod connection;
pub mod manager;
pub mod room;
pub mod router;
pub mod transport;

pub use connection::{Connection, ConnectionError, ConnectionState};
pub use manager::{Manager, ManagerError};
pub use room::Room;
pub use router::{FnHandler, HandlerError, MessageHandler, RouteError, Router, handler_fn};
pub use transport::{
    Frame, FrameSink, FrameSource, MemoryClient, MemoryTransport, ServerFrame, Transport, TransportError,
};
