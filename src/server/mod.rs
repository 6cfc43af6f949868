//! WebSocket server module
//!
//! Accepts client connections, answers each inbound frame with an
//! acknowledgment or an error, and handles graceful shutdown.

mod handler;
mod protocol;
mod tls;
mod websocket;

#[allow(unused_imports)]
pub use handler::*;
#[allow(unused_imports)]
pub use protocol::*;
pub use websocket::*;
