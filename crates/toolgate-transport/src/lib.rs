//! Wire-level connections to upstream servers (SPEC_FULL.md §4.D).
//!
//! Four transport shapes share one trait: subprocess stdio, SSE, WebSocket,
//! and streaming HTTP. Grounded on `mcpmux-gateway::pool::transport`'s
//! `Transport` trait and factory, rebuilt without `rmcp` (dropped per
//! DESIGN.md) to speak JSON-RPC directly over each wire shape and to route
//! through [`toolgate_oauth::AuthProvider`] instead of RMCP's `AuthClient`.

pub mod error;
pub mod factory;
pub mod pending;
pub mod session;
pub mod sse;
pub mod stdio;
pub mod streamable_http;
pub mod websocket;

pub use error::TransportError;
pub use factory::{TransportFactory, TransportKey};
pub use session::{ClientTransport, NotificationSink, TransportEvent};
