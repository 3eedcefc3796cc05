//! Domain model shared by every Toolgate crate: connection/reconnection state,
//! the JSON-RPC envelope, tool descriptors, and typed configuration.
//!
//! This crate has no I/O. Transports, auth providers, and the coordinator build
//! on top of these types but never live here.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod jsonrpc;
pub mod reconnect;
pub mod tool;

pub use config::{
    AuthConfig, ClientCredentialsConfig, CodePkceConfig, ProxyConfig, ReconnectConfig,
    TransportConfig, UpstreamConfig,
};
pub use connection::{ConnectionState, StateTransition};
pub use error::{ConfigError, ToolgateError, ValidationError};
pub use event::DomainEvent;
pub use jsonrpc::{JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use reconnect::{ReconnectController, ReconnectObserver};
pub use tool::{ToolDescriptor, ToolVisibility};
