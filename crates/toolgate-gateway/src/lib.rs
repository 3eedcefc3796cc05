//! Gateway: config loading, logging, tool registry, upstream sessions, core
//! tools, and the proxy coordinator that ties them together (SPEC_FULL.md
//! §2 components G-L).

pub mod config_loader;
pub mod coordinator;
pub mod core_tools;
pub mod error;
pub mod logging;
pub mod registry;
pub mod upstream;

pub use coordinator::ProxyCoordinator;
pub use error::{GatewayError, UpstreamError};
pub use registry::ToolRegistry;
pub use upstream::{UpstreamSession, UpstreamStatus};
