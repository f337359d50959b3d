//! Model Context Protocol client: transports (C1/C2), server client (C3),
//! and server pool (C4).

pub mod client;
pub mod pool;
pub mod protocol;
pub mod sse;
pub mod stdio;
pub mod transport;

pub use client::{ClientState, ServerClient};
pub use pool::{PoolError, ServerPool};
pub use protocol::{ToolDescriptor, PROTOCOL_VERSION};
pub use transport::{McpError, McpTransport};
