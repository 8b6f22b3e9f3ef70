//! Alias RPC: curated host commands exposed to the sandbox.
//!
//! The container cannot run arbitrary host commands; instead the policy
//! names specific "calls" (command string plus an argument pattern) and the
//! supervisor serves them over an authenticated loopback JSON-RPC endpoint.
//! The container reaches the endpoint through the host-gateway alias; the
//! bearer token and session id travel in environment variables.
//!
//! ```text
//! container ── shai-remote ──▶ http://host.docker.internal:PORT/mcp
//!                                   │  bearer auth, JSON-RPC 2.0
//!                                   ▼
//!                             AliasEndpoint ──▶ ShellExecutor ──▶ host command
//! ```

pub mod endpoint;
pub mod entry;
pub mod executor;

pub use endpoint::{AliasEndpoint, AliasEndpointConfig, RPC_PATH};
pub use entry::{AliasEntry, build_entries};
pub use executor::{CallOutput, DEFAULT_CALL_TIMEOUT, OutputChunk, ShellExecutor, StreamKind};

/// Environment variable carrying the endpoint URL into the container.
pub const ENV_ENDPOINT: &str = "SHAI_ALIAS_ENDPOINT";
/// Environment variable carrying the bearer token.
pub const ENV_TOKEN: &str = "SHAI_ALIAS_TOKEN";
/// Environment variable carrying the session id.
pub const ENV_SESSION_ID: &str = "SHAI_ALIAS_SESSION_ID";
/// Marker telling the bootstrap to allow gateway:port egress for the
/// endpoint.
pub const ENV_ALLOW_HOST_PORT: &str = "ALLOW_DOCKER_HOST_PORT";
