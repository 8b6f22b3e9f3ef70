//! shai: ephemeral, network-restricted container sandboxes for command-line
//! AI coding agents.
//!
//! The library centers on the sandbox supervisor: load a declarative
//! workspace policy, resolve it against the invocation, compose a container
//! specification, stage a bootstrap program that erects a second isolation
//! layer inside the container, serve curated host commands over an
//! authenticated loopback RPC endpoint, and supervise the container's stdio
//! and lifetime.
//!
//! # Example
//!
//! ```rust,no_run
//! use shai::sandbox::{PostSetupExec, Sandbox, SandboxConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SandboxConfig::new("/path/to/workspace")
//!     .rw_paths(vec!["src".to_string()])
//!     .exec(PostSetupExec {
//!         argv: vec!["cargo".to_string(), "test".to_string()],
//!         use_tty: false,
//!         ..Default::default()
//!     });
//!
//! Sandbox::new(config).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod alias;
pub mod cli;
pub mod error;
pub mod policy;
pub mod sandbox;
pub mod util;

pub use error::Error;
pub use policy::Policy;
pub use sandbox::{Sandbox, SandboxConfig, Session};
