//! Ephemeral, network-restricted container sandboxes.
//!
//! This module provisions a Docker container around a host workspace and
//! erects two isolation layers:
//!
//! - **Host side**: a read-only workspace bind with selective read-write
//!   overlays, a curated-command RPC endpoint on loopback, and a staged
//!   bootstrap payload.
//! - **Container side**: the bootstrap program runs as root, provisions the
//!   target user with the host identity, starts a DNS filter and HTTP proxy,
//!   installs an owner-scoped firewall, then drops privileges and execs the
//!   target command.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             Sandbox                                  │
//! │                                                                      │
//! │  policy (.shai/sandbox.yaml)                                         │
//! │      │ resolve resources / image                                     │
//! │      ▼                                                               │
//! │  mount plan ── alias endpoint ── bootstrap stage                     │
//! │      │               │                 │                             │
//! │      └───────────────┴────────┬────────┘                             │
//! │                               ▼                                      │
//! │                      container (bollard)                             │
//! │                               │ boot.sh: user, dns, proxy, firewall  │
//! │                               ▼                                      │
//! │                  target command as unprivileged user                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security properties
//!
//! - The workspace is read-only unless a subpath was explicitly requested
//!   read-write; the policy directory is re-protected when the root is.
//! - Outbound traffic from the sandboxed user is limited to the HTTP proxy
//!   (allow-listed hosts, subdomains included), allow-listed host:port TCP
//!   pairs, and the host gateway.
//! - DNS resolves only allow-listed domains.
//! - Host commands are reachable only through the authenticated alias
//!   endpoint, validated argument-by-argument.
//! - The container is auto-removed; staged files live in a temp directory
//!   removed on close.

pub mod bootstrap;
pub mod config;
pub mod docker;
pub mod error;
pub mod hostenv;
pub mod mounts;
pub mod plan;
pub mod resources;
pub mod session;
pub mod stdio;
pub mod supervisor;

pub use bootstrap::{BOOTSTRAP_MOUNT, BootstrapArgs, BootstrapStage, READY_MARKER};
pub use config::{DEFAULT_STOP_TIMEOUT, HOST_GATEWAY_ALIAS, PostSetupExec, SandboxConfig};
pub use error::{Result, SandboxError};
pub use hostenv::{HostIds, ROOT_SUBSTITUTE_ID, host_env, host_ids};
pub use mounts::{MountEntry, MountPlan, plan_mounts};
pub use plan::{AliasCoordinates, RunPlan, assemble_plan};
pub use resources::{SelectedResources, select_resources};
pub use session::Session;
pub use supervisor::Sandbox;
