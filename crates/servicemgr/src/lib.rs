//! Load-balancer service manager.
//!
//! Maintains the mapping from service frontends (virtual IP, port and
//! protocol) to the backends that serve them, and mirrors it into the
//! forwarding table consulted by the packet-processing fast path.
//!
//! # Architecture
//!
//! ```text
//! [manifest / event handlers]
//!            │ upsert / delete
//!            ↓
//!     [ServiceManager] ──> [IdAllocator x2]
//!            │
//!            ↓ per-key writes
//!        [LbMap] ──> fast-path tables
//! ```
//!
//! # Key Components
//!
//! - [`service::ServiceManager`]: registry, diffing and reference counting
//! - [`manifest`]: desired-state file and [`manifest::apply_manifest`]
//! - [`daemon::ServiceDaemon`]: restore plus periodic reconcile passes
//! - [`config`]: TOML configuration for `servicemgrd`
//! - [`audit`]: structured audit records and logging setup

pub mod audit;
pub mod config;
pub mod daemon;
pub mod manifest;
pub mod service;

pub use config::{ConfigError, IdLimits, ServiceManagerConfig};
pub use manifest::{apply_manifest, ApplyReport, ManifestError, ServiceManifest};
pub use service::{
    BackendInfo, RestoreSummary, ServiceError, ServiceInfo, ServiceManager, ServiceManagerStats,
    ServiceResult, TableDrift,
};
