//! Forwarding table gateway for the load-balancer control plane.
//!
//! The fast-path lookup tables are external to the service manager. This
//! crate defines the narrow interface used to write them:
//!
//! - [`types`]: type-safe [`ServiceId`] and [`BackendId`]
//! - [`error`]: [`LbMapError`] and errno conversion
//! - [`LbMap`]: per-key upsert/delete/dump operations
//! - [`LbMockMap`]: deterministic in-memory table for tests and simulation
//!
//! # Example
//!
//! ```
//! use lb_map::{BackendId, LbMap, LbMockMap};
//!
//! let table = LbMockMap::new();
//! let id = BackendId::from_raw(1).unwrap();
//! table.upsert_backend(id, &"10.0.0.1:8080/TCP".parse().unwrap()).unwrap();
//! assert_eq!(table.backend_count(), 1);
//! ```

pub mod error;
mod map;
mod mock;
pub mod types;

pub use error::{LbMapError, LbMapOp, LbMapResult};
pub use map::{LbMap, ServiceEntry};
pub use mock::LbMockMap;
pub use types::{BackendId, BackendKind, LbId, LbIdKind, RawLbId, ServiceId, ServiceKind};
