//! Service manager: maps load-balanced frontends to shared, reference-counted
//! backends and keeps the forwarding table in step with that mapping.
//!
//! Service and backend IDs are small integers from two bounded allocators.
//! A backend address used by several services is stored once and counted.
//! Every operation is serialized by one lock over the whole registry.
//!
//! Table writes are ordered so the fast path never sees a service listing a
//! backend record that does not exist:
//! 1. new backend records are written,
//! 2. the service record is replaced,
//! 3. backends nothing lists any more are deleted.
//!
//! A backend whose deletion fails stays registered with no references and
//! is retried after the next successful operation.

mod error;
mod manager;
mod types;

pub use error::{ServiceError, ServiceResult};
pub use manager::ServiceManager;
pub use types::{BackendInfo, RestoreSummary, ServiceInfo, ServiceManagerStats, TableDrift};
