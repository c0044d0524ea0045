//! Forwarding table gateway interface.

use crate::error::LbMapResult;
use crate::types::{BackendId, ServiceId};
use lb_types::{L3n4Addr, ServiceType};
use std::collections::BTreeMap;

/// Value stored in the service table.
///
/// `backend_ids` is the complete backend list of the service. Writing an
/// entry replaces the previous list; a service with no backends is stored
/// with an empty list rather than deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub frontend: L3n4Addr,
    pub service_type: ServiceType,
    pub backend_ids: Vec<BackendId>,
}

impl ServiceEntry {
    pub fn new(frontend: L3n4Addr, service_type: ServiceType, backend_ids: Vec<BackendId>) -> Self {
        Self {
            frontend,
            service_type,
            backend_ids,
        }
    }
}

/// The narrow interface the service manager uses to mirror its registry
/// into the packet-processing fast path.
///
/// Each call is atomic for its own key only; there is no transaction
/// spanning several calls. Deleting an absent key fails with
/// [`LbMapError::NotFound`](crate::LbMapError::NotFound).
pub trait LbMap: Send + Sync {
    /// Creates or replaces the backend record for `id`.
    fn upsert_backend(&self, id: BackendId, addr: &L3n4Addr) -> LbMapResult<()>;

    /// Removes the backend record for `id`.
    fn delete_backend(&self, id: BackendId) -> LbMapResult<()>;

    /// Creates or fully replaces the service record for `id`.
    fn upsert_service_backends(&self, id: ServiceId, entry: &ServiceEntry) -> LbMapResult<()>;

    /// Removes the service record for `id`.
    fn delete_service(&self, id: ServiceId) -> LbMapResult<()>;

    /// Returns every backend record currently in the table.
    fn dump_backends(&self) -> LbMapResult<BTreeMap<BackendId, L3n4Addr>>;

    /// Returns every service record currently in the table.
    fn dump_services(&self) -> LbMapResult<BTreeMap<ServiceId, ServiceEntry>>;
}
