//! Registry entities and read-only views of them.

use lb_common::HasRefCount;
use lb_map::{BackendId, ServiceId};
use lb_types::{L3n4Addr, ServiceType};
use serde::Serialize;
use std::collections::BTreeMap;

/// A live service in the registry.
#[derive(Debug, Clone)]
pub(crate) struct Service {
    pub id: ServiceId,
    pub frontend: L3n4Addr,
    pub service_type: ServiceType,
    /// Attached backends keyed by address.
    pub backends: BTreeMap<L3n4Addr, BackendId>,
    /// Backend list of the last successful service record write.
    pub table_backends: Vec<BackendId>,
}

impl Service {
    pub fn new(id: ServiceId, frontend: L3n4Addr, service_type: ServiceType) -> Self {
        Self {
            id,
            frontend,
            service_type,
            backends: BTreeMap::new(),
            table_backends: Vec::new(),
        }
    }

    /// Backend IDs in the order they are written to the table.
    pub fn backend_ids(&self) -> Vec<BackendId> {
        let mut ids: Vec<BackendId> = self.backends.values().copied().collect();
        ids.sort();
        ids
    }
}

/// A backend shared by every service that lists its address.
#[derive(Debug, Clone)]
pub(crate) struct BackendEntry {
    pub id: BackendId,
    pub addr: L3n4Addr,
    ref_count: u32,
}

impl BackendEntry {
    pub fn new(id: BackendId, addr: L3n4Addr) -> Self {
        Self {
            id,
            addr,
            ref_count: 0,
        }
    }
}

impl HasRefCount for BackendEntry {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Snapshot of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub id: BackendId,
    pub addr: L3n4Addr,
    pub ref_count: u32,
}

/// Snapshot of a service and its backends, ordered by backend ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub frontend: L3n4Addr,
    pub service_type: ServiceType,
    pub backends: Vec<BackendInfo>,
}

impl ServiceInfo {
    pub fn backend_addrs(&self) -> Vec<L3n4Addr> {
        self.backends.iter().map(|b| b.addr).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceManagerStats {
    pub services_created: u64,
    pub services_updated: u64,
    pub services_deleted: u64,
    pub backends_created: u64,
    pub backends_deleted: u64,
}

/// Result of rebuilding the registry from the forwarding table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub services_restored: usize,
    pub backends_restored: usize,
    /// Backend references in service records with no matching backend record.
    pub dangling_backend_refs: usize,
    /// Backend records no service referenced, deleted from the table.
    pub stale_backends_deleted: usize,
    /// Service records skipped because their frontend was already restored.
    pub duplicate_services: usize,
}

/// Differences between the registry and the forwarding table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableDrift {
    /// In the registry, absent from the table.
    pub missing_services: Vec<ServiceId>,
    /// In the table, unknown to the registry.
    pub stale_services: Vec<ServiceId>,
    /// Present in both with a different frontend, type or backend list.
    pub mismatched_services: Vec<ServiceId>,
    pub missing_backends: Vec<BackendId>,
    /// Present in both with a different address.
    pub mismatched_backends: Vec<BackendId>,
    pub stale_backends: Vec<BackendId>,
}

impl TableDrift {
    pub fn is_empty(&self) -> bool {
        self.missing_services.is_empty()
            && self.stale_services.is_empty()
            && self.mismatched_services.is_empty()
            && self.missing_backends.is_empty()
            && self.mismatched_backends.is_empty()
            && self.stale_backends.is_empty()
    }
}
