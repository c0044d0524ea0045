//! In-memory forwarding table.
//!
//! [`LbMockMap`] stores service and backend records in ordered maps and
//! exposes them for inspection. It behaves deterministically: an operation
//! only fails when a failure was injected with [`LbMockMap::fail_on`] or a
//! configured capacity is reached.

use crate::error::{LbMapError, LbMapOp, LbMapResult};
use crate::map::{LbMap, ServiceEntry};
use crate::types::{BackendId, ServiceId};
use lb_types::L3n4Addr;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct LbMockMap {
    services: RwLock<BTreeMap<ServiceId, ServiceEntry>>,
    backends: RwLock<BTreeMap<BackendId, L3n4Addr>>,
    failures: Mutex<HashMap<LbMapOp, LbMapError>>,
    max_services: Option<usize>,
    max_backends: Option<usize>,
}

impl LbMockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table that rejects new keys beyond the given sizes with
    /// [`LbMapError::TableFull`].
    pub fn with_capacity(max_services: usize, max_backends: usize) -> Self {
        Self {
            max_services: Some(max_services),
            max_backends: Some(max_backends),
            ..Self::default()
        }
    }

    /// Makes every subsequent `op` fail with `error` until cleared.
    pub fn fail_on(&self, op: LbMapOp, error: LbMapError) {
        self.failures.lock().insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Returns the backend list of every service record.
    pub fn service_backends_by_id(&self) -> BTreeMap<ServiceId, Vec<BackendId>> {
        self.services
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.backend_ids.clone()))
            .collect()
    }

    /// Returns the backend list of one service record.
    pub fn service_backends(&self, id: ServiceId) -> Option<Vec<BackendId>> {
        self.services.read().get(&id).map(|e| e.backend_ids.clone())
    }

    pub fn service_entry(&self, id: ServiceId) -> Option<ServiceEntry> {
        self.services.read().get(&id).cloned()
    }

    /// Returns the stored address of every backend record.
    pub fn backend_by_id(&self) -> BTreeMap<BackendId, L3n4Addr> {
        self.backends.read().clone()
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    pub fn backend_count(&self) -> usize {
        self.backends.read().len()
    }

    fn check_failure(&self, op: LbMapOp) -> LbMapResult<()> {
        match self.failures.lock().get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl LbMap for LbMockMap {
    fn upsert_backend(&self, id: BackendId, addr: &L3n4Addr) -> LbMapResult<()> {
        self.check_failure(LbMapOp::UpsertBackend)?;

        let mut backends = self.backends.write();
        if let Some(max) = self.max_backends {
            if !backends.contains_key(&id) && backends.len() >= max {
                return Err(LbMapError::table_full("backends"));
            }
        }
        backends.insert(id, *addr);
        Ok(())
    }

    fn delete_backend(&self, id: BackendId) -> LbMapResult<()> {
        self.check_failure(LbMapOp::DeleteBackend)?;

        self.backends
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LbMapError::not_found(format!("backend {}", id)))
    }

    fn upsert_service_backends(&self, id: ServiceId, entry: &ServiceEntry) -> LbMapResult<()> {
        self.check_failure(LbMapOp::UpsertService)?;

        let mut services = self.services.write();
        if let Some(max) = self.max_services {
            if !services.contains_key(&id) && services.len() >= max {
                return Err(LbMapError::table_full("services"));
            }
        }
        services.insert(id, entry.clone());
        Ok(())
    }

    fn delete_service(&self, id: ServiceId) -> LbMapResult<()> {
        self.check_failure(LbMapOp::DeleteService)?;

        self.services
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LbMapError::not_found(format!("service {}", id)))
    }

    fn dump_backends(&self) -> LbMapResult<BTreeMap<BackendId, L3n4Addr>> {
        self.check_failure(LbMapOp::Dump)?;
        Ok(self.backends.read().clone())
    }

    fn dump_services(&self) -> LbMapResult<BTreeMap<ServiceId, ServiceEntry>> {
        self.check_failure(LbMapOp::Dump)?;
        Ok(self.services.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lb_types::ServiceType;
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> L3n4Addr {
        s.parse().unwrap()
    }

    fn bid(raw: u16) -> BackendId {
        BackendId::from_raw(raw).unwrap()
    }

    fn sid(raw: u16) -> ServiceId {
        ServiceId::from_raw(raw).unwrap()
    }

    #[test]
    fn test_backend_upsert_and_delete() {
        let map = LbMockMap::new();
        map.upsert_backend(bid(1), &addr("10.0.0.1:8080/TCP")).unwrap();
        map.upsert_backend(bid(2), &addr("10.0.0.2:8080/TCP")).unwrap();
        assert_eq!(map.backend_count(), 2);

        map.delete_backend(bid(1)).unwrap();
        assert_eq!(map.backend_count(), 1);
        assert!(map.delete_backend(bid(1)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_service_upsert_replaces_list() {
        let map = LbMockMap::new();
        let frontend = addr("1.1.1.1:80/TCP");
        map.upsert_service_backends(
            sid(1),
            &ServiceEntry::new(frontend, ServiceType::NodePort, vec![bid(1), bid(2)]),
        )
        .unwrap();
        map.upsert_service_backends(
            sid(1),
            &ServiceEntry::new(frontend, ServiceType::NodePort, vec![]),
        )
        .unwrap();

        assert_eq!(map.service_backends(sid(1)), Some(vec![]));
        assert_eq!(map.service_count(), 1);
    }

    #[test]
    fn test_injected_failure() {
        let map = LbMockMap::new();
        map.fail_on(LbMapOp::UpsertBackend, LbMapError::Busy);

        let result = map.upsert_backend(bid(1), &addr("10.0.0.1:80/TCP"));
        assert_eq!(result, Err(LbMapError::Busy));
        assert_eq!(map.backend_count(), 0);

        map.clear_failures();
        assert!(map.upsert_backend(bid(1), &addr("10.0.0.1:80/TCP")).is_ok());
    }

    #[test]
    fn test_capacity_limit() {
        let map = LbMockMap::with_capacity(1, 1);
        map.upsert_backend(bid(1), &addr("10.0.0.1:80/TCP")).unwrap();

        // Overwriting an existing key does not need extra room.
        map.upsert_backend(bid(1), &addr("10.0.0.9:80/TCP")).unwrap();

        let err = map
            .upsert_backend(bid(2), &addr("10.0.0.2:80/TCP"))
            .unwrap_err();
        assert!(matches!(err, LbMapError::TableFull { .. }));
    }

    #[test]
    fn test_dump_reflects_contents() {
        let map = LbMockMap::new();
        map.upsert_backend(bid(3), &addr("10.0.0.3:80/UDP")).unwrap();

        let dump = map.dump_backends().unwrap();
        assert_eq!(dump.get(&bid(3)), Some(&addr("10.0.0.3:80/UDP")));

        map.fail_on(LbMapOp::Dump, LbMapError::internal("dump disabled"));
        assert!(map.dump_services().is_err());
    }
}
