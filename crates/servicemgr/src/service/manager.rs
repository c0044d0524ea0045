//! Service and backend lifecycle management.

use super::error::{ServiceError, ServiceResult};
use super::types::{
    BackendEntry, BackendInfo, RestoreSummary, Service, ServiceInfo, ServiceManagerStats,
    TableDrift,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::IdLimits;
use lb_common::{HasRefCount, IdAllocator, SyncMap};
use lb_map::{BackendId, BackendKind, LbMap, LbMapError, ServiceEntry, ServiceId, ServiceKind};
use lb_types::{L3n4Addr, ServiceType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const SOURCE: &str = "ServiceManager";

/// Backends removed from the table by one collection pass.
#[derive(Debug, Default)]
struct Collected {
    deleted: usize,
    failed: Vec<(BackendId, LbMapError)>,
}

/// Everything guarded by the manager lock.
struct Registry {
    services: BTreeMap<ServiceId, Service>,
    by_frontend: HashMap<L3n4Addr, ServiceId>,
    backends: SyncMap<BackendId, BackendEntry>,
    by_addr: HashMap<L3n4Addr, BackendId>,
    service_ids: IdAllocator<ServiceKind>,
    backend_ids: IdAllocator<BackendKind>,
    stats: ServiceManagerStats,
}

impl Registry {
    fn new(limits: IdLimits) -> Self {
        Self {
            services: BTreeMap::new(),
            by_frontend: HashMap::new(),
            backends: SyncMap::new(),
            by_addr: HashMap::new(),
            service_ids: IdAllocator::new(limits.max_service_id),
            backend_ids: IdAllocator::new(limits.max_backend_id),
            stats: ServiceManagerStats::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.services.is_empty() && self.backends.is_empty()
    }

    /// Drops all entities and restarts both ID spaces.
    fn clear(&mut self) {
        self.services.clear();
        self.by_frontend.clear();
        self.backends.clear();
        self.by_addr.clear();
        self.service_ids.reset();
        self.backend_ids.reset();
    }

    fn backend_info(&self, id: &BackendId) -> Option<BackendInfo> {
        self.backends.get(id).map(|entry| BackendInfo {
            id: entry.id,
            addr: entry.addr,
            ref_count: entry.ref_count(),
        })
    }

    fn service_info(&self, svc: &Service) -> ServiceInfo {
        let backends = svc
            .backend_ids()
            .iter()
            .filter_map(|id| self.backend_info(id))
            .collect();
        ServiceInfo {
            id: svc.id,
            frontend: svc.frontend,
            service_type: svc.service_type,
            backends,
        }
    }

    /// Takes a reference on the backend for `addr`, creating it in the
    /// table first if no service uses that address yet.
    fn acquire_backend(&mut self, lbmap: &dyn LbMap, addr: &L3n4Addr) -> ServiceResult<BackendId> {
        if let Some(&id) = self.by_addr.get(addr) {
            self.backends.increment_ref(&id)?;
            return Ok(id);
        }

        let id = match self.backend_ids.allocate() {
            Ok(id) => id,
            Err(e) => {
                let err = ServiceError::from(e);
                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create_backend")
                        .with_object_type("backend")
                        .with_error(err.to_string())
                        .with_details(serde_json::json!({ "backend": addr.to_string() }))
                );
                return Err(err);
            }
        };

        if let Err(source) = lbmap.upsert_backend(id, addr) {
            // Nothing references the fresh ID yet.
            self.backend_ids.release(id);
            let err = ServiceError::BackendSyncFailed { id, source };
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create_backend")
                    .with_object_id(id.to_string())
                    .with_object_type("backend")
                    .with_error(err.to_string())
                    .with_details(serde_json::json!({ "backend": addr.to_string() }))
            );
            return Err(err);
        }

        self.backends.insert(id, BackendEntry::new(id, *addr));
        self.backends.increment_ref(&id)?;
        self.by_addr.insert(*addr, id);
        self.stats.backends_created += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create_backend")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(id.to_string())
                .with_object_type("backend")
                .with_details(serde_json::json!({ "backend": addr.to_string() }))
        );

        Ok(id)
    }

    /// Applies the backend diff to `svc` and writes its record.
    ///
    /// Returns the IDs detached from the service. On error the service keeps
    /// whatever was attached or detached before the failing step.
    fn sync_service(
        &mut self,
        lbmap: &dyn LbMap,
        svc: &mut Service,
        desired: &BTreeSet<L3n4Addr>,
    ) -> ServiceResult<Vec<BackendId>> {
        let to_add: Vec<L3n4Addr> = desired
            .iter()
            .filter(|addr| !svc.backends.contains_key(*addr))
            .copied()
            .collect();
        let to_remove: Vec<L3n4Addr> = svc
            .backends
            .keys()
            .filter(|addr| !desired.contains(*addr))
            .copied()
            .collect();

        for addr in to_add {
            let backend_id = self.acquire_backend(lbmap, &addr)?;
            svc.backends.insert(addr, backend_id);
            debug!(service_id = %svc.id, backend_id = %backend_id, backend = %addr, "Attached backend");
        }

        let mut detached = Vec::with_capacity(to_remove.len());
        for addr in to_remove {
            if let Some(backend_id) = svc.backends.remove(&addr) {
                self.backends.decrement_ref(&backend_id)?;
                detached.push(backend_id);
                debug!(service_id = %svc.id, backend_id = %backend_id, backend = %addr, "Detached backend");
            }
        }

        write_service(lbmap, svc)?;
        Ok(detached)
    }

    /// Deletes every backend that has no references and that no service
    /// record in the table still lists.
    fn collect_unreferenced(&mut self, lbmap: &dyn LbMap) -> Collected {
        let listed: HashSet<BackendId> = self
            .services
            .values()
            .flat_map(|svc| svc.table_backends.iter().copied())
            .collect();
        let mut candidates: Vec<BackendId> = self
            .backends
            .unreferenced_keys()
            .filter(|id| !listed.contains(*id))
            .copied()
            .collect();
        candidates.sort();

        let mut collected = Collected::default();
        for id in candidates {
            match lbmap.delete_backend(id) {
                Err(source) if !source.is_not_found() => {
                    audit_log!(
                        AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "delete_backend")
                            .with_object_id(id.to_string())
                            .with_object_type("backend")
                            .with_error(source.to_string())
                    );
                    collected.failed.push((id, source));
                }
                _ => {
                    let addr = self.backends.remove(&id).map(|entry| entry.addr);
                    if let Some(addr) = addr {
                        self.by_addr.remove(&addr);
                    }
                    self.backend_ids.release(id);
                    self.stats.backends_deleted += 1;
                    collected.deleted += 1;

                    audit_log!(
                        AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "delete_backend")
                            .with_outcome(AuditOutcome::Success)
                            .with_object_id(id.to_string())
                            .with_object_type("backend")
                            .with_details(serde_json::json!({
                                "backend": addr.map(|a| a.to_string()),
                            }))
                    );
                }
            }
        }
        collected
    }
}

/// Writes the service record with the current backend list.
fn write_service(lbmap: &dyn LbMap, svc: &mut Service) -> ServiceResult<()> {
    let entry = ServiceEntry::new(svc.frontend, svc.service_type, svc.backend_ids());
    match lbmap.upsert_service_backends(svc.id, &entry) {
        Ok(()) => {
            svc.table_backends = entry.backend_ids;
            Ok(())
        }
        Err(source) => {
            let err = ServiceError::ServiceSyncFailed { id: svc.id, source };
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceModify, SOURCE, "write_service")
                    .with_object_id(svc.id.to_string())
                    .with_object_type("service")
                    .with_error(err.to_string())
                    .with_details(serde_json::json!({
                        "frontend": svc.frontend.to_string(),
                        "backend_count": entry.backend_ids.len(),
                    }))
            );
            Err(err)
        }
    }
}

/// Surfaces the first failed deletion among `detached`. Failures for
/// backends orphaned by earlier operations were already logged.
fn check_detached(collected: Collected, detached: &[BackendId]) -> ServiceResult<()> {
    match collected
        .failed
        .into_iter()
        .find(|(id, _)| detached.contains(id))
    {
        Some((id, source)) => Err(ServiceError::BackendSyncFailed { id, source }),
        None => Ok(()),
    }
}

/// The service manager.
///
/// Owns the registry of services and shared backends, hands out service and
/// backend IDs, and mirrors every change into the forwarding table. All
/// public operations run under one lock covering the registry and both ID
/// allocators.
///
/// Table writes are not transactional. A failed operation may leave part of
/// its changes applied; repeating it with the same desired state converges.
pub struct ServiceManager {
    lbmap: Arc<dyn LbMap>,
    registry: Mutex<Registry>,
}

impl ServiceManager {
    pub fn new(lbmap: Arc<dyn LbMap>, limits: IdLimits) -> Self {
        Self {
            lbmap,
            registry: Mutex::new(Registry::new(limits)),
        }
    }

    /// Creates a manager using the full 16-bit ID spaces.
    pub fn with_defaults(lbmap: Arc<dyn LbMap>) -> Self {
        Self::new(lbmap, IdLimits::default())
    }

    /// Creates or updates the service for `frontend` so that it lists
    /// exactly `backends`.
    ///
    /// Duplicate addresses in `backends` are ignored. An empty list drains
    /// the service but keeps it (and its table record) alive.
    ///
    /// Returns whether the service was newly created, and its ID.
    pub fn upsert_service(
        &self,
        frontend: L3n4Addr,
        backends: &[L3n4Addr],
        service_type: ServiceType,
    ) -> ServiceResult<(bool, ServiceId)> {
        if frontend.is_zero() {
            let err = ServiceError::InvalidFrontend(frontend);
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "upsert_service")
                    .with_object_type("service")
                    .with_error(err.to_string())
            );
            return Err(err);
        }

        let desired: BTreeSet<L3n4Addr> = backends.iter().copied().collect();
        let lbmap = self.lbmap.as_ref();
        let mut guard = self.registry.lock();
        let reg = &mut *guard;

        let existing = reg.by_frontend.get(&frontend).copied();
        let current = existing.and_then(|id| reg.services.remove(&id));
        let (mut svc, created) = match current {
            Some(svc) => (svc, false),
            None => {
                let id = match reg.service_ids.allocate() {
                    Ok(id) => id,
                    Err(e) => {
                        let err = ServiceError::from(e);
                        audit_log!(
                            AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "upsert_service")
                                .with_object_type("service")
                                .with_error(err.to_string())
                                .with_details(serde_json::json!({
                                    "frontend": frontend.to_string(),
                                }))
                        );
                        return Err(err);
                    }
                };
                reg.by_frontend.insert(frontend, id);
                reg.stats.services_created += 1;
                (Service::new(id, frontend, service_type), true)
            }
        };
        svc.service_type = service_type;

        let result = reg.sync_service(lbmap, &mut svc, &desired);
        let id = svc.id;
        let backend_count = svc.backends.len();
        reg.services.insert(id, svc);
        let detached = result?;

        if !created {
            reg.stats.services_updated += 1;
        }
        let category = if created {
            AuditCategory::ResourceCreate
        } else {
            AuditCategory::ResourceModify
        };
        let details = serde_json::json!({
            "frontend": frontend.to_string(),
            "type": service_type.to_string(),
            "backend_count": backend_count,
            "detached": detached.len(),
        });

        let collected = reg.collect_unreferenced(lbmap);
        if let Err(err) = check_detached(collected, &detached) {
            audit_log!(
                AuditRecord::new(category, SOURCE, "upsert_service")
                    .with_object_id(id.to_string())
                    .with_object_type("service")
                    .with_error(err.to_string())
                    .with_details(details)
            );
            return Err(err);
        }

        audit_log!(
            AuditRecord::new(category, SOURCE, "upsert_service")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(id.to_string())
                .with_object_type("service")
                .with_details(details)
        );
        Ok((created, id))
    }

    /// Deletes the service with the given ID.
    ///
    /// Returns `Ok(false)` if no such service exists.
    pub fn delete_service_by_id(&self, id: ServiceId) -> ServiceResult<bool> {
        let mut reg = self.registry.lock();
        self.delete_locked(&mut reg, id)
    }

    /// Deletes the service for `frontend`, with the same semantics as
    /// [`delete_service_by_id`](Self::delete_service_by_id).
    pub fn delete_service(&self, frontend: &L3n4Addr) -> ServiceResult<bool> {
        let mut reg = self.registry.lock();
        let id = reg.by_frontend.get(frontend).copied();
        match id {
            Some(id) => self.delete_locked(&mut reg, id),
            None => Ok(false),
        }
    }

    fn delete_locked(&self, reg: &mut Registry, id: ServiceId) -> ServiceResult<bool> {
        if !reg.services.contains_key(&id) {
            return Ok(false);
        }

        let lbmap = self.lbmap.as_ref();
        // Service record first; its backends are collected afterwards.
        if let Err(source) = lbmap.delete_service(id) {
            if !source.is_not_found() {
                let err = ServiceError::ServiceSyncFailed { id, source };
                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "delete_service")
                        .with_object_id(id.to_string())
                        .with_object_type("service")
                        .with_error(err.to_string())
                );
                return Err(err);
            }
        }

        let svc = match reg.services.remove(&id) {
            Some(svc) => svc,
            None => return Ok(false),
        };
        reg.by_frontend.remove(&svc.frontend);
        reg.service_ids.release(id);

        let detached: Vec<BackendId> = svc.backends.values().copied().collect();
        for backend_id in &detached {
            reg.backends.decrement_ref(backend_id)?;
        }
        reg.stats.services_deleted += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "delete_service")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(id.to_string())
                .with_object_type("service")
                .with_details(serde_json::json!({
                    "frontend": svc.frontend.to_string(),
                    "backend_count": detached.len(),
                }))
        );

        let collected = reg.collect_unreferenced(lbmap);
        check_detached(collected, &detached)?;

        Ok(true)
    }

    pub fn get_service_by_id(&self, id: ServiceId) -> Option<ServiceInfo> {
        let reg = self.registry.lock();
        reg.services.get(&id).map(|svc| reg.service_info(svc))
    }

    pub fn get_service(&self, frontend: &L3n4Addr) -> Option<ServiceInfo> {
        let reg = self.registry.lock();
        reg.by_frontend
            .get(frontend)
            .and_then(|id| reg.services.get(id))
            .map(|svc| reg.service_info(svc))
    }

    /// Returns all services ordered by ID.
    pub fn get_services(&self) -> Vec<ServiceInfo> {
        let reg = self.registry.lock();
        reg.services.values().map(|svc| reg.service_info(svc)).collect()
    }

    /// Returns all backends ordered by ID, including any whose table
    /// deletion is still pending.
    pub fn get_backends(&self) -> Vec<BackendInfo> {
        let reg = self.registry.lock();
        let mut backends: Vec<BackendInfo> = reg
            .backends
            .keys()
            .filter_map(|id| reg.backend_info(id))
            .collect();
        backends.sort_by_key(|b| b.id);
        backends
    }

    /// Number of services listing the backend at `addr`.
    pub fn backend_ref_count(&self, addr: &L3n4Addr) -> Option<u32> {
        let reg = self.registry.lock();
        reg.by_addr
            .get(addr)
            .and_then(|id| reg.backends.ref_count(id))
    }

    pub fn service_count(&self) -> usize {
        self.registry.lock().services.len()
    }

    pub fn backend_count(&self) -> usize {
        self.registry.lock().backends.len()
    }

    pub fn stats(&self) -> ServiceManagerStats {
        self.registry.lock().stats.clone()
    }

    /// Rebuilds the registry and both allocators from the forwarding table.
    ///
    /// Must be called before any other mutation. References to backend
    /// records that do not exist are dropped. A backend record repeating an
    /// already restored address is replaced by the lower ID in every service
    /// listing it. Service records whose backend list changed are rewritten.
    /// Backend records no service lists are deleted. Service records
    /// repeating an already restored frontend are deleted.
    pub fn restore_services(&self) -> ServiceResult<RestoreSummary> {
        let mut guard = self.registry.lock();
        let reg = &mut *guard;

        if !reg.is_empty() {
            return Err(ServiceError::RestoreFailed(
                "registry is not empty".to_string(),
            ));
        }

        match self.restore_locked(reg) {
            Ok(summary) => {
                audit_log!(
                    AuditRecord::new(AuditCategory::Restore, SOURCE, "restore_services")
                        .with_outcome(AuditOutcome::Success)
                        .with_details(serde_json::json!({
                            "services": summary.services_restored,
                            "backends": summary.backends_restored,
                            "dangling_backend_refs": summary.dangling_backend_refs,
                            "stale_backends_deleted": summary.stale_backends_deleted,
                            "duplicate_services": summary.duplicate_services,
                        }))
                );
                Ok(summary)
            }
            Err(err) => {
                reg.clear();
                audit_log!(
                    AuditRecord::new(AuditCategory::Restore, SOURCE, "restore_services")
                        .with_error(err.to_string())
                );
                Err(err)
            }
        }
    }

    fn restore_locked(&self, reg: &mut Registry) -> ServiceResult<RestoreSummary> {
        let lbmap = self.lbmap.as_ref();
        let table_backends = lbmap
            .dump_backends()
            .map_err(ServiceError::TableReadFailed)?;
        let table_services = lbmap
            .dump_services()
            .map_err(ServiceError::TableReadFailed)?;

        reg.clear();
        let mut summary = RestoreSummary::default();

        // Duplicate backend ID -> ID restored for the same address.
        let mut duplicate_backends: HashMap<BackendId, BackendId> = HashMap::new();
        for (id, addr) in table_backends {
            if let Some(canonical) = reg.by_addr.get(&addr).copied() {
                warn!(backend_id = %id, canonical_id = %canonical, backend = %addr, "Backend address already restored under another ID");
                duplicate_backends.insert(id, canonical);
                continue;
            }
            reg.backend_ids.acquire(id)?;
            reg.backends.insert(id, BackendEntry::new(id, addr));
            reg.by_addr.insert(addr, id);
        }

        for (id, entry) in table_services {
            if reg.by_frontend.contains_key(&entry.frontend) {
                warn!(service_id = %id, frontend = %entry.frontend, "Frontend already restored under another ID, deleting record");
                if let Err(source) = lbmap.delete_service(id) {
                    if !source.is_not_found() {
                        return Err(ServiceError::ServiceSyncFailed { id, source });
                    }
                }
                summary.duplicate_services += 1;
                continue;
            }

            reg.service_ids.acquire(id)?;
            let mut svc = Service::new(id, entry.frontend, entry.service_type);
            svc.table_backends = entry.backend_ids.clone();

            for listed in &entry.backend_ids {
                let backend_id = duplicate_backends.get(listed).copied().unwrap_or(*listed);
                let addr = match reg.backends.get(&backend_id) {
                    Some(backend) => backend.addr,
                    None => {
                        warn!(service_id = %id, backend_id = %listed, "Service lists a backend missing from the table");
                        summary.dangling_backend_refs += 1;
                        continue;
                    }
                };
                if svc.backends.insert(addr, backend_id).is_none() {
                    reg.backends.increment_ref(&backend_id)?;
                }
            }

            // Dropped, remapped or repeated IDs leave the record out of date.
            let mut stored = entry.backend_ids.clone();
            stored.sort();
            if stored != svc.backend_ids() {
                if let Err(e) = write_service(lbmap, &mut svc) {
                    warn!(service_id = %id, error = %e, "Failed to rewrite restored service");
                }
            }

            reg.by_frontend.insert(svc.frontend, id);
            reg.services.insert(id, svc);
        }

        let listed: HashSet<BackendId> = reg
            .services
            .values()
            .flat_map(|svc| svc.table_backends.iter().copied())
            .collect();
        let mut duplicates: Vec<BackendId> = duplicate_backends.into_keys().collect();
        duplicates.sort();
        for id in duplicates {
            if listed.contains(&id) {
                continue;
            }
            match lbmap.delete_backend(id) {
                Err(source) if !source.is_not_found() => {
                    warn!(backend_id = %id, error = %source, "Failed to delete duplicate backend");
                }
                _ => summary.stale_backends_deleted += 1,
            }
        }

        let collected = reg.collect_unreferenced(lbmap);
        summary.stale_backends_deleted += collected.deleted;
        summary.services_restored = reg.services.len();
        summary.backends_restored = reg.backends.len();

        Ok(summary)
    }

    /// Compares the registry with the forwarding table's contents.
    ///
    /// Reports differences only; nothing is repaired.
    pub fn check_consistency(&self) -> ServiceResult<TableDrift> {
        let reg = self.registry.lock();
        let table_backends = self
            .lbmap
            .dump_backends()
            .map_err(ServiceError::TableReadFailed)?;
        let table_services = self
            .lbmap
            .dump_services()
            .map_err(ServiceError::TableReadFailed)?;

        let mut drift = TableDrift::default();

        for (id, svc) in &reg.services {
            match table_services.get(id) {
                None => drift.missing_services.push(*id),
                Some(entry) => {
                    let mut stored = entry.backend_ids.clone();
                    stored.sort();
                    if entry.frontend != svc.frontend
                        || entry.service_type != svc.service_type
                        || stored != svc.backend_ids()
                    {
                        drift.mismatched_services.push(*id);
                    }
                }
            }
        }
        drift.stale_services = table_services
            .keys()
            .filter(|id| !reg.services.contains_key(*id))
            .copied()
            .collect();

        for (id, entry) in reg.backends.iter() {
            match table_backends.get(id) {
                None => drift.missing_backends.push(*id),
                Some(addr) if *addr != entry.addr => drift.mismatched_backends.push(*id),
                Some(_) => {}
            }
        }
        drift.missing_backends.sort();
        drift.mismatched_backends.sort();
        drift.stale_backends = table_backends
            .keys()
            .filter(|id| !reg.backends.contains_key(*id))
            .copied()
            .collect();

        if !drift.is_empty() {
            audit_log!(
                AuditRecord::new(AuditCategory::Consistency, SOURCE, "check_consistency")
                    .with_error("registry and forwarding table differ")
                    .with_details(serde_json::json!({
                        "missing_services": drift.missing_services.len(),
                        "stale_services": drift.stale_services.len(),
                        "mismatched_services": drift.mismatched_services.len(),
                        "missing_backends": drift.missing_backends.len(),
                        "mismatched_backends": drift.mismatched_backends.len(),
                        "stale_backends": drift.stale_backends.len(),
                    }))
            );
        }

        Ok(drift)
    }
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.registry.lock();
        f.debug_struct("ServiceManager")
            .field("services", &reg.services.len())
            .field("backends", &reg.backends.len())
            .field("service_ids", &reg.service_ids)
            .field("backend_ids", &reg.backend_ids)
            .finish()
    }
}
