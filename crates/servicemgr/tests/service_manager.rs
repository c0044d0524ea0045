//! Integration tests for the service manager against the in-memory
//! forwarding table.

use lb_map::{BackendId, LbMapError, LbMapOp, LbMockMap, ServiceId};
use lb_servicemgr::{apply_manifest, ServiceError, ServiceManager, ServiceManifest};
use lb_types::{L3n4Addr, ServiceType};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn addr(s: &str) -> L3n4Addr {
    s.parse().unwrap()
}

fn sid(raw: u16) -> ServiceId {
    ServiceId::from_raw(raw).unwrap()
}

fn setup() -> (Arc<LbMockMap>, ServiceManager) {
    let map = Arc::new(LbMockMap::new());
    let manager = ServiceManager::with_defaults(map.clone());
    (map, manager)
}

/// Every backend referenced by a service record must have a backend record,
/// and the registry must agree with the table.
fn assert_table_consistent(map: &LbMockMap, manager: &ServiceManager) {
    let backends = map.backend_by_id();
    for (svc, ids) in map.service_backends_by_id() {
        for id in ids {
            assert!(
                backends.contains_key(&id),
                "service {} references missing backend {}",
                svc,
                id
            );
        }
    }
    let drift = manager.check_consistency().unwrap();
    assert!(drift.is_empty(), "unexpected drift: {:?}", drift);
}

#[test]
fn test_service_lifecycle_scenario() {
    let (map, manager) = setup();
    let fe1 = addr("1.1.1.1:80/TCP");
    let fe2 = addr("1.1.1.2:80/TCP");
    let b1 = addr("10.0.0.1:8080/TCP");
    let b2 = addr("10.0.0.2:8080/TCP");

    let (created, id1) = manager
        .upsert_service(fe1, &[b1, b2], ServiceType::ClusterIP)
        .unwrap();
    assert!(created);
    assert_eq!(id1, sid(1));
    assert_eq!(map.backend_count(), 2);

    let (created, id) = manager
        .upsert_service(fe1, &[b1, b2], ServiceType::ClusterIP)
        .unwrap();
    assert!(!created);
    assert_eq!(id, id1);
    assert_eq!(map.backend_count(), 2);

    manager
        .upsert_service(fe1, &[b1], ServiceType::ClusterIP)
        .unwrap();
    assert_eq!(map.backend_count(), 1);
    assert_eq!(manager.backend_ref_count(&b2), None);
    assert_table_consistent(&map, &manager);

    let (created, id2) = manager
        .upsert_service(fe2, &[b1, b2], ServiceType::ClusterIP)
        .unwrap();
    assert!(created);
    assert_eq!(id2, sid(2));
    assert_eq!(map.backend_count(), 2);
    assert_eq!(manager.backend_ref_count(&b1), Some(2));

    assert!(manager.delete_service_by_id(id1).unwrap());
    assert_eq!(map.backend_count(), 2);
    assert_eq!(manager.backend_ref_count(&b1), Some(1));

    let (created, id) = manager
        .upsert_service(fe2, &[], ServiceType::ClusterIP)
        .unwrap();
    assert!(!created);
    assert_eq!(id, id2);
    assert_eq!(map.backend_count(), 0);
    assert_eq!(map.service_backends(id2), Some(vec![]));
    assert_table_consistent(&map, &manager);

    assert!(manager.delete_service_by_id(id2).unwrap());
    assert_eq!(manager.service_count(), 0);
    assert_eq!(manager.backend_count(), 0);
    assert_eq!(map.service_count(), 0);
    assert_eq!(map.backend_count(), 0);
}

#[test]
fn test_frontends_and_service_ids_are_unique() {
    let (map, manager) = setup();
    let mut ids = HashSet::new();

    for port in 1..=50u16 {
        let fe = addr(&format!("1.1.1.1:{}/TCP", port));
        let (created, id) = manager
            .upsert_service(fe, &[], ServiceType::ClusterIP)
            .unwrap();
        assert!(created);
        assert!(ids.insert(id));
    }
    for port in 1..=50u16 {
        let fe = addr(&format!("1.1.1.1:{}/TCP", port));
        let (created, _) = manager
            .upsert_service(fe, &[], ServiceType::ClusterIP)
            .unwrap();
        assert!(!created);
    }

    assert_eq!(manager.service_count(), 50);
    assert_eq!(map.service_count(), 50);
}

#[test]
fn test_reference_counts_track_services() {
    let (map, manager) = setup();
    let shared = addr("10.0.0.1:8080/TCP");

    for i in 1..=5u8 {
        let fe = addr(&format!("1.1.1.{}:80/TCP", i));
        manager
            .upsert_service(fe, &[shared], ServiceType::ClusterIP)
            .unwrap();
        assert_eq!(manager.backend_ref_count(&shared), Some(u32::from(i)));
    }
    assert_eq!(map.backend_count(), 1);

    for i in 1..=4u8 {
        let fe = addr(&format!("1.1.1.{}:80/TCP", i));
        assert!(manager.delete_service(&fe).unwrap());
        assert_eq!(manager.backend_ref_count(&shared), Some(u32::from(5 - i)));
        assert_eq!(map.backend_count(), 1);
    }

    assert!(manager.delete_service(&addr("1.1.1.5:80/TCP")).unwrap());
    assert_eq!(manager.backend_ref_count(&shared), None);
    assert_eq!(map.backend_count(), 0);
}

#[test]
fn test_released_ids_are_reused() {
    let (_map, manager) = setup();
    let (_, first) = manager
        .upsert_service(addr("1.1.1.1:80/TCP"), &[], ServiceType::ClusterIP)
        .unwrap();
    manager
        .upsert_service(addr("1.1.1.2:80/TCP"), &[], ServiceType::ClusterIP)
        .unwrap();

    assert!(manager.delete_service_by_id(first).unwrap());
    let (_, reused) = manager
        .upsert_service(addr("1.1.1.3:80/TCP"), &[], ServiceType::ClusterIP)
        .unwrap();
    assert_eq!(reused, first);
}

#[test]
fn test_delete_unknown_service() {
    let (_map, manager) = setup();
    assert!(!manager.delete_service_by_id(sid(42)).unwrap());
    assert!(!manager.delete_service(&addr("1.1.1.1:80/TCP")).unwrap());
    assert_eq!(manager.stats().services_deleted, 0);
}

#[test]
fn test_concurrent_upserts_and_deletes() {
    let map = Arc::new(LbMockMap::new());
    let manager = Arc::new(ServiceManager::with_defaults(map.clone()));
    let shared = addr("10.0.0.1:8080/TCP");

    thread::scope(|s| {
        for t in 0..8u8 {
            let manager = Arc::clone(&manager);
            s.spawn(move || {
                for round in 0..20u16 {
                    let fe = addr(&format!("1.1.{}.1:{}/TCP", t, 1000 + round));
                    let own = addr(&format!("10.1.{}.1:{}/TCP", t, 1000 + round));
                    manager
                        .upsert_service(fe, &[shared, own], ServiceType::ClusterIP)
                        .unwrap();
                    if round % 2 == 0 {
                        assert!(manager.delete_service(&fe).unwrap());
                    }
                }
            });
        }
    });

    // 8 threads keep 10 services each; one shared backend plus one per service.
    assert_eq!(manager.service_count(), 80);
    assert_eq!(manager.backend_count(), 81);
    assert_eq!(manager.backend_ref_count(&shared), Some(80));
    assert_table_consistent(&map, &manager);
}

#[test]
fn test_converges_after_transient_failures() {
    let (map, manager) = setup();
    let fe = addr("1.1.1.1:80/TCP");
    let b1 = addr("10.0.0.1:8080/TCP");
    let b2 = addr("10.0.0.2:8080/TCP");

    manager
        .upsert_service(fe, &[b1, b2], ServiceType::ClusterIP)
        .unwrap();

    map.fail_on(LbMapOp::DeleteBackend, LbMapError::Busy);
    let err = manager
        .upsert_service(fe, &[b1], ServiceType::ClusterIP)
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, ServiceError::BackendSyncFailed { .. }));
    // The service record no longer lists the stale backend.
    assert_eq!(manager.get_service(&fe).unwrap().backend_addrs(), vec![b1]);

    map.clear_failures();
    manager
        .upsert_service(fe, &[b1], ServiceType::ClusterIP)
        .unwrap();
    assert_eq!(map.backend_count(), 1);
    assert_table_consistent(&map, &manager);
}

#[test]
fn test_restart_restores_and_reapplies_manifest() {
    let map = Arc::new(LbMockMap::new());
    let manifest = ServiceManifest::from_json(
        r#"{
            "services": [
                {"frontend": "1.1.1.1:80/TCP", "backends": ["10.0.0.1:8080/TCP"]},
                {"frontend": "1.1.1.2:443/TCP", "type": "LoadBalancer",
                 "backends": ["10.0.0.1:8080/TCP", "10.0.0.2:8443/TCP"]}
            ]
        }"#,
    )
    .unwrap();

    let before = ServiceManager::with_defaults(map.clone());
    assert!(apply_manifest(&before, &manifest).is_success());
    let services = before.get_services();
    drop(before);

    let after = ServiceManager::with_defaults(map.clone());
    let summary = after.restore_services().unwrap();
    assert_eq!(summary.services_restored, 2);
    assert_eq!(summary.backends_restored, 2);
    assert_eq!(after.get_services(), services);

    let report = apply_manifest(&after, &manifest);
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 2);

    // Fresh backends don't collide with restored IDs.
    after
        .upsert_service(
            addr("1.1.1.3:80/TCP"),
            &[addr("10.0.0.3:80/TCP")],
            ServiceType::ClusterIP,
        )
        .unwrap();
    let ids: HashSet<BackendId> = after.get_backends().iter().map(|b| b.id).collect();
    assert_eq!(ids.len(), 3);
    assert_table_consistent(&map, &after);
}
