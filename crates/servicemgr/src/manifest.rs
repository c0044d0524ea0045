//! Desired-state manifest.
//!
//! A manifest lists every service the daemon should program:
//!
//! ```json
//! {
//!   "services": [
//!     {
//!       "frontend": "1.1.1.1:80/TCP",
//!       "type": "NodePort",
//!       "backends": ["10.0.0.1:8080/TCP", "10.0.0.2:8080/TCP"]
//!     }
//!   ]
//! }
//! ```
//!
//! [`apply_manifest`] converges the service manager onto the manifest:
//! listed services are upserted and every other service is deleted.

use crate::service::{ServiceError, ServiceManager};
use lb_types::{L3n4Addr, ServiceType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Frontend {0} listed more than once")]
    DuplicateFrontend(L3n4Addr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestService {
    pub frontend: L3n4Addr,

    #[serde(rename = "type", default)]
    pub service_type: ServiceType,

    #[serde(default)]
    pub backends: Vec<L3n4Addr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManifest {
    #[serde(default)]
    pub services: Vec<ManifestService>,
}

impl ServiceManifest {
    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Rejects manifests that name the same frontend twice.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for svc in &self.services {
            if !seen.insert(svc.frontend) {
                return Err(ManifestError::DuplicateFrontend(svc.frontend));
            }
        }
        Ok(())
    }
}

/// Outcome of one [`apply_manifest`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Frontends whose upsert or delete failed, with the error text.
    pub failed: Vec<(L3n4Addr, String)>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Upserts every manifest entry and deletes services the manifest does not
/// list. Failures are collected and the pass continues; applying the same
/// manifest again retries them.
pub fn apply_manifest(manager: &ServiceManager, manifest: &ServiceManifest) -> ApplyReport {
    let mut report = ApplyReport::default();
    let mut wanted = HashSet::with_capacity(manifest.services.len());

    for svc in &manifest.services {
        wanted.insert(svc.frontend);
        match manager.upsert_service(svc.frontend, &svc.backends, svc.service_type) {
            Ok((true, _)) => report.created += 1,
            Ok((false, _)) => report.updated += 1,
            Err(e) => record_failure(&mut report, svc.frontend, &e),
        }
    }

    for existing in manager.get_services() {
        if wanted.contains(&existing.frontend) {
            continue;
        }
        match manager.delete_service_by_id(existing.id) {
            Ok(true) => report.deleted += 1,
            Ok(false) => {}
            Err(e) => record_failure(&mut report, existing.frontend, &e),
        }
    }

    info!(
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        failed = report.failed.len(),
        "Applied service manifest"
    );
    report
}

fn record_failure(report: &mut ApplyReport, frontend: L3n4Addr, err: &ServiceError) {
    warn!(frontend = %frontend, error = %err, retryable = err.is_retryable(), "Failed to apply service");
    report.failed.push((frontend, err.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lb_map::{LbMapError, LbMapOp, LbMockMap};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn addr(s: &str) -> L3n4Addr {
        s.parse().unwrap()
    }

    const MANIFEST: &str = r#"{
        "services": [
            {
                "frontend": "1.1.1.1:80/TCP",
                "type": "NodePort",
                "backends": ["10.0.0.1:8080/TCP", "10.0.0.2:8080/TCP"]
            },
            {
                "frontend": "[2001:db8::1]:53/UDP",
                "backends": ["[2001:db8::10]:53/UDP"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ServiceManifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.services.len(), 2);
        assert_eq!(manifest.services[0].service_type, ServiceType::NodePort);
        assert_eq!(manifest.services[1].service_type, ServiceType::ClusterIP);
        assert_eq!(
            manifest.services[1].backends,
            vec![addr("[2001:db8::10]:53/UDP")]
        );
    }

    #[test]
    fn test_parse_rejects_bad_address() {
        let err = ServiceManifest::from_json(r#"{"services":[{"frontend":"1.1.1.1/TCP"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_duplicate_frontend() {
        let err = ServiceManifest::from_json(
            r#"{"services":[{"frontend":"1.1.1.1:80/TCP"},{"frontend":"1.1.1.1:80/TCP"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateFrontend(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        fs::write(&path, MANIFEST).unwrap();

        let manifest = ServiceManifest::load(&path).unwrap();
        assert_eq!(manifest.services.len(), 2);

        let missing = ServiceManifest::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, ManifestError::Io { .. }));
    }

    #[test]
    fn test_apply_creates_updates_and_deletes() {
        let map = Arc::new(LbMockMap::new());
        let manager = ServiceManager::with_defaults(map.clone());
        manager
            .upsert_service(addr("9.9.9.9:80/TCP"), &[addr("10.9.9.9:80/TCP")], ServiceType::ClusterIP)
            .unwrap();

        let manifest = ServiceManifest::from_json(MANIFEST).unwrap();
        let report = apply_manifest(&manager, &manifest);
        assert_eq!(
            report,
            ApplyReport {
                created: 2,
                updated: 0,
                deleted: 1,
                failed: vec![],
            }
        );
        assert_eq!(map.service_count(), 2);
        assert_eq!(map.backend_count(), 3);

        let again = apply_manifest(&manager, &manifest);
        assert_eq!(again.updated, 2);
        assert_eq!(again.created, 0);
        assert_eq!(again.deleted, 0);
    }

    #[test]
    fn test_apply_collects_failures_and_continues() {
        let map = Arc::new(LbMockMap::new());
        let manager = ServiceManager::with_defaults(map.clone());
        map.fail_on(LbMapOp::UpsertBackend, LbMapError::table_full("backends"));

        let manifest = ServiceManifest {
            services: vec![
                ManifestService {
                    frontend: addr("1.1.1.1:80/TCP"),
                    service_type: ServiceType::ClusterIP,
                    backends: vec![addr("10.0.0.1:80/TCP")],
                },
                ManifestService {
                    frontend: addr("1.1.1.2:80/TCP"),
                    service_type: ServiceType::ClusterIP,
                    backends: vec![],
                },
            ],
        };

        let report = apply_manifest(&manager, &manifest);
        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, addr("1.1.1.1:80/TCP"));
        assert_eq!(report.created, 1);

        map.clear_failures();
        let retry = apply_manifest(&manager, &manifest);
        assert!(retry.is_success());
        assert_eq!(map.backend_count(), 1);
    }
}
