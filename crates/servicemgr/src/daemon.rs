//! ServiceDaemon: drives the service manager from a manifest file.
//!
//! The daemon restores state from the forwarding table at startup, then
//! runs reconcile passes. Each pass reloads the manifest, applies it and
//! checks the table for drift. Passes repeat on a fixed interval until
//! Ctrl-C, or run once when no interval is configured.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::manifest::{apply_manifest, ApplyReport, ServiceManifest};
use crate::service::{RestoreSummary, ServiceManager, ServiceResult, TableDrift};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const SOURCE: &str = "ServiceDaemon";

/// Result of one reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// `None` when no manifest is configured or it failed to load.
    pub apply: Option<ApplyReport>,
    /// `None` when the forwarding table could not be read.
    pub drift: Option<TableDrift>,
    pub manifest_error: Option<String>,
}

impl PassReport {
    /// True if the manifest applied cleanly and the table matches the registry.
    pub fn is_healthy(&self) -> bool {
        self.manifest_error.is_none()
            && self.apply.as_ref().map_or(true, ApplyReport::is_success)
            && self.drift.as_ref().map_or(false, TableDrift::is_empty)
    }
}

pub struct ServiceDaemon {
    manager: Arc<ServiceManager>,
    manifest_path: Option<PathBuf>,
}

impl ServiceDaemon {
    pub fn new(manager: Arc<ServiceManager>, manifest_path: Option<PathBuf>) -> Self {
        Self {
            manager,
            manifest_path,
        }
    }

    pub fn manager(&self) -> &Arc<ServiceManager> {
        &self.manager
    }

    /// Rebuilds state from the forwarding table.
    pub fn restore(&self) -> ServiceResult<RestoreSummary> {
        let summary = self.manager.restore_services()?;
        info!(
            services = summary.services_restored,
            backends = summary.backends_restored,
            dangling = summary.dangling_backend_refs,
            stale = summary.stale_backends_deleted,
            "Restored state from forwarding table"
        );
        Ok(summary)
    }

    /// Runs one pass: reload and apply the manifest, then check for drift.
    pub fn reconcile(&self) -> PassReport {
        let mut report = PassReport::default();

        if let Some(path) = &self.manifest_path {
            match ServiceManifest::load(path) {
                Ok(manifest) => {
                    report.apply = Some(apply_manifest(&self.manager, &manifest));
                }
                Err(e) => {
                    // Keep the current state until the manifest is fixed.
                    error!(path = %path.display(), error = %e, "Failed to load manifest");
                    report.manifest_error = Some(e.to_string());
                }
            }
        }

        match self.manager.check_consistency() {
            Ok(drift) => {
                if !drift.is_empty() {
                    warn!(?drift, "Forwarding table differs from registry");
                }
                report.drift = Some(drift);
            }
            Err(e) => error!(error = %e, "Consistency check failed"),
        }

        report
    }

    /// Runs reconcile passes every `interval` until Ctrl-C. With no
    /// interval, runs a single pass and returns its report.
    pub async fn run(&self, interval: Option<Duration>) -> PassReport {
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "run")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "interval_secs": interval.map(|d| d.as_secs()),
                    "manifest": self.manifest_path.as_ref().map(|p| p.display().to_string()),
                }))
        );

        let interval = match interval {
            Some(interval) => interval,
            None => return self.reconcile(),
        };

        let mut ticker = tokio::time::interval(interval);
        let mut last = PassReport::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    last = self.reconcile();
                }
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => warn!("Received SIGINT, shutting down"),
                        Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
                    }
                    break;
                }
            }
        }

        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "stop")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "services": self.manager.service_count(),
                    "backends": self.manager.backend_count(),
                }))
        );
        last
    }
}
