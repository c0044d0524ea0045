//! servicemgrd entry point.
//!
//! Builds a service manager over the in-memory forwarding table, restores
//! state from it, then applies the service manifest once or periodically.

use anyhow::{bail, Context, Result};
use clap::Parser;
use lb_map::LbMockMap;
use lb_servicemgr::audit::{init_logging, init_logging_pretty};
use lb_servicemgr::config::DEFAULT_CONFIG_PATH;
use lb_servicemgr::daemon::ServiceDaemon;
use lb_servicemgr::{ServiceManager, ServiceManagerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Load-balancer service manager daemon
#[derive(Parser, Debug)]
#[command(name = "servicemgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Service manifest (JSON) describing the desired services
    #[arg(short = 'm', long)]
    manifest: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    /// Run a single pass and exit non-zero if the table drifted
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("servicemgrd failed: {:#}", e);
            eprintln!("servicemgrd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let config = ServiceManagerConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    if args.json_logs || config.logging.json {
        init_logging(level);
    } else {
        init_logging_pretty(level);
    }

    config
        .validate_loaded(&args.config)
        .context("validating configuration")?;

    info!(
        config = %args.config.display(),
        max_service_id = config.ids.max_service_id,
        max_backend_id = config.ids.max_backend_id,
        "Starting servicemgrd"
    );

    let lbmap = Arc::new(LbMockMap::new());
    let manager = Arc::new(ServiceManager::new(lbmap, config.ids));
    let daemon = ServiceDaemon::new(manager, args.manifest.clone());

    if config.restore.restore_on_start {
        daemon.restore().context("restoring from forwarding table")?;
    }

    if args.check {
        let report = daemon.reconcile();
        if let Some(apply) = &report.apply {
            for (frontend, err) in &apply.failed {
                error!(frontend = %frontend, error = %err, "Service not applied");
            }
        }
        return Ok(report.is_healthy());
    }

    if args.manifest.is_none() && config.reconcile_interval().is_none() {
        bail!("nothing to do: no manifest given and reconcile.interval_secs = 0");
    }

    let report = daemon.run(config.reconcile_interval()).await;
    let manager = daemon.manager();
    info!(
        services = manager.service_count(),
        backends = manager.backend_count(),
        stats = ?manager.stats(),
        "servicemgrd stopped"
    );
    Ok(report.is_healthy())
}
