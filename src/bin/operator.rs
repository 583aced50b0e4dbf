//! CertMesh operator - composition root for the certificate subsystem.
//!
//! Builds the trust plane (CA, store, validator, rotation), the cluster
//! projection layer, and the monitoring dashboard, then runs the periodic
//! tasks until shutdown. All wiring is explicit; nothing here is a global.

use anyhow::Context;
use certmesh::clock::SystemClock;
use certmesh::cluster::{ClusterCertificateOrchestrator, KubeClusterApi};
use certmesh::dashboard::MonitoringDashboard;
use certmesh::{Config, MtlsManager};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let default_config = "config/certmesh.toml".to_string();
    let config_path = args.get(1).unwrap_or(&default_config);

    info!("Starting CertMesh operator");
    info!("Loading configuration from: {}", config_path);

    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let clock = Arc::new(SystemClock);

    // CA bootstrap failure is fatal: without the root there is nothing to
    // run.
    let manager = Arc::new(
        MtlsManager::bootstrap(&config, clock.clone())
            .await
            .context("failed to bootstrap trust plane")?,
    );

    let api = Arc::new(
        KubeClusterApi::connect(
            Duration::from_secs(config.cluster.api_timeout_secs),
            config.cluster.field_manager.clone(),
        )
        .await
        .context("failed to connect to the cluster")?,
    );
    let orchestrator = Arc::new(ClusterCertificateOrchestrator::new(
        manager.clone(),
        api,
        config.cluster.clone(),
        config.ca.cluster_domain.clone(),
        clock.clone(),
    ));
    let dashboard = Arc::new(MonitoringDashboard::new(
        manager.clone(),
        orchestrator.clone(),
        config.monitoring.clone(),
        clock.clone(),
    ));

    // Ensure every rostered service holds a certificate before projecting
    // the fleet into the cluster.
    for service in &config.services {
        manager
            .rotation()
            .register_service(&service.name, service.service_type);
        if let Err(e) = manager
            .initialize_service_certificate(
                &service.name,
                service.service_type,
                &service.extra_sans,
            )
            .await
        {
            error!(service = %service.name, error = %e, "failed to initialize certificate");
        }
    }

    let report = orchestrator
        .bootstrap_fleet()
        .await
        .context("fleet bootstrap failed")?;
    for (service, cause) in &report.failed {
        warn!(service = %service, cause = %cause, "fleet bootstrap incomplete for service");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = vec![
        manager.start_certificate_monitoring(shutdown_rx.clone()),
        orchestrator.start_automation_loop(shutdown_rx.clone()),
        dashboard.start_metrics_collector(shutdown_rx.clone()),
        dashboard.start_alert_engine(shutdown_rx.clone()),
    ];

    signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");
    info!("Received shutdown signal (Ctrl+C)");

    // Flip the signal and wait: each task finishes its in-flight cycle
    // before exiting, so no bundle is left half-written.
    shutdown_tx.send(true).ok();
    for task in tasks {
        let _ = task.await;
    }

    info!("CertMesh operator stopped");
    Ok(())
}
