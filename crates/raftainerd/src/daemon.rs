//! The host daemon: session, triggers, and the sync runner.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use raftainer_consul::{
    ConsulClient, CoordinationStore, HostSession, RenewalEnd, SessionConfig, watch_prefix,
};
use raftainer_docker::DockerRuntime;
use raftainer_model::HostIdentity;
use raftainer_model::naming::PODS_CONFIG_PREFIX;
use raftainer_scheduler::{
    ConstraintMatcher, NvidiaSmiInventory, RunnerExit, SchedulerConfig, SyncEngine, SyncRunner,
    Trigger, spawn_timer,
};
use raftainer_vault::{AppRole, Vault, VaultHttp};
use tokio::sync::watch;
use tracing::{error, info};

use crate::{ConsulArgs, RunArgs};

pub async fn run(consul: &ConsulArgs, args: RunArgs) -> anyhow::Result<ExitCode> {
    let host = HostIdentity {
        name: args.host_name.context("--host-name is required")?,
        region: args.region.context("--region is required")?,
        secure_ip: args.secure_ip,
        internal_ip: args.internal_ip.context("--internal-ip is required")?,
    };
    info!(host = %host.name, region = %host.region, address = %host.secure_address(), "raftainer daemon starting");

    let client = Arc::new(ConsulClient::new(&consul.consul_host, consul.consul_port)?);
    let store: Arc<dyn CoordinationStore> = client.clone();
    let runtime = Arc::new(DockerRuntime::connect().context("connecting to docker")?);
    let secrets = Arc::new(Vault::new(
        Arc::new(VaultHttp::new(&args.vault_addr)?),
        AppRole {
            role_id: args.vault_role_id,
            secret_id: args.vault_secret_id,
        },
    ));

    let session_config = SessionConfig {
        fast_startup: args.fast_startup,
        ..SessionConfig::default()
    };
    let session = HostSession::establish(Arc::clone(&store), &host.name, &session_config)
        .await
        .context("establishing host session")?;

    let sync_interval = Duration::from_secs(args.sync_interval.max(1));
    let config = SchedulerConfig {
        lock_concurrency: args.lock_concurrency,
        failure_ttl: Duration::from_secs(args.failure_ttl),
        // Ten missed passes turn the pod service critical.
        check_ttl: sync_interval * 10,
        ..SchedulerConfig::default()
    };
    let engine = SyncEngine::new(
        Arc::clone(&store),
        client,
        runtime,
        secrets,
        ConstraintMatcher::new(Arc::new(NvidiaSmiInventory::default())),
        host,
        config,
    );

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ─────────────────────────────────────────
    let mut renewal = session.spawn_renewal(shutdown_rx.clone());
    let (runner, trigger) = SyncRunner::new(engine, session.id(), args.max_failed_passes);
    let timer = spawn_timer(trigger.clone(), sync_interval, shutdown_rx.clone());
    let watcher = {
        let trigger = trigger.clone();
        tokio::spawn(watch_prefix(
            Arc::clone(&store),
            PODS_CONFIG_PREFIX.to_string(),
            move |_| {
                trigger.request(Trigger::ConfigChange);
            },
            shutdown_rx.clone(),
        ))
    };
    trigger.request(Trigger::Startup);

    let mut runner = tokio::spawn(runner.run(shutdown_rx));

    // ── Wait for shutdown, runner exit, or session loss ──────────
    let (exit, renewal_done) = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            (runner.await.unwrap_or(RunnerExit::Shutdown), false)
        }
        exit = &mut runner => {
            let _ = shutdown_tx.send(true);
            (exit.unwrap_or(RunnerExit::Shutdown), false)
        }
        end = &mut renewal => {
            if !matches!(end, Ok(RenewalEnd::SessionLost)) {
                error!("session renewal stopped unexpectedly");
            }
            let _ = shutdown_tx.send(true);
            let _ = runner.await;
            (RunnerExit::SessionLost, true)
        }
    };

    let _ = timer.await;
    let _ = watcher.await;
    if !renewal_done {
        let _ = renewal.await;
    }
    if exit != RunnerExit::SessionLost {
        session.destroy().await;
    }

    match exit {
        RunnerExit::Shutdown => {
            info!("raftainer daemon stopped");
            Ok(ExitCode::SUCCESS)
        }
        RunnerExit::TooManyFailures(passes) => {
            error!(passes, "too many consecutive failed sync passes, exiting");
            Ok(ExitCode::FAILURE)
        }
        RunnerExit::SessionLost => {
            error!("host session lost, exiting so a restart can establish a new one");
            Ok(ExitCode::FAILURE)
        }
    }
}
