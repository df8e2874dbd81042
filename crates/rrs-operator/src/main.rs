//! RRS operator service.
//!
//! Connects to the relay and processes device reports until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rrs_crypto::CryptoEnvelope;
use rrs_operator::{
    ArtifactStore, MessageIngestor, OpenAiAdvisor, Operator, OperatorConfig, TicketReconciler,
};
use rrs_relay::{PeriodicTask, SubscriptionSupervisor, WsRelay};
use rrs_store::{IpfsClient, OdooClient, PinRetention, PinataClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = OperatorConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level);

    let admin = config.admin_keypair().context("invalid admin seed")?;
    info!(address = %admin.address(), relay = %config.relay_url, "starting rrs-operator");

    let artifacts = ArtifactStore::new(
        Arc::new(CryptoEnvelope::new(admin)),
        Arc::new(PinataClient::new(config.pinata.clone())),
        Arc::new(IpfsClient::new(
            config.ipfs_api_url.clone(),
            Duration::from_secs(config.ipfs_timeout_secs),
        )),
        Arc::new(PinRetention::new()),
        config.artifact_config(),
    );

    let mut reconciler = TicketReconciler::new(
        Arc::new(OdooClient::new(config.odoo.clone())),
        config.reconciler_config(),
    );
    if let Some(openai) = config.openai.clone() {
        info!(model = %openai.model, "fix suggestions enabled");
        reconciler = reconciler.with_advisor(Arc::new(OpenAiAdvisor::new(openai)));
    }

    let operator = Arc::new(Operator::new(artifacts, reconciler, config.format_rules()));
    let sweep = config.ticket_sweep_interval().map(|period| {
        let operator = operator.clone();
        PeriodicTask::spawn("ticket-sweep", period, move || {
            let operator = operator.clone();
            async move {
                match operator.sweep_closed_tickets().await {
                    Ok(outcome) if outcome.evicted + outcome.failed > 0 => info!(
                        released = outcome.evicted,
                        failed = outcome.failed,
                        "closed ticket artifacts released"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "closed ticket sweep failed"),
                }
            }
        })
    });

    let relay = Arc::new(WsRelay::spawn(
        config.relay_url.clone(),
        Duration::from_secs(config.relay_reconnect_secs),
    ));
    let ingestor = Arc::new(MessageIngestor::new(relay, operator, config.ingestor_config()));
    let supervisor = Arc::new(SubscriptionSupervisor::new(
        ingestor.clone(),
        config.supervisor_config(),
    ));
    let supervision = supervisor.spawn(None);

    tokio::select! {
        result = ingestor.run() => result.context("ingestor stopped")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutting down");
        }
    }
    supervision.shutdown().await;
    if let Some(sweep) = sweep {
        sweep.shutdown().await;
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
