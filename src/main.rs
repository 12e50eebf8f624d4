use anyhow::Context;
use tokio::io::BufReader;

use fmg_bridge::bridge::Bridge;
use fmg_bridge::config::BridgeConfig;
use fmg_bridge::{init_tracing, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::load().context("failed to load configuration")?;
    init_tracing(&config.logging)?;
    tracing::info!(config = ?config, "configuration loaded");

    let bridge = Bridge::build(config)?;
    let result = run(&bridge).await;

    bridge.shutdown().await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "bridge exited with error");
    }
    result
}

async fn run(bridge: &Bridge) -> anyhow::Result<()> {
    bridge
        .connect()
        .await
        .context("failed to authenticate with FortiManager")?;

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        served = server::serve(bridge.tools().clone(), stdin, stdout) => served,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    }
}
