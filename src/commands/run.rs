use anyhow::Result;
use picocal_core::PicoCalConfig;
use tracing::{info, warn};

pub async fn run(config: &PicoCalConfig) -> Result<()> {
    let interval = config.refresh_interval()?;
    let coordinator = super::coordinator(config).await?;

    info!(role = %config.role, ?interval, "running, press Ctrl-C to stop");

    coordinator
        .run_periodic(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
