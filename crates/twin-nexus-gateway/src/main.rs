//! Twin Nexus gateway binary.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use twin_nexus_gateway::{Gateway, GatewayConfig};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Twin Nexus gateway"
    );

    let config = GatewayConfig::from_env()?;
    let instance_id = config.instance_id.unwrap_or_else(Uuid::new_v4);
    tracing::info!(%instance_id, "Gateway initialized");

    let (gateway, _handle) = Gateway::new(config);
    gateway.run().await?;

    Ok(())
}
