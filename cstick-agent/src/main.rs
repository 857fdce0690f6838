//! cStick Agent - CSV telemetry uplink over MQTT
//!
//! Replays the cStick sensor capture to the configured broker:
//! - One record per tick, fixed schema, bounded payload
//! - Link and broker sessions recover on their own pacing, forever
//! - Store replay wraps around at end of file

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use cstick_agent::agent::Agent;
use cstick_agent::broker::BrokerSession;
use cstick_agent::config::AgentConfig;
use cstick_agent::link::{IfaceLink, LinkSession};
use cstick_agent::retry::RetryPolicy;
use cstick_agent::store::{inspect_store, StreamCursor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().init();

    let hostname = gethostname::gethostname();
    info!(
        "🦯 cStick agent v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        hostname.to_string_lossy()
    );

    let config = AgentConfig::load()
        .await
        .context("Failed to load configuration")?;
    info!(
        "Uplink target: {}:{}, topic '{}'",
        config.broker.host, config.broker.port, config.broker.topic
    );

    if let Err(e) = inspect_store(&config.store.path).await {
        warn!("Store inspection failed: {}", e);
    }

    let driver = IfaceLink::new(
        config.link.network.clone(),
        config.link.interface.clone(),
        config.link.associate_command.clone(),
    );
    let link = LinkSession::new(
        Box::new(driver),
        RetryPolicy::unbounded(Duration::from_millis(config.link.retry_interval_ms)),
        config.link.network.clone(),
    );
    let broker = BrokerSession::new(
        &config.broker,
        RetryPolicy::unbounded(Duration::from_secs(config.broker.retry_backoff_secs)),
    );
    let cursor = StreamCursor::new(&config.store.path);

    let mut agent = Agent::new(
        cursor,
        link,
        broker,
        Duration::from_millis(config.pacing.tick_interval_ms),
        config.broker.max_payload_bytes,
    );
    agent.run().await;
    Ok(())
}
