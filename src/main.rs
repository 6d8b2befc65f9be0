//! feed-tap: subscribes to the configured channels and logs what arrives.
//!
//! Configured through the environment (see [`feed_mux::config`]). Runs
//! until Ctrl-C.

use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

use feed_mux::{DecodeMode, MuxConfig, Registry, SubscriptionOptions, SubscriptionSet};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = MuxConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        endpoint = %config.endpoint,
        channels = ?config.channels,
        decode = %config.decode,
        "starting feed-tap"
    );

    LocalSet::new().run_until(run(config)).await
}

async fn run(config: MuxConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::from_config(&config);

    let weak = registry.downgrade();
    registry.on_connectivity_changed(move || {
        let Some(registry) = weak.upgrade() else {
            return;
        };
        for status in registry.statuses() {
            tracing::info!(state = %status.state, "{status}");
        }
    });

    let mut subscriptions = SubscriptionSet::new();
    for channel in &config.channels {
        subscriptions.subscribe(&registry, channel, options_for(channel, config.decode))?;
    }
    if subscriptions.is_empty() {
        tracing::warn!("no channels configured; set FEED_CHANNELS");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    subscriptions.close_all();

    Ok(())
}

fn options_for(channel: &str, decode: DecodeMode) -> SubscriptionOptions {
    let name = channel.to_string();
    let options = match decode {
        DecodeMode::Json => SubscriptionOptions::json(move |value| {
            tracing::info!(channel = %name, %value, "message");
            Ok(())
        }),
        DecodeMode::Raw => SubscriptionOptions::raw(move |frame| {
            tracing::info!(channel = %name, bytes = frame.len(), "frame");
            Ok(())
        }),
    };
    let name = channel.to_string();
    options.on_error(move |error| {
        tracing::warn!(channel = %name, %error, "connection error");
        Ok(())
    })
}
