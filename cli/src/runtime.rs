//! Composition root: one subprocess transport, one adapter slot, and the
//! pump that feeds transport events to whichever adapter is current.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cordlink_config::{CordlinkConfig, TimeoutsConfig};
use cordlink_delivery::{DeliveryConfig, MonitoredLobbies, RelayClient};
use cordlink_sdk::{AdapterConfig, AdapterSlot, MemoryLobbyStore, SdkAdapter};
use cordlink_transport::{
    DiscoveryOptions, SubprocessTransport, TimeoutPolicy, TransportConfig, TransportEvent,
};
use cordlink_types::Credentials;

const EVENT_CAPACITY: usize = 64;

pub(crate) struct Runtime {
    slot: Arc<AdapterSlot>,
    lobbies: MonitoredLobbies,
    event_pump: JoinHandle<()>,
}

pub(crate) fn timeout_policy(timeouts: &TimeoutsConfig) -> TimeoutPolicy {
    TimeoutPolicy {
        interactive: Duration::from_secs(timeouts.interactive_secs),
        lobby_creation: Duration::from_secs(timeouts.lobby_creation_secs),
        status_query: Duration::from_secs(timeouts.status_query_secs),
        default: Duration::from_secs(timeouts.default_secs),
    }
}

pub(crate) fn delivery_config(config: &CordlinkConfig) -> DeliveryConfig {
    let polling = &config.polling;
    DeliveryConfig {
        event_queue_interval: Duration::from_millis(polling.event_queue_interval_ms),
        relay_interval: Duration::from_millis(polling.relay_interval_ms),
        dm_interval: Duration::from_millis(polling.dm_interval_ms),
        dm_enabled: polling.dm_enabled,
        dm_history_limit: polling.dm_history_limit,
    }
}

pub(crate) fn relay_client(config: &CordlinkConfig) -> Result<Option<RelayClient>> {
    let Some(base_url) = config.relay.base_url() else {
        return Ok(None);
    };
    let client = RelayClient::new(&base_url, Duration::from_secs(config.relay.timeout_secs))
        .with_context(|| format!("invalid relay configuration for {base_url}"))?;
    Ok(Some(client))
}

/// Credentials from `[discord]`, with the token falling back to the env.
pub(crate) fn credentials(config: &CordlinkConfig) -> Result<Credentials> {
    let app_id = config
        .discord
        .app_id()
        .context("discord.app_id is not set in ~/.cordlink/config.toml")?;
    let token = config.discord.token().with_context(|| {
        format!(
            "no Discord token: set discord.token or {}",
            cordlink_config::TOKEN_ENV
        )
    })?;
    Ok(Credentials::new(app_id, token))
}

impl Runtime {
    /// Locate the subprocess and wire everything together. Nothing is
    /// spawned until the adapter initializes.
    pub(crate) fn build(
        config: &CordlinkConfig,
        binary: Option<PathBuf>,
        sdk_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let options = DiscoveryOptions::from_env()
            .with_explicit_binary(binary.or_else(|| config.subprocess.binary.clone()))
            .with_explicit_sdk_dir(sdk_dir.or_else(|| config.subprocess.sdk_dir.clone()));
        let (mut transport_config, sdk_lib_dir) = TransportConfig::discover(&options)
            .context("failed to locate the Discord subprocess")?;
        tracing::info!(
            binary = %transport_config.binary.display(),
            ?sdk_lib_dir,
            "Subprocess located"
        );

        transport_config.args.clone_from(&config.subprocess.args);
        transport_config.timeouts = timeout_policy(&config.subprocess.timeouts);
        transport_config.shutdown_grace = config.subprocess.shutdown_grace();

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let transport = Arc::new(SubprocessTransport::new(transport_config, events_tx));

        let adapter_config = AdapterConfig {
            lobby_ids_ttl: Duration::from_secs(config.cache.lobby_ids_ttl_secs),
            friends_ttl: Duration::from_secs(config.cache.friends_ttl_secs),
            channels_ttl: Duration::from_secs(config.cache.channels_ttl_secs),
            sdk_lib_dir,
        };
        let slot = Arc::new(AdapterSlot::new(move || {
            SdkAdapter::new(
                transport.clone(),
                Arc::new(MemoryLobbyStore::default()),
                adapter_config.clone(),
            )
        }));

        let event_pump = tokio::spawn(pump_events(slot.clone(), events_rx));
        Ok(Self {
            slot,
            lobbies: MonitoredLobbies::default(),
            event_pump,
        })
    }

    pub(crate) fn adapter(&self) -> Arc<SdkAdapter> {
        self.slot.current()
    }

    pub(crate) fn slot(&self) -> Arc<AdapterSlot> {
        self.slot.clone()
    }

    pub(crate) fn lobbies(&self) -> MonitoredLobbies {
        self.lobbies.clone()
    }

    pub(crate) async fn shutdown(self) {
        self.slot.current().disconnect().await;
        self.event_pump.abort();
    }
}

async fn pump_events(slot: Arc<AdapterSlot>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        slot.current().handle_transport_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_policy_maps_every_class() {
        let policy = timeout_policy(&TimeoutsConfig {
            interactive_secs: 1,
            lobby_creation_secs: 2,
            status_query_secs: 3,
            default_secs: 4,
        });
        assert_eq!(policy.interactive, Duration::from_secs(1));
        assert_eq!(policy.lobby_creation, Duration::from_secs(2));
        assert_eq!(policy.status_query, Duration::from_secs(3));
        assert_eq!(policy.default, Duration::from_secs(4));
    }

    #[test]
    fn relay_is_optional() {
        let config = CordlinkConfig::default();
        assert!(relay_client(&config).unwrap().is_none());
    }

    #[test]
    fn delivery_defaults_follow_config_defaults() {
        let delivery = delivery_config(&CordlinkConfig::default());
        assert_eq!(delivery.relay_interval, Duration::from_secs(2));
        assert!(!delivery.dm_enabled);
    }
}
