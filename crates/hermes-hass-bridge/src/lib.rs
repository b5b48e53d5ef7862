use std::time::Duration;

use hermes_hass_config::Config;
use rumqttc::AsyncClient;
use thiserror::Error;
use tracing::info;

pub mod dispatcher;
pub mod gateway;
pub mod runtime;

pub use dispatcher::Dispatcher;
pub use gateway::{GatewayError, HassClient};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("startup failed: {0}")]
    Startup(#[from] GatewayError),
    #[error("signal handler failed: {0}")]
    Signal(String),
    #[error("dispatcher task stopped")]
    DispatcherStopped,
}

/// Failure while handling a single intent. Never escapes the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("build request failed: {0}")]
    Build(#[from] serde_json::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Runs the bridge until Ctrl-C.
pub async fn serve(cfg: Config) -> Result<(), BridgeError> {
    let dispatcher = Dispatcher::new(&cfg)?;
    let (client, eventloop) = AsyncClient::new(runtime::mqtt_options(&cfg.mqtt), 10);
    info!(
        url = %cfg.home_assistant.url,
        handle_type = %cfg.home_assistant.handle_type,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        sites = ?cfg.site_ids,
        "starting hermes-hass bridge"
    );

    let reconnect_delay = Duration::from_millis(cfg.mqtt.reconnect_delay_ms);
    runtime::run(
        dispatcher,
        client,
        eventloop,
        reconnect_delay,
        tokio::signal::ctrl_c(),
    )
    .await
}
