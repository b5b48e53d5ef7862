use std::future::Future;
use std::io;
use std::time::Duration;

use hermes_hass_config::Mqtt;
use hermes_hass_contracts::{HermesMessage, SUBSCRIPTIONS};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::BridgeError;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn mqtt_options(cfg: &Mqtt) -> MqttOptions {
    let client_id = cfg
        .client_id
        .clone()
        .unwrap_or_else(|| format!("hermes-hass-{}", uuid::Uuid::new_v4().as_simple()));
    let mut options = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    if let Some(username) = &cfg.username {
        options.set_credentials(username.clone(), cfg.password.clone().unwrap_or_default());
    }
    options
}

/// Moves `dispatcher` onto its own task. Publishes sent to the returned
/// channel are handled one at a time in arrival order, and replies go out
/// through `client`. The task ends once every sender is dropped.
pub fn spawn_dispatcher(
    mut dispatcher: Dispatcher,
    client: AsyncClient,
) -> (mpsc::UnboundedSender<Publish>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Publish>();
    let handle = tokio::spawn(async move {
        while let Some(publish) = rx.recv().await {
            if let Some(reply) = dispatcher
                .handle_publish(&publish.topic, &publish.payload)
                .await
            {
                publish_message(&client, &reply).await;
            }
        }
        debug!("dispatcher drained");
    });
    (tx, handle)
}

/// Polls the bus until `shutdown` resolves.
///
/// Intents are handed to the dispatcher task, so a slow Home Assistant never
/// holds up keep-alive traffic. Connection errors are logged and retried after
/// `reconnect_delay`, and subscriptions are renewed on every ConnAck.
pub async fn run<S>(
    dispatcher: Dispatcher,
    client: AsyncClient,
    mut eventloop: EventLoop,
    reconnect_delay: Duration,
    shutdown: S,
) -> Result<(), BridgeError>
where
    S: Future<Output = io::Result<()>>,
{
    let (inbox, worker) = spawn_dispatcher(dispatcher, client.clone());
    tokio::pin!(shutdown);
    let mut retry_after: Option<Duration> = None;

    loop {
        let next = async {
            if let Some(delay) = retry_after.take() {
                sleep(delay).await;
            }
            eventloop.poll().await
        };
        let event = tokio::select! {
            signal = &mut shutdown => {
                signal.map_err(|e| BridgeError::Signal(e.to_string()))?;
                info!("shutting down");
                disconnect(&client, &mut eventloop).await;
                return Ok(());
            }
            event = next => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to mqtt broker");
                subscribe(&client);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if inbox.send(publish).is_err() {
                    if let Err(e) = worker.await {
                        error!(error = %e, "dispatcher task failed");
                    }
                    return Err(BridgeError::DispatcherStopped);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    delay_ms = reconnect_delay.as_millis() as u64,
                    "mqtt connection error, reconnecting"
                );
                retry_after = Some(reconnect_delay);
            }
        }
    }
}

fn subscribe(client: &AsyncClient) {
    for topic in SUBSCRIPTIONS {
        match client.try_subscribe(topic, QoS::AtMostOnce) {
            Ok(()) => debug!(topic, "subscribed"),
            Err(e) => warn!(topic, error = %e, "subscribe failed"),
        }
    }
}

async fn publish_message(client: &AsyncClient, message: &HermesMessage) {
    let topic = message.topic();
    let payload = match message.to_payload() {
        Ok(v) => v,
        Err(e) => {
            warn!(%topic, error = %e, "serialize outbound message failed");
            return;
        }
    };
    debug!(%topic, bytes = payload.len(), "publishing");
    if let Err(e) = client
        .publish(topic.clone(), QoS::AtMostOnce, false, payload)
        .await
    {
        warn!(%topic, error = %e, "publish failed");
    }
}

// The DISCONNECT packet only leaves once the event loop is polled again.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        warn!(error = %e, "mqtt disconnect request failed");
        return;
    }
    let flushed = timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await;
    match flushed {
        Ok(true) => debug!("mqtt disconnect sent"),
        Ok(false) => debug!("mqtt connection closed before disconnect"),
        Err(_) => warn!("timed out sending mqtt disconnect"),
    }
}
