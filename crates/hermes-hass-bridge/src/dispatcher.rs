use hermes_hass_config::{Config, HandleType};
use hermes_hass_contracts::{HermesMessage, NluIntent};
use hermes_hass_kernel::{
    build_request, extract_speech, site_accepted, speak_text, RequestMode, ToggleState,
};
use tracing::{debug, error, warn};

use crate::gateway::{GatewayError, HassClient};
use crate::DispatchError;

/// Routes Hermes messages to the toggle or to Home Assistant.
///
/// Calls take `&mut self` and the runtime awaits each one before reading the
/// next packet, so the toggle has a single writer.
pub struct Dispatcher {
    client: HassClient,
    mode: RequestMode,
    site_ids: Vec<String>,
    toggle: ToggleState,
}

impl Dispatcher {
    pub fn new(cfg: &Config) -> Result<Self, GatewayError> {
        let mode = match cfg.home_assistant.handle_type {
            HandleType::Event => RequestMode::Event {
                event_type_format: cfg.home_assistant.event_type_format.clone(),
            },
            HandleType::Intent => RequestMode::Intent,
        };
        Ok(Self {
            client: HassClient::new(&cfg.home_assistant)?,
            mode,
            site_ids: cfg.site_ids.clone(),
            toggle: ToggleState::default(),
        })
    }

    pub fn handling_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    /// Decodes and dispatches one bus packet. Malformed payloads are dropped.
    pub async fn handle_publish(&mut self, topic: &str, payload: &[u8]) -> Option<HermesMessage> {
        debug!(topic, bytes = payload.len(), "received message");
        match HermesMessage::parse(topic, payload) {
            Ok(Some(message)) => self.dispatch(message).await,
            Ok(None) => {
                debug!(topic, "ignoring message on unhandled topic");
                None
            }
            Err(e) => {
                warn!(topic, error = %e, "dropping malformed message");
                None
            }
        }
    }

    /// Returns the message to publish in reply, if any.
    pub async fn dispatch(&mut self, message: HermesMessage) -> Option<HermesMessage> {
        if !site_accepted(message.site_id(), &self.site_ids) {
            debug!(
                site_id = message.site_id(),
                kind = message.kind(),
                "site not handled by this bridge"
            );
            return None;
        }

        match message {
            HermesMessage::HandlingEnabled(_) => {
                self.toggle.enable();
                debug!("intent handling enabled");
                None
            }
            HermesMessage::HandlingDisabled(_) => {
                self.toggle.disable();
                debug!("intent handling disabled");
                None
            }
            HermesMessage::IntentRecognized(intent) => {
                if !self.toggle.is_enabled() {
                    debug!(
                        intent = intent.intent_name(),
                        "intent handling disabled, skipping"
                    );
                    return None;
                }
                self.handle_intent(&intent).await
            }
            HermesMessage::SpeakText(_) => None,
        }
    }

    async fn handle_intent(&self, intent: &NluIntent) -> Option<HermesMessage> {
        match self.try_handle_intent(intent).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    intent = intent.intent_name(),
                    site_id = %intent.site_id,
                    error = %e,
                    "intent handling failed"
                );
                None
            }
        }
    }

    async fn try_handle_intent(
        &self,
        intent: &NluIntent,
    ) -> Result<Option<HermesMessage>, DispatchError> {
        let request = build_request(&self.mode, intent)?;
        let Some(response) = self.client.send(&request).await? else {
            return Ok(None);
        };

        match extract_speech(&response) {
            Some(text) => Ok(Some(HermesMessage::SpeakText(speak_text(intent, text)))),
            None => {
                debug!(intent = intent.intent_name(), "no speech in intent response");
                Ok(None)
            }
        }
    }
}
