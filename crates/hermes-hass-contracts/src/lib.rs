//! Hermes bus contracts consumed and produced by the bridge.
//!
//! Field names follow the Hermes wire convention (camelCase). Intent messages
//! keep fields this crate does not model in [`NluIntent::extra`] and
//! [`Intent::extra`], so the whole message can be forwarded to Home Assistant.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Site id assumed when a message does not carry one.
pub const DEFAULT_SITE_ID: &str = "default";

pub const INTENT_TOPIC_PREFIX: &str = "hermes/intent/";
pub const INTENT_TOPIC_ALL: &str = "hermes/intent/#";
pub const HANDLE_TOGGLE_ON_TOPIC: &str = "hermes/handle/toggleOn";
pub const HANDLE_TOGGLE_OFF_TOPIC: &str = "hermes/handle/toggleOff";
pub const TTS_SAY_TOPIC: &str = "hermes/tts/say";

/// Topic filters the bridge subscribes to.
pub const SUBSCRIPTIONS: [&str; 3] = [
    INTENT_TOPIC_ALL,
    HANDLE_TOGGLE_ON_TOPIC,
    HANDLE_TOGGLE_OFF_TOPIC,
];

fn default_site_id() -> String {
    DEFAULT_SITE_ID.to_string()
}

// Hermes publishers send unset optional fields as explicit `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default_site_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_site_id))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub intent_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence_score: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub entity: String,
    pub slot_name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub raw_value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Value>,
}

impl Slot {
    /// Value handed to Home Assistant.
    ///
    /// Hermes wraps slot values as `{"kind": "...", "value": X}`; the inner
    /// `X` is returned for those. Anything else is returned as-is.
    pub fn plain_value(&self) -> Value {
        match &self.value {
            Value::Object(obj) => obj
                .get("value")
                .cloned()
                .unwrap_or_else(|| self.value.clone()),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NluIntent {
    pub input: String,
    pub intent: Intent,
    #[serde(default, deserialize_with = "null_as_default")]
    pub slots: Vec<Slot>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub raw_input: String,
    #[serde(
        default = "default_site_id",
        deserialize_with = "null_as_default_site_id"
    )]
    pub site_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub custom_data: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub wakeword_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NluIntent {
    pub fn intent_name(&self) -> &str {
        &self.intent.intent_name
    }

    /// Raw (pre-substitution) input, falling back to `input` when the
    /// recognizer left it empty.
    pub fn raw_text(&self) -> &str {
        if self.raw_input.is_empty() {
            &self.input
        } else {
            &self.raw_input
        }
    }
}

/// Payload of `hermes/handle/toggleOn` and `hermes/handle/toggleOff`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HandleToggle {
    #[serde(
        default = "default_site_id",
        deserialize_with = "null_as_default_site_id"
    )]
    pub site_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TtsSay {
    pub text: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default = "default_site_id")]
    pub site_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Every Hermes message the bridge knows about.
#[derive(Debug, Clone, PartialEq)]
pub enum HermesMessage {
    IntentRecognized(NluIntent),
    HandlingEnabled(HandleToggle),
    HandlingDisabled(HandleToggle),
    SpeakText(TtsSay),
}

impl HermesMessage {
    /// Decodes a message received on `topic`.
    ///
    /// Returns `Ok(None)` for topics that carry none of the known messages.
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let message = if is_intent_topic(topic) {
            Self::IntentRecognized(serde_json::from_slice(payload)?)
        } else if topic == HANDLE_TOGGLE_ON_TOPIC {
            Self::HandlingEnabled(toggle_from_slice(payload)?)
        } else if topic == HANDLE_TOGGLE_OFF_TOPIC {
            Self::HandlingDisabled(toggle_from_slice(payload)?)
        } else if topic == TTS_SAY_TOPIC {
            Self::SpeakText(serde_json::from_slice(payload)?)
        } else {
            return Ok(None);
        };
        Ok(Some(message))
    }

    pub fn topic(&self) -> String {
        match self {
            Self::IntentRecognized(intent) => {
                format!("{INTENT_TOPIC_PREFIX}{}", intent.intent_name())
            }
            Self::HandlingEnabled(_) => HANDLE_TOGGLE_ON_TOPIC.to_string(),
            Self::HandlingDisabled(_) => HANDLE_TOGGLE_OFF_TOPIC.to_string(),
            Self::SpeakText(_) => TTS_SAY_TOPIC.to_string(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::IntentRecognized(v) => serde_json::to_vec(v),
            Self::HandlingEnabled(v) | Self::HandlingDisabled(v) => serde_json::to_vec(v),
            Self::SpeakText(v) => serde_json::to_vec(v),
        }
    }

    pub fn site_id(&self) -> &str {
        match self {
            Self::IntentRecognized(v) => &v.site_id,
            Self::HandlingEnabled(v) | Self::HandlingDisabled(v) => &v.site_id,
            Self::SpeakText(v) => &v.site_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::IntentRecognized(_) => "intent_recognized",
            Self::HandlingEnabled(_) => "handling_enabled",
            Self::HandlingDisabled(_) => "handling_disabled",
            Self::SpeakText(_) => "speak_text",
        }
    }
}

pub fn is_intent_topic(topic: &str) -> bool {
    topic
        .strip_prefix(INTENT_TOPIC_PREFIX)
        .is_some_and(|name| !name.is_empty())
}

// Toggle messages are sometimes published with an empty body.
fn toggle_from_slice(payload: &[u8]) -> Result<HandleToggle, serde_json::Error> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(HandleToggle {
            site_id: default_site_id(),
        });
    }
    serde_json::from_slice(payload)
}
