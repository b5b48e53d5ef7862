use hermes_hass_contracts::{NluIntent, TtsSay};
use serde_json::{json, Map, Value};

/// Processed input text.
pub const TEXT_KEY: &str = "_text";
/// Raw input text.
pub const RAW_TEXT_KEY: &str = "_raw_text";
/// Whole intent message (event requests only).
pub const INTENT_KEY: &str = "_intent";

pub const EVENTS_PATH_PREFIX: &str = "api/events/";
pub const INTENT_HANDLE_PATH: &str = "api/intent/handle";

/// Whether a message from `site_id` is handled by this instance.
/// An empty allow list accepts every site.
pub fn site_accepted(site_id: &str, allow_list: &[String]) -> bool {
    allow_list.is_empty() || allow_list.iter().any(|v| v == site_id)
}

/// Intent handling on/off switch, driven by the handle toggle messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleState {
    enabled: bool,
}

impl Default for ToggleState {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ToggleState {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMode {
    Event { event_type_format: String },
    Intent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HassRequest {
    Event {
        event_type: String,
        body: Map<String, Value>,
    },
    Intent {
        body: Value,
    },
}

impl HassRequest {
    /// Path relative to the Home Assistant base URL.
    pub fn path(&self) -> String {
        match self {
            Self::Event { event_type, .. } => format!("{EVENTS_PATH_PREFIX}{event_type}"),
            Self::Intent { .. } => INTENT_HANDLE_PATH.to_string(),
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Self::Event { body, .. } => Value::Object(body.clone()),
            Self::Intent { body } => body.clone(),
        }
    }

    pub fn expects_response(&self) -> bool {
        matches!(self, Self::Intent { .. })
    }
}

/// Substitutes the intent name for every `{0}` in `format`.
pub fn event_type(format: &str, intent_name: &str) -> String {
    format.replace("{0}", intent_name)
}

/// Slot name to value, followed by the reserved text keys.
///
/// Later slots overwrite earlier ones with the same name; reserved keys are
/// written last and always win.
pub fn slot_data(intent: &NluIntent) -> Map<String, Value> {
    let mut data = Map::new();
    for slot in &intent.slots {
        data.insert(slot.slot_name.clone(), slot.plain_value());
    }
    data.insert(TEXT_KEY.to_string(), Value::String(intent.input.clone()));
    data.insert(
        RAW_TEXT_KEY.to_string(),
        Value::String(intent.raw_text().to_string()),
    );
    data
}

pub fn build_request(
    mode: &RequestMode,
    intent: &NluIntent,
) -> Result<HassRequest, serde_json::Error> {
    match mode {
        RequestMode::Event { event_type_format } => {
            let mut body = slot_data(intent);
            body.insert(INTENT_KEY.to_string(), serde_json::to_value(intent)?);
            Ok(HassRequest::Event {
                event_type: event_type(event_type_format, intent.intent_name()),
                body,
            })
        }
        RequestMode::Intent => Ok(HassRequest::Intent {
            body: json!({
                "name": intent.intent_name(),
                "data": slot_data(intent),
            }),
        }),
    }
}

/// Speech text of an intent response, read from `speech.plain.speech`.
///
/// A missing path, a non-string value or blank text all mean "nothing to say".
pub fn extract_speech(response: &Value) -> Option<String> {
    response
        .pointer("/speech/plain/speech")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

pub fn speak_text(intent: &NluIntent, text: String) -> TtsSay {
    TtsSay {
        text,
        lang: intent.lang.clone(),
        id: Some(uuid::Uuid::new_v4().to_string()),
        volume: None,
        site_id: intent.site_id.clone(),
        session_id: intent.session_id.clone(),
    }
}
