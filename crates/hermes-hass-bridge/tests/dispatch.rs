use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::Router;
use hermes_hass_bridge::gateway::HASSIO_TOKEN_ENV;
use hermes_hass_bridge::runtime::spawn_dispatcher;
use hermes_hass_bridge::Dispatcher;
use hermes_hass_config::{Config, HandleType};
use hermes_hass_contracts::{HermesMessage, HANDLE_TOGGLE_OFF_TOPIC, HANDLE_TOGGLE_ON_TOPIC};
use rumqttc::{AsyncClient, MqttOptions, Publish, QoS};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone)]
struct MockHass {
    requests: Arc<Mutex<Vec<Recorded>>>,
    status: StatusCode,
    body: String,
    delay: Duration,
}

async fn record(
    State(mock): State<MockHass>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    mock.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    tokio::time::sleep(mock.delay).await;
    (
        mock.status,
        [(header::CONTENT_TYPE, "application/json")],
        mock.body.clone(),
    )
}

/// Starts a fake Home Assistant answering every request with `status`/`body`.
async fn start_mock(status: StatusCode, body: &str) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    start_slow_mock(status, body, Duration::ZERO).await
}

/// Like [`start_mock`], but each answer is held back for `delay`.
async fn start_slow_mock(
    status: StatusCode,
    body: &str,
    delay: Duration,
) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(record).with_state(MockHass {
        requests: requests.clone(),
        status,
        body: body.to_string(),
        delay,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), requests)
}

fn test_config(url: &str, handle_type: HandleType) -> Config {
    let mut cfg = Config::new(url);
    cfg.home_assistant.handle_type = handle_type;
    cfg.home_assistant.access_token = Some("test-token".to_string());
    cfg.home_assistant.timeout_ms = 2_000;
    cfg
}

fn intent_payload(name: &str, site_id: Option<&str>) -> Vec<u8> {
    let mut payload = json!({
        "input": "what time is it",
        "rawInput": "What time is it",
        "intent": {"intentName": name, "confidenceScore": 1.0},
        "slots": [{
            "entity": "zone",
            "slotName": "zone",
            "value": {"kind": "Unknown", "value": "local"},
            "rawValue": "local"
        }],
        "sessionId": "session-42"
    });
    if let Some(site_id) = site_id {
        payload["siteId"] = Value::String(site_id.to_string());
    }
    payload.to_string().into_bytes()
}

fn toggle_payload(site_id: &str) -> Vec<u8> {
    json!({ "siteId": site_id }).to_string().into_bytes()
}

#[tokio::test]
async fn event_mode_posts_slots_to_event_endpoint() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut dispatcher = Dispatcher::new(&test_config(&url, HandleType::Event)).unwrap();

    let reply = dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", Some("kitchen")))
        .await;
    assert!(reply.is_none());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.path, "/api/events/rhasspy_GetTime");
    assert_eq!(req.headers["authorization"], "Bearer test-token");
    assert_eq!(req.body["zone"], "local");
    assert_eq!(req.body["_text"], "what time is it");
    assert_eq!(req.body["_raw_text"], "What time is it");
    assert_eq!(req.body["_intent"]["siteId"], "kitchen");
}

#[tokio::test]
async fn event_type_format_is_applied() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut cfg = test_config(&url, HandleType::Event);
    cfg.home_assistant.event_type_format = "app_{0}".to_string();
    let mut dispatcher = Dispatcher::new(&cfg).unwrap();

    dispatcher
        .handle_publish("hermes/intent/turnOnLight", &intent_payload("turnOnLight", None))
        .await;

    assert_eq!(
        requests.lock().unwrap()[0].path,
        "/api/events/app_turnOnLight"
    );
}

#[tokio::test]
async fn intent_mode_speaks_response_text() {
    let (url, requests) = start_mock(
        StatusCode::OK,
        r#"{"speech":{"plain":{"speech":"It is noon"}}}"#,
    )
    .await;
    let mut dispatcher = Dispatcher::new(&test_config(&url, HandleType::Intent)).unwrap();

    let reply = dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", Some("den")))
        .await
        .expect("expected a spoken reply");

    let HermesMessage::SpeakText(say) = reply else {
        panic!("expected SpeakText, got {reply:?}");
    };
    assert_eq!(say.text, "It is noon");
    assert_eq!(say.site_id, "den");
    assert_eq!(say.session_id.as_deref(), Some("session-42"));
    assert!(say.id.is_some());

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].path, "/api/intent/handle");
    assert_eq!(requests[0].body["name"], "GetTime");
    assert_eq!(requests[0].body["data"]["zone"], "local");
    assert_eq!(requests[0].body["data"]["_text"], "what time is it");
}

#[tokio::test]
async fn intent_mode_without_speech_publishes_nothing() {
    let (url, requests) = start_mock(StatusCode::OK, "{}").await;
    let mut dispatcher = Dispatcher::new(&test_config(&url, HandleType::Intent)).unwrap();

    let reply = dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;

    assert!(reply.is_none());
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn server_error_is_contained_and_keeps_handling_enabled() {
    let (url, requests) = start_mock(StatusCode::INTERNAL_SERVER_ERROR, "{}").await;
    let mut dispatcher = Dispatcher::new(&test_config(&url, HandleType::Intent)).unwrap();

    for _ in 0..2 {
        let reply = dispatcher
            .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
            .await;
        assert!(reply.is_none());
        assert!(dispatcher.handling_enabled());
    }
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_server_is_contained() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut dispatcher =
        Dispatcher::new(&test_config(&format!("http://{addr}"), HandleType::Event)).unwrap();
    let reply = dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;

    assert!(reply.is_none());
    assert!(dispatcher.handling_enabled());
}

#[tokio::test]
async fn disabled_handling_suppresses_requests_until_enabled() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut dispatcher = Dispatcher::new(&test_config(&url, HandleType::Event)).unwrap();

    dispatcher
        .handle_publish(HANDLE_TOGGLE_OFF_TOPIC, &toggle_payload("default"))
        .await;
    assert!(!dispatcher.handling_enabled());
    for name in ["GetTime", "GetDate", "GetWeather"] {
        dispatcher
            .handle_publish(&format!("hermes/intent/{name}"), &intent_payload(name, None))
            .await;
    }
    assert!(requests.lock().unwrap().is_empty());

    dispatcher
        .handle_publish(HANDLE_TOGGLE_ON_TOPIC, &toggle_payload("default"))
        .await;
    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn site_filter_ignores_other_sites() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut cfg = test_config(&url, HandleType::Event);
    cfg.site_ids = vec!["kitchen".to_string()];
    let mut dispatcher = Dispatcher::new(&cfg).unwrap();

    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", Some("garage")))
        .await;
    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;
    assert!(requests.lock().unwrap().is_empty());

    dispatcher
        .handle_publish(HANDLE_TOGGLE_OFF_TOPIC, &toggle_payload("garage"))
        .await;
    assert!(dispatcher.handling_enabled());

    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", Some("kitchen")))
        .await;
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_and_unknown_messages_are_dropped() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut dispatcher = Dispatcher::new(&test_config(&url, HandleType::Event)).unwrap();

    assert!(dispatcher
        .handle_publish("hermes/intent/GetTime", b"{not json")
        .await
        .is_none());
    assert!(dispatcher
        .handle_publish("hermes/hotword/default/detected", b"{}")
        .await
        .is_none());
    assert!(requests.lock().unwrap().is_empty());

    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn api_password_header_is_used_without_token() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut cfg = test_config(&url, HandleType::Event);
    cfg.home_assistant.access_token = None;
    cfg.home_assistant.api_password = Some("legacy".to_string());
    let mut dispatcher = Dispatcher::new(&cfg).unwrap();

    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].headers["x-ha-access"], "legacy");
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn supervisor_token_is_read_on_every_request() {
    let (url, requests) = start_mock(StatusCode::OK, "[]").await;
    let mut cfg = test_config(&url, HandleType::Event);
    cfg.home_assistant.access_token = None;
    let mut dispatcher = Dispatcher::new(&cfg).unwrap();

    std::env::set_var(HASSIO_TOKEN_ENV, "supervisor-1");
    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;
    std::env::set_var(HASSIO_TOKEN_ENV, "supervisor-2");
    dispatcher
        .handle_publish("hermes/intent/GetTime", &intent_payload("GetTime", None))
        .await;
    std::env::remove_var(HASSIO_TOKEN_ENV);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].headers["authorization"], "Bearer supervisor-1");
    assert_eq!(requests[1].headers["authorization"], "Bearer supervisor-2");
}

#[tokio::test]
async fn slow_home_assistant_does_not_hold_up_intake() {
    let delay = Duration::from_millis(300);
    let (url, requests) = start_slow_mock(StatusCode::OK, "[]", delay).await;
    let dispatcher = Dispatcher::new(&test_config(&url, HandleType::Event)).unwrap();
    let (client, _eventloop) =
        AsyncClient::new(MqttOptions::new("dispatch-test", "localhost", 1883), 10);
    let (inbox, worker) = spawn_dispatcher(dispatcher, client);

    let started = Instant::now();
    for name in ["First", "Second", "Third"] {
        let publish = Publish::new(
            format!("hermes/intent/{name}"),
            QoS::AtMostOnce,
            intent_payload(name, None),
        );
        inbox.send(publish).unwrap();
    }
    assert!(started.elapsed() < delay);

    drop(inbox);
    worker.await.unwrap();
    assert!(started.elapsed() >= delay * 3);

    let paths: Vec<String> = requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.path.clone())
        .collect();
    assert_eq!(
        paths,
        [
            "/api/events/rhasspy_First",
            "/api/events/rhasspy_Second",
            "/api/events/rhasspy_Third",
        ]
    );
}
