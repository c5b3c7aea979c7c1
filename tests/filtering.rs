//! Filtering Integration Tests
//!
//! Mappings built from configuration, evaluated through the dispatcher with
//! real Lua predicate scripts.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use mqti::bridge::Dispatcher;
use mqti::config::{Config, MappingConfig};
use mqti::filter::Decision;
use mqti::message::InboundMessage;
use mqti::registry::{Mapping, MappingRegistry};

fn script(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

async fn dispatch(mapping: &Arc<Mapping>, payload: &'static [u8]) -> (Decision, usize) {
    let (tx, mut rx) = mpsc::channel(4);
    let dispatcher = Dispatcher::new(tx);
    let message = InboundMessage::new("t", Bytes::from_static(payload), mapping.clone());
    let decision = dispatcher.dispatch(message).await.unwrap();
    drop(dispatcher);

    let mut forwarded = 0;
    while rx.recv().await.is_some() {
        forwarded += 1;
    }
    (decision, forwarded)
}

#[tokio::test]
async fn test_script_keeps_only_matching_payload() {
    let file = script(r#"function match(payload) return payload == "X" end"#);
    let mapping = Arc::new(Mapping::from_config(
        0,
        &MappingConfig {
            topic: "t".to_string(),
            lua_file: Some(file.path().display().to_string()),
            ..Default::default()
        },
    ));

    assert_eq!(dispatch(&mapping, b"X").await, (Decision::Keep, 1));
    assert_eq!(dispatch(&mapping, b"Y").await, (Decision::Skip, 0));
    assert_eq!(dispatch(&mapping, b"").await, (Decision::Skip, 0));
}

#[tokio::test]
async fn test_script_governs_when_fields_also_configured() {
    let file = script(r#"function match(payload) return payload == "X" end"#);
    let group: HashMap<String, String> = [("kind".to_string(), "alarm".to_string())].into();
    let mapping = Arc::new(Mapping::from_config(
        0,
        &MappingConfig {
            topic: "t".to_string(),
            lua_file: Some(file.path().display().to_string()),
            filter: vec![group],
            ..Default::default()
        },
    ));

    // Not JSON at all, so the field rule would have rejected it
    assert_eq!(dispatch(&mapping, b"X").await, (Decision::Keep, 1));
    // Satisfies the field rule, but the script says no
    assert_eq!(
        dispatch(&mapping, br#"{"kind":"alarm"}"#).await,
        (Decision::Skip, 0)
    );
}

#[tokio::test]
async fn test_script_state_does_not_survive_between_messages() {
    let file = script(
        r#"
calls = (calls or 0) + 1
function match(payload) return calls == 1 end
"#,
    );
    let mapping = Arc::new(Mapping::from_config(
        0,
        &MappingConfig {
            topic: "t".to_string(),
            lua_file: Some(file.path().display().to_string()),
            ..Default::default()
        },
    ));

    for _ in 0..3 {
        assert_eq!(dispatch(&mapping, b"any").await, (Decision::Keep, 1));
    }
}

#[tokio::test]
async fn test_script_receives_non_utf8_payload_unchanged() {
    let file = script("function match(payload) return #payload == 1 end");
    let mapping = Arc::new(Mapping::from_config(
        0,
        &MappingConfig {
            topic: "t".to_string(),
            lua_file: Some(file.path().display().to_string()),
            ..Default::default()
        },
    ));

    assert_eq!(dispatch(&mapping, b"\xff").await, (Decision::Keep, 1));
    assert_eq!(dispatch(&mapping, b"\xc3\xa9").await, (Decision::Skip, 0));
}

#[tokio::test]
async fn test_script_can_decode_json() {
    let file = script(
        r#"
local json = require("json")
function match(payload)
    local doc = json.decode(payload)
    return doc.level >= 3
end
"#,
    );
    let mapping = Arc::new(Mapping::from_config(
        0,
        &MappingConfig {
            topic: "t".to_string(),
            lua_file: Some(file.path().display().to_string()),
            ..Default::default()
        },
    ));

    assert_eq!(dispatch(&mapping, br#"{"level":5}"#).await.0, Decision::Keep);
    assert_eq!(dispatch(&mapping, br#"{"level":1}"#).await.0, Decision::Skip);
}

#[tokio::test]
async fn test_missing_script_is_fatal() {
    let mapping = Arc::new(Mapping::from_config(
        0,
        &MappingConfig {
            topic: "t".to_string(),
            lua_file: Some("/nonexistent/mqti/filter.lua".to_string()),
            ..Default::default()
        },
    ));

    let (tx, _rx) = mpsc::channel(1);
    let err = Dispatcher::new(tx)
        .dispatch(InboundMessage::new("t", Bytes::from_static(b"X"), mapping))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("filter.lua"));
}

#[tokio::test]
async fn test_registry_from_parsed_config() {
    let file = script("function match(p) return true end");
    let content = format!(
        r#"
[mqtt]
client_id = "edge-01"

[[mapping]]
topic = "alarms/#"
filter = [{{ severity = "high" }}]

[[mapping]]
topic = "inverted"
invert = true
filter = [{{ severity = "high", site = "north" }}]

[[mapping]]
topic = "scripted"
lua_file = "{}"

[[mapping]]
topic = "everything/#"
"#,
        file.path().display()
    );
    let config = Config::parse(&content).unwrap();
    let registry = MappingRegistry::from_configs(&config.mapping);

    let kinds: Vec<_> = registry.iter().map(|m| m.filter().kind()).collect();
    assert_eq!(kinds, vec!["fields", "fields", "script", "pass-through"]);

    let alarms = registry.get(0).unwrap();
    assert_eq!(
        dispatch(alarms, br#"{"severity":"high","extra":"x"}"#).await,
        (Decision::Keep, 1)
    );
    assert_eq!(
        dispatch(alarms, br#"{"severity":"low"}"#).await,
        (Decision::Skip, 0)
    );

    // Inverted: any single matching key keeps the message
    let inverted = registry.get(1).unwrap();
    assert_eq!(
        dispatch(inverted, br#"{"severity":"high","site":"south"}"#).await,
        (Decision::Keep, 1)
    );
    assert_eq!(
        dispatch(inverted, br#"{"severity":"low","site":"south"}"#).await,
        (Decision::Skip, 0)
    );

    let everything = registry.get(3).unwrap();
    assert_eq!(dispatch(everything, b"\xff not json").await, (Decision::Keep, 1));
}
