use serde_json::{json, Value};

use super::names;
use crate::dialect::{CommandFailure, Dialect, Incoming};
use crate::WireError;

/// Numbered JSON-RPC-like V8 debugger protocol: every message carries a `seq`
/// and a `type` discriminator; responses point back via `request_seq` and a
/// `success` flag.
pub struct V8Dialect;

const METHODS: &[(&str, &str)] = &[
    (names::LOOKUP, "lookup"),
    (names::GET_PROPERTIES, "lookup"),
    (names::SET_BREAKPOINT, "setbreakpoint"),
    (names::REMOVE_BREAKPOINT, "clearbreakpoint"),
    (names::CONTINUE, "continue"),
    (names::SCRIPTS, "scripts"),
    (names::GET_SCRIPT_SOURCE, "source"),
    (names::EVALUATE, "evaluate"),
];

const EVENTS: &[(&str, &str)] = &[
    ("break", names::EVENT_PAUSED),
    ("exception", names::EVENT_PAUSED),
    ("afterCompile", names::EVENT_SCRIPT_PARSED),
];

impl Dialect for V8Dialect {
    fn name(&self) -> &'static str {
        "v8"
    }

    fn encode_command(&self, seq: u64, method: &str, params: &Value) -> String {
        let command = METHODS
            .iter()
            .find(|(canonical, _)| *canonical == method)
            .map(|(_, wire)| *wire)
            .unwrap_or(method);
        json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": params,
        })
        .to_string()
    }

    fn decode(&self, raw: &str) -> Result<Incoming, WireError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| WireError::MalformedMessage(err.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::MalformedMessage("missing type field".to_string()))?;

        match kind {
            "response" => {
                let seq = value
                    .get("request_seq")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        WireError::MalformedMessage("response without request_seq".to_string())
                    })?;
                let success = value.get("success").and_then(Value::as_bool);
                let result = match success {
                    Some(true) => Ok(value.get("body").cloned().unwrap_or(Value::Null)),
                    Some(false) => {
                        let message = value
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("command failed")
                            .to_string();
                        Err(WireError::Command(CommandFailure {
                            message,
                            details: None,
                        }))
                    }
                    None => Err(WireError::MalformedResponse(
                        "response without success flag".to_string(),
                    )),
                };
                Ok(Incoming::Response { seq, result })
            }
            "event" => {
                let event = value
                    .get("event")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        WireError::MalformedMessage("event without a name".to_string())
                    })?;
                let name = EVENTS
                    .iter()
                    .find(|(wire, _)| *wire == event)
                    .map(|(_, canonical)| *canonical)
                    .unwrap_or(event);
                Ok(Incoming::Event {
                    name: name.to_string(),
                    params: value.get("body").cloned().unwrap_or(Value::Null),
                })
            }
            other => Err(WireError::MalformedMessage(format!(
                "unrecognized message type: {other}"
            ))),
        }
    }
}
