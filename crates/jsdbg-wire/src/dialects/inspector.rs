use serde_json::{json, Value};

use super::names;
use crate::dialect::{CommandFailure, Dialect, Incoming};
use crate::WireError;

/// Dotted Inspector-style protocol: `{id, method, params}` requests,
/// `{id, result|error}` responses, `{method, params}` events.
pub struct InspectorDialect;

const METHODS: &[(&str, &str)] = &[
    (names::LOOKUP, "Runtime.getRemoteObjects"),
    (names::GET_PROPERTIES, "Runtime.getProperties"),
    (names::SET_BREAKPOINT, "Debugger.setBreakpointByUrl"),
    (names::REMOVE_BREAKPOINT, "Debugger.removeBreakpoint"),
    (names::CONTINUE, "Debugger.resume"),
    (names::SCRIPTS, "Debugger.listScripts"),
    (names::GET_SCRIPT_SOURCE, "Debugger.getScriptSource"),
    (names::EVALUATE, "Debugger.evaluateOnCallFrame"),
    (names::BIND_EVALUATE_CONTEXT, "Runtime.callFunctionOn"),
    (names::RELEASE_EVALUATE_CONTEXT, "Runtime.releaseObject"),
];

const EVENTS: &[(&str, &str)] = &[
    ("Debugger.paused", names::EVENT_PAUSED),
    ("Debugger.resumed", names::EVENT_RESUMED),
    ("Debugger.scriptParsed", names::EVENT_SCRIPT_PARSED),
    ("Debugger.breakpointResolved", names::EVENT_BREAKPOINT_RESOLVED),
];

fn wire_method(method: &str) -> &str {
    METHODS
        .iter()
        .find(|(canonical, _)| *canonical == method)
        .map(|(_, wire)| *wire)
        .unwrap_or(method)
}

fn canonical_event(wire: &str) -> &str {
    EVENTS
        .iter()
        .find(|(name, _)| *name == wire)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(wire)
}

impl Dialect for InspectorDialect {
    fn name(&self) -> &'static str {
        "inspector"
    }

    fn encode_command(&self, seq: u64, method: &str, params: &Value) -> String {
        json!({
            "id": seq,
            "method": wire_method(method),
            "params": params,
        })
        .to_string()
    }

    fn decode(&self, raw: &str) -> Result<Incoming, WireError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| WireError::MalformedMessage(err.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| WireError::MalformedMessage("not a JSON object".to_string()))?;

        if let Some(id) = object.get("id") {
            let seq = id
                .as_u64()
                .ok_or_else(|| WireError::MalformedMessage(format!("non-integer id: {id}")))?;
            let result = match object.get("error") {
                Some(error) => {
                    let message = error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    Err(WireError::Command(CommandFailure {
                        message,
                        details: error.get("data").cloned(),
                    }))
                }
                None => match object.get("result") {
                    Some(result) => Ok(result.clone()),
                    None => Err(WireError::MalformedResponse(
                        "response carries neither result nor error".to_string(),
                    )),
                },
            };
            return Ok(Incoming::Response { seq, result });
        }

        match object.get("method").and_then(Value::as_str) {
            Some(method) => Ok(Incoming::Event {
                name: canonical_event(method).to_string(),
                params: object.get("params").cloned().unwrap_or(Value::Null),
            }),
            None => Err(WireError::MalformedMessage(
                "message has neither id nor method".to_string(),
            )),
        }
    }
}
