use serde_json::{json, Value};

use super::names;
use crate::dialect::{CommandFailure, Dialect, Incoming};
use crate::WireError;

/// Legacy flat-command protocol: `{command, id, data}` in both directions,
/// with an integer `result` code on responses (0 = success) and no `id` on
/// unsolicited notifications.
pub struct LegacyToolsDialect;

const EVENTS: &[(&str, &str)] = &[
    ("suspended", names::EVENT_PAUSED),
    ("resumed", names::EVENT_RESUMED),
    ("scriptParsed", names::EVENT_SCRIPT_PARSED),
    ("breakpointResolved", names::EVENT_BREAKPOINT_RESOLVED),
];

impl Dialect for LegacyToolsDialect {
    fn name(&self) -> &'static str {
        "legacy-tools"
    }

    fn encode_command(&self, seq: u64, method: &str, params: &Value) -> String {
        json!({
            "command": method,
            "id": seq,
            "data": params,
        })
        .to_string()
    }

    fn decode(&self, raw: &str) -> Result<Incoming, WireError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| WireError::MalformedMessage(err.to_string()))?;
        let command = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::MalformedMessage("missing command field".to_string()))?;

        match value.get("id") {
            Some(id) => {
                let seq = id
                    .as_u64()
                    .ok_or_else(|| WireError::MalformedMessage(format!("non-integer id: {id}")))?;
                let result = match value.get("result").and_then(Value::as_i64) {
                    Some(0) => Ok(value.get("data").cloned().unwrap_or(Value::Null)),
                    Some(code) => {
                        let message = value
                            .get("data")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("command failed with code {code}"));
                        Err(WireError::Command(CommandFailure {
                            message,
                            details: Some(json!({ "code": code })),
                        }))
                    }
                    None => Err(WireError::MalformedResponse(
                        "response without result code".to_string(),
                    )),
                };
                Ok(Incoming::Response { seq, result })
            }
            None => {
                let name = EVENTS
                    .iter()
                    .find(|(wire, _)| *wire == command)
                    .map(|(_, canonical)| *canonical)
                    .unwrap_or(command);
                Ok(Incoming::Event {
                    name: name.to_string(),
                    params: value.get("data").cloned().unwrap_or(Value::Null),
                })
            }
        }
    }
}
