use std::fmt;

use serde_json::Value;

use crate::WireError;

/// Typed error carried by a command response.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandFailure {
    pub message: String,
    pub details: Option<Value>,
}

impl CommandFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A decoded incoming message, reduced to the only shape the engine depends
/// on: correlated response vs. named event.
#[derive(Debug)]
pub enum Incoming {
    /// Answer to a previously sent command, correlated by sequence id.
    ///
    /// `result` is `Err` both for typed VM-level failures and for responses
    /// whose payload could not be decoded; the distinction is preserved in the
    /// error value because the two are handled identically by the processor
    /// (the pending request fails) but differently by callers.
    Response {
        seq: u64,
        result: Result<Value, WireError>,
    },
    /// Unsolicited event. `name` is the dialect-normalized (canonical) event
    /// name used for dispatch-table lookup.
    Event { name: String, params: Value },
}

/// Binding between the engine and one concrete wire protocol.
///
/// Implementations are thin: envelope encode/decode and event-name
/// normalization only. All correlation, ordering and callback logic lives in
/// [`crate::CommandProcessor`], which is generic over this trait.
pub trait Dialect: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Encode an outgoing command envelope carrying the given sequence id.
    ///
    /// `method` is the engine's canonical method name; the adapter translates
    /// it to whatever the wire protocol calls it.
    fn encode_command(&self, seq: u64, method: &str, params: &Value) -> String;

    /// Decode an incoming text message into the abstract shape.
    ///
    /// Returns `Err` only when the message cannot be classified at all (not
    /// even a sequence id was recoverable); such messages are logged and
    /// dropped by the processor if they would have been events, and are a hard
    /// failure of the matching request when a sequence id was recovered (see
    /// [`Incoming::Response`]).
    fn decode(&self, raw: &str) -> Result<Incoming, WireError>;
}
