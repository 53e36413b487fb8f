use thiserror::Error;

use jsdbg_wire::WireError;

use crate::value::LoadError;
use crate::ScriptId;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Load(#[from] LoadError),
    /// An event payload decoded as a message but not as the expected shape.
    /// The event is dropped; the session stays up.
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
    /// The VM reported an event sequence no conforming VM produces.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The VM confirmed it cannot serve this script's source.
    #[error("source for script {0} is unavailable")]
    ScriptUnavailable(ScriptId),
}
