//! Dialect-agnostic wire engine for JavaScript VM debug protocols.
//!
//! `jsdbg-client` consumes this crate to speak to a remote VM: it turns an
//! unreliable, out-of-order text-message channel into correlated
//! request/response calls plus an ordered event stream, all serialized on a
//! single per-session dispatch context.
//!
//! The engine deliberately knows nothing about any concrete protocol's field
//! names. Everything wire-shaped lives behind the [`Dialect`] trait; the
//! [`dialects`] module ships three thin adapters for the protocol families
//! observed in the wild.

mod dialect;
pub mod dialects;
mod processor;
mod relay;
mod transport;

use std::time::Duration;

use thiserror::Error;

pub use dialect::{CommandFailure, Dialect, Incoming};
pub use processor::{
    CommandBus, CommandProcessor, EventHandler, EventTable, ResponseHandler, VmStatus,
    VmStatusObserver,
};
pub use relay::Relay;
pub use transport::{BlockingWaiter, Dispatcher, Transport, WaiterHandle};

// The scripted fake transport is only needed for tests and downstream integration
// suites. Compile it for jsdbg-wire's own unit tests unconditionally (via
// `cfg(test)`), while keeping it behind the `test-support` feature for normal
// builds and for downstream crates.
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    /// The session is torn down; all outstanding and future requests fail with this.
    #[error("connection closed")]
    ConnectionClosed,
    /// The transport refused an outgoing message synchronously.
    #[error("transport send failed: {0}")]
    Transport(String),
    /// The remote VM answered a command with a typed error response.
    #[error("command failed: {0}")]
    Command(CommandFailure),
    /// An incoming response matched a pending request but could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// An incoming message could not be decoded at all.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// A completion relay was dropped without being discharged.
    #[error("operation abandoned without completion")]
    Abandoned,
    /// A bounded blocking wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// A blocking API was invoked from the dispatch context.
    #[error("blocking call issued from the dispatch context")]
    BlockingOnDispatchContext,
    /// The dispatch context is gone (session torn down).
    #[error("dispatch context closed")]
    DispatchClosed,
}

impl WireError {
    /// Clones the error for fan-out to multiple waiters.
    ///
    /// `WireError` is not `Clone` because `std::io`-style sources may end up
    /// inside it later; the handful of variants produced by the engine itself
    /// copy cleanly.
    pub fn duplicate(&self) -> WireError {
        match self {
            WireError::ConnectionClosed => WireError::ConnectionClosed,
            WireError::Transport(msg) => WireError::Transport(msg.clone()),
            WireError::Command(failure) => WireError::Command(failure.clone()),
            WireError::MalformedResponse(msg) => WireError::MalformedResponse(msg.clone()),
            WireError::MalformedMessage(msg) => WireError::MalformedMessage(msg.clone()),
            WireError::Abandoned => WireError::Abandoned,
            WireError::Timeout(d) => WireError::Timeout(*d),
            WireError::BlockingOnDispatchContext => WireError::BlockingOnDispatchContext,
            WireError::DispatchClosed => WireError::DispatchClosed,
        }
    }
}
