//! Debug session layer on top of [`jsdbg-wire`].
//!
//! Where the wire crate moves correlated request/response traffic, this crate
//! holds the client-side model of the remote VM: cached value mirrors with
//! epoch-based freshness, breakpoints reconciled against remote state, scripts
//! with lazily loaded sources, and pause snapshots published to the embedder
//! only once they are self-contained.
//!
//! The entry point is [`DebugSession::attach`], which wires a [`Dialect`] and
//! a [`Transport`] into one session with its own dispatch context.
//!
//! [`jsdbg-wire`]: jsdbg_wire
//! [`Dialect`]: jsdbg_wire::Dialect
//! [`Transport`]: jsdbg_wire::Transport

mod breakpoints;
mod error;
mod pause;
mod scripts;
mod session;
#[cfg(test)]
mod testutil;
mod value;

use std::fmt;

pub use breakpoints::{Breakpoint, BreakpointMap, BreakpointSpec, BreakpointTarget, ResolvedLocation};
pub use error::{ClientError, Result};
pub use pause::{
    CallFrame, ExceptionInfo, PauseSnapshot, Scope, ScopeKind, SnapshotBuilder, StepAction,
    ValueCallback,
};
pub use scripts::{Script, ScriptRegistry};
pub use session::{DebugEventListener, DebugSession};
pub use value::{
    LoadError, MirrorsCallback, Property, PropertyLoad, PropertySet, Scalar, TypeTag, ValueCache,
    ValueMirror,
};

/// Session-local identifier for a breakpoint, assigned at creation and stable
/// across remote re-installation.
pub type BreakpointId = u64;

/// Opaque VM-issued handle naming a remote object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteRef(String);

impl RemoteRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteRef {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Opaque VM-issued handle naming a script.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
