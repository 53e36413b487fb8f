//! Thin wire-dialect adapters.
//!
//! Each adapter binds the engine's abstract envelope (has-id response vs.
//! has-name event) to one concrete protocol family. Only envelope fields and
//! name normalization live here; payload shapes pass through as raw JSON.

mod inspector;
mod legacy;
mod v8;

pub use inspector::InspectorDialect;
pub use legacy::LegacyToolsDialect;
pub use v8::V8Dialect;

/// Canonical method and event names used between the engine and the session
/// layer. Adapters translate these to and from wire names.
pub mod names {
    pub const LOOKUP: &str = "lookup";
    pub const GET_PROPERTIES: &str = "getProperties";
    pub const SET_BREAKPOINT: &str = "setBreakpoint";
    pub const REMOVE_BREAKPOINT: &str = "removeBreakpoint";
    pub const CONTINUE: &str = "continue";
    pub const SCRIPTS: &str = "scripts";
    pub const GET_SCRIPT_SOURCE: &str = "getScriptSource";
    pub const EVALUATE: &str = "evaluate";
    pub const BIND_EVALUATE_CONTEXT: &str = "bindEvaluateContext";
    pub const RELEASE_EVALUATE_CONTEXT: &str = "releaseEvaluateContext";

    pub const EVENT_PAUSED: &str = "paused";
    pub const EVENT_RESUMED: &str = "resumed";
    pub const EVENT_SCRIPT_PARSED: &str = "scriptParsed";
    pub const EVENT_BREAKPOINT_RESOLVED: &str = "breakpointResolved";
}
