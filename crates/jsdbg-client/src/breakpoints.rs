//! Client-authoritative breakpoints, reconciled against remote VM state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use jsdbg_wire::dialects::names;
use jsdbg_wire::{CommandBus, Relay, WireError};

use crate::error::{ClientError, Result};
use crate::{BreakpointId, ScriptId};

/// Where a breakpoint is anchored. Name targets survive VM restarts and
/// match scripts by URL; id targets bind to one concrete script instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreakpointTarget {
    ScriptName(String),
    Script(ScriptId),
}

/// A concrete location the VM bound a breakpoint to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedLocation {
    pub script: ScriptId,
    pub line: u64,
    pub column: Option<u64>,
}

/// Requested shape of a new breakpoint.
#[derive(Clone, Debug)]
pub struct BreakpointSpec {
    pub target: BreakpointTarget,
    pub line: u64,
    pub column: Option<u64>,
    pub condition: Option<String>,
    pub enabled: bool,
}

struct BreakpointState {
    remote_id: Option<String>,
    condition: Option<String>,
    enabled: bool,
    // Local mutations set this; flush clears it optimistically before
    // talking to the VM, so a failed update leaves the breakpoint out of
    // sync until something re-marks it.
    dirty: bool,
    resolved: HashSet<ResolvedLocation>,
}

struct BreakpointInner {
    local_id: BreakpointId,
    target: BreakpointTarget,
    line: u64,
    column: Option<u64>,
    state: Mutex<BreakpointState>,
}

/// One client-side breakpoint.
///
/// The client copy is authoritative: mutations only touch local state and
/// mark it dirty, and [`Breakpoint::flush`] pushes the delta to the VM.
/// Changing an installed breakpoint is remove-then-recreate, chained through
/// a single completion relay.
#[derive(Clone)]
pub struct Breakpoint {
    inner: Arc<BreakpointInner>,
    db: Weak<BreakpointDb>,
}

#[derive(Deserialize)]
struct LocationPayload {
    #[serde(rename = "scriptId")]
    script_id: String,
    line: u64,
    #[serde(default)]
    column: Option<u64>,
}

#[derive(Deserialize)]
struct SetBreakpointResult {
    #[serde(rename = "breakpointId")]
    breakpoint_id: String,
    #[serde(default)]
    locations: Vec<LocationPayload>,
}

#[derive(Deserialize)]
struct ResolvedPayload {
    #[serde(rename = "breakpointId")]
    breakpoint_id: String,
    location: LocationPayload,
}

impl From<LocationPayload> for ResolvedLocation {
    fn from(payload: LocationPayload) -> Self {
        ResolvedLocation {
            script: ScriptId::new(payload.script_id),
            line: payload.line,
            column: payload.column,
        }
    }
}

impl Breakpoint {
    pub fn local_id(&self) -> BreakpointId {
        self.inner.local_id
    }

    pub fn target(&self) -> &BreakpointTarget {
        &self.inner.target
    }

    pub fn line(&self) -> u64 {
        self.inner.line
    }

    pub fn column(&self) -> Option<u64> {
        self.inner.column
    }

    pub fn condition(&self) -> Option<String> {
        self.inner.state.lock().condition.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// VM-side id, present while the breakpoint is installed remotely.
    pub fn remote_id(&self) -> Option<String> {
        self.inner.state.lock().remote_id.clone()
    }

    /// Every location the VM has bound this breakpoint to, in stable order.
    pub fn resolved_locations(&self) -> Vec<ResolvedLocation> {
        let state = self.inner.state.lock();
        let mut locations: Vec<_> = state.resolved.iter().cloned().collect();
        locations.sort();
        locations
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.inner.state.lock();
        if state.enabled != enabled {
            state.enabled = enabled;
            state.dirty = true;
        }
    }

    pub fn set_condition(&self, condition: Option<String>) {
        let mut state = self.inner.state.lock();
        if state.condition != condition {
            state.condition = condition;
            state.dirty = true;
        }
    }

    /// Push local state to the VM if dirty; otherwise complete immediately.
    ///
    /// Installed breakpoints are updated by removing the remote instance and,
    /// if still enabled, recreating it with the current local shape. The
    /// relay travels the whole chain and fires exactly once at its end.
    pub fn flush(&self, bus: &Arc<dyn CommandBus>, relay: Relay) {
        let (remote_id, enabled) = {
            let mut state = self.inner.state.lock();
            if !state.dirty {
                relay.succeed();
                return;
            }
            state.dirty = false;
            (state.remote_id.clone(), state.enabled)
        };

        match remote_id {
            Some(remote_id) => {
                let this = self.clone();
                let bus_again = Arc::clone(bus);
                bus.send_command(
                    names::REMOVE_BREAKPOINT,
                    json!({ "breakpointId": remote_id }),
                    relay,
                    Box::new(move |result, relay| match result {
                        Ok(_) => {
                            this.drop_remote_state();
                            if enabled {
                                this.send_set(&bus_again, relay);
                            } else {
                                relay.succeed();
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                target: "jsdbg.breakpoints",
                                local_id = this.inner.local_id,
                                error = %err,
                                "breakpoint removal failed"
                            );
                            relay.fail(err);
                        }
                    }),
                );
            }
            None if enabled => self.send_set(bus, relay),
            None => relay.succeed(),
        }
    }

    /// Remove the breakpoint from the VM (if installed) and unregister it.
    pub fn clear(&self, bus: &Arc<dyn CommandBus>, relay: Relay) {
        let remote_id = self.inner.state.lock().remote_id.clone();
        let Some(remote_id) = remote_id else {
            self.unregister();
            relay.succeed();
            return;
        };
        let this = self.clone();
        bus.send_command(
            names::REMOVE_BREAKPOINT,
            json!({ "breakpointId": remote_id }),
            relay,
            Box::new(move |result, relay| match result {
                Ok(_) => {
                    this.drop_remote_state();
                    this.unregister();
                    relay.succeed();
                }
                Err(err) => relay.fail(err),
            }),
        );
    }

    fn send_set(&self, bus: &Arc<dyn CommandBus>, relay: Relay) {
        let mut params = serde_json::Map::new();
        match &self.inner.target {
            BreakpointTarget::ScriptName(url) => {
                params.insert("url".to_string(), json!(url));
            }
            BreakpointTarget::Script(id) => {
                params.insert("scriptId".to_string(), json!(id.as_str()));
            }
        }
        params.insert("line".to_string(), json!(self.inner.line));
        if let Some(column) = self.inner.column {
            params.insert("column".to_string(), json!(column));
        }
        if let Some(condition) = self.condition() {
            params.insert("condition".to_string(), json!(condition));
        }

        let this = self.clone();
        bus.send_command(
            names::SET_BREAKPOINT,
            Value::Object(params),
            relay,
            Box::new(move |result, relay| {
                let parsed = result.and_then(|body| {
                    serde_json::from_value::<SetBreakpointResult>(body)
                        .map_err(|err| WireError::MalformedResponse(err.to_string()))
                });
                match parsed {
                    Ok(data) => {
                        this.install_remote_state(data);
                        relay.succeed();
                    }
                    Err(err) => relay.fail(err),
                }
            }),
        );
    }

    fn install_remote_state(&self, data: SetBreakpointResult) {
        {
            let mut state = self.inner.state.lock();
            state.remote_id = Some(data.breakpoint_id.clone());
            // A fresh install starts the resolved set over; later
            // breakpointResolved events accumulate into it.
            state.resolved = data.locations.into_iter().map(Into::into).collect();
        }
        if let Some(db) = self.db.upgrade() {
            db.by_remote
                .lock()
                .insert(data.breakpoint_id, self.inner.local_id);
        }
    }

    fn drop_remote_state(&self) {
        let remote_id = {
            let mut state = self.inner.state.lock();
            state.resolved.clear();
            state.remote_id.take()
        };
        if let (Some(remote_id), Some(db)) = (remote_id, self.db.upgrade()) {
            db.by_remote.lock().remove(&remote_id);
        }
    }

    fn add_resolved(&self, location: ResolvedLocation) {
        self.inner.state.lock().resolved.insert(location);
    }

    fn unregister(&self) {
        if let Some(db) = self.db.upgrade() {
            db.by_local.lock().remove(&self.inner.local_id);
        }
    }
}

#[derive(Default)]
struct BreakpointDb {
    next_local: AtomicU64,
    by_local: Mutex<HashMap<BreakpointId, Breakpoint>>,
    by_remote: Mutex<HashMap<String, BreakpointId>>,
}

/// Registry of all breakpoints of one session, addressable by local id and by
/// the VM's remote id.
#[derive(Clone, Default)]
pub struct BreakpointMap {
    db: Arc<BreakpointDb>,
}

impl BreakpointMap {
    pub fn new() -> BreakpointMap {
        BreakpointMap::default()
    }

    pub fn create(&self, spec: BreakpointSpec) -> Breakpoint {
        let local_id = self.db.next_local.fetch_add(1, Ordering::Relaxed) + 1;
        let breakpoint = Breakpoint {
            inner: Arc::new(BreakpointInner {
                local_id,
                target: spec.target,
                line: spec.line,
                column: spec.column,
                state: Mutex::new(BreakpointState {
                    remote_id: None,
                    condition: spec.condition,
                    enabled: spec.enabled,
                    // New breakpoints exist only locally until flushed.
                    dirty: true,
                    resolved: HashSet::new(),
                }),
            }),
            db: Arc::downgrade(&self.db),
        };
        self.db
            .by_local
            .lock()
            .insert(local_id, breakpoint.clone());
        breakpoint
    }

    pub fn get(&self, local_id: BreakpointId) -> Option<Breakpoint> {
        self.db.by_local.lock().get(&local_id).cloned()
    }

    pub fn all(&self) -> Vec<Breakpoint> {
        let mut breakpoints: Vec<_> = self.db.by_local.lock().values().cloned().collect();
        breakpoints.sort_by_key(Breakpoint::local_id);
        breakpoints
    }

    /// Merge a VM-announced binding into the matching breakpoint's resolved
    /// set. Never replaces locations learned earlier.
    pub fn on_breakpoint_resolved(&self, params: Value) -> Result<()> {
        let payload: ResolvedPayload = serde_json::from_value(params)
            .map_err(|err| ClientError::MalformedEvent(err.to_string()))?;
        let local_id = self
            .db
            .by_remote
            .lock()
            .get(&payload.breakpoint_id)
            .copied();
        match local_id.and_then(|id| self.get(id)) {
            Some(breakpoint) => breakpoint.add_resolved(payload.location.into()),
            None => {
                // Can happen legitimately when a resolution races a removal.
                tracing::debug!(
                    target: "jsdbg.breakpoints",
                    remote_id = %payload.breakpoint_id,
                    "resolution for unknown breakpoint dropped"
                );
            }
        }
        Ok(())
    }
}
