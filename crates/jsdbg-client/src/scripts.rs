//! Scripts announced by the VM and their lazily fetched sources.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use jsdbg_wire::dialects::names;
use jsdbg_wire::{CommandBus, Relay, WireError};

use crate::error::{ClientError, Result};
use crate::ScriptId;

#[derive(Clone)]
enum SourceState {
    Unloaded,
    Loaded(Arc<str>),
    // The VM confirmed it cannot serve this source; never retried.
    Unavailable,
}

struct ScriptData {
    url: Option<String>,
    // Position of the script's first statement within its resource.
    start_line: u64,
    start_column: u64,
    source: SourceState,
}

struct ScriptInner {
    id: ScriptId,
    data: Mutex<ScriptData>,
}

/// One script known to the session. Source text is absent until fetched.
#[derive(Clone)]
pub struct Script {
    inner: Arc<ScriptInner>,
}

impl Script {
    pub fn id(&self) -> &ScriptId {
        &self.inner.id
    }

    pub fn url(&self) -> Option<String> {
        self.inner.data.lock().url.clone()
    }

    /// Line offset of the script within its containing resource.
    pub fn start_line(&self) -> u64 {
        self.inner.data.lock().start_line
    }

    /// Column offset of the script's first line.
    pub fn start_column(&self) -> u64 {
        self.inner.data.lock().start_column
    }

    pub fn source(&self) -> Option<Arc<str>> {
        match &self.inner.data.lock().source {
            SourceState::Loaded(text) => Some(Arc::clone(text)),
            _ => None,
        }
    }

    pub fn is_source_unavailable(&self) -> bool {
        matches!(self.inner.data.lock().source, SourceState::Unavailable)
    }

    /// Source text, distinguishing "not fetched yet" (`Ok(None)`) from a
    /// confirmed-unavailable source.
    pub fn require_source(&self) -> Result<Option<Arc<str>>> {
        match &self.inner.data.lock().source {
            SourceState::Loaded(text) => Ok(Some(Arc::clone(text))),
            SourceState::Unloaded => Ok(None),
            SourceState::Unavailable => {
                Err(ClientError::ScriptUnavailable(self.inner.id.clone()))
            }
        }
    }

    fn needs_source(&self) -> bool {
        matches!(self.inner.data.lock().source, SourceState::Unloaded)
    }

    fn set_source(&self, text: String) {
        self.inner.data.lock().source = SourceState::Loaded(Arc::from(text));
    }

    fn mark_unavailable(&self) {
        self.inner.data.lock().source = SourceState::Unavailable;
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("Script")
            .field("id", &self.inner.id)
            .field("url", &data.url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ScriptParsedPayload {
    #[serde(rename = "scriptId")]
    script_id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "startLine", default)]
    start_line: u64,
    #[serde(rename = "startColumn", default)]
    start_column: u64,
}

struct RegistryInner {
    bus: Arc<dyn CommandBus>,
    scripts: Mutex<HashMap<ScriptId, Script>>,
}

// Aggregates one relay across a batch of source fetches; the last fetch to
// finish discharges it.
struct SourceBatch {
    remaining: AtomicUsize,
    relay: Mutex<Option<Relay>>,
    failed: Mutex<Option<WireError>>,
}

impl SourceBatch {
    fn step_done(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let Some(relay) = self.relay.lock().take() else {
            return;
        };
        match self.failed.lock().take() {
            Some(err) => relay.fail(err),
            None => relay.succeed(),
        }
    }
}

/// All scripts of one session, keyed by VM script id.
#[derive(Clone)]
pub struct ScriptRegistry {
    inner: Arc<RegistryInner>,
}

impl ScriptRegistry {
    pub fn new(bus: Arc<dyn CommandBus>) -> ScriptRegistry {
        ScriptRegistry {
            inner: Arc::new(RegistryInner {
                bus,
                scripts: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn get(&self, id: &ScriptId) -> Option<Script> {
        self.inner.scripts.lock().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Script> {
        let mut scripts: Vec<_> = self.inner.scripts.lock().values().cloned().collect();
        scripts.sort_by(|a, b| a.id().cmp(b.id()));
        scripts
    }

    /// Register a VM-announced script. Returns the script and whether it was
    /// previously unknown (placeholders learned from pause payloads count as
    /// known but may gain a URL here).
    pub fn on_script_parsed(&self, params: Value) -> Result<(Script, bool)> {
        let payload: ScriptParsedPayload = serde_json::from_value(params)
            .map_err(|err| ClientError::MalformedEvent(err.to_string()))?;
        let id = ScriptId::new(payload.script_id);
        let mut scripts = self.inner.scripts.lock();
        match scripts.get(&id) {
            Some(script) => {
                let script = script.clone();
                drop(scripts);
                let mut data = script.inner.data.lock();
                if data.url.is_none() {
                    data.url = payload.url;
                    data.start_line = payload.start_line;
                    data.start_column = payload.start_column;
                }
                drop(data);
                Ok((script, false))
            }
            None => {
                let script = Script {
                    inner: Arc::new(ScriptInner {
                        id: id.clone(),
                        data: Mutex::new(ScriptData {
                            url: payload.url,
                            start_line: payload.start_line,
                            start_column: payload.start_column,
                            source: SourceState::Unloaded,
                        }),
                    }),
                };
                scripts.insert(id, script.clone());
                Ok((script, true))
            }
        }
    }

    /// The script with `id`, registering a bare placeholder when the VM has
    /// referenced it without announcing it first.
    pub fn ensure(&self, id: &ScriptId) -> Script {
        let mut scripts = self.inner.scripts.lock();
        scripts
            .entry(id.clone())
            .or_insert_with(|| Script {
                inner: Arc::new(ScriptInner {
                    id: id.clone(),
                    data: Mutex::new(ScriptData {
                        url: None,
                        start_line: 0,
                        start_column: 0,
                        source: SourceState::Unloaded,
                    }),
                }),
            })
            .clone()
    }

    /// Ensure every script in `ids` has its source resolved or confirmed
    /// unavailable, then discharge `relay`.
    ///
    /// A typed refusal from the VM marks the script permanently unavailable
    /// and still counts as resolution; only infrastructure failures (closed
    /// connection, transport) fail the relay.
    pub fn load_sources(&self, ids: BTreeSet<ScriptId>, relay: Relay) {
        let to_fetch: Vec<Script> = ids
            .iter()
            .map(|id| self.ensure(id))
            .filter(Script::needs_source)
            .collect();
        if to_fetch.is_empty() {
            relay.succeed();
            return;
        }

        let batch = Arc::new(SourceBatch {
            remaining: AtomicUsize::new(to_fetch.len()),
            relay: Mutex::new(Some(relay)),
            failed: Mutex::new(None),
        });
        for script in to_fetch {
            let batch = Arc::clone(&batch);
            self.inner.bus.send_command(
                names::GET_SCRIPT_SOURCE,
                json!({ "scriptId": script.id().as_str() }),
                Relay::detached("scripts.loadSource"),
                Box::new(move |result, step_relay| {
                    match result {
                        Ok(body) => match body.get("source").and_then(Value::as_str) {
                            Some(text) => script.set_source(text.to_string()),
                            None => script.mark_unavailable(),
                        },
                        Err(WireError::Command(failure)) => {
                            tracing::debug!(
                                target: "jsdbg.scripts",
                                script = %script.id(),
                                error = %failure,
                                "source refused by VM; marking unavailable"
                            );
                            script.mark_unavailable();
                        }
                        Err(err) => {
                            *batch.failed.lock() = Some(err);
                        }
                    }
                    batch.step_done();
                    step_relay.succeed();
                }),
            );
        }
    }

    /// Fetch source text for `id`, for callers outside a batch.
    pub fn load_source(&self, id: &ScriptId, relay: Relay) {
        let mut ids = BTreeSet::new();
        ids.insert(id.clone());
        self.load_sources(ids, relay);
    }
}
