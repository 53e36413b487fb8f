//! Pause snapshots: self-contained views of a suspended VM.
//!
//! A snapshot is published to the embedder only once every script its frames
//! reference has its source resolved or confirmed unavailable. A resume that
//! arrives while a snapshot is still under construction cancels publication;
//! the embedder never observes a pause that is already over.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use jsdbg_wire::dialects::names;
use jsdbg_wire::{CommandBus, Relay, WireError};

use crate::error::{ClientError, Result};
use crate::scripts::ScriptRegistry;
use crate::session::DebugEventListener;
use crate::value::{ValueCache, ValueMirror};
use crate::{RemoteRef, ScriptId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Local,
    Closure,
    With,
    Catch,
    Block,
    Unknown,
}

impl ScopeKind {
    fn from_wire(raw: &str) -> ScopeKind {
        match raw {
            "global" => ScopeKind::Global,
            "local" => ScopeKind::Local,
            "closure" => ScopeKind::Closure,
            "with" => ScopeKind::With,
            "catch" => ScopeKind::Catch,
            "block" => ScopeKind::Block,
            _ => ScopeKind::Unknown,
        }
    }
}

/// One scope of a call frame, named by the remote object holding its
/// variables.
#[derive(Clone, Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub object: RemoteRef,
}

/// One frame of the paused call stack.
#[derive(Clone, Debug)]
pub struct CallFrame {
    pub ordinal: usize,
    pub function_name: String,
    pub script: ScriptId,
    pub line: u64,
    pub column: Option<u64>,
    pub this_ref: Option<RemoteRef>,
    pub scopes: Vec<Scope>,
}

#[derive(Clone, Debug)]
pub struct ExceptionInfo {
    pub description: String,
    pub uncaught: bool,
    pub value: Option<RemoteRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    In,
    Over,
    Out,
}

impl StepAction {
    fn wire_name(self) -> &'static str {
        match self {
            StepAction::Continue => "continue",
            StepAction::In => "in",
            StepAction::Over => "over",
            StepAction::Out => "out",
        }
    }
}

pub type ValueCallback = Box<dyn FnOnce(Result<Arc<ValueMirror>>) + Send>;

/// Immutable view of one VM pause.
///
/// Carries the value epoch it was built under; mirrors fetched through it
/// stay comparable against the cache's freshness rules.
pub struct PauseSnapshot {
    frames: Vec<CallFrame>,
    exception: Option<ExceptionInfo>,
    epoch: u64,
    continue_requested: AtomicBool,
}

impl PauseSnapshot {
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn frame(&self, ordinal: usize) -> Option<&CallFrame> {
        self.frames.get(ordinal)
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn value_epoch(&self) -> u64 {
        self.epoch
    }

    /// Resume the VM, optionally stepping. May be requested at most once per
    /// pause; a second request on the same snapshot is a caller bug.
    pub fn continue_vm(&self, bus: &Arc<dyn CommandBus>, step: StepAction, relay: Relay) {
        assert!(
            !self.continue_requested.swap(true, Ordering::SeqCst),
            "continue already requested for this pause"
        );
        bus.send_command(
            names::CONTINUE,
            json!({ "stepAction": step.wire_name() }),
            relay,
            Box::new(|result, relay| match result {
                Ok(_) => relay.succeed(),
                Err(err) => relay.fail(err),
            }),
        );
    }

    /// Evaluate `expression` in frame `frame_ordinal`.
    ///
    /// With `bindings`, the expression runs in a VM-side context extended by
    /// the given name/value map: the context is bound, used, then released.
    /// The release is best-effort cleanup outside the operation's completion
    /// obligation.
    pub fn evaluate(
        &self,
        bus: &Arc<dyn CommandBus>,
        cache: &ValueCache,
        frame_ordinal: usize,
        expression: &str,
        bindings: Option<Value>,
        relay: Relay,
        on_value: ValueCallback,
    ) {
        let epoch = self.epoch;
        let Some(bindings) = bindings else {
            send_evaluate(bus, cache, frame_ordinal, expression, None, epoch, relay, on_value);
            return;
        };

        let bus_again = Arc::clone(bus);
        let cache = cache.clone();
        let expression = expression.to_string();
        bus.send_command(
            names::BIND_EVALUATE_CONTEXT,
            json!({ "bindings": bindings }),
            relay,
            Box::new(move |result, relay| {
                let context_ref = result.and_then(|body| {
                    body.get("contextRef")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            WireError::MalformedResponse(
                                "bind response without contextRef".to_string(),
                            )
                        })
                });
                match context_ref {
                    Ok(context_ref) => send_evaluate(
                        &bus_again,
                        &cache,
                        frame_ordinal,
                        &expression,
                        Some(context_ref),
                        epoch,
                        relay,
                        on_value,
                    ),
                    Err(err) => {
                        on_value(Err(err.duplicate().into()));
                        relay.fail(err);
                    }
                }
            }),
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn send_evaluate(
    bus: &Arc<dyn CommandBus>,
    cache: &ValueCache,
    frame_ordinal: usize,
    expression: &str,
    context_ref: Option<String>,
    epoch: u64,
    relay: Relay,
    on_value: ValueCallback,
) {
    let mut params = json!({ "frame": frame_ordinal, "expression": expression });
    if let Some(context_ref) = &context_ref {
        params["contextRef"] = json!(context_ref);
    }
    let bus_again = Arc::clone(bus);
    let cache = cache.clone();
    bus.send_command(
        names::EVALUATE,
        params,
        relay,
        Box::new(move |result, relay| {
            // The bound context is released whatever happened to the
            // evaluation itself.
            if let Some(context_ref) = context_ref {
                bus_again.send_command(
                    names::RELEASE_EVALUATE_CONTEXT,
                    json!({ "contextRef": context_ref }),
                    Relay::detached("pause.releaseContext"),
                    Box::new(|_, relay| relay.succeed()),
                );
            }
            let mirror = result.and_then(|body| {
                let descriptor = body.get("value").ok_or_else(|| {
                    WireError::MalformedResponse("evaluate response without value".to_string())
                })?;
                ValueMirror::parse(descriptor, epoch)
                    .map(Arc::new)
                    .map_err(WireError::MalformedResponse)
            });
            match mirror {
                Ok(mirror) => {
                    cache.merge_insert(Arc::clone(&mirror));
                    on_value(Ok(mirror));
                    relay.succeed();
                }
                Err(err) => {
                    on_value(Err(err.duplicate().into()));
                    relay.fail(err);
                }
            }
        }),
    );
}

#[derive(Deserialize)]
struct ObjectPayload {
    #[serde(rename = "ref")]
    remote_ref: String,
}

#[derive(Deserialize)]
struct ScopePayload {
    #[serde(rename = "type")]
    kind: String,
    object: ObjectPayload,
}

#[derive(Deserialize)]
struct FramePayload {
    #[serde(rename = "functionName", default)]
    function_name: String,
    #[serde(rename = "scriptId")]
    script_id: String,
    line: u64,
    #[serde(default)]
    column: Option<u64>,
    #[serde(default)]
    scopes: Vec<ScopePayload>,
    #[serde(rename = "this", default)]
    this_ref: Option<Value>,
}

#[derive(Deserialize)]
struct ExceptionPayload {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    uncaught: bool,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Deserialize)]
struct PausedPayload {
    #[serde(rename = "callFrames", default)]
    call_frames: Vec<FramePayload>,
    #[serde(default)]
    exception: Option<ExceptionPayload>,
}

#[derive(Default)]
struct BuilderInner {
    generation: AtomicU64,
    // Generation token of the snapshot under construction, if any. A resume
    // (or a newer pause) invalidates it by replacing or clearing the token.
    pending: Mutex<Option<u64>>,
    live: Mutex<Option<Arc<PauseSnapshot>>>,
}

/// Builds pause snapshots from `paused` payloads and owns the live one.
#[derive(Clone, Default)]
pub struct SnapshotBuilder {
    inner: Arc<BuilderInner>,
}

impl SnapshotBuilder {
    pub fn new() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn live(&self) -> Option<Arc<PauseSnapshot>> {
        self.inner.live.lock().clone()
    }

    /// Handle a `paused` event: parse the stack, resolve the scripts it
    /// references, then publish the snapshot and notify the listener.
    pub fn on_paused(
        &self,
        params: Value,
        scripts: &ScriptRegistry,
        cache: &ValueCache,
        listener: &Arc<dyn DebugEventListener>,
    ) -> Result<()> {
        // Parse before touching any state: a malformed event is dropped by
        // the caller and must leave an existing pause untouched.
        let payload: PausedPayload = serde_json::from_value(params)
            .map_err(|err| ClientError::MalformedEvent(err.to_string()))?;

        if self.inner.live.lock().take().is_some() {
            // A conforming VM resumes before pausing again; recover by
            // treating the old pause as over.
            tracing::error!(
                target: "jsdbg.pause",
                "pause reported while a pause is live; dropping the stale snapshot"
            );
        }
        let epoch = cache.epoch();

        let frames: Vec<CallFrame> = payload
            .call_frames
            .into_iter()
            .enumerate()
            .map(|(ordinal, frame)| CallFrame {
                ordinal,
                function_name: frame.function_name,
                script: ScriptId::new(frame.script_id),
                line: frame.line,
                column: frame.column,
                this_ref: frame
                    .this_ref
                    .as_ref()
                    .and_then(|d| d.get("ref"))
                    .and_then(Value::as_str)
                    .map(RemoteRef::new),
                scopes: frame
                    .scopes
                    .into_iter()
                    .map(|scope| Scope {
                        kind: ScopeKind::from_wire(&scope.kind),
                        object: RemoteRef::new(scope.object.remote_ref),
                    })
                    .collect(),
            })
            .collect();

        // Scope objects become cache stubs up front so property loads on
        // them have a mirror to attach to.
        for frame in &frames {
            for scope in &frame.scopes {
                cache.merge_insert(Arc::new(ValueMirror::object_stub(
                    scope.object.clone(),
                    epoch,
                )));
            }
        }

        let exception = payload.exception.map(|e| ExceptionInfo {
            description: e.description.unwrap_or_default(),
            uncaught: e.uncaught,
            value: e
                .value
                .as_ref()
                .and_then(|d| d.get("ref"))
                .and_then(Value::as_str)
                .map(RemoteRef::new),
        });

        let script_ids: BTreeSet<ScriptId> =
            frames.iter().map(|frame| frame.script.clone()).collect();
        let snapshot = Arc::new(PauseSnapshot {
            frames,
            exception,
            epoch,
            continue_requested: AtomicBool::new(false),
        });

        let token = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.pending.lock() = Some(token);

        let builder = self.clone();
        let listener = Arc::clone(listener);
        scripts.load_sources(
            script_ids,
            Relay::new("pause.buildSnapshot", move |outcome| {
                {
                    let mut pending = builder.inner.pending.lock();
                    if *pending != Some(token) {
                        tracing::debug!(
                            target: "jsdbg.pause",
                            "pause ended before its snapshot was ready; dropped"
                        );
                        return;
                    }
                    *pending = None;
                }
                match outcome {
                    Ok(()) => {
                        *builder.inner.live.lock() = Some(Arc::clone(&snapshot));
                        listener.suspended(snapshot);
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "jsdbg.pause",
                            error = %err,
                            "script resolution failed; pause snapshot dropped"
                        );
                    }
                }
            }),
        );
        Ok(())
    }

    /// Handle a `resumed` event.
    ///
    /// Discards the live snapshot, or cancels publication of one still under
    /// construction. A resume with neither is a protocol violation and the
    /// caller must tear the session down.
    pub fn on_resumed(
        &self,
        cache: &ValueCache,
        listener: &Arc<dyn DebugEventListener>,
    ) -> Result<()> {
        let cancelled = self.inner.pending.lock().take().is_some();
        let had_live = self.inner.live.lock().take().is_some();
        if !had_live && !cancelled {
            return Err(ClientError::ProtocolViolation(
                "resumed with no pause live or under construction".to_string(),
            ));
        }
        if cancelled {
            tracing::debug!(
                target: "jsdbg.pause",
                "resume cancelled an in-flight pause snapshot"
            );
        }
        cache.bump_epoch();
        listener.resumed();
        Ok(())
    }
}
