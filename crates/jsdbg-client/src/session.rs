//! Session facade: one attached VM, one dispatch context, one listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{json, Value};

use jsdbg_wire::dialects::names;
use jsdbg_wire::{
    BlockingWaiter, CommandBus, CommandProcessor, Dialect, Dispatcher, EventTable, Relay,
    Transport, VmStatusObserver, WireError,
};

use crate::breakpoints::{Breakpoint, BreakpointMap, BreakpointSpec};
use crate::error::Result;
use crate::pause::{PauseSnapshot, SnapshotBuilder};
use crate::scripts::{Script, ScriptRegistry};
use crate::value::{PropertyLoad, ValueCache};
use crate::RemoteRef;

/// Upward notifications from a session to its embedder.
///
/// All callbacks run on the session's dispatch context; implementations must
/// not block and must not call back into blocking session APIs.
pub trait DebugEventListener: Send + Sync {
    fn suspended(&self, snapshot: Arc<PauseSnapshot>);
    fn resumed(&self);
    fn script_loaded(&self, script: Script);
    fn disconnected(&self);
}

struct SessionInner<D: Dialect> {
    processor: CommandProcessor<D>,
    bus: Arc<dyn CommandBus>,
    dispatcher: Dispatcher,
    values: ValueCache,
    breakpoints: BreakpointMap,
    scripts: ScriptRegistry,
    pauses: SnapshotBuilder,
    listener: Arc<dyn DebugEventListener>,
    torn_down: AtomicBool,
}

/// One debug session against one remote VM.
///
/// Cheap to clone; all clones share the session. The embedder owns the
/// transport and feeds incoming traffic through [`DebugSession::on_text`] and
/// [`DebugSession::on_eos`].
pub struct DebugSession<D: Dialect> {
    inner: Arc<SessionInner<D>>,
}

impl<D: Dialect> Clone for DebugSession<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dialect> DebugSession<D> {
    /// Attach to a VM: spawn the session's dispatch context and wire the
    /// dialect, transport and listener together.
    pub fn attach(
        session_name: &str,
        dialect: D,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn DebugEventListener>,
        status: Option<Arc<dyn VmStatusObserver>>,
    ) -> DebugSession<D> {
        let dispatcher = Dispatcher::spawn(session_name);
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner<D>>| {
            let events = Self::event_table(weak.clone());
            let processor =
                CommandProcessor::new(dialect, transport, dispatcher.clone(), events, status);
            let bus: Arc<dyn CommandBus> = Arc::new(processor.clone());
            SessionInner {
                processor,
                values: ValueCache::new(Arc::clone(&bus)),
                breakpoints: BreakpointMap::new(),
                scripts: ScriptRegistry::new(Arc::clone(&bus)),
                pauses: SnapshotBuilder::new(),
                bus,
                dispatcher,
                listener,
                torn_down: AtomicBool::new(false),
            }
        });
        DebugSession { inner }
    }

    // The event table captures weak references: handlers live inside the
    // processor, which the session owns, and must not keep it alive.
    fn event_table(weak: Weak<SessionInner<D>>) -> EventTable {
        let paused = weak.clone();
        let resumed = weak.clone();
        let script_parsed = weak.clone();
        let breakpoint_resolved = weak;
        EventTable::new()
            .handle(names::EVENT_PAUSED, move |params| {
                let Some(inner) = paused.upgrade() else { return };
                if let Err(err) =
                    inner
                        .pauses
                        .on_paused(params, &inner.scripts, &inner.values, &inner.listener)
                {
                    tracing::warn!(
                        target: "jsdbg.session",
                        error = %err,
                        "dropping malformed paused event"
                    );
                }
            })
            .handle(names::EVENT_RESUMED, move |_params| {
                let Some(inner) = resumed.upgrade() else { return };
                if let Err(err) = inner.pauses.on_resumed(&inner.values, &inner.listener) {
                    // An unsolicited resume means client and VM disagree
                    // about execution state; nothing can be trusted anymore.
                    tracing::error!(
                        target: "jsdbg.session",
                        error = %err,
                        "tearing session down"
                    );
                    Self::teardown(&inner);
                }
            })
            .handle(names::EVENT_SCRIPT_PARSED, move |params| {
                let Some(inner) = script_parsed.upgrade() else { return };
                match inner.scripts.on_script_parsed(params) {
                    Ok((script, true)) => inner.listener.script_loaded(script),
                    Ok((_, false)) => {}
                    Err(err) => {
                        tracing::warn!(
                            target: "jsdbg.session",
                            error = %err,
                            "dropping malformed scriptParsed event"
                        );
                    }
                }
            })
            .handle(names::EVENT_BREAKPOINT_RESOLVED, move |params| {
                let Some(inner) = breakpoint_resolved.upgrade() else { return };
                if let Err(err) = inner.breakpoints.on_breakpoint_resolved(params) {
                    tracing::warn!(
                        target: "jsdbg.session",
                        error = %err,
                        "dropping malformed breakpointResolved event"
                    );
                }
            })
    }

    // Runs on the dispatch context. Idempotent.
    fn teardown(inner: &SessionInner<D>) {
        if inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.processor.process_eos();
        inner.listener.disconnected();
        inner.dispatcher.close();
    }

    /// Transport listener contract: deliver one incoming text message.
    pub fn on_text(&self, text: String) {
        self.inner.processor.on_text(text);
    }

    /// Transport listener contract: the remote closed the stream.
    pub fn on_eos(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = self.inner.dispatcher.run(move || Self::teardown(&inner));
    }

    /// Transport listener contract: the channel failed. Terminal, like EOS.
    pub fn on_transport_error(&self, message: &str) {
        tracing::error!(
            target: "jsdbg.session",
            error = %message,
            "transport error; tearing session down"
        );
        self.on_eos();
    }

    /// Detach locally: fail outstanding work and stop the dispatch context.
    pub fn close(&self) {
        self.on_eos();
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// The command seam, for operations driven outside the session facade
    /// (e.g. [`PauseSnapshot::continue_vm`]).
    pub fn command_bus(&self) -> &Arc<dyn CommandBus> {
        &self.inner.bus
    }

    pub fn values(&self) -> &ValueCache {
        &self.inner.values
    }

    pub fn breakpoints(&self) -> &BreakpointMap {
        &self.inner.breakpoints
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.inner.scripts
    }

    pub fn current_pause(&self) -> Option<Arc<PauseSnapshot>> {
        self.inner.pauses.live()
    }

    pub fn create_breakpoint(&self, spec: BreakpointSpec) -> Breakpoint {
        self.inner.breakpoints.create(spec)
    }

    pub fn flush_breakpoint(&self, breakpoint: &Breakpoint, relay: Relay) {
        breakpoint.flush(&self.inner.bus, relay);
    }

    pub fn clear_breakpoint(&self, breakpoint: &Breakpoint, relay: Relay) {
        breakpoint.clear(&self.inner.bus, relay);
    }

    /// Fetch the properties of `object_ref` under the current value epoch.
    pub fn load_properties(&self, object_ref: &RemoteRef, force_reload: bool) -> PropertyLoad {
        self.inner
            .values
            .load_properties(object_ref, force_reload, self.inner.values.epoch())
    }

    /// Ask the VM for its script list and register every entry.
    pub fn refresh_scripts(&self, relay: Relay) {
        let scripts = self.inner.scripts.clone();
        let listener = Arc::clone(&self.inner.listener);
        self.inner.bus.send_command(
            names::SCRIPTS,
            json!({ "includeSource": false }),
            relay,
            Box::new(move |result, relay| {
                let entries = result.and_then(|body| {
                    body.get("scripts")
                        .and_then(Value::as_array)
                        .cloned()
                        .ok_or_else(|| {
                            WireError::MalformedResponse(
                                "scripts response without scripts array".to_string(),
                            )
                        })
                });
                match entries {
                    Ok(entries) => {
                        for entry in entries {
                            match scripts.on_script_parsed(entry) {
                                Ok((script, true)) => listener.script_loaded(script),
                                Ok((_, false)) => {}
                                Err(err) => {
                                    tracing::warn!(
                                        target: "jsdbg.session",
                                        error = %err,
                                        "skipping malformed script entry"
                                    );
                                }
                            }
                        }
                        relay.succeed();
                    }
                    Err(err) => relay.fail(err),
                }
            }),
        );
    }

    /// Synchronous-looking script listing: refresh from the VM, park until
    /// the refresh completes, then return everything known.
    ///
    /// The timeout is enforced here by the caller; refuses to run on the
    /// dispatch context.
    pub fn scripts_blocking(&self, timeout: Duration) -> Result<Vec<Script>> {
        if self.inner.dispatcher.is_current() {
            return Err(WireError::BlockingOnDispatchContext.into());
        }
        let (handle, waiter) = BlockingWaiter::new();
        self.refresh_scripts(Relay::new("session.scripts", move |outcome| {
            handle.supply(outcome);
        }));
        waiter.wait(&self.inner.dispatcher, timeout)??;
        Ok(self.inner.scripts.all())
    }
}
