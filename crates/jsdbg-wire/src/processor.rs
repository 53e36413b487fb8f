use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::dialect::{Dialect, Incoming};
use crate::relay::Relay;
use crate::transport::{Dispatcher, Transport};
use crate::WireError;

/// Callback invoked with the typed success/failure payload of one command.
///
/// The handler receives the operation's [`Relay`] together with the result and
/// must either discharge it or hand it to the next step of the chain.
pub type ResponseHandler = Box<dyn FnOnce(Result<Value, WireError>, Relay) + Send>;

/// Handler for one unsolicited event, invoked on the dispatch context in
/// arrival order.
pub type EventHandler = Box<dyn Fn(Value) + Send + Sync>;

/// Static event dispatch table, built once at session startup.
///
/// Plain immutable lookup data; handlers close over whatever session state
/// they need.
#[derive(Default)]
pub struct EventTable {
    handlers: HashMap<&'static str, EventHandler>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(mut self, name: &'static str, handler: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.handlers.insert(name, Box::new(handler));
        self
    }

    fn get(&self, name: &str) -> Option<&EventHandler> {
        self.handlers.get(name)
    }
}

/// Informational snapshot of the processor's request queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmStatus {
    /// Canonical method name of the oldest in-flight command, if any.
    pub current_command: Option<String>,
    /// Number of requests queued behind it.
    pub queued: usize,
}

/// Purely informational observer; never affects correctness.
pub trait VmStatusObserver: Send + Sync {
    fn vm_status(&self, status: VmStatus);
}

/// Narrow seam through which session components issue commands.
///
/// Keeps the session layer independent of the concrete [`Dialect`] type
/// parameter and lets tests substitute a scripted bus.
pub trait CommandBus: Send + Sync {
    fn send_command(
        &self,
        method: &'static str,
        params: Value,
        relay: Relay,
        handler: ResponseHandler,
    );
}

struct PendingRequest {
    method: String,
    order: u64,
    handler: ResponseHandler,
    relay: Relay,
}

struct PendingMap {
    closed: bool,
    entries: HashMap<u64, PendingRequest>,
}

struct ProcessorInner<D> {
    dialect: D,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    pending: Mutex<PendingMap>,
    next_seq: AtomicU64,
    next_order: AtomicU64,
    events: EventTable,
    status: Option<Arc<dyn VmStatusObserver>>,
}

/// Sequenced command processor: assigns sequence ids to outgoing commands,
/// correlates incoming responses to pending requests by id (never by arrival
/// order), and routes unsolicited messages through the static event table.
///
/// All incoming processing runs on the session's dispatch context; `send` may
/// be called from any thread.
pub struct CommandProcessor<D> {
    inner: Arc<ProcessorInner<D>>,
}

impl<D> Clone for CommandProcessor<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dialect> CommandProcessor<D> {
    pub fn new(
        dialect: D,
        transport: Arc<dyn Transport>,
        dispatcher: Dispatcher,
        events: EventTable,
        status: Option<Arc<dyn VmStatusObserver>>,
    ) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                dialect,
                transport,
                dispatcher,
                pending: Mutex::new(PendingMap {
                    closed: false,
                    entries: HashMap::new(),
                }),
                next_seq: AtomicU64::new(0),
                next_order: AtomicU64::new(0),
                events,
                status,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending.lock().closed
    }

    /// Register a pending request and hand the encoded command to the
    /// transport. Non-blocking; never issues remote traffic once closed.
    ///
    /// On a synchronous transport failure the request is unregistered and its
    /// handler is failed immediately; the engine does not retry.
    pub fn send(
        &self,
        method: &'static str,
        params: Value,
        relay: Relay,
        handler: ResponseHandler,
    ) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                drop(pending);
                tracing::debug!(target: "jsdbg.wire", method, "send after close; failing fast");
                handler(Err(WireError::ConnectionClosed), relay);
                return;
            }
            let order = self.inner.next_order.fetch_add(1, Ordering::Relaxed);
            pending.entries.insert(
                seq,
                PendingRequest {
                    method: method.to_string(),
                    order,
                    handler,
                    relay,
                },
            );
        }
        self.report_status();

        let text = self.inner.dialect.encode_command(seq, method, &params);
        if let Err(err) = self.inner.transport.send_text(&text) {
            tracing::warn!(
                target: "jsdbg.wire",
                method,
                seq,
                error = %err,
                "transport rejected outgoing command"
            );
            let entry = self.inner.pending.lock().entries.remove(&seq);
            if let Some(entry) = entry {
                self.report_status();
                (entry.handler)(Err(err), entry.relay);
            }
        }
    }

    /// Decode and dispatch one incoming message. Must run on the dispatch
    /// context; responses and events interleave here in arrival order, which
    /// is the processor's core ordering property.
    pub fn process_incoming(&self, raw: &str) {
        debug_assert!(
            self.inner.dispatcher.is_current(),
            "process_incoming must run on the dispatch context"
        );
        match self.inner.dialect.decode(raw) {
            Ok(Incoming::Response { seq, result }) => {
                let entry = self.inner.pending.lock().entries.remove(&seq);
                let Some(entry) = entry else {
                    // Either a late response to a request that already failed at
                    // send time, or a VM bug. Safe to drop.
                    tracing::warn!(target: "jsdbg.wire", seq, "response for unknown sequence id");
                    return;
                };
                self.report_status();
                tracing::trace!(target: "jsdbg.wire", seq, method = %entry.method, "response");
                (entry.handler)(result, entry.relay);
            }
            Ok(Incoming::Event { name, params }) => match self.inner.events.get(&name) {
                Some(handler) => handler(params),
                None => {
                    tracing::warn!(target: "jsdbg.wire", event = %name, "dropping unknown event");
                }
            },
            Err(err) => {
                // Unclassifiable text. Events are safe to drop; a response we
                // cannot even correlate cannot be failed individually, so the
                // whole message is logged and dropped.
                tracing::warn!(target: "jsdbg.wire", error = %err, "dropping malformed message");
            }
        }
    }

    /// Terminal end-of-stream: fail every pending request, in registration
    /// order, then refuse further sends.
    pub fn process_eos(&self) {
        let mut entries: Vec<PendingRequest> = {
            let mut pending = self.inner.pending.lock();
            pending.closed = true;
            pending.entries.drain().map(|(_, entry)| entry).collect()
        };
        entries.sort_by_key(|entry| entry.order);
        for entry in entries {
            tracing::debug!(
                target: "jsdbg.wire",
                method = %entry.method,
                "failing pending request: connection closed"
            );
            (entry.handler)(Err(WireError::ConnectionClosed), entry.relay);
        }
        self.report_status();
    }

    /// Transport listener contract: deliver one incoming text message.
    pub fn on_text(&self, text: String) {
        let this = self.clone();
        let _ = self
            .inner
            .dispatcher
            .run(move || this.process_incoming(&text));
    }

    /// Transport listener contract: the remote closed the stream.
    pub fn on_eos(&self) {
        let this = self.clone();
        let _ = self.inner.dispatcher.run(move || this.process_eos());
    }

    fn report_status(&self) {
        let Some(observer) = &self.inner.status else {
            return;
        };
        let status = {
            let pending = self.inner.pending.lock();
            let oldest = pending
                .entries
                .values()
                .min_by_key(|entry| entry.order)
                .map(|entry| entry.method.clone());
            let queued = pending.entries.len().saturating_sub(1);
            VmStatus {
                queued: if oldest.is_some() { queued } else { 0 },
                current_command: oldest,
            }
        };
        observer.vm_status(status);
    }
}

impl<D: Dialect> CommandBus for CommandProcessor<D> {
    fn send_command(
        &self,
        method: &'static str,
        params: Value,
        relay: Relay,
        handler: ResponseHandler,
    ) {
        self.send(method, params, relay, handler);
    }
}
