//! Scripted command bus for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use jsdbg_wire::{CommandBus, Relay, ResponseHandler, WireError};

struct SentCommand {
    method: &'static str,
    params: Value,
    responder: Option<(ResponseHandler, Relay)>,
}

/// Records every command and lets the test answer them in any order, inline
/// on the test thread. Inline invocation matches production behavior because
/// responses there are serialized on the single dispatch context.
#[derive(Default)]
pub struct FakeBus {
    sent: Mutex<Vec<SentCommand>>,
}

impl FakeBus {
    pub fn new() -> Arc<FakeBus> {
        Arc::new(FakeBus::default())
    }

    pub fn sent_methods(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|c| c.method).collect()
    }

    pub fn params(&self, index: usize) -> Value {
        self.sent.lock()[index].params.clone()
    }

    /// Number of commands still waiting for an answer.
    pub fn unanswered(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|c| c.responder.is_some())
            .count()
    }

    /// Answer the command at `index` (in send order).
    pub fn respond(&self, index: usize, result: Result<Value, WireError>) {
        let (handler, relay) = self.sent.lock()[index]
            .responder
            .take()
            .expect("command already answered");
        handler(result, relay);
    }

    /// Answer the oldest unanswered command.
    pub fn respond_next(&self, result: Result<Value, WireError>) {
        let index = self
            .sent
            .lock()
            .iter()
            .position(|c| c.responder.is_some())
            .expect("no unanswered command");
        self.respond(index, result);
    }
}

impl CommandBus for FakeBus {
    fn send_command(
        &self,
        method: &'static str,
        params: Value,
        relay: Relay,
        handler: ResponseHandler,
    ) {
        self.sent.lock().push(SentCommand {
            method,
            params,
            responder: Some((handler, relay)),
        });
    }
}
