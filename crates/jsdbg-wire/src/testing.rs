//! Scripted fake transport for unit and downstream integration tests.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{Result, Transport, WireError};

/// Records every outgoing message and lets tests inspect or fail them.
///
/// Incoming traffic is injected by tests directly through
/// [`crate::CommandProcessor::on_text`]; the fake transport only covers the
/// outgoing half of the channel.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `send_text` calls fail synchronously.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Raw outgoing messages, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Outgoing messages parsed as JSON, oldest first.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).expect("fake transport captured non-JSON"))
            .collect()
    }

    /// Drain captured messages so later assertions start from a clean slate.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.sent.lock())
    }
}

impl Transport for ScriptedTransport {
    fn send_text(&self, text: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(WireError::Transport("scripted failure".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}
