use crate::WireError;

/// A linear, single-owner completion obligation.
///
/// Every externally visible asynchronous operation produces one `Relay` when
/// it begins. Whoever holds the relay owes the caller exactly one completion
/// signal: either discharge it with [`Relay::succeed`] / [`Relay::fail`], or
/// move it into the next step of the chain. The move is the hand-off; the
/// type system rules out double completion because both dischargers consume
/// `self`.
///
/// Dropping an undischarged relay is a programming error (a forgotten
/// hand-off, or a handler that panicked mid-chain). The `Drop` impl fires the
/// completion signal as a last resort with [`WireError::Abandoned`] and logs
/// the violation, so the caller is never left waiting.
pub struct Relay {
    done: Option<Box<dyn FnOnce(Result<(), WireError>) + Send>>,
    op: &'static str,
}

impl Relay {
    /// Begin an operation. `op` names it for diagnostics only.
    pub fn new(
        op: &'static str,
        done: impl FnOnce(Result<(), WireError>) + Send + 'static,
    ) -> Self {
        Self {
            done: Some(Box::new(done)),
            op,
        }
    }

    /// A relay whose completion nobody observes.
    ///
    /// Used for fire-and-forget commands (e.g. best-effort cleanup steps that
    /// are explicitly excluded from an operation's obligation).
    pub fn detached(op: &'static str) -> Self {
        Self { done: None, op }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn succeed(self) {
        self.finish(Ok(()));
    }

    pub fn fail(self, err: WireError) {
        self.finish(Err(err));
    }

    pub fn complete(self, outcome: Result<(), WireError>) {
        self.finish(outcome);
    }

    fn finish(mut self, outcome: Result<(), WireError>) {
        if let Some(done) = self.done.take() {
            done(outcome);
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            tracing::error!(
                target: "jsdbg.wire",
                op = self.op,
                "completion relay dropped without discharge; signaling failure"
            );
            done(Err(WireError::Abandoned));
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("op", &self.op)
            .field("discharged", &self.done.is_none())
            .finish()
    }
}
