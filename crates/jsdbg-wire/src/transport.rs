use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::{Result, WireError};

/// Outgoing half of the duplex message channel, supplied by the embedder.
///
/// Implementations must be cheap and non-blocking; a synchronous failure is
/// reported to the issuing command's callback and is never retried by the
/// engine.
pub trait Transport: Send + Sync {
    fn send_text(&self, text: &str) -> Result<()>;
}

enum Job {
    Task(Box<dyn FnOnce() + Send + 'static>),
    Shutdown,
}

struct DispatcherShared {
    tx: mpsc::Sender<Job>,
    thread_id: ThreadId,
    closed: AtomicBool,
}

/// The single serialized execution context of a debug session.
///
/// All incoming wire messages, all protocol-state mutation and all upward
/// notifications run as tasks on this context, which yields total ordering of
/// pending-request mutation, event dispatch and epoch increments without
/// per-field locking. The loop runs on a dedicated thread so that tasks may
/// freely wake blocking callers parked on other threads.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<DispatcherShared>,
}

impl Dispatcher {
    pub fn spawn(session_name: &str) -> Dispatcher {
        let (tx, rx) = mpsc::channel::<Job>();
        let (id_tx, id_rx) = mpsc::channel();

        let thread_name = format!("jsdbg-dispatch-{session_name}");
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                // Publish our thread id so `is_current` checks work before the
                // first task runs.
                let _ = id_tx.send(thread::current().id());
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Task(task) => task(),
                        Job::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn dispatch thread");

        let thread_id = id_rx
            .recv()
            .expect("dispatch thread exited before reporting its id");

        Dispatcher {
            shared: Arc::new(DispatcherShared {
                tx,
                thread_id,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a task onto the dispatch context. Fire-and-forget.
    pub fn run(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(WireError::DispatchClosed);
        }
        self.shared
            .tx
            .send(Job::Task(Box::new(task)))
            .map_err(|_| WireError::DispatchClosed)
    }

    /// Whether the calling thread *is* this session's dispatch context.
    ///
    /// APIs that block must refuse to run when this returns `true`; blocking
    /// the dispatch context would deadlock the session.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.shared.thread_id
    }

    /// Stop the dispatch loop. Tasks enqueued after this call are dropped.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.tx.send(Job::Shutdown);
    }
}

/// Bridge for APIs that must look synchronous to simple callers.
///
/// The caller parks on [`BlockingWaiter::wait`] with a bounded timeout while
/// the dispatch context eventually pushes a value through the paired
/// [`WaiterHandle`]. Timeouts are enforced here, by the blocking caller,
/// never by the command processor.
pub struct BlockingWaiter<T> {
    rx: mpsc::Receiver<T>,
}

pub struct WaiterHandle<T> {
    tx: mpsc::SyncSender<T>,
}

impl<T> Clone for WaiterHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> WaiterHandle<T> {
    /// Deliver the result. Extra deliveries and abandoned waiters are ignored.
    pub fn supply(&self, value: T) {
        let _ = self.tx.try_send(value);
    }
}

impl<T> BlockingWaiter<T> {
    pub fn new() -> (WaiterHandle<T>, BlockingWaiter<T>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (WaiterHandle { tx }, BlockingWaiter { rx })
    }

    /// Park until the handle supplies a value or `timeout` expires.
    ///
    /// Refuses to run on the dispatch context itself.
    pub fn wait(self, dispatcher: &Dispatcher, timeout: Duration) -> Result<T> {
        if dispatcher.is_current() {
            return Err(WireError::BlockingOnDispatchContext);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(WireError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(WireError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_submission_order() {
        let dispatcher = Dispatcher::spawn("order-test");
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..8 {
            let log = Arc::clone(&log);
            dispatcher.run(move || log.lock().push(i)).unwrap();
        }

        let (handle, waiter) = BlockingWaiter::new();
        dispatcher.run(move || handle.supply(())).unwrap();
        waiter.wait(&dispatcher, Duration::from_secs(5)).unwrap();

        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
        dispatcher.close();
    }

    #[test]
    fn is_current_only_on_dispatch_thread() {
        let dispatcher = Dispatcher::spawn("current-test");
        assert!(!dispatcher.is_current());

        let (handle, waiter) = BlockingWaiter::new();
        {
            let dispatcher = dispatcher.clone();
            let probe = dispatcher.clone();
            dispatcher
                .run(move || handle.supply(probe.is_current()))
                .unwrap();
        }
        let on_dispatch = waiter.wait(&dispatcher, Duration::from_secs(5)).unwrap();
        assert!(on_dispatch);
        dispatcher.close();
    }

    #[test]
    fn blocking_wait_refused_on_dispatch_context() {
        let dispatcher = Dispatcher::spawn("deadlock-test");
        let (done_handle, done) = BlockingWaiter::new();

        {
            let dispatcher = dispatcher.clone();
            let inner = dispatcher.clone();
            dispatcher
                .run(move || {
                    let (_handle, waiter) = BlockingWaiter::<()>::new();
                    let res = waiter.wait(&inner, Duration::from_millis(10));
                    done_handle.supply(matches!(
                        res,
                        Err(WireError::BlockingOnDispatchContext)
                    ));
                })
                .unwrap();
        }

        let refused = done.wait(&dispatcher, Duration::from_secs(5)).unwrap();
        assert!(refused);
        dispatcher.close();
    }

    #[test]
    fn run_after_close_fails_fast() {
        let dispatcher = Dispatcher::spawn("close-test");
        dispatcher.close();
        assert!(matches!(
            dispatcher.run(|| {}),
            Err(WireError::DispatchClosed)
        ));
    }

    #[test]
    fn wait_times_out() {
        let dispatcher = Dispatcher::spawn("timeout-test");
        let (_handle, waiter) = BlockingWaiter::<()>::new();
        assert!(matches!(
            waiter.wait(&dispatcher, Duration::from_millis(10)),
            Err(WireError::Timeout(_))
        ));
        dispatcher.close();
    }
}
