use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use thiserror::Error;

use jsdbg_wire::dialects::names;
use jsdbg_wire::{CommandBus, Dispatcher, Relay, WireError};

use crate::error::Result;
use crate::value::mirror::{Property, PropertySet, ValueMirror};
use crate::RemoteRef;

/// Terminal failure of one property load, shared by every waiter.
#[derive(Clone, Debug, Error)]
#[error("property load failed: {0}")]
pub struct LoadError(pub String);

pub type MirrorsCallback = Box<dyn FnOnce(Result<Vec<Arc<ValueMirror>>>) + Send>;

type LoadOutcome = std::result::Result<Arc<PropertySet>, LoadError>;
type LoadCallback = Box<dyn FnOnce(LoadOutcome) + Send>;

struct LoadSlot {
    outcome: Option<LoadOutcome>,
    callbacks: Vec<LoadCallback>,
}

struct LoadState {
    epoch: u64,
    slot: Mutex<LoadSlot>,
    cond: Condvar,
}

/// Handle to one in-flight (or finished) property fetch.
///
/// Cloned freely; every holder observes the same single outcome. Waiters may
/// subscribe with [`PropertyLoad::on_ready`] or park with
/// [`PropertyLoad::wait_blocking`]; the latter enforces its own timeout and
/// refuses to run on the dispatch context.
#[derive(Clone)]
pub struct PropertyLoad {
    state: Arc<LoadState>,
}

impl PropertyLoad {
    fn pending(epoch: u64) -> PropertyLoad {
        PropertyLoad {
            state: Arc::new(LoadState {
                epoch,
                slot: Mutex::new(LoadSlot {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    fn ready(epoch: u64, outcome: LoadOutcome) -> PropertyLoad {
        PropertyLoad {
            state: Arc::new(LoadState {
                epoch,
                slot: Mutex::new(LoadSlot {
                    outcome: Some(outcome),
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Epoch the load was issued under.
    pub fn epoch(&self) -> u64 {
        self.state.epoch
    }

    /// Non-blocking peek at the outcome.
    pub fn outcome(&self) -> Option<LoadOutcome> {
        self.state.slot.lock().outcome.clone()
    }

    /// Invoke `callback` with the outcome: immediately if the load already
    /// finished, otherwise from the completing thread.
    pub fn on_ready(&self, callback: impl FnOnce(LoadOutcome) + Send + 'static) {
        let ready = {
            let mut slot = self.state.slot.lock();
            match &slot.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    slot.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(outcome) = ready {
            callback(outcome);
        }
    }

    /// Park until the load finishes or `timeout` expires.
    pub fn wait_blocking(
        &self,
        dispatcher: &Dispatcher,
        timeout: Duration,
    ) -> Result<Arc<PropertySet>> {
        if dispatcher.is_current() {
            return Err(WireError::BlockingOnDispatchContext.into());
        }
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.slot.lock();
        while slot.outcome.is_none() {
            if self.state.cond.wait_until(&mut slot, deadline).timed_out()
                && slot.outcome.is_none()
            {
                return Err(WireError::Timeout(timeout).into());
            }
        }
        match &slot.outcome {
            Some(Ok(set)) => Ok(Arc::clone(set)),
            Some(Err(err)) => Err(err.clone().into()),
            None => unreachable!("loop exits only with an outcome"),
        }
    }

    fn complete(&self, outcome: LoadOutcome) {
        let callbacks = {
            let mut slot = self.state.slot.lock();
            if slot.outcome.is_some() {
                tracing::debug!(target: "jsdbg.values", "duplicate load completion ignored");
                return;
            }
            slot.outcome = Some(outcome.clone());
            self.state.cond.notify_all();
            std::mem::take(&mut slot.callbacks)
        };
        for callback in callbacks {
            callback(outcome.clone());
        }
    }
}

struct CacheInner {
    bus: Arc<dyn CommandBus>,
    epoch: AtomicU64,
    mirrors: Mutex<HashMap<RemoteRef, Arc<ValueMirror>>>,
    in_flight: Mutex<HashMap<RemoteRef, PropertyLoad>>,
}

/// Cache of remote value mirrors with epoch-based freshness.
///
/// A mirror is fresh iff its fetch epoch equals the cache's current epoch.
/// Resuming the VM bumps the epoch, which invalidates everything at once
/// without touching individual entries; stale mirrors stay readable for
/// diagnostics but any lookup refetches them.
///
/// Consistency is deliberately relaxed: a fetch that straddles an epoch bump
/// still lands tagged with the epoch it was issued under, so readers may
/// briefly observe values from the previous pause. They converge on the next
/// lookup.
#[derive(Clone)]
pub struct ValueCache {
    inner: Arc<CacheInner>,
}

impl ValueCache {
    pub fn new(bus: Arc<dyn CommandBus>) -> ValueCache {
        ValueCache {
            inner: Arc::new(CacheInner {
                bus,
                epoch: AtomicU64::new(1),
                mirrors: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    /// Invalidate every cached mirror at once. Called when the VM resumes.
    pub fn bump_epoch(&self) -> u64 {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(target: "jsdbg.values", epoch, "value epoch bumped");
        epoch
    }

    /// The cached mirror for `remote_ref`, fresh or not.
    pub fn cached(&self, remote_ref: &RemoteRef) -> Option<Arc<ValueMirror>> {
        self.inner.mirrors.lock().get(remote_ref).cloned()
    }

    /// Cache-only batched read, positionally aligned with `refs`. Issues no
    /// remote traffic; use [`ValueCache::lookup`] to fill the gaps.
    pub fn get(&self, refs: &[RemoteRef]) -> Vec<Option<Arc<ValueMirror>>> {
        let mirrors = self.inner.mirrors.lock();
        refs.iter().map(|r| mirrors.get(r).cloned()).collect()
    }

    /// Insert a mirror, merging with any existing entry for the same ref so
    /// the cache never regresses to less complete data.
    pub(crate) fn merge_insert(&self, mirror: Arc<ValueMirror>) {
        let Some(remote_ref) = mirror.remote_ref().cloned() else {
            return;
        };
        let mut mirrors = self.inner.mirrors.lock();
        let next = match mirrors.get(&remote_ref) {
            Some(current) => ValueMirror::merged(current, &mirror),
            None => mirror,
        };
        mirrors.insert(remote_ref, next);
    }

    /// Resolve `refs` to fresh mirrors, batching one `lookup` command for
    /// whatever is missing or stale. `on_done` receives the mirrors; `relay`
    /// carries the completion obligation.
    pub fn lookup(&self, refs: Vec<RemoteRef>, relay: Relay, on_done: MirrorsCallback) {
        let epoch = self.epoch();
        let misses: Vec<&str> = refs
            .iter()
            .filter(|r| !self.is_fresh(r, epoch))
            .map(RemoteRef::as_str)
            .collect();
        if misses.is_empty() {
            on_done(Ok(self.collect(&refs)));
            relay.succeed();
            return;
        }

        let params = json!({ "refs": misses });
        let cache = self.clone();
        self.inner.bus.send_command(
            names::LOOKUP,
            params,
            relay,
            Box::new(move |result, relay| {
                let absorbed = result.and_then(|body| cache.absorb_lookup(&body, epoch));
                match absorbed {
                    Ok(()) => {
                        on_done(Ok(cache.collect(&refs)));
                        relay.succeed();
                    }
                    Err(err) => {
                        on_done(Err(err.duplicate().into()));
                        relay.fail(err);
                    }
                }
            }),
        );
    }

    /// Fetch the properties of `object_ref`, deduplicating concurrent loads
    /// of the same ref: callers arriving while a fetch is in flight share its
    /// [`PropertyLoad`] instead of issuing remote traffic.
    ///
    /// `request_epoch` is the epoch the caller is working under; a cached set
    /// from that epoch satisfies the load immediately unless `force_reload`.
    pub fn load_properties(
        &self,
        object_ref: &RemoteRef,
        force_reload: bool,
        request_epoch: u64,
    ) -> PropertyLoad {
        if !force_reload {
            if let Some(mirror) = self.cached(object_ref) {
                if let Some(set) = mirror.properties() {
                    if set.epoch() == request_epoch {
                        return PropertyLoad::ready(request_epoch, Ok(Arc::clone(set)));
                    }
                }
            }
        }

        let load = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(load) = in_flight.get(object_ref) {
                return load.clone();
            }
            let load = PropertyLoad::pending(request_epoch);
            in_flight.insert(object_ref.clone(), load.clone());
            load
        };

        let cache = self.clone();
        let object_ref = object_ref.clone();
        let load_done = load.clone();
        self.inner.bus.send_command(
            names::GET_PROPERTIES,
            json!({ "ref": object_ref.as_str(), "ownProperties": true }),
            Relay::detached("values.loadProperties"),
            Box::new(move |result, relay| {
                let outcome = match result {
                    Ok(body) => cache.absorb_properties(&object_ref, &body, request_epoch),
                    Err(err) => Err(LoadError(err.to_string())),
                };
                cache.inner.in_flight.lock().remove(&object_ref);
                load_done.complete(outcome);
                relay.succeed();
            }),
        );
        load
    }

    fn is_fresh(&self, remote_ref: &RemoteRef, epoch: u64) -> bool {
        self.cached(remote_ref)
            .map(|m| m.is_fresh(epoch))
            .unwrap_or(false)
    }

    fn collect(&self, refs: &[RemoteRef]) -> Vec<Arc<ValueMirror>> {
        refs.iter().filter_map(|r| self.cached(r)).collect()
    }

    fn absorb_lookup(&self, body: &Value, epoch: u64) -> std::result::Result<(), WireError> {
        let values = body
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                WireError::MalformedResponse("lookup response without values map".to_string())
            })?;
        for (raw_ref, descriptor) in values {
            let mirror = ValueMirror::parse(descriptor, epoch)
                .map_err(WireError::MalformedResponse)?;
            // The map key is authoritative; descriptors may omit their ref.
            let mirror = if mirror.remote_ref().is_some() {
                mirror
            } else {
                ValueMirror::object_stub(RemoteRef::new(raw_ref.as_str()), epoch)
            };
            self.merge_insert(Arc::new(mirror));
        }
        Ok(())
    }

    fn absorb_properties(
        &self,
        object_ref: &RemoteRef,
        body: &Value,
        epoch: u64,
    ) -> LoadOutcome {
        let entries = body
            .get("properties")
            .and_then(Value::as_array)
            .ok_or_else(|| LoadError("response without properties array".to_string()))?;
        let mut properties = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LoadError("property without a name".to_string()))?;
            let descriptor = entry
                .get("value")
                .ok_or_else(|| LoadError(format!("property {name} without a value")))?;
            let mirror = Arc::new(ValueMirror::parse(descriptor, epoch).map_err(LoadError)?);
            // Sub-objects become cache entries too, so later lookups of a
            // member ref start from what the property fetch already knows.
            self.merge_insert(Arc::clone(&mirror));
            properties.push(Property {
                name: name.to_string(),
                value: mirror,
            });
        }
        let set = Arc::new(PropertySet::new(epoch, properties));
        self.attach_properties(object_ref, Arc::clone(&set));
        Ok(set)
    }

    fn attach_properties(&self, object_ref: &RemoteRef, set: Arc<PropertySet>) {
        let mut mirrors = self.inner.mirrors.lock();
        let next = match mirrors.get(object_ref) {
            Some(current) => Arc::new(current.with_properties(set)),
            None => {
                let stub = ValueMirror::object_stub(object_ref.clone(), set.epoch());
                Arc::new(stub.with_properties(set))
            }
        };
        mirrors.insert(object_ref.clone(), next);
    }
}
