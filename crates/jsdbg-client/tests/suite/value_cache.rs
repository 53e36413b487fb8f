use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use jsdbg_client::RemoteRef;
use jsdbg_wire::Relay;

use crate::harness::{attach, TestSession};

fn lookup(t: &TestSession, refs: Vec<RemoteRef>) -> Arc<Mutex<Option<usize>>> {
    let out = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&out);
    t.session.values().lookup(
        refs,
        Relay::detached("test"),
        Box::new(move |result| {
            *sink.lock() = Some(result.expect("lookup").len());
        }),
    );
    out
}

fn lookup_commands(t: &TestSession) -> usize {
    t.sent_methods()
        .iter()
        .filter(|m| m.as_str() == "Runtime.getRemoteObjects")
        .count()
}

#[test]
fn lookup_fetches_once_per_epoch() {
    let t = attach("cache-epoch");
    let refs = vec![RemoteRef::new("obj:1")];

    let out = lookup(&t, refs.clone());
    assert_eq!(lookup_commands(&t), 1);
    t.respond(
        1,
        json!({ "values": { "obj:1": { "ref": "obj:1", "type": "object" } } }),
    );
    assert_eq!(*out.lock(), Some(1));

    // Fresh within the same epoch: served from cache.
    let out = lookup(&t, refs.clone());
    t.settle();
    assert_eq!(lookup_commands(&t), 1);
    assert_eq!(*out.lock(), Some(1));

    // A pause/resume cycle bumps the epoch and invalidates everything.
    t.event("Debugger.paused", json!({ "callFrames": [] }));
    t.event("Debugger.resumed", json!({}));

    lookup(&t, refs.clone());
    assert_eq!(lookup_commands(&t), 2);
    t.respond(
        2,
        json!({ "values": { "obj:1": { "ref": "obj:1", "type": "object" } } }),
    );

    // And exactly once per epoch afterwards.
    lookup(&t, refs);
    t.settle();
    assert_eq!(lookup_commands(&t), 2);
}

#[test]
fn property_loads_deduplicate_and_unblock_waiters() {
    let t = attach("cache-props");
    let object = RemoteRef::new("obj:42");

    let first = t.session.load_properties(&object, false);
    let second = t.session.load_properties(&object, false);
    assert_eq!(t.sent_methods(), vec!["Runtime.getProperties"]);
    assert_eq!(t.sent_params(0)["ref"], "obj:42");

    t.respond(
        1,
        json!({
            "properties": [
                { "name": "answer", "value": { "type": "number", "value": 42 } },
            ]
        }),
    );

    for load in [first, second] {
        let set = load
            .wait_blocking(t.session.dispatcher(), Duration::from_secs(5))
            .expect("load completes");
        assert_eq!(set.properties().len(), 1);
        assert_eq!(set.properties()[0].name, "answer");
    }

    // The fetched set is attached to the cached mirror.
    let mirror = t.session.values().cached(&object).expect("cached mirror");
    assert!(mirror.properties().is_some());
}

#[test]
fn scope_objects_from_a_pause_are_loadable() {
    let t = attach("cache-scope");
    t.event(
        "Debugger.paused",
        json!({
            "callFrames": [
                {
                    "functionName": "f",
                    "scriptId": "s1",
                    "line": 1,
                    "scopes": [
                        { "type": "local", "object": { "ref": "obj:scope" } },
                    ],
                },
            ],
        }),
    );
    t.respond(1, json!({ "source": "function f() {}" }));

    let snapshot = t.session.current_pause().expect("live snapshot");
    let scope = &snapshot.frames()[0].scopes[0];
    let load = t.session.load_properties(&scope.object, false);
    t.respond(
        2,
        json!({
            "properties": [
                { "name": "x", "value": { "type": "string", "value": "hi" } },
            ]
        }),
    );
    let set = load
        .wait_blocking(t.session.dispatcher(), Duration::from_secs(5))
        .expect("load completes");
    assert_eq!(set.epoch(), snapshot.value_epoch());
    assert_eq!(set.get("x").map(|p| p.name.as_str()), Some("x"));
}
