use serde_json::json;

use jsdbg_client::{ScopeKind, StepAction};

use crate::harness::{attach, RelayProbe};

fn paused_params() -> serde_json::Value {
    json!({
        "callFrames": [
            {
                "functionName": "handler",
                "scriptId": "s1",
                "line": 14,
                "scopes": [
                    { "type": "local", "object": { "ref": "obj:scope" } },
                ],
            },
        ],
    })
}

#[test]
fn pause_snapshot_publishes_only_after_sources_resolve() {
    let t = attach("pause-publish");
    t.event("Debugger.paused", paused_params());

    // Source fetch is in flight; nothing is published yet.
    assert_eq!(t.sent_methods(), vec!["Debugger.getScriptSource"]);
    assert!(t.session.current_pause().is_none());
    assert!(t.listener.event_names().is_empty());

    t.respond(1, json!({ "source": "function handler() {}" }));
    assert_eq!(t.listener.event_names(), vec!["suspended"]);

    let snapshot = t.session.current_pause().expect("live snapshot");
    assert_eq!(snapshot.frames().len(), 1);
    let frame = &snapshot.frames()[0];
    assert_eq!(frame.function_name, "handler");
    assert_eq!(frame.scopes[0].kind, ScopeKind::Local);

    let script = t.session.scripts().get(&frame.script).expect("script");
    assert_eq!(script.source().as_deref(), Some("function handler() {}"));
}

#[test]
fn resume_during_snapshot_construction_suppresses_publication() {
    let t = attach("pause-cancel");
    t.event("Debugger.paused", paused_params());
    assert_eq!(t.sent_methods(), vec!["Debugger.getScriptSource"]);

    t.event("Debugger.resumed", json!({}));
    assert_eq!(t.listener.event_names(), vec!["resumed"]);

    // The late source response completes the fetch but must not publish the
    // snapshot of a pause that is already over.
    t.respond(1, json!({ "source": "function handler() {}" }));
    assert!(t.session.current_pause().is_none());
    assert_eq!(t.listener.event_names(), vec!["resumed"]);
}

#[test]
fn continue_and_resume_discard_the_snapshot_and_bump_the_epoch() {
    let t = attach("pause-continue");
    t.event("Debugger.paused", json!({ "callFrames": [] }));
    assert_eq!(t.listener.event_names(), vec!["suspended"]);

    let snapshot = t.session.current_pause().expect("live snapshot");
    let epoch_before = t.session.values().epoch();
    assert_eq!(snapshot.value_epoch(), epoch_before);

    let probe = RelayProbe::default();
    snapshot.continue_vm(
        t.session.command_bus(),
        StepAction::Continue,
        probe.relay("continue"),
    );
    assert_eq!(t.sent_methods(), vec!["Debugger.resume"]);
    assert_eq!(t.sent_params(0)["stepAction"], "continue");
    t.respond(1, json!({}));
    assert_eq!(probe.outcomes(), vec![Ok(())]);

    t.event("Debugger.resumed", json!({}));
    assert!(t.session.current_pause().is_none());
    assert_eq!(t.session.values().epoch(), epoch_before + 1);
    assert_eq!(t.listener.event_names(), vec!["suspended", "resumed"]);
}

#[test]
fn exception_pause_carries_exception_info() {
    let t = attach("pause-exception");
    t.event(
        "Debugger.paused",
        json!({
            "callFrames": [],
            "exception": {
                "description": "TypeError: x is not a function",
                "uncaught": true,
                "value": { "ref": "obj:exc", "type": "object" },
            },
        }),
    );

    let snapshot = t.session.current_pause().expect("live snapshot");
    let exception = snapshot.exception().expect("exception info");
    assert!(exception.uncaught);
    assert_eq!(exception.description, "TypeError: x is not a function");
    assert!(exception.value.is_some());
}

#[test]
fn spurious_resume_tears_the_session_down() {
    let t = attach("pause-violation");
    t.event("Debugger.resumed", json!({}));
    t.wait_until(|| t.listener.event_names().contains(&"disconnected".to_string()));

    // The session refuses further remote traffic.
    let bp = t.session.create_breakpoint(jsdbg_client::BreakpointSpec {
        target: jsdbg_client::BreakpointTarget::ScriptName("app.js".to_string()),
        line: 1,
        column: None,
        condition: None,
        enabled: true,
    });
    let probe = RelayProbe::default();
    t.session.flush_breakpoint(&bp, probe.relay("late"));
    assert!(t.sent_methods().is_empty());
    assert_eq!(
        probe.outcomes(),
        vec![Err("connection closed".to_string())]
    );
}

#[test]
fn evaluate_on_frame_round_trips_a_value() {
    let t = attach("pause-evaluate");
    t.event("Debugger.paused", json!({ "callFrames": [] }));
    let snapshot = t.session.current_pause().expect("live snapshot");

    let probe = RelayProbe::default();
    let out = std::sync::Arc::new(parking_lot::Mutex::new(None));
    {
        let sink = std::sync::Arc::clone(&out);
        snapshot.evaluate(
            t.session.command_bus(),
            t.session.values(),
            0,
            "1 + 1",
            None,
            probe.relay("evaluate"),
            Box::new(move |result| {
                *sink.lock() = Some(result);
            }),
        );
    }
    assert_eq!(t.sent_methods(), vec!["Debugger.evaluateOnCallFrame"]);
    t.respond(1, json!({ "value": { "type": "number", "value": 2 } }));

    let mirror = out.lock().take().expect("callback ran").expect("value");
    assert_eq!(mirror.scalar(), Some(&jsdbg_client::Scalar::Number(2.0)));
    assert_eq!(probe.outcomes(), vec![Ok(())]);
}
