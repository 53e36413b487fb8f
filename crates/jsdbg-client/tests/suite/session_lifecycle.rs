use std::time::Duration;

use serde_json::json;

use jsdbg_client::{BreakpointSpec, BreakpointTarget, ScriptId};

use crate::harness::{attach, RelayProbe};

#[test]
fn script_parsed_events_register_and_notify_once() {
    let t = attach("session-scripts");
    t.event(
        "Debugger.scriptParsed",
        json!({ "scriptId": "s1", "url": "app.js" }),
    );
    t.event(
        "Debugger.scriptParsed",
        json!({ "scriptId": "s1", "url": "app.js" }),
    );

    assert_eq!(t.listener.event_names(), vec!["script:s1"]);
    let script = t.session.scripts().get(&ScriptId::new("s1")).expect("script");
    assert_eq!(script.url().as_deref(), Some("app.js"));
}

#[test]
fn scripts_blocking_refreshes_from_the_vm() {
    let t = attach("session-blocking");
    let session = t.session.clone();

    // The caller parks on its own thread; the test plays the VM.
    let caller = std::thread::spawn(move || session.scripts_blocking(Duration::from_secs(5)));

    t.wait_until(|| {
        t.sent_methods()
            .iter()
            .any(|m| m == "Debugger.listScripts")
    });
    t.respond(
        1,
        json!({
            "scripts": [
                { "scriptId": "s1", "url": "a.js" },
                { "scriptId": "s2", "url": "b.js" },
            ]
        }),
    );

    let scripts = caller.join().expect("caller thread").expect("script list");
    assert_eq!(scripts.len(), 2);
    assert_eq!(t.listener.event_names(), vec!["script:s1", "script:s2"]);
}

#[test]
fn scripts_blocking_times_out_when_the_vm_stays_silent() {
    let t = attach("session-timeout");
    let err = t
        .session
        .scripts_blocking(Duration::from_millis(50))
        .expect_err("no response was scripted");
    assert!(err.to_string().contains("timed out"));
}

#[test]
fn eos_fails_outstanding_work_and_notifies_disconnect() {
    let t = attach("session-eos");
    let bp = t.session.create_breakpoint(BreakpointSpec {
        target: BreakpointTarget::ScriptName("app.js".to_string()),
        line: 7,
        column: None,
        condition: None,
        enabled: true,
    });
    let probe = RelayProbe::default();
    t.session.flush_breakpoint(&bp, probe.relay("flush"));
    assert_eq!(t.sent_methods(), vec!["Debugger.setBreakpointByUrl"]);

    t.session.on_eos();
    t.wait_until(|| t.listener.event_names().contains(&"disconnected".to_string()));
    assert_eq!(
        probe.outcomes(),
        vec![Err("connection closed".to_string())]
    );

    // Closing again is a no-op.
    t.session.close();
    assert_eq!(
        t.listener
            .event_names()
            .iter()
            .filter(|e| e.as_str() == "disconnected")
            .count(),
        1
    );
}

#[test]
fn transport_error_is_terminal() {
    let t = attach("session-transport-error");
    t.session.on_transport_error("broken pipe");
    t.wait_until(|| t.listener.event_names().contains(&"disconnected".to_string()));

    let probe = RelayProbe::default();
    let bp = t.session.create_breakpoint(BreakpointSpec {
        target: BreakpointTarget::ScriptName("app.js".to_string()),
        line: 1,
        column: None,
        condition: None,
        enabled: true,
    });
    t.session.flush_breakpoint(&bp, probe.relay("late"));
    assert_eq!(
        probe.outcomes(),
        vec![Err("connection closed".to_string())]
    );
}

#[test]
fn unknown_and_malformed_events_do_not_disturb_the_session() {
    let t = attach("session-robust");
    t.event("Debugger.somethingNew", json!({ "x": 1 }));
    // A paused payload with the wrong shape is dropped, not fatal.
    t.event("Debugger.paused", json!({ "callFrames": "not-an-array" }));

    assert!(t.listener.event_names().is_empty());
    assert!(t.session.current_pause().is_none());

    // The session still works afterwards.
    t.event("Debugger.paused", json!({ "callFrames": [] }));
    assert_eq!(t.listener.event_names(), vec!["suspended"]);

    // A malformed pause arriving while paused must not eat the live pause.
    t.event("Debugger.paused", json!({ "callFrames": "not-an-array" }));
    assert!(t.session.current_pause().is_some());
    t.event("Debugger.resumed", json!({}));
    assert_eq!(t.listener.event_names(), vec!["suspended", "resumed"]);
}
