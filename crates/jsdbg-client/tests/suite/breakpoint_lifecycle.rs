use serde_json::json;

use jsdbg_client::{BreakpointSpec, BreakpointTarget, ResolvedLocation, ScriptId};

use crate::harness::{attach, RelayProbe};

fn spec(url: &str, line: u64) -> BreakpointSpec {
    BreakpointSpec {
        target: BreakpointTarget::ScriptName(url.to_string()),
        line,
        column: None,
        condition: None,
        enabled: true,
    }
}

#[test]
fn breakpoint_set_and_resolution_end_to_end() {
    let t = attach("bp-e2e");
    let bp = t.session.create_breakpoint(spec("app.js", 10));
    let probe = RelayProbe::default();

    t.session.flush_breakpoint(&bp, probe.relay("flush"));
    assert_eq!(t.sent_methods(), vec!["Debugger.setBreakpointByUrl"]);
    assert_eq!(t.sent_params(0)["url"], "app.js");
    assert_eq!(t.sent_params(0)["line"], 10);
    assert!(probe.outcomes().is_empty());

    t.respond(
        1,
        json!({
            "breakpointId": "vm-bp-1",
            "locations": [{ "scriptId": "s1", "line": 11 }],
        }),
    );
    assert_eq!(probe.outcomes(), vec![Ok(())]);
    assert_eq!(bp.remote_id().as_deref(), Some("vm-bp-1"));

    // A later resolution merges into the known locations.
    t.event(
        "Debugger.breakpointResolved",
        json!({
            "breakpointId": "vm-bp-1",
            "location": { "scriptId": "s2", "line": 30 },
        }),
    );
    let locations = bp.resolved_locations();
    assert_eq!(locations.len(), 2);
    assert!(locations.contains(&ResolvedLocation {
        script: ScriptId::new("s2"),
        line: 30,
        column: None,
    }));
}

#[test]
fn toggling_an_installed_breakpoint_removes_then_recreates() {
    let t = attach("bp-toggle");
    let bp = t.session.create_breakpoint(spec("app.js", 5));
    t.session
        .flush_breakpoint(&bp, RelayProbe::default().relay("install"));
    t.respond(1, json!({ "breakpointId": "vm-bp-1" }));

    bp.set_enabled(false);
    bp.set_enabled(true);
    assert!(bp.is_dirty());

    let probe = RelayProbe::default();
    t.session.flush_breakpoint(&bp, probe.relay("toggle"));
    assert_eq!(
        t.sent_methods(),
        vec![
            "Debugger.setBreakpointByUrl",
            "Debugger.removeBreakpoint",
        ]
    );
    assert_eq!(t.sent_params(1)["breakpointId"], "vm-bp-1");

    t.respond(2, json!({}));
    assert_eq!(
        t.sent_methods().last().map(String::as_str),
        Some("Debugger.setBreakpointByUrl")
    );
    assert_eq!(probe.outcomes().len(), 0);

    t.respond(3, json!({ "breakpointId": "vm-bp-2" }));
    assert_eq!(probe.outcomes(), vec![Ok(())]);
    assert_eq!(bp.remote_id().as_deref(), Some("vm-bp-2"));
}

#[test]
fn responses_correlate_by_id_across_breakpoints() {
    let t = attach("bp-order");
    let first = t.session.create_breakpoint(spec("a.js", 1));
    let second = t.session.create_breakpoint(spec("b.js", 2));
    let probe = RelayProbe::default();

    t.session.flush_breakpoint(&first, probe.relay("first"));
    t.session.flush_breakpoint(&second, probe.relay("second"));

    // Answer the second command before the first.
    t.respond(2, json!({ "breakpointId": "vm-b" }));
    t.respond(1, json!({ "breakpointId": "vm-a" }));

    assert_eq!(first.remote_id().as_deref(), Some("vm-a"));
    assert_eq!(second.remote_id().as_deref(), Some("vm-b"));
    assert_eq!(probe.outcomes(), vec![Ok(()), Ok(())]);
}

#[test]
fn failed_install_fails_the_relay_exactly_once() {
    let t = attach("bp-fail");
    let bp = t.session.create_breakpoint(spec("gone.js", 9));
    let probe = RelayProbe::default();

    t.session.flush_breakpoint(&bp, probe.relay("flush"));
    t.respond_err(1, "no such script");

    assert_eq!(
        probe.outcomes(),
        vec![Err("command failed: no such script".to_string())]
    );
    assert!(bp.remote_id().is_none());
}

#[test]
fn clear_uninstalls_and_forgets_the_breakpoint() {
    let t = attach("bp-clear");
    let bp = t.session.create_breakpoint(spec("app.js", 3));
    let local_id = bp.local_id();
    t.session
        .flush_breakpoint(&bp, RelayProbe::default().relay("install"));
    t.respond(1, json!({ "breakpointId": "vm-bp-1" }));

    let probe = RelayProbe::default();
    t.session.clear_breakpoint(&bp, probe.relay("clear"));
    assert_eq!(
        t.sent_methods().last().map(String::as_str),
        Some("Debugger.removeBreakpoint")
    );
    t.respond(2, json!({}));

    assert_eq!(probe.outcomes(), vec![Ok(())]);
    assert!(t.session.breakpoints().get(local_id).is_none());
}
