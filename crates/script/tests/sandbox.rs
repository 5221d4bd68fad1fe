//! Script sandbox integration tests.
//!
//! Covers the language surface migration scripts rely on, the isolation
//! guarantees (host capabilities, limits, faults), and sharing one compiled
//! script across threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use morph_script::{
    field_output, SandboxLimits, ScriptError, ScriptSandbox, TimeoutBudget, HOST_CAPABILITIES,
};
use serde_json::{json, Value};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn page(fields: Value) -> Value {
    json!({
        "uuid": "0ab1",
        "schema": {"name": "page", "version": 1},
        "fields": fields,
    })
}

/// Compile `body` as the inside of `migrate(node, fieldname)` and run it.
fn run_body(body: &str, fields: Value, field: &str) -> Result<Value, ScriptError> {
    let sandbox = ScriptSandbox::default();
    let source = format!("function migrate(node, fieldname) {{\n{}\n}}", body);
    let script = sandbox.compile(&source).expect("script compiles");
    sandbox.execute(&script, &page(fields), field)
}

/// Run `body`, which must assign `node.fields.out`, and return that value.
fn eval_out(body: &str) -> Value {
    let out = run_body(&format!("{}\nreturn node;", body), json!({}), "out").unwrap();
    field_output(&out, "out").cloned().unwrap_or(Value::Null)
}

// ──────────────────────────────────────────────
// Language surface
// ──────────────────────────────────────────────

#[test]
fn loops_and_accumulation() {
    assert_eq!(
        eval_out("var s = 0; for (var i = 1; i <= 10; i++) { s += i; } node.fields.out = s;"),
        json!(55)
    );
    assert_eq!(
        eval_out(
            "var s = ''; for (const x of ['a', 'b', 'c']) { if (x === 'b') continue; s += x; } node.fields.out = s;"
        ),
        json!("ac")
    );
    assert_eq!(
        eval_out("var n = 0; while (true) { n++; if (n > 4) break; } node.fields.out = n;"),
        json!(5)
    );
}

#[test]
fn string_methods() {
    assert_eq!(
        eval_out("node.fields.out = '  Hello World  '.trim().toLowerCase().split(' ').join('-');"),
        json!("hello-world")
    );
    assert_eq!(
        eval_out("node.fields.out = 'abcdef'.substring(4, 1) + 'abcdef'.slice(-2);"),
        json!("bcdef")
    );
    assert_eq!(
        eval_out("var s = '<p>x</p>'; node.fields.out = s.replace('<p>', '').replace('</p>', '');"),
        json!("x")
    );
    assert_eq!(
        eval_out("node.fields.out = [ 'é'.length, 'héllo'.indexOf('l'), 'abc'.charAt(1) ];"),
        json!([1, 2, "b"])
    );
}

#[test]
fn arrays_and_objects() {
    assert_eq!(
        eval_out("var a = [3, 1]; a.push(2); a[5] = 9; node.fields.out = [a.length, a.indexOf(2), a.includes(9)];"),
        json!([6, 2, true])
    );
    assert_eq!(
        eval_out("var o = {b: 1, a: 2}; o.c = 3; delete o.b; node.fields.out = Object.keys(o);"),
        json!(["a", "c"])
    );
    assert_eq!(
        eval_out("node.fields.out = JSON.parse(JSON.stringify({x: [1, 'two', null]}));"),
        json!({"x": [1, "two", null]})
    );
}

#[test]
fn helper_functions_and_recursion() {
    let sandbox = ScriptSandbox::default();
    let script = sandbox
        .compile(
            "function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }\n\
             function migrate(node, fieldname) {\n\
               node.fields[fieldname] = fact(node.fields[fieldname]);\n\
               return node;\n\
             }",
        )
        .unwrap();
    let out = sandbox
        .execute(&script, &page(json!({"n": 5})), "n")
        .unwrap();
    assert_eq!(field_output(&out, "n"), Some(&json!(120)));
}

#[test]
fn coercions_follow_script_semantics() {
    assert_eq!(
        eval_out("node.fields.out = [1 + '2', '3' * '4', 1 == '1', 1 === '1', null == undefined, typeof null];"),
        json!(["12", 12, true, false, true, "object"])
    );
    assert_eq!(
        eval_out("node.fields.out = [parseInt('42px'), parseFloat('2.5kg'), Number('x') + 1, Math.max(1, 7, 3)];"),
        json!([42, 2.5, null, 7])
    );
}

#[test]
fn returning_bare_field_map_is_accepted() {
    let out = run_body("return {title: 'x'};", json!({"title": "y"}), "title").unwrap();
    assert_eq!(field_output(&out, "title"), Some(&json!("x")));
}

#[test]
fn deleting_the_field_yields_absent_output() {
    let out = run_body(
        "delete node.fields[fieldname]; return node;",
        json!({"title": "y"}),
        "title",
    )
    .unwrap();
    assert_eq!(field_output(&out, "title"), None);
}

// ──────────────────────────────────────────────
// Failures
// ──────────────────────────────────────────────

#[test]
fn thrown_value_is_a_runtime_error() {
    let err = run_body("throw 'bad input';", json!({}), "x").unwrap_err();
    match err {
        ScriptError::Runtime { message } => assert!(message.contains("bad input")),
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let err = run_body("return missing;", json!({}), "x").unwrap_err();
    assert!(matches!(err, ScriptError::Runtime { .. }));
    assert!(err.to_string().contains("missing is not defined"));
}

#[test]
fn reading_property_of_undefined_is_a_runtime_error() {
    let err = run_body("return node.nothing.here;", json!({}), "x").unwrap_err();
    assert!(err.to_string().contains("cannot read property"));
}

#[test]
fn every_host_capability_is_denied() {
    for cap in HOST_CAPABILITIES {
        let err = run_body(&format!("var x = {}; return node;", cap), json!({}), "x").unwrap_err();
        assert_eq!(
            err,
            ScriptError::SecurityViolation {
                capability: cap.to_string()
            },
            "capability {}",
            cap
        );
    }
}

#[test]
fn host_access_through_calls_and_typeof_is_denied() {
    for body in [
        "System.exit(1); return node;",
        "java.lang.System.exit(1); return node;",
        "require('fs'); return node;",
        "quit(); return node;",
        "if (typeof process !== 'undefined') {} return node;",
    ] {
        assert!(
            matches!(
                run_body(body, json!({}), "x"),
                Err(ScriptError::SecurityViolation { .. })
            ),
            "{}",
            body
        );
    }
}

#[test]
fn runaway_recursion_hits_call_depth() {
    let sandbox = ScriptSandbox::default();
    let script = sandbox
        .compile("function f(n) { return f(n + 1); }\nfunction migrate(node, x) { return f(0); }")
        .unwrap();
    let err = sandbox.execute(&script, &page(json!({})), "x").unwrap_err();
    assert!(err.to_string().contains("call depth"));
}

#[test]
fn string_growth_is_bounded() {
    let sandbox = ScriptSandbox::new(SandboxLimits {
        max_string_len: 1024,
        ..SandboxLimits::default()
    });
    let script = sandbox
        .compile("function migrate(node, f) { var s = 'x'; while (true) { s = s + s; } }")
        .unwrap();
    let err = sandbox.execute(&script, &page(json!({})), "f").unwrap_err();
    assert!(err.to_string().contains("string length"));
}

#[test]
fn collection_growth_is_bounded() {
    let sandbox = ScriptSandbox::new(SandboxLimits {
        max_collection_len: 100,
        ..SandboxLimits::default()
    });
    let script = sandbox
        .compile("function migrate(node, f) { var a = []; while (true) { a.push(1); } }")
        .unwrap();
    let err = sandbox.execute(&script, &page(json!({})), "f").unwrap_err();
    assert!(err.to_string().contains("collection size"));
}

#[test]
fn wall_clock_timeout_does_not_block_the_caller() {
    let sandbox = ScriptSandbox::new(SandboxLimits {
        timeout: Duration::from_millis(200),
        fuel: u64::MAX,
        ..SandboxLimits::default()
    });
    let script = sandbox
        .compile("function migrate(node, f) { for (;;) {} }")
        .unwrap();
    let started = std::time::Instant::now();
    let err = sandbox.execute(&script, &page(json!({})), "f").unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Timeout {
            budget: TimeoutBudget::WallClock(_)
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn failed_execution_leaves_sandbox_usable() {
    let sandbox = ScriptSandbox::default();
    let bad = sandbox
        .compile("function migrate(node, f) { System.exit(0); }")
        .unwrap();
    let good = sandbox
        .compile("function migrate(node, f) { node.fields[f] = 'ok'; return node; }")
        .unwrap();
    assert!(sandbox.execute(&bad, &page(json!({})), "f").is_err());
    let out = sandbox.execute(&good, &page(json!({})), "f").unwrap();
    assert_eq!(field_output(&out, "f"), Some(&json!("ok")));
}

// ──────────────────────────────────────────────
// Sharing
// ──────────────────────────────────────────────

#[test]
fn compiled_script_runs_concurrently() {
    let sandbox = Arc::new(ScriptSandbox::default());
    let script = Arc::new(
        sandbox
            .compile("function migrate(node, f) { node.fields[f] = node.uuid + '!'; return node; }")
            .unwrap(),
    );
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sandbox = Arc::clone(&sandbox);
            let script = Arc::clone(&script);
            thread::spawn(move || {
                let node = json!({"uuid": format!("n{}", i), "fields": {}});
                let out = sandbox.execute(&script, &node, "f").unwrap();
                field_output(&out, "f").cloned()
            })
        })
        .collect();
    for (i, h) in handles.into_iter().enumerate() {
        assert_eq!(h.join().unwrap(), Some(json!(format!("n{}!", i))));
    }
}
