//! Compile-once, execute-isolated migration scripts.
//!
//! Each execution runs on its own thread. The input node is copied in as
//! JSON and the result copied out the same way, so a script never holds a
//! reference into host memory. The caller waits on a channel with a
//! deadline; a script that overruns is abandoned and stops itself at its
//! next clock poll.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value as Json;
use sha2::{Digest, Sha256};

use crate::ast::Program;
use crate::error::{CompileError, ScriptError, TimeoutBudget};
use crate::interp;
use crate::lexer::lex;
use crate::parser::parse;
use crate::value::Value;

/// Name of the function every script must declare.
pub const ENTRY_POINT: &str = "migrate";

const SANDBOX_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Slack on top of the script timeout before the caller gives up waiting.
const RECV_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    /// Interpreter steps per execution.
    pub fuel: u64,
    pub max_call_depth: usize,
    /// Bytes.
    pub max_string_len: usize,
    /// Elements of one array or members of one object.
    pub max_collection_len: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            timeout: Duration::from_millis(1000),
            fuel: 1_000_000,
            max_call_depth: 64,
            max_string_len: 1 << 20,
            max_collection_len: 100_000,
        }
    }
}

/// A parsed script, shareable across workers.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    program: Arc<Program>,
    digest: String,
}

impl CompiledScript {
    /// Hex SHA-256 of the source text.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: SandboxLimits,
}

impl ScriptSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        ScriptSandbox { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn compile(&self, source: &str) -> Result<CompiledScript, CompileError> {
        let tokens = lex(source)?;
        let program = parse(&tokens)?;
        if !program.functions.contains_key(ENTRY_POINT) {
            return Err(CompileError::new(
                1,
                format!("script must declare function {}(node, fieldname)", ENTRY_POINT),
            ));
        }
        let digest = format!("{:x}", Sha256::digest(source.as_bytes()));
        tracing::debug!(%digest, functions = program.functions.len(), "compiled migration script");
        Ok(CompiledScript {
            program: Arc::new(program),
            digest,
        })
    }

    /// Run `migrate(node, field)` and return what it returned, as JSON.
    ///
    /// The return value must be an object: either the node (with a `fields`
    /// member) or a bare field map.
    pub fn execute(
        &self,
        script: &CompiledScript,
        node: &Json,
        field: &str,
    ) -> Result<Json, ScriptError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let program = Arc::clone(&script.program);
        let limits = self.limits;
        let input = node.clone();
        let field_name = field.to_string();

        thread::Builder::new()
            .name("morph-script".into())
            .stack_size(SANDBOX_STACK_SIZE)
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_isolated(&program, &limits, &input, &field_name)
                }));
                let result = outcome.unwrap_or_else(|payload| {
                    Err(ScriptError::runtime(format!(
                        "interpreter fault: {}",
                        panic_message(payload.as_ref())
                    )))
                });
                let _ = tx.send(result);
            })
            .map_err(|e| ScriptError::runtime(format!("failed to start sandbox thread: {}", e)))?;

        let result = match rx.recv_timeout(self.limits.timeout + RECV_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ScriptError::Timeout {
                budget: TimeoutBudget::WallClock(self.limits.timeout),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ScriptError::runtime("sandbox thread exited without a result"))
            }
        };
        if let Err(e) = &result {
            tracing::debug!(digest = %script.digest, field, error = %e, "script execution failed");
        }
        result
    }
}

fn run_isolated(
    program: &Program,
    limits: &SandboxLimits,
    input: &Json,
    field: &str,
) -> Result<Json, ScriptError> {
    let node = Value::from_json(input)?;
    let out = interp::run(program, limits, ENTRY_POINT, vec![node, Value::str(field)])?;
    match &out {
        Value::Object(_) => out.to_json(),
        other => Err(ScriptError::runtime(format!(
            "{} must return the node or a field map, got {}",
            ENTRY_POINT,
            other.type_of()
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The value a script produced for `field`: `result.fields[field]` when the
/// script returned a node, else `result[field]`. `None` means the script
/// removed the field.
pub fn field_output<'a>(result: &'a Json, field: &str) -> Option<&'a Json> {
    let value = match result.get("fields") {
        Some(Json::Object(fields)) => fields.get(field),
        _ => result.get(field),
    };
    value.filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PREPEND: &str = "function migrate(node, fieldname) {\n\
        node.fields[fieldname] = 'modified ' + node.fields[fieldname];\n\
        return node;\n\
    }";

    fn node(content: &str) -> Json {
        json!({"uuid": "c1", "schema": {"name": "page", "version": 1}, "fields": {"content": content}})
    }

    fn fast_limits() -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(300),
            ..SandboxLimits::default()
        }
    }

    #[test]
    fn prepends_to_field() {
        let sandbox = ScriptSandbox::default();
        let script = sandbox.compile(PREPEND).unwrap();
        let out = sandbox.execute(&script, &node("<b>hi</b>"), "content").unwrap();
        assert_eq!(field_output(&out, "content"), Some(&json!("modified <b>hi</b>")));
    }

    #[test]
    fn digest_is_stable_and_source_sensitive() {
        let sandbox = ScriptSandbox::default();
        let a = sandbox.compile(PREPEND).unwrap();
        let b = sandbox.compile(PREPEND).unwrap();
        let c = sandbox
            .compile("function migrate(node, f) { return node; }")
            .unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn missing_entry_point_is_a_compile_error() {
        let err = ScriptSandbox::default()
            .compile("function transform(node) { return node; }")
            .unwrap_err();
        assert!(err.message.contains("migrate"));
    }

    #[test]
    fn syntax_error_is_a_compile_error() {
        assert!(ScriptSandbox::default()
            .compile("function migrate(node, fieldname) { return node")
            .is_err());
    }

    #[test]
    fn host_exit_is_a_security_violation() {
        let sandbox = ScriptSandbox::default();
        let script = sandbox
            .compile("function migrate(node, fieldname) { System.exit(0); return node; }")
            .unwrap();
        let err = sandbox.execute(&script, &node("x"), "content").unwrap_err();
        assert_eq!(
            err,
            ScriptError::SecurityViolation {
                capability: "System".into()
            }
        );
    }

    #[test]
    fn infinite_loop_times_out() {
        let sandbox = ScriptSandbox::new(SandboxLimits {
            fuel: u64::MAX,
            ..fast_limits()
        });
        let script = sandbox
            .compile("function migrate(node, f) { while (true) {} }")
            .unwrap();
        let err = sandbox.execute(&script, &node("x"), "content").unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Timeout {
                budget: TimeoutBudget::WallClock(_)
            }
        ));
    }

    #[test]
    fn fuel_exhaustion_times_out() {
        let sandbox = ScriptSandbox::new(SandboxLimits {
            fuel: 10_000,
            ..SandboxLimits::default()
        });
        let script = sandbox
            .compile("function migrate(node, f) { var i = 0; while (true) { i++; } }")
            .unwrap();
        let err = sandbox.execute(&script, &node("x"), "content").unwrap_err();
        assert_eq!(
            err,
            ScriptError::Timeout {
                budget: TimeoutBudget::Fuel(10_000)
            }
        );
    }

    #[test]
    fn non_object_return_is_a_runtime_error() {
        let sandbox = ScriptSandbox::default();
        let script = sandbox
            .compile("function migrate(node, f) { return 42; }")
            .unwrap();
        assert!(matches!(
            sandbox.execute(&script, &node("x"), "content"),
            Err(ScriptError::Runtime { .. })
        ));
    }

    #[test]
    fn input_is_not_mutated() {
        let sandbox = ScriptSandbox::default();
        let script = sandbox.compile(PREPEND).unwrap();
        let input = node("a");
        sandbox.execute(&script, &input, "content").unwrap();
        assert_eq!(input["fields"]["content"], json!("a"));
    }

    #[test]
    fn field_output_accepts_bare_field_map() {
        let out = json!({"content": "x"});
        assert_eq!(field_output(&out, "content"), Some(&json!("x")));
        assert_eq!(field_output(&json!({"fields": {}}), "content"), None);
        assert_eq!(field_output(&json!({"fields": {"content": null}}), "content"), None);
    }
}
