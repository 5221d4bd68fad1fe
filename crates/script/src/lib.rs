//! morph-script: the sandboxed script runtime for custom field migrations.
//!
//! Scripts are written in a small JavaScript-like language and declare a
//! `migrate(node, fieldname)` function. They are compiled once and may then
//! be executed many times, each run isolated on its own thread with a wall
//! clock deadline, a step budget and size limits. No host capability (process
//! exit, file or network access, dynamic evaluation) is reachable.
//!
//! ```
//! use morph_script::{field_output, ScriptSandbox};
//! use serde_json::json;
//!
//! let sandbox = ScriptSandbox::default();
//! let script = sandbox
//!     .compile("function migrate(node, f) { node.fields[f] = node.fields[f].toUpperCase(); return node; }")
//!     .unwrap();
//! let out = sandbox
//!     .execute(&script, &json!({"fields": {"title": "hello"}}), "title")
//!     .unwrap();
//! assert_eq!(field_output(&out, "title"), Some(&json!("HELLO")));
//! ```

pub mod ast;
pub mod error;
mod interp;
pub mod lexer;
pub mod parser;
pub mod sandbox;
pub mod value;

pub use error::{CompileError, ScriptError, TimeoutBudget};
pub use interp::HOST_CAPABILITIES;
pub use sandbox::{field_output, CompiledScript, SandboxLimits, ScriptSandbox, ENTRY_POINT};
