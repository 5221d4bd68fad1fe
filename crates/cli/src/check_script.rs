//! CLI check-script subcommand.

use std::path::Path;
use std::process;

use morph_script::ScriptSandbox;

use crate::{fail, OutputFormat};

pub(crate) fn cmd_check_script(path: &Path, output: OutputFormat, quiet: bool) {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => fail(
            &format!("error reading '{}': {}", path.display(), e),
            output,
            quiet,
        ),
    };

    match ScriptSandbox::default().compile(&source) {
        Ok(script) => match output {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "ok": true, "digest": script.digest() })
                );
            }
            OutputFormat::Text => {
                if quiet {
                    println!("{}", script.digest());
                } else {
                    println!("{}: ok (sha256 {})", path.display(), script.digest());
                }
            }
        },
        Err(e) => {
            match output {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "ok": false,
                            "line": e.line,
                            "message": e.message,
                        })
                    );
                }
                OutputFormat::Text => {
                    if !quiet {
                        eprintln!("{}: {}", path.display(), e);
                    }
                }
            }
            process::exit(1);
        }
    }
}
