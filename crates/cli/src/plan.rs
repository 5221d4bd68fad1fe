//! CLI plan subcommand: compare two schema files and print the operations.

use std::path::Path;

use morph_core::{FieldHints, SchemaComparator};

use crate::fixture::{load_schema, load_scripts};
use crate::{fail, OutputFormat};

pub(crate) fn cmd_plan(
    old_path: &Path,
    new_path: &Path,
    renames: &[(String, String)],
    scripts: &[(String, String)],
    output: OutputFormat,
    quiet: bool,
) {
    let old = load_schema(old_path).unwrap_or_else(|e| fail(&e, output, quiet));
    let new = load_schema(new_path).unwrap_or_else(|e| fail(&e, output, quiet));
    let sources = load_scripts(scripts).unwrap_or_else(|e| fail(&e, output, quiet));

    let hints = FieldHints {
        renames: renames.iter().cloned().collect(),
        scripts: sources,
    };
    let operations = match SchemaComparator::new().compare(&old, &new, &hints) {
        Ok(ops) => ops,
        Err(e) => fail(&format!("schema comparison failed: {}", e), output, quiet),
    };

    match output {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "from": old.id(),
                "to": new.id(),
                "operations": operations,
            });
            let pretty = serde_json::to_string_pretty(&json)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => {
            if !quiet {
                println!("{} -> {}: {} operation(s)", old.id(), new.id(), operations.len());
            }
            for op in &operations {
                println!("  {}", op);
            }
        }
    }
}
