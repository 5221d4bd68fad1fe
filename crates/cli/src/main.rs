mod check_script;
mod fixture;
mod migrate;
mod plan;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// morph: schema-driven content migration
#[derive(Parser)]
#[command(
    name = "morph",
    version,
    about = "Schema-driven content migration toolkit"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two schema versions and print the field operations
    Plan {
        /// Path to the old schema version (JSON)
        old: PathBuf,
        /// Path to the new schema version (JSON)
        new: PathBuf,
        /// Rename hint, repeatable: old_field=new_field
        #[arg(long = "rename", value_name = "OLD=NEW", value_parser = parse_pair)]
        renames: Vec<(String, String)>,
        /// Custom script for a new field, repeatable: field=path/to/script.js
        #[arg(long = "script", value_name = "FIELD=PATH", value_parser = parse_pair)]
        scripts: Vec<(String, String)>,
    },
    /// Migrate every container of a fixture store from one schema version to another
    Migrate {
        /// Fixture file with `schemas` and `containers`
        fixture: PathBuf,
        /// Source schema version, e.g. article@1
        #[arg(long)]
        from: String,
        /// Target schema version, e.g. article@2
        #[arg(long)]
        to: String,
        /// Rename hint, repeatable: old_field=new_field
        #[arg(long = "rename", value_name = "OLD=NEW", value_parser = parse_pair)]
        renames: Vec<(String, String)>,
        /// Custom script for a new field, repeatable: field=path/to/script.js
        #[arg(long = "script", value_name = "FIELD=PATH", value_parser = parse_pair)]
        scripts: Vec<(String, String)>,
        /// Migration settings (TOML with a [migration] table)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of concurrent workers (overrides the config file)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Compile a migration script and print its digest
    CheckScript {
        /// Path to the script source
        script: PathBuf,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
            Ok((k.trim().to_string(), v.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Plan {
            old,
            new,
            renames,
            scripts,
        } => {
            plan::cmd_plan(&old, &new, &renames, &scripts, cli.output, cli.quiet);
        }
        Commands::Migrate {
            fixture,
            from,
            to,
            renames,
            scripts,
            config,
            workers,
        } => {
            let code = migrate::cmd_migrate(migrate::MigrateOptions {
                fixture: &fixture,
                from: &from,
                to: &to,
                renames: &renames,
                scripts: &scripts,
                config: config.as_deref(),
                workers,
                output: cli.output,
                quiet: cli.quiet,
            });
            process::exit(code);
        }
        Commands::CheckScript { script } => {
            check_script::cmd_check_script(&script, cli.output, cli.quiet);
        }
    }
}

/// Log to stderr, filtered by `MORPH_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("MORPH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Report a fatal error and exit with status 1.
pub(crate) fn fail(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_splits_on_first_equals() {
        assert_eq!(
            parse_pair("content=body").unwrap(),
            ("content".to_string(), "body".to_string())
        );
        assert_eq!(
            parse_pair("slug=scripts/a=b.js").unwrap(),
            ("slug".to_string(), "scripts/a=b.js".to_string())
        );
    }

    #[test]
    fn pair_rejects_missing_side() {
        assert!(parse_pair("content").is_err());
        assert!(parse_pair("=body").is_err());
        assert!(parse_pair("content=").is_err());
    }
}
