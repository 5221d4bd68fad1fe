//! CLI migrate subcommand.
//!
//! Loads a fixture into the in-memory store, runs the migration and prints
//! the report. Exit status: 0 when every container migrated, 1 on a fatal
//! error, 2 when the run finished with failed containers or stopped early.

use std::path::Path;
use std::sync::Arc;

use morph_core::SchemaVersionId;
use morph_migrate::{
    MigrationConfig, MigrationOrchestrator, MigrationReport, MigrationRequest, MigrationStatus,
};

use crate::fixture::{load_scripts, load_store};
use crate::{report_error, OutputFormat};

pub(crate) struct MigrateOptions<'a> {
    pub fixture: &'a Path,
    pub from: &'a str,
    pub to: &'a str,
    pub renames: &'a [(String, String)],
    pub scripts: &'a [(String, String)],
    pub config: Option<&'a Path>,
    pub workers: Option<usize>,
    pub output: OutputFormat,
    pub quiet: bool,
}

pub(crate) fn cmd_migrate(opts: MigrateOptions<'_>) -> i32 {
    let (output, quiet) = (opts.output, opts.quiet);
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            return 1;
        }
    };

    match runtime.block_on(run(&opts)) {
        Ok(report) => {
            print_report(&report, output, quiet);
            exit_code(&report)
        }
        Err(msg) => {
            report_error(&msg, output, quiet);
            1
        }
    }
}

async fn run(opts: &MigrateOptions<'_>) -> Result<MigrationReport, String> {
    let from: SchemaVersionId = opts
        .from
        .parse()
        .map_err(|e| format!("--from: {}", e))?;
    let to: SchemaVersionId = opts.to.parse().map_err(|e| format!("--to: {}", e))?;
    let config = load_config(opts.config, opts.workers)?;
    let scripts = load_scripts(opts.scripts)?;
    let store = Arc::new(load_store(opts.fixture).await?);

    let mut request = MigrationRequest::new(from, to);
    for (old, new) in opts.renames {
        request = request.rename(old.as_str(), new.as_str());
    }
    for (field, source) in scripts {
        request = request.script(field, source);
    }

    let orchestrator = MigrationOrchestrator::new(store, config);
    orchestrator
        .run(&request)
        .await
        .map_err(|e| format!("migration failed [{}]: {}", e.kind(), e))
}

fn load_config(path: Option<&Path>, workers: Option<usize>) -> Result<MigrationConfig, String> {
    let mut config = match path {
        Some(path) => MigrationConfig::load(path).map_err(|e| e.to_string())?,
        None => MigrationConfig::default(),
    };
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn print_report(report: &MigrationReport, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            if quiet {
                println!(
                    "{}: {}/{} migrated",
                    report.status, report.succeeded, report.attempted
                );
            } else {
                print!("{}", report);
            }
        }
    }
}

fn exit_code(report: &MigrationReport) -> i32 {
    if report.status == MigrationStatus::Completed && !report.has_failures() {
        0
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morph.toml");
        std::fs::write(&path, "[migration]\nworkers = 8\npage_size = 10\n").unwrap();

        let config = load_config(Some(&path), Some(2)).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.page_size, 10);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = load_config(None, Some(0)).unwrap_err();
        assert!(err.contains("workers"), "{err}");
    }
}
