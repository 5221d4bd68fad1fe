//! morph-migrate: schema-driven content migration.
//!
//! # Public API
//!
//! - [`MigrationOrchestrator`] -- migrates every container of one schema version to another
//! - [`MigrationRequest`] -- source and target versions, renames and custom scripts
//! - [`MigrationPlan`] -- the compared operations and compiled scripts of one run
//! - [`MigrationReport`], [`ContainerOutcome`] -- per-container results
//! - [`MigrationConfig`] -- worker, paging, script and retry settings (TOML)
//! - [`CancellationToken`] -- stops dispatch of further containers
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use morph_core::SchemaVersionId;
//! use morph_migrate::{MigrationConfig, MigrationOrchestrator, MigrationRequest};
//! use morph_storage::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = MigrationOrchestrator::new(store, MigrationConfig::default());
//! let request = MigrationRequest::new(
//!     SchemaVersionId::new("article", 1),
//!     SchemaVersionId::new("article", 2),
//! )
//! .rename("content", "body");
//! let report = orchestrator.run(&request).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod plan;
pub mod report;

pub use cancel::CancellationToken;
pub use config::{ConfigError, MigrationConfig};
pub use error::{ContainerError, MigrationError, MigrationErrorKind};
pub use orchestrator::{MigrationOrchestrator, MigrationRequest};
pub use plan::{MigrationPlan, Transformed};
pub use report::{ContainerOutcome, MigrationReport, MigrationStatus, SoftFailure};
