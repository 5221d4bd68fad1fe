//! morph-storage: the `ContentStore` trait, its error type, and an in-memory backend.
//!
//! Backends run [`conformance::run_conformance_suite`] to check that they honor
//! the trait's contract.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{ContainerPage, PageCursor};
pub use traits::ContentStore;
