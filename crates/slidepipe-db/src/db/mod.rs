//! Job repositories and database setup.
//
// Storage-agnostic contract used by the worker
pub mod store;
//
// Postgres-backed implementation over `upload_jobs`
pub mod job;
//
// Process-local implementation
pub mod memory;
//
// Pool creation and migrations
pub mod setup;

pub use job::PgJobRepository;
pub use memory::InMemoryJobStore;
pub use setup::connect_and_migrate;
pub use store::JobStore;
