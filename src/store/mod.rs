//! Persistence layer: the shared job store and its libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{JobStore, QueueSelector, ReapReport, UsageSummary};
