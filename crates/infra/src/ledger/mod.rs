//! Append-only event ledger: the single source of truth every other
//! component reads from.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use query::{EventFilter, EventQueryResult, Pagination, SortOrder};
pub use r#trait::{EventLedger, LedgerError};
