//! Persistence for processor and subscription descriptors.

pub mod postgres;
pub mod store;

pub use postgres::PostgresMetadataStore;
pub use store::{InMemoryMetadataStore, MetadataError, MetadataStore};
