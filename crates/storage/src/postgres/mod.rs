//! PostgreSQL storage adapter.
//!
//! This module implements the `Store` port defined in `siphon-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgStore`] - The `Store` implementation
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let store = Arc::new(PgStore::new(&db));
//! ```

mod database;
mod store;

pub use database::{Database, DatabaseConfig};
pub use store::PgStore;
