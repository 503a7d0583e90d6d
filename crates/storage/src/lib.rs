//! PostgreSQL storage for the siphon indexer.
//!
//! Implements the [`siphon_core::ports::Store`] port. The schema lives in
//! `migrations/` and is applied via `sqlx::migrate!` at startup;
//! embedder-registered custom models run afterwards as raw idempotent
//! statements.

mod postgres;

pub use postgres::{Database, DatabaseConfig, PgStore};
