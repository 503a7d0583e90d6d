//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ChainError`] - Remote node RPC errors
//! - [`StorageError`] - Database/store errors
//! - [`ParseError`] - Transaction and block-event parsing errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Chain Errors
// =============================================================================

/// Remote node RPC and connectivity errors.
///
/// These errors occur when communicating with the CometBFT node
/// over HTTP JSON-RPC.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection to the node could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed or the node returned an error object.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// The node's response could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl ChainError {
    /// Whether this is the transient `EOF`-suffixed transport error some
    /// nodes emit under load. Callers retry these once inline.
    pub fn is_eof(&self) -> bool {
        self.to_string().ends_with("EOF")
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and store errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and migrations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),
}

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors raised while turning raw node payloads into typed wrappers.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Block header data was malformed or incomplete.
    #[error("Malformed block: {0}")]
    MalformedBlock(String),

    /// Transaction data could not be parsed.
    #[error("Malformed transaction: {0}")]
    MalformedTx(String),

    /// Block event data could not be parsed.
    #[error("Malformed block event: {0}")]
    MalformedEvent(String),

    /// A registered custom parser rejected its input.
    #[error("Custom parser \"{identifier}\" failed: {message}")]
    CustomParser {
        /// Identifier of the failing parser.
        identifier: String,
        /// Error details.
        message: String,
    },
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by the pipeline. It wraps all
/// lower-level errors and adds pipeline-specific fatal variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Remote node error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two parsers of the same kind were registered under one identifier.
    ///
    /// This is a fatal setup error: custom-parser artifacts are keyed by
    /// identifier in the store, so identifiers must be injective per kind.
    #[error("Duplicate {kind} parser with identifier \"{identifier}\", parsers must be uniquely identified")]
    DuplicateParser {
        /// Parser kind ("message" or "block event").
        kind: &'static str,
        /// The colliding identifier.
        identifier: String,
    },

    /// More than 10% of store writes needed a reattempt.
    ///
    /// Measured at `block_timer` boundaries; a breach means the database
    /// is unhealthy and continuing would only pile up retries.
    #[error("More than 10% of the last {writes} DB writes have failed ({reattempts} reattempts)")]
    RetryRatioExceeded {
        /// Reattempted writes so far.
        reattempts: u64,
        /// Total writes so far.
        writes: u64,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: la chaîne de conversion d'erreurs fonctionne
    // Permet d'utiliser ? à travers les couches
    #[test]
    fn test_error_conversion_chain() {
        let storage_err = StorageError::QueryError("db failed".into());
        let indexer_err: IndexerError = storage_err.into();
        assert!(indexer_err.to_string().contains("db failed"));

        let chain_err = ChainError::RpcError("rpc failed".into());
        let indexer_err: IndexerError = chain_err.into();
        assert!(indexer_err.to_string().contains("rpc failed"));

        let parse_err = ParseError::MalformedTx("bad tx".into());
        let indexer_err: IndexerError = parse_err.into();
        assert!(indexer_err.to_string().contains("bad tx"));
    }

    // Test critique: détection des erreurs transport "EOF" à retenter
    #[test]
    fn test_eof_detection() {
        let err = ChainError::RpcError("post failed: unexpected EOF".into());
        assert!(err.is_eof());

        let err = ChainError::RpcError("connection refused".into());
        assert!(!err.is_eof());
    }

    // Test critique: le message de doublon contient l'identifiant fautif
    #[test]
    fn test_duplicate_parser_includes_identifier() {
        let err = IndexerError::DuplicateParser {
            kind: "message",
            identifier: "bank_transfers".into(),
        };
        assert!(err.to_string().contains("bank_transfers"));
    }
}
