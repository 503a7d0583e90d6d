//! Port traits for custom parsers.
//!
//! This is the main extensibility point for embedders. A custom parser is
//! registered under a message type URL or block event type and produces an
//! artifact (arbitrary JSON) that the committer persists keyed by the
//! parser's identifier.
//!
//! Parsing is pure computation over already-fetched data, so these traits
//! are synchronous; the async seams stay at the I/O ports.

use crate::error::ParseResult;
use crate::models::BlockRecord;
use crate::ports::node_client::{RawEvent, RawMessage};

/// Custom parser for transaction messages of one type URL.
///
/// Implementations must expose a process-wide unique `identifier()`:
/// artifacts are persisted keyed by it, and duplicate identifiers within
/// the message-parser kind are a fatal setup error.
pub trait MessageParser: Send + Sync {
    /// Stable unique identifier for this parser.
    fn identifier(&self) -> &str;

    /// Parse one message into an artifact.
    ///
    /// An error here fails the whole transaction batch for the height
    /// (recorded as an unprocessable-tx failure), so implementations should
    /// only error on genuinely malformed input.
    fn parse(&self, block: &BlockRecord, message: &RawMessage) -> ParseResult<serde_json::Value>;
}

/// Custom parser for begin- or end-block events of one event type.
pub trait BlockEventParser: Send + Sync {
    /// Stable unique identifier for this parser.
    fn identifier(&self) -> &str;

    /// Parse one lifecycle event into an artifact.
    fn parse(&self, block: &BlockRecord, event: &RawEvent) -> ParseResult<serde_json::Value>;
}
