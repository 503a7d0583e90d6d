//! Stock custom parsers for the siphon indexer.
//!
//! These exercise the core's extension surface the same way an embedder
//! would: each parser exposes a stable identifier and is registered on
//! the [`PipelineBuilder`](siphon_core::pipeline::PipelineBuilder) under
//! its message type URL or event type. The binary registers them by
//! default; embedders building their own binary can pick and choose or
//! add their own.

pub mod bank;
pub mod staking;

pub use bank::{BankTransferParser, MSG_SEND_TYPE_URL};
pub use staking::{UnbondingCompleteParser, COMPLETE_UNBONDING_EVENT_TYPE};
