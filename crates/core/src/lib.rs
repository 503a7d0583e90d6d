//! Core domain layer for the siphon indexer.
//!
//! This crate contains the domain models, port traits (interfaces), the
//! filter registries and the block-processing pipeline for a Cosmos-chain
//! indexer. It follows hexagonal architecture principles - this is the
//! innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      siphon (binary)                        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │       siphon-parsers         │          siphon-rpc          │
//! │    (stock custom parsers)    │       (CometBFT RPC)         │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                       siphon-storage                        │
//! │                        (PostgreSQL)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       siphon-core  ← YOU ARE HERE           │
//! │            (models, ports, filters, pipeline)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (BlockRecord, TxWrapper, EventWrapper, ...)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`filters`] - Message and block-event filter registries
//! - [`pipeline`] - The producer/consumer block-processing pipeline
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! Ports define interfaces that external adapters must implement:
//!
//! - [`ports::NodeClient`] - Fetch blocks from a CometBFT node
//! - [`ports::Store`] - Persist indexed data
//! - [`ports::MessageParser`] / [`ports::BlockEventParser`] - Custom
//!   per-type parsing plugins
//!
//! ## Pipeline
//!
//! The pipeline is a fixed topology of tasks over bounded channels: one
//! enqueuer producing heights, N fetch workers producing raw bundles, one
//! processor producing typed batches, one committer writing them. Bounded
//! channels give end-to-end backpressure; a slow database stalls fetching
//! rather than buffering the chain in memory.
//!
//! ## Extension Surface
//!
//! Embedders register custom message parsers, block-event parsers,
//! message filters, persistence models and even a custom height source on
//! [`pipeline::PipelineBuilder`] before the pipeline starts. Registries
//! are frozen at build time and read lock-free from every task.

pub mod error;
pub mod filters;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod ports;
