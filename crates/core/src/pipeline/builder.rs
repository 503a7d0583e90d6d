//! Pipeline assembly.
//!
//! [`PipelineBuilder`] collects every registration an embedder can make
//! (custom parsers, filters, custom persistence models, a custom
//! enqueuer) and produces an immutable [`ParserRegistry`] plus a ready-to-run
//! [`Pipeline`](crate::pipeline::Pipeline). All setup validation happens
//! in [`PipelineBuilder::build`], before any worker starts: an invalid
//! configuration, an unreadable filter file or a duplicate parser
//! identifier is fatal here.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{IndexerError, IndexerResult};
use crate::filters::{FilterConfig, MessageTypeFilter, StaticBlockEventFilterRegistry};
use crate::models::{BlockEventParserTracker, LifecyclePosition, MessageParserTracker};
use crate::pipeline::config::IndexerConfig;
use crate::pipeline::enqueue::{BlockEnqueuer, DefaultEnqueuer, FileEnqueuer, ReindexEnqueuer};
use crate::pipeline::Pipeline;
use crate::ports::{BlockEventParser, MessageParser, NodeClient, Store};

// =============================================================================
// Parser Registry
// =============================================================================

/// Read-only lookup surface for parsers and filters.
///
/// Built by [`PipelineBuilder::build`] and frozen before the pipeline
/// starts; readable from any task without locking. Tracker database ids
/// are resolved during pipeline bootstrap, which runs before the registry
/// is shared.
#[derive(Default)]
pub struct ParserRegistry {
    message_parsers: HashMap<String, Vec<Arc<dyn MessageParser>>>,
    begin_block_event_parsers: HashMap<String, Vec<Arc<dyn BlockEventParser>>>,
    end_block_event_parsers: HashMap<String, Vec<Arc<dyn BlockEventParser>>>,
    message_type_filters: Vec<Box<dyn MessageTypeFilter>>,
    begin_block_filters: StaticBlockEventFilterRegistry,
    end_block_filters: StaticBlockEventFilterRegistry,
    pub(crate) message_parser_trackers: HashMap<String, MessageParserTracker>,
    pub(crate) begin_block_parser_trackers: HashMap<String, BlockEventParserTracker>,
    pub(crate) end_block_parser_trackers: HashMap<String, BlockEventParserTracker>,
}

impl ParserRegistry {
    /// Parsers registered under a message type URL.
    pub fn message_parsers(&self, type_url: &str) -> &[Arc<dyn MessageParser>] {
        self.message_parsers
            .get(type_url)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Custom parsers for a begin-block event type.
    pub fn begin_block_event_parsers(&self, event_type: &str) -> &[Arc<dyn BlockEventParser>] {
        self.begin_block_event_parsers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Custom parsers for an end-block event type.
    pub fn end_block_event_parsers(&self, event_type: &str) -> &[Arc<dyn BlockEventParser>] {
        self.end_block_event_parsers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Message type filters, file-loaded and programmatic merged.
    pub fn message_type_filters(&self) -> &[Box<dyn MessageTypeFilter>] {
        &self.message_type_filters
    }

    /// Filter registry for begin-block events.
    pub fn begin_block_filters(&self) -> &StaticBlockEventFilterRegistry {
        &self.begin_block_filters
    }

    /// Filter registry for end-block events.
    pub fn end_block_filters(&self) -> &StaticBlockEventFilterRegistry {
        &self.end_block_filters
    }

    /// Tracker rows for custom message parsers, keyed by identifier.
    pub fn message_parser_trackers(&self) -> &HashMap<String, MessageParserTracker> {
        &self.message_parser_trackers
    }

    /// Tracker rows for custom begin-block event parsers.
    pub fn begin_block_parser_trackers(&self) -> &HashMap<String, BlockEventParserTracker> {
        &self.begin_block_parser_trackers
    }

    /// Tracker rows for custom end-block event parsers.
    pub fn end_block_parser_trackers(&self) -> &HashMap<String, BlockEventParserTracker> {
        &self.end_block_parser_trackers
    }
}

// =============================================================================
// Pipeline Builder
// =============================================================================

/// Collects registrations and produces a [`Pipeline`].
///
/// ```ignore
/// let pipeline = PipelineBuilder::new(config)
///     .register_message_parser("/cosmos.bank.v1beta1.MsgSend", Arc::new(parser))
///     .register_message_type_filter(Box::new(filter))
///     .build(client, store)?;
/// pipeline.run(shutdown_rx).await?;
/// ```
pub struct PipelineBuilder {
    config: IndexerConfig,
    message_parsers: Vec<(String, Arc<dyn MessageParser>)>,
    begin_block_event_parsers: Vec<(String, Arc<dyn BlockEventParser>)>,
    end_block_event_parsers: Vec<(String, Arc<dyn BlockEventParser>)>,
    message_type_filters: Vec<Box<dyn MessageTypeFilter>>,
    custom_models: Vec<String>,
    enqueuer: Option<Box<dyn BlockEnqueuer>>,
}

impl PipelineBuilder {
    /// Start a builder from a configuration.
    pub fn new(config: IndexerConfig) -> Self {
        Self {
            config,
            message_parsers: Vec::new(),
            begin_block_event_parsers: Vec::new(),
            end_block_event_parsers: Vec::new(),
            message_type_filters: Vec::new(),
            custom_models: Vec::new(),
            enqueuer: None,
        }
    }

    /// Register a custom message parser under a message type URL.
    ///
    /// Multiple parsers may share a type URL; identifiers must be unique
    /// across all message parsers.
    pub fn register_message_parser(
        mut self,
        type_url: impl Into<String>,
        parser: Arc<dyn MessageParser>,
    ) -> Self {
        self.message_parsers.push((type_url.into(), parser));
        self
    }

    /// Register a custom begin-block event parser under an event type.
    pub fn register_begin_block_event_parser(
        mut self,
        event_type: impl Into<String>,
        parser: Arc<dyn BlockEventParser>,
    ) -> Self {
        self.begin_block_event_parsers
            .push((event_type.into(), parser));
        self
    }

    /// Register a custom end-block event parser under an event type.
    pub fn register_end_block_event_parser(
        mut self,
        event_type: impl Into<String>,
        parser: Arc<dyn BlockEventParser>,
    ) -> Self {
        self.end_block_event_parsers
            .push((event_type.into(), parser));
        self
    }

    /// Register an additional message type filter.
    pub fn register_message_type_filter(mut self, filter: Box<dyn MessageTypeFilter>) -> Self {
        self.message_type_filters.push(filter);
        self
    }

    /// Register custom persistence models as idempotent SQL statements,
    /// migrated once at pipeline bootstrap.
    pub fn register_custom_models<S: Into<String>>(
        mut self,
        statements: impl IntoIterator<Item = S>,
    ) -> Self {
        self.custom_models
            .extend(statements.into_iter().map(Into::into));
        self
    }

    /// Inject a custom enqueue source, superseding mode selection.
    pub fn enqueuer(mut self, enqueuer: Box<dyn BlockEnqueuer>) -> Self {
        self.enqueuer = Some(enqueuer);
        self
    }

    /// Validate everything and assemble the pipeline.
    ///
    /// Fatal here, before any worker starts: invalid configuration,
    /// duplicate parser identifiers, unreadable or malformed filter file.
    pub fn build(
        self,
        client: Arc<dyn NodeClient>,
        store: Arc<dyn Store>,
    ) -> IndexerResult<Pipeline> {
        let mut config = self.config;
        config.validate()?;

        let mut registry = ParserRegistry::default();
        registry.message_type_filters = self.message_type_filters;

        // Filter file entries are merged with programmatic registrations.
        if let Some(path) = &config.filter_file {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                IndexerError::Config(format!("failed to read filter file {}: {e}", path.display()))
            })?;
            let output = FilterConfig::from_json(&contents)?.into_filters()?;
            registry.begin_block_filters.extend(output.begin_block);
            registry.end_block_filters.extend(output.end_block);
            registry.message_type_filters.extend(output.message_filters);
            info!(path = %path.display(), "loaded filter file");
        }

        for (type_url, parser) in self.message_parsers {
            let identifier = parser.identifier().to_string();
            if registry.message_parser_trackers.contains_key(&identifier) {
                return Err(IndexerError::DuplicateParser {
                    kind: "message",
                    identifier,
                });
            }
            registry.message_parser_trackers.insert(
                identifier.clone(),
                MessageParserTracker {
                    db_id: None,
                    identifier,
                },
            );
            registry
                .message_parsers
                .entry(type_url)
                .or_default()
                .push(parser);
        }

        for (event_type, parser) in self.begin_block_event_parsers {
            register_block_event_parser(
                &mut registry.begin_block_event_parsers,
                &mut registry.begin_block_parser_trackers,
                &registry.end_block_parser_trackers,
                event_type,
                parser,
                LifecyclePosition::BeginBlock,
            )?;
        }

        for (event_type, parser) in self.end_block_event_parsers {
            register_block_event_parser(
                &mut registry.end_block_event_parsers,
                &mut registry.end_block_parser_trackers,
                &registry.begin_block_parser_trackers,
                event_type,
                parser,
                LifecyclePosition::EndBlock,
            )?;
        }

        let enqueuer: Box<dyn BlockEnqueuer> = match self.enqueuer {
            // An explicitly injected enqueue source wins over mode selection
            Some(custom) => custom,
            None => match (&config.reindex_message_type, &config.block_input_file) {
                (Some(message_type), _) => Box::new(ReindexEnqueuer::new(
                    store.clone(),
                    config.chain_id.clone(),
                    message_type.clone(),
                )),
                (None, Some(path)) => Box::new(FileEnqueuer::new(path.clone(), &config)),
                (None, None) => Box::new(DefaultEnqueuer::new(client.clone(), config.clone())),
            },
        };

        Ok(Pipeline::assemble(
            config,
            registry,
            self.custom_models,
            enqueuer,
            client,
            store,
        ))
    }
}

/// Block-event parser identifiers are unique across both lifecycles:
/// they share one tracker table in the store.
fn register_block_event_parser(
    parsers: &mut HashMap<String, Vec<Arc<dyn BlockEventParser>>>,
    trackers: &mut HashMap<String, BlockEventParserTracker>,
    other_trackers: &HashMap<String, BlockEventParserTracker>,
    event_type: String,
    parser: Arc<dyn BlockEventParser>,
    lifecycle: LifecyclePosition,
) -> IndexerResult<()> {
    let identifier = parser.identifier().to_string();
    if trackers.contains_key(&identifier) || other_trackers.contains_key(&identifier) {
        return Err(IndexerError::DuplicateParser {
            kind: "block event",
            identifier,
        });
    }
    trackers.insert(
        identifier.clone(),
        BlockEventParserTracker {
            db_id: None,
            identifier,
            lifecycle,
        },
    );
    parsers.entry(event_type).or_default().push(parser);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseResult;
    use crate::models::BlockRecord;
    use crate::pipeline::testing::{MockNodeClient, RecordingStore};
    use crate::ports::{RawEvent, RawMessage};

    struct NamedMessageParser(&'static str);

    impl MessageParser for NamedMessageParser {
        fn identifier(&self) -> &str {
            self.0
        }

        fn parse(&self, _: &BlockRecord, _: &RawMessage) -> ParseResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    struct NamedEventParser(&'static str);

    impl BlockEventParser for NamedEventParser {
        fn identifier(&self) -> &str {
            self.0
        }

        fn parse(&self, _: &BlockRecord, _: &RawEvent) -> ParseResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfig {
            chain_id: "testchain-1".into(),
            chain_name: "testchain".into(),
            ..Default::default()
        }
    }

    fn deps() -> (Arc<MockNodeClient>, Arc<RecordingStore>) {
        (Arc::new(MockNodeClient::default()), Arc::new(RecordingStore::default()))
    }

    // Test critique: un identifiant de parser dupliqué est fatal au setup
    #[test]
    fn duplicate_message_parser_identifier_is_fatal() {
        let (client, store) = deps();
        let err = PipelineBuilder::new(config())
            .register_message_parser("/a.b.MsgOne", Arc::new(NamedMessageParser("dup")))
            .register_message_parser("/a.b.MsgTwo", Arc::new(NamedMessageParser("dup")))
            .build(client, store)
            .unwrap_err();

        assert!(matches!(
            err,
            IndexerError::DuplicateParser { kind: "message", .. }
        ));
    }

    // Test critique: l'unicité couvre begin et end pour les parsers d'événements
    #[test]
    fn block_event_identifier_unique_across_lifecycles() {
        let (client, store) = deps();
        let err = PipelineBuilder::new(config())
            .register_begin_block_event_parser("mint", Arc::new(NamedEventParser("dup")))
            .register_end_block_event_parser("burn", Arc::new(NamedEventParser("dup")))
            .build(client, store)
            .unwrap_err();

        assert!(matches!(
            err,
            IndexerError::DuplicateParser { kind: "block event", .. }
        ));
    }

    // Test critique: le même identifiant reste permis entre kinds différents
    #[test]
    fn same_identifier_allowed_across_kinds() {
        let (client, store) = deps();
        let pipeline = PipelineBuilder::new(config())
            .register_message_parser("/a.b.MsgOne", Arc::new(NamedMessageParser("shared")))
            .register_begin_block_event_parser("mint", Arc::new(NamedEventParser("shared")))
            .build(client, store);

        assert!(pipeline.is_ok());
    }

    #[test]
    fn parsers_accumulate_under_one_key() {
        let (client, store) = deps();
        let pipeline = PipelineBuilder::new(config())
            .register_message_parser("/a.b.MsgOne", Arc::new(NamedMessageParser("first")))
            .register_message_parser("/a.b.MsgOne", Arc::new(NamedMessageParser("second")))
            .build(client, store)
            .unwrap();

        assert_eq!(pipeline.registry().message_parsers("/a.b.MsgOne").len(), 2);
        assert!(pipeline.registry().message_parsers("/other").is_empty());
    }

    #[test]
    fn invalid_config_fails_build() {
        let (client, store) = deps();
        let mut cfg = config();
        cfg.chain_id.clear();
        assert!(PipelineBuilder::new(cfg).build(client, store).is_err());
    }
}
