//! Filter file parsing.
//!
//! Operators can ship a JSON document describing event and message filters
//! without recompiling. The document is parsed once at setup and merged
//! with programmatically registered filters:
//!
//! ```json
//! {
//!   "beginBlockEventFilters": [
//!     { "type": "event_type", "eventType": "mint" }
//!   ],
//!   "endBlockEventFilters": [
//!     { "type": "event_type_and_attribute_value",
//!       "eventType": "transfer", "attributeKey": "recipient",
//!       "attributeValue": "cosmos1..." }
//!   ],
//!   "beginBlockRollingWindowFilters": [
//!     { "eventTypeSequence": ["burn", "mint"] }
//!   ],
//!   "endBlockRollingWindowFilters": [],
//!   "messageTypeFilters": [
//!     { "type": "exact", "messageType": "/cosmos.bank.v1beta1.MsgSend" },
//!     { "type": "regex", "pattern": "^/ibc\\.", "ignore": true }
//!   ]
//! }
//! ```
//!
//! An empty file behaves exactly like no file. Duplicate entries are
//! deduplicated, so re-listing a filter is a no-op.

use serde::Deserialize;

use crate::error::{IndexerError, IndexerResult};
use crate::filters::event::{
    EventTypeAndAttributeValueFilter, EventTypeFilter, EventTypeSequenceFilter,
    StaticBlockEventFilterRegistry,
};
use crate::filters::message::{
    MessageTypeExactFilter, MessageTypeFilter, MessageTypeRegexFilter,
};

/// One per-event filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventFilterEntry {
    /// Keep events of one type.
    #[serde(rename_all = "camelCase")]
    EventType {
        /// Event type to keep.
        event_type: String,
    },
    /// Keep events of one type carrying a specific attribute value.
    #[serde(rename_all = "camelCase")]
    EventTypeAndAttributeValue {
        /// Event type to keep.
        event_type: String,
        /// Attribute key that must be present.
        attribute_key: String,
        /// Required attribute value.
        attribute_value: String,
    },
}

/// One rolling-window filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingWindowEntry {
    /// Expected event types, one per window slot.
    pub event_type_sequence: Vec<String>,
}

/// One message-type filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageFilterEntry {
    /// Exact type URL match.
    #[serde(rename_all = "camelCase")]
    Exact {
        /// Type URL to match.
        message_type: String,
        /// Drop matching messages instead of keeping them.
        #[serde(default)]
        ignore: bool,
    },
    /// Regex type URL match.
    #[serde(rename_all = "camelCase")]
    Regex {
        /// Pattern to match against type URLs.
        pattern: String,
        /// Drop matching messages instead of keeping them.
        #[serde(default)]
        ignore: bool,
    },
}

/// Parsed filter file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Per-event filters for begin-block events.
    pub begin_block_event_filters: Vec<EventFilterEntry>,
    /// Rolling-window filters for begin-block events.
    pub begin_block_rolling_window_filters: Vec<RollingWindowEntry>,
    /// Per-event filters for end-block events.
    pub end_block_event_filters: Vec<EventFilterEntry>,
    /// Rolling-window filters for end-block events.
    pub end_block_rolling_window_filters: Vec<RollingWindowEntry>,
    /// Message type filters, merged with programmatic registrations.
    pub message_type_filters: Vec<MessageFilterEntry>,
}

/// Registries and filters produced from a [`FilterConfig`].
pub struct FilterConfigOutput {
    /// Begin-block filter registry.
    pub begin_block: StaticBlockEventFilterRegistry,
    /// End-block filter registry.
    pub end_block: StaticBlockEventFilterRegistry,
    /// Message type filters.
    pub message_filters: Vec<Box<dyn MessageTypeFilter>>,
}

impl std::fmt::Debug for FilterConfigOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterConfigOutput").finish_non_exhaustive()
    }
}

impl FilterConfig {
    /// Parse a filter file's contents. Empty input yields an empty config.
    pub fn from_json(contents: &str) -> IndexerResult<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(contents)
            .map_err(|e| IndexerError::Config(format!("invalid filter file: {e}")))
    }

    /// Compile the entries into runtime filters.
    ///
    /// Regex compilation failures surface as configuration errors here,
    /// before any worker starts.
    pub fn into_filters(mut self) -> IndexerResult<FilterConfigOutput> {
        dedup_preserving_order(&mut self.begin_block_event_filters);
        dedup_preserving_order(&mut self.begin_block_rolling_window_filters);
        dedup_preserving_order(&mut self.end_block_event_filters);
        dedup_preserving_order(&mut self.end_block_rolling_window_filters);
        dedup_preserving_order(&mut self.message_type_filters);

        let begin_block = build_registry(
            self.begin_block_event_filters,
            self.begin_block_rolling_window_filters,
        );
        let end_block = build_registry(
            self.end_block_event_filters,
            self.end_block_rolling_window_filters,
        );

        let mut message_filters: Vec<Box<dyn MessageTypeFilter>> = Vec::new();
        for entry in self.message_type_filters {
            match entry {
                MessageFilterEntry::Exact {
                    message_type,
                    ignore,
                } => {
                    message_filters.push(if ignore {
                        Box::new(MessageTypeExactFilter::ignoring(message_type))
                    } else {
                        Box::new(MessageTypeExactFilter::new(message_type))
                    });
                }
                MessageFilterEntry::Regex { pattern, ignore } => {
                    let filter = if ignore {
                        MessageTypeRegexFilter::ignoring(&pattern)
                    } else {
                        MessageTypeRegexFilter::new(&pattern)
                    }
                    .map_err(|e| {
                        IndexerError::Config(format!(
                            "invalid message filter pattern \"{pattern}\": {e}"
                        ))
                    })?;
                    message_filters.push(Box::new(filter));
                }
            }
        }

        Ok(FilterConfigOutput {
            begin_block,
            end_block,
            message_filters,
        })
    }
}

fn build_registry(
    events: Vec<EventFilterEntry>,
    windows: Vec<RollingWindowEntry>,
) -> StaticBlockEventFilterRegistry {
    let mut registry = StaticBlockEventFilterRegistry::default();
    for entry in events {
        match entry {
            EventFilterEntry::EventType { event_type } => {
                registry
                    .event_filters
                    .push(Box::new(EventTypeFilter { event_type }));
            }
            EventFilterEntry::EventTypeAndAttributeValue {
                event_type,
                attribute_key,
                attribute_value,
            } => {
                registry
                    .event_filters
                    .push(Box::new(EventTypeAndAttributeValueFilter {
                        event_type,
                        attribute_key,
                        attribute_value,
                    }));
            }
        }
    }
    for entry in windows {
        registry
            .rolling_window_filters
            .push(Box::new(EventTypeSequenceFilter {
                event_type_sequence: entry.event_type_sequence,
            }));
    }
    registry
}

fn dedup_preserving_order<T: PartialEq>(entries: &mut Vec<T>) {
    let mut seen: Vec<T> = Vec::with_capacity(entries.len());
    for entry in entries.drain(..) {
        if !seen.contains(&entry) {
            seen.push(entry);
        }
    }
    *entries = seen;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_empty_config() {
        let config = FilterConfig::from_json("").unwrap();
        let output = config.into_filters().unwrap();
        assert_eq!(output.begin_block.num_filters(), 0);
        assert_eq!(output.end_block.num_filters(), 0);
        assert!(output.message_filters.is_empty());
    }

    #[test]
    fn full_document_parses() {
        let json = r#"{
            "beginBlockEventFilters": [
                { "type": "event_type", "eventType": "mint" }
            ],
            "beginBlockRollingWindowFilters": [
                { "eventTypeSequence": ["burn", "mint"] }
            ],
            "endBlockEventFilters": [
                { "type": "event_type_and_attribute_value",
                  "eventType": "transfer",
                  "attributeKey": "recipient",
                  "attributeValue": "cosmos1aaa" }
            ],
            "messageTypeFilters": [
                { "type": "exact", "messageType": "/cosmos.bank.v1beta1.MsgSend" },
                { "type": "regex", "pattern": "^/ibc\\.", "ignore": true }
            ]
        }"#;

        let output = FilterConfig::from_json(json).unwrap().into_filters().unwrap();
        assert_eq!(output.begin_block.num_filters(), 2);
        assert_eq!(output.end_block.num_filters(), 1);
        assert_eq!(output.message_filters.len(), 2);
        assert!(output.message_filters[1].ignore());
    }

    #[test]
    fn duplicate_entries_collapse() {
        let json = r#"{
            "beginBlockEventFilters": [
                { "type": "event_type", "eventType": "mint" },
                { "type": "event_type", "eventType": "mint" }
            ]
        }"#;

        let output = FilterConfig::from_json(json).unwrap().into_filters().unwrap();
        assert_eq!(output.begin_block.num_filters(), 1);
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        let json = r#"{
            "messageTypeFilters": [ { "type": "regex", "pattern": "(" } ]
        }"#;

        let err = FilterConfig::from_json(json)
            .unwrap()
            .into_filters()
            .unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn unknown_filter_type_is_rejected() {
        let json = r#"{
            "beginBlockEventFilters": [ { "type": "by_height", "eventType": "mint" } ]
        }"#;
        assert!(FilterConfig::from_json(json).is_err());
    }
}
