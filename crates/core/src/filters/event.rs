//! Block event filters.
//!
//! Two independent mechanisms, both operating on the ordered event list of
//! one lifecycle position:
//!
//! - per-event filters keep an event on its own merits (type, attributes)
//! - rolling-window filters keep a whole run of consecutive events when the
//!   window matches a pattern, so an event can survive because of its
//!   neighbors
//!
//! An empty registry passes everything through unchanged.

use crate::models::EventWrapper;

/// Predicate over a single event.
pub trait BlockEventFilter: Send + Sync {
    /// Whether the event should be kept.
    fn matches(&self, event: &EventWrapper) -> bool;
}

/// Keep events of one type.
pub struct EventTypeFilter {
    /// Event type to keep.
    pub event_type: String,
}

impl BlockEventFilter for EventTypeFilter {
    fn matches(&self, event: &EventWrapper) -> bool {
        event.event_type == self.event_type
    }
}

/// Keep events of one type carrying a specific attribute value.
pub struct EventTypeAndAttributeValueFilter {
    /// Event type to keep.
    pub event_type: String,
    /// Attribute key that must be present.
    pub attribute_key: String,
    /// Required attribute value.
    pub attribute_value: String,
}

impl BlockEventFilter for EventTypeAndAttributeValueFilter {
    fn matches(&self, event: &EventWrapper) -> bool {
        event.event_type == self.event_type
            && event.attribute(&self.attribute_key) == Some(self.attribute_value.as_str())
    }
}

/// Predicate over a window of consecutive events.
pub trait RollingWindowFilter: Send + Sync {
    /// Window length; windows of this many consecutive events are tested.
    fn window_length(&self) -> usize;

    /// Whether the window matches. `window.len() == window_length()`.
    fn matches(&self, window: &[EventWrapper]) -> bool;
}

/// Keep windows whose event types equal a sequence, in order.
pub struct EventTypeSequenceFilter {
    /// Expected event types, one per window slot.
    pub event_type_sequence: Vec<String>,
}

impl RollingWindowFilter for EventTypeSequenceFilter {
    fn window_length(&self) -> usize {
        self.event_type_sequence.len()
    }

    fn matches(&self, window: &[EventWrapper]) -> bool {
        window.len() == self.event_type_sequence.len()
            && window
                .iter()
                .zip(&self.event_type_sequence)
                .all(|(event, expected)| &event.event_type == expected)
    }
}

/// Filter set for one lifecycle position (begin or end block).
///
/// Built before the pipeline starts and read-only afterwards.
#[derive(Default)]
pub struct StaticBlockEventFilterRegistry {
    /// Per-event filters.
    pub event_filters: Vec<Box<dyn BlockEventFilter>>,
    /// Rolling-window filters.
    pub rolling_window_filters: Vec<Box<dyn RollingWindowFilter>>,
}

impl StaticBlockEventFilterRegistry {
    /// Total number of registered filters. Zero means "pass everything".
    pub fn num_filters(&self) -> usize {
        self.event_filters.len() + self.rolling_window_filters.len()
    }

    /// Append the filters of another registry.
    pub fn extend(&mut self, other: StaticBlockEventFilterRegistry) {
        self.event_filters.extend(other.event_filters);
        self.rolling_window_filters
            .extend(other.rolling_window_filters);
    }

    /// Apply the filter set to an ordered event list.
    ///
    /// An event survives if any per-event filter matches it, or if it sits
    /// inside any matching rolling window. Relative order is preserved.
    pub fn filter_events(&self, events: Vec<EventWrapper>) -> Vec<EventWrapper> {
        if self.num_filters() == 0 {
            return events;
        }

        let mut keep = vec![false; events.len()];

        for (i, event) in events.iter().enumerate() {
            if self.event_filters.iter().any(|f| f.matches(event)) {
                keep[i] = true;
            }
        }

        for filter in &self.rolling_window_filters {
            let len = filter.window_length();
            if len == 0 || len > events.len() {
                continue;
            }
            for start in 0..=(events.len() - len) {
                if filter.matches(&events[start..start + len]) {
                    for flag in &mut keep[start..start + len] {
                        *flag = true;
                    }
                }
            }
        }

        events
            .into_iter()
            .zip(keep)
            .filter_map(|(event, kept)| kept.then_some(event))
            .collect()
    }
}
