//! Message type filters.
//!
//! Applied during transaction parsing, before custom parsers run. A filter
//! either selects messages to keep (match filters) or marks messages to
//! drop (ignore filters).

use regex::Regex;

/// Accept/reject predicate over message type URLs.
pub trait MessageTypeFilter: Send + Sync {
    /// Whether the filter matches this type URL.
    fn matches(&self, type_url: &str) -> bool;

    /// Ignore filters drop matching messages instead of keeping them.
    fn ignore(&self) -> bool {
        false
    }
}

/// Exact type URL filter.
pub struct MessageTypeExactFilter {
    type_url: String,
    ignore: bool,
}

impl MessageTypeExactFilter {
    /// Keep messages of exactly this type.
    pub fn new(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            ignore: false,
        }
    }

    /// Drop messages of exactly this type.
    pub fn ignoring(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            ignore: true,
        }
    }
}

impl MessageTypeFilter for MessageTypeExactFilter {
    fn matches(&self, type_url: &str) -> bool {
        self.type_url == type_url
    }

    fn ignore(&self) -> bool {
        self.ignore
    }
}

/// Regex type URL filter.
pub struct MessageTypeRegexFilter {
    pattern: Regex,
    ignore: bool,
}

impl MessageTypeRegexFilter {
    /// Keep messages whose type URL matches the pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            ignore: false,
        })
    }

    /// Drop messages whose type URL matches the pattern.
    pub fn ignoring(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            ignore: true,
        })
    }
}

impl MessageTypeFilter for MessageTypeRegexFilter {
    fn matches(&self, type_url: &str) -> bool {
        self.pattern.is_match(type_url)
    }

    fn ignore(&self) -> bool {
        self.ignore
    }
}

/// Decide whether a message survives the filter set.
///
/// No filters means everything passes. A matching ignore filter always
/// drops the message; when match filters exist, at least one must accept.
pub fn should_index_message(filters: &[Box<dyn MessageTypeFilter>], type_url: &str) -> bool {
    if filters.is_empty() {
        return true;
    }

    if filters
        .iter()
        .any(|f| f.ignore() && f.matches(type_url))
    {
        return false;
    }

    let mut has_match_filter = false;
    for filter in filters.iter().filter(|f| !f.ignore()) {
        has_match_filter = true;
        if filter.matches(type_url) {
            return true;
        }
    }

    // Only ignore filters registered: keep everything they did not drop.
    !has_match_filter
}
