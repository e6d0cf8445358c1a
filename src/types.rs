use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Start bound of a trace or document whose start is not known.
pub const UNDEFINED_START_TIME_NS: i64 = i64::MAX;

/// End bound of a trace or document whose end is not known.
pub const UNDEFINED_END_TIME_NS: i64 = i64::MIN;

/// Prefix reserved for attributes the store itself understands.
pub const SPECIAL_ATTRIBUTE_PREFIX: &str = "$";

/// Special attribute holding the display name of an event.
pub const NAME_ATTRIBUTE: &str = "$event_name";

/// Max character length allowed for attribute names.
pub const MAX_ATTRIBUTE_NAME_LENGTH: usize = 128;

/// Attribute name → value. Ordered so that traces compare and print stably.
pub type Attributes = BTreeMap<String, String>;

/// The three families of event the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A point in time.
    Instant,
    /// Opens an interval. Its `id` is what the matching end correlates to.
    IntervalStart,
    /// Closes an interval. Its `correlation_id` names the start.
    IntervalEnd,
}

impl EventKind {
    /// Type code as persisted in event rows.
    pub fn code(self) -> &'static str {
        match self {
            EventKind::Instant => "i",
            EventKind::IntervalStart => "t-s",
            EventKind::IntervalEnd => "t-e",
        }
    }

    /// Parse a persisted type code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "i" => Ok(EventKind::Instant),
            "t-s" => Ok(EventKind::IntervalStart),
            "t-e" => Ok(EventKind::IntervalEnd),
            other => Err(Error::UnsupportedEventKind(other.to_string())),
        }
    }
}

/// One ingested occurrence: an instant marker or one half of an interval.
///
/// Events are input only. The store persists them as rows and hands back
/// [`Trace`](crate::Trace)s on the read side.
///
/// The type is kept as its raw code so that events coming from external
/// readers with an unknown code are rejected at append time, not at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: String,
    correlation_id: Option<String>,
    type_code: String,
    time_ns: i64,
    attributes: Attributes,
}

impl Event {
    /// An instant event.
    pub fn instant(id: impl Into<String>, time_ns: i64) -> Self {
        Self::with_type_code(id, None, EventKind::Instant.code(), time_ns)
    }

    /// The start of an interval.
    pub fn interval_start(id: impl Into<String>, time_ns: i64) -> Self {
        Self::with_type_code(id, None, EventKind::IntervalStart.code(), time_ns)
    }

    /// The end of the interval started by the event with id `correlation_id`.
    pub fn interval_end(
        id: impl Into<String>,
        correlation_id: impl Into<String>,
        time_ns: i64,
    ) -> Self {
        Self::with_type_code(
            id,
            Some(correlation_id.into()),
            EventKind::IntervalEnd.code(),
            time_ns,
        )
    }

    /// An event with an arbitrary type code, as produced by raw trace readers.
    pub fn with_type_code(
        id: impl Into<String>,
        correlation_id: Option<String>,
        type_code: impl Into<String>,
        time_ns: i64,
    ) -> Self {
        Event {
            id: id.into(),
            correlation_id,
            type_code: type_code.into(),
            time_ns,
            attributes: Attributes::new(),
        }
    }

    /// Set the event name (stored as the [`NAME_ATTRIBUTE`] special attribute).
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with_attribute(NAME_ATTRIBUTE, name)
    }

    /// Builder form of [`put_attribute`](Self::put_attribute).
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_attribute(name, value);
        self
    }

    /// Store an attribute, overriding any previous value under the same name.
    pub fn put_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn type_code(&self) -> &str {
        &self.type_code
    }

    /// The parsed kind. Fails with `UnsupportedEventKind` on an unknown code.
    pub fn kind(&self) -> Result<EventKind> {
        EventKind::from_code(&self.type_code)
    }

    pub fn time_ns(&self) -> i64 {
        self.time_ns
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Every attribute name, special attributes included.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Attribute names excluding the `$`-prefixed special attributes.
    pub fn user_attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attribute_names()
            .filter(|name| !name.starts_with(SPECIAL_ATTRIBUTE_PREFIX))
    }

    pub fn name(&self) -> Option<&str> {
        self.attribute(NAME_ATTRIBUTE)
    }
}

/// Reject names that are blank, padded with whitespace, or too long.
pub(crate) fn validate_attribute_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        "name is blank"
    } else if name.trim() != name {
        "name has leading or trailing whitespace"
    } else if name.chars().count() > MAX_ATTRIBUTE_NAME_LENGTH {
        "name exceeds maximum length of 128"
    } else {
        return Ok(());
    };
    Err(Error::InvalidAttributeName {
        name: name.to_string(),
        reason,
    })
}
