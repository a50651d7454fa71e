use std::{fmt, sync::Arc, time::SystemTime};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{address::Address, attribute::AttributeValue, state::State};

/// Identifier for a mail item.
///
/// A globally unique ULID that serves as the queue key and, for the
/// file-backed queue, the filename stem. ULIDs are lexicographically
/// sortable by creation time, which is what FIFO mode sorts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailId {
    id: ulid::Ulid,
}

impl MailId {
    /// Generate a new unique id.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Wrap an existing ULID.
    #[must_use]
    pub const fn from_ulid(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Parse an id from its canonical 26-character string form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        ulid::Ulid::from_string(raw).ok().map(|id| Self { id })
    }

    /// Parse an id from a queue filename like `01ARYZ6S41….bin` or `….eml`.
    ///
    /// Rejects path separators, traversal patterns, and anything that is
    /// not a valid ULID, so directory scans cannot be tricked into reading
    /// outside the queue directory.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename
            .strip_suffix(".bin")
            .or_else(|| filename.strip_suffix(".eml"))?;

        Self::parse(stem)
    }

    /// Milliseconds since the Unix epoch encoded in this id.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for MailId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MailId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Producer-assigned priority of a mail item.
///
/// Queue backends that support priority prefer higher-priority eligible
/// items when several are ready; within a tier FIFO mode (when enabled)
/// decides.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Scalar form used by the broker-backed queue's wire contract.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    /// Inverse of [`Priority::as_i64`]; out-of-range values are `None`.
    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            _ => None,
        }
    }
}

/// The unit of work: one message plus its routing metadata.
///
/// The payload is an opaque byte reference; the core passes it through
/// store/retrieve operations without ever inspecting it. An item is mutated
/// only while checked out by exactly one worker, which the queue's leasing
/// discipline enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailItem {
    /// Unique within the installation; assigned at creation, immutable.
    pub id: MailId,

    /// `None` marks system-originated mail (bounces).
    pub sender: Option<Address>,

    /// Ordered; mutable during pipeline execution. Emptying it is a
    /// terminal signal.
    pub recipients: Vec<Address>,

    /// Name of the processor this item is currently assigned to.
    pub state: State,

    /// Side-channel scalars passed between pipeline steps.
    #[serde(default)]
    pub attributes: AHashMap<String, AttributeValue>,

    /// Accumulated human-readable diagnostics; appended to, never
    /// overwritten.
    #[serde(default)]
    pub error_message: Option<String>,

    /// Stamped by the queue whenever the durable state changes; input to
    /// retry eligibility.
    pub last_updated: SystemTime,

    /// Payload byte length for upstream quota checks.
    #[serde(default)]
    pub size_hint: Option<u64>,

    #[serde(default)]
    pub priority: Priority,

    /// Opaque payload reference (headers + body).
    #[serde(default)]
    pub body: Option<Arc<[u8]>>,
}

impl MailItem {
    /// Create a freshly accepted item in the initial state.
    #[must_use]
    pub fn new(sender: Option<Address>, recipients: Vec<Address>, body: Option<Arc<[u8]>>) -> Self {
        let size_hint = body.as_ref().map(|b| b.len() as u64);

        Self {
            id: MailId::generate(),
            sender,
            recipients,
            state: State::root(),
            attributes: AHashMap::new(),
            error_message: None,
            last_updated: SystemTime::now(),
            size_hint,
            priority: Priority::default(),
            body,
        }
    }

    /// Append a diagnostic line to the error message.
    pub fn push_error(&mut self, message: &str) {
        match &mut self.error_message {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(message);
            }
            None => self.error_message = Some(message.to_string()),
        }
    }

    /// Stamp the last-updated time. Called by queue backends when the
    /// item's durable state changes.
    pub fn touch(&mut self) {
        self.last_updated = SystemTime::now();
    }

    /// True when the item has reached a terminal outcome: the discard
    /// state, or no recipients left.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_discard() || self.recipients.is_empty()
    }

    /// Remove a single recipient, if present.
    pub fn remove_recipient(&mut self, recipient: &Address) {
        self.recipients.retain(|r| r != recipient);
    }
}
