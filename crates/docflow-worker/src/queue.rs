//! Queue items and persisted cursors.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Inbox queue drained by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Documents ordered by numeric id.
    Pending,
    /// Files ordered by upload time.
    Incoming,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Pending => "pending",
            QueueKind::Incoming => "incoming",
        }
    }

    /// Cursor used when none has been persisted.
    ///
    /// Time-ordered queues have no safe starting point and must be seeded.
    pub fn initial_cursor(&self) -> Option<Cursor> {
        match self {
            QueueKind::Pending => Some(Cursor::Numeric(0)),
            QueueKind::Incoming => None,
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker of the last fully processed item in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    Numeric(u64),
    Timestamp(NaiveDateTime),
}

impl Cursor {
    /// Returns true if `item` has not been processed yet.
    ///
    /// Numeric queues admit strictly greater ids; time-ordered queues admit
    /// timestamps at or after the cursor.
    pub fn admits(&self, item: &QueueItem) -> bool {
        match (self, &item.position) {
            (Cursor::Numeric(cursor), Cursor::Numeric(id)) => id > cursor,
            (Cursor::Timestamp(cursor), Cursor::Timestamp(ts)) => ts >= cursor,
            _ => false,
        }
    }

    /// Cursor after `item` was processed.
    pub fn at(item: &QueueItem) -> Cursor {
        item.position.clone()
    }

    /// Cursor that moves past an abandoned `item`.
    pub fn past(item: &QueueItem) -> Cursor {
        match &item.position {
            Cursor::Numeric(id) => Cursor::Numeric(*id),
            Cursor::Timestamp(ts) => Cursor::Timestamp(*ts + Duration::seconds(1)),
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::Numeric(id) => write!(f, "{}", id),
            Cursor::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Head-of-queue entry reported by a document source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Identifier used to fetch and tag the document.
    pub document_id: String,

    /// Ordering key compared against the cursor.
    pub position: Cursor,
}

impl QueueItem {
    pub fn numeric(id: u64) -> Self {
        Self {
            document_id: id.to_string(),
            position: Cursor::Numeric(id),
        }
    }

    pub fn timestamped(document_id: impl Into<String>, at: NaiveDateTime) -> Self {
        Self {
            document_id: document_id.into(),
            position: Cursor::Timestamp(at),
        }
    }
}
