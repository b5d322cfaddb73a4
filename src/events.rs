//! Event output for external integrations.
//!
//! Everything the view received during a run is emitted as JSON lines to
//! stdout or a configured file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::board::{BoardEntry, Notice, Recorded, ViewChange};
use crate::error::{Error, Result};

pub const EVENT_SCHEMA_VERSION: &str = "taskq.event.v1";

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// High-level event kinds emitted by taskq.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskTentative,
    TaskConfirmed,
    TaskRolledBack,
    TaskAdded,
    TaskRemoved,
    TaskUpdated,
    TaskCreated,
    TaskDeleted,
    MutationFailed,
    MutationIgnored,
}

impl EventKind {
    fn of(entry: &BoardEntry) -> Self {
        match entry {
            BoardEntry::Change(ViewChange::Tentative { .. }) => EventKind::TaskTentative,
            BoardEntry::Change(ViewChange::Confirmed { .. }) => EventKind::TaskConfirmed,
            BoardEntry::Change(ViewChange::RolledBack { .. }) => EventKind::TaskRolledBack,
            BoardEntry::Change(ViewChange::Added { .. }) => EventKind::TaskAdded,
            BoardEntry::Change(ViewChange::Removed { .. }) => EventKind::TaskRemoved,
            BoardEntry::Notice(Notice::Updated { .. }) => EventKind::TaskUpdated,
            BoardEntry::Notice(Notice::Created { .. }) => EventKind::TaskCreated,
            BoardEntry::Notice(Notice::Deleted { .. }) => EventKind::TaskDeleted,
            BoardEntry::Notice(Notice::Failed { .. }) => EventKind::MutationFailed,
            BoardEntry::Notice(Notice::Ignored { .. }) => EventKind::MutationIgnored,
        }
    }
}

/// A structured event with optional payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// Build a new event with no payload.
    pub fn new(event: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            timestamp,
            data: None,
        }
    }

    /// Attach a serializable payload to the event.
    pub fn with_data<T: Serialize>(mut self, data: T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    /// Event for one entry of a board's history.
    pub fn from_recorded(recorded: &Recorded) -> Result<Self> {
        Event::new(EventKind::of(&recorded.entry), recorded.at).with_data(&recorded.entry)
    }
}

/// Event sink that writes JSONL output to a destination.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    /// Emit events to stdout.
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Emit events to a file, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    /// Emit events into any writer.
    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Write a single event as JSONL.
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::from)?;
        Ok(())
    }

    /// Write every entry of a board history, in order.
    pub fn emit_history(&mut self, history: &[Recorded]) -> Result<usize> {
        for recorded in history {
            self.emit(&Event::from_recorded(recorded)?)?;
        }
        Ok(history.len())
    }
}
