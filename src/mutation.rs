//! Mutation model for optimistic updates.
//!
//! Everything here is pure: computing the tentative value of a user intent,
//! the per-mutation state machine, and the bookkeeping that decides what the
//! view should show when a queued mutation settles. The controller wires these
//! to the queue, the remote and the view.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TitlesConfig;
use crate::error::{Error, Result};
use crate::task::{normalize_tags, normalize_title, Priority, Task, TaskId, TaskUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Toggle,
    Rename,
    Priority,
    Tags,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Toggle => "toggle",
            MutationKind::Rename => "rename",
            MutationKind::Priority => "priority",
            MutationKind::Tags => "tags",
            MutationKind::Delete => "delete",
        }
    }

    /// Verb used in user-facing failure messages.
    pub fn verb(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Toggle => "toggle",
            MutationKind::Rename => "rename",
            MutationKind::Priority => "reprioritize",
            MutationKind::Tags => "retag",
            MutationKind::Delete => "delete",
        }
    }

    /// Copy the fields owned by this kind from `source` into `target`.
    pub fn copy_fields(&self, target: &mut Task, source: &Task) {
        match self {
            MutationKind::Toggle => target.is_completed = source.is_completed,
            MutationKind::Rename => target.title = source.title.clone(),
            MutationKind::Priority => target.priority = source.priority,
            MutationKind::Tags => target.tags = source.tags.clone(),
            MutationKind::Create | MutationKind::Delete => {}
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lane key: one lane per (task, kind), plus a single lane for creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MutationKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    pub kind: MutationKind,
}

impl MutationKey {
    pub fn task(id: TaskId, kind: MutationKind) -> Self {
        Self {
            task: Some(id),
            kind,
        }
    }

    pub fn create() -> Self {
        Self {
            task: None,
            kind: MutationKind::Create,
        }
    }
}

impl fmt::Display for MutationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Some(id) => write!(f, "{id}-{}", self.kind),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// Lifecycle of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Idle,
    /// Sent without touching the view (create, delete)
    Submitted,
    /// View shows the guess, remote call in flight
    Tentative,
    Confirmed,
    RolledBack,
}

impl MutationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationState::Idle => "idle",
            MutationState::Submitted => "submitted",
            MutationState::Tentative => "tentative",
            MutationState::Confirmed => "confirmed",
            MutationState::RolledBack => "rolled_back",
        }
    }

    pub fn advance(self, next: MutationState) -> Result<MutationState> {
        use MutationState::*;

        match (self, next) {
            (Idle, Tentative)
            | (Idle, Submitted)
            | (Tentative, Confirmed)
            | (Tentative, RolledBack)
            | (Submitted, Confirmed)
            | (Submitted, RolledBack)
            | (Confirmed, Idle)
            | (RolledBack, Idle) => Ok(next),
            _ => Err(Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            }),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, MutationState::Confirmed | MutationState::RolledBack)
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user asked for on an existing task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Toggle,
    Rename(String),
    SetPriority(Priority),
    SetTags(BTreeSet<String>),
    Delete,
}

impl Intent {
    pub fn kind(&self) -> MutationKind {
        match self {
            Intent::Toggle => MutationKind::Toggle,
            Intent::Rename(_) => MutationKind::Rename,
            Intent::SetPriority(_) => MutationKind::Priority,
            Intent::SetTags(_) => MutationKind::Tags,
            Intent::Delete => MutationKind::Delete,
        }
    }
}

/// How an intent should be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to send; the view keeps `current`
    Unchanged,
    /// Show `tentative` now and send `update`
    Speculative { tentative: Task, update: TaskUpdate },
    /// Send first, change the view only after the remote agrees
    Deferred,
}

/// Compute the tentative outcome of `intent` against the visible `current`.
pub fn plan(current: &Task, intent: &Intent, titles: &TitlesConfig) -> Result<Plan> {
    let mut tentative = current.clone();
    let update = match intent {
        Intent::Toggle => TaskUpdate::completed(!current.is_completed),
        Intent::Rename(raw) => match normalize_title(raw, titles)? {
            Some(title) if title != current.title => TaskUpdate::title(title),
            _ => return Ok(Plan::Unchanged),
        },
        Intent::SetPriority(priority) => {
            if *priority == current.priority {
                return Ok(Plan::Unchanged);
            }
            TaskUpdate::priority(*priority)
        }
        Intent::SetTags(tags) => {
            let tags = normalize_tags(tags);
            if tags == current.tags {
                return Ok(Plan::Unchanged);
            }
            TaskUpdate::tags(tags)
        }
        Intent::Delete => return Ok(Plan::Deferred),
    };

    // Timestamps stay as last confirmed; only the remote moves them.
    let updated_at = tentative.updated_at;
    tentative.apply_update(&update, updated_at);
    Ok(Plan::Speculative { tentative, update })
}

/// Same-key mutations that have been shown but not yet settled.
///
/// `snapshot` is always the state right before the earliest unsettled
/// mutation: the pre-chain view at first, then each confirmed server value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    snapshot: Task,
    in_flight: usize,
}

/// What the view should do once a chained mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Later mutations are still in flight; keep showing the latest guess
    Hold,
    /// Chain drained after a success; show the server value
    Confirm(Task),
    /// Chain drained after a failure; show the snapshot
    Restore(Task),
}

impl Chain {
    pub fn start(snapshot: Task) -> Self {
        Self {
            snapshot,
            in_flight: 0,
        }
    }

    /// Register another mutation on the chain.
    pub fn push(&mut self) {
        self.in_flight += 1;
    }

    pub fn snapshot(&self) -> &Task {
        &self.snapshot
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_drained(&self) -> bool {
        self.in_flight == 0
    }

    /// Settle the earliest unsettled mutation.
    pub fn settle<E>(&mut self, outcome: std::result::Result<&Task, E>) -> Resolution {
        self.in_flight = self.in_flight.saturating_sub(1);
        let succeeded = match outcome {
            Ok(server) => {
                self.snapshot = server.clone();
                true
            }
            Err(_) => false,
        };
        if self.in_flight > 0 {
            Resolution::Hold
        } else if succeeded {
            Resolution::Confirm(self.snapshot.clone())
        } else {
            Resolution::Restore(self.snapshot.clone())
        }
    }
}

/// Merge a settled value into what the view currently shows.
///
/// With no other mutation in flight on the task the settled value replaces
/// the view wholesale. Otherwise only the fields owned by `kind` are taken,
/// so a rollback of one kind never clobbers another kind's tentative value.
pub fn merge_settled(kind: MutationKind, visible: &Task, settled: &Task, exclusive: bool) -> Task {
    if exclusive {
        return settled.clone();
    }
    let mut merged = visible.clone();
    kind.copy_fields(&mut merged, settled);
    if settled.updated_at > merged.updated_at {
        merged.updated_at = settled.updated_at;
    }
    merged
}
