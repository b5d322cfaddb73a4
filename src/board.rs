//! Visible task state.
//!
//! [`TaskView`] is the seam to whatever renders tasks. The controller only
//! reads the current value of a task and pushes [`ViewChange`]s and
//! [`Notice`]s through it. [`TaskBoard`] is an in-memory implementation that
//! keeps the visible list and a timestamped history of everything it received.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mutation::MutationKind;
use crate::task::{Task, TaskId};

/// A change to what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ViewChange {
    /// Unconfirmed guess shown ahead of the remote
    Tentative { task: Task },
    /// Server value
    Confirmed { task: Task },
    /// Pre-mutation value put back
    RolledBack { task: Task },
    Added { task: Task },
    Removed { task_id: TaskId },
}

/// Something the surrounding component should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    Updated {
        task: Task,
    },
    Created {
        task: Task,
    },
    Deleted {
        task_id: TaskId,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        kind: MutationKind,
        message: String,
    },
    Ignored {
        task_id: TaskId,
        kind: MutationKind,
        message: String,
    },
}

impl Notice {
    pub fn message(&self) -> Option<&str> {
        match self {
            Notice::Failed { message, .. } | Notice::Ignored { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// UI state sink driven by the optimistic controller.
pub trait TaskView: Send + Sync + 'static {
    /// Current visible value of a task, if it is shown.
    fn task(&self, id: TaskId) -> Option<Task>;

    fn apply(&self, change: ViewChange);

    fn notify(&self, notice: Notice);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum BoardEntry {
    Change(ViewChange),
    Notice(Notice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recorded {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: BoardEntry,
}

#[derive(Debug, Default)]
struct BoardState {
    tasks: BTreeMap<TaskId, Task>,
    history: Vec<Recorded>,
}

/// In-memory visible task list.
#[derive(Debug, Default)]
pub struct TaskBoard {
    state: Mutex<BoardState>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let board = Self::new();
        board.replace_all(tasks);
        board
    }

    /// Replace the visible list, e.g. after a fresh fetch. History is kept.
    pub fn replace_all(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut state = self.state();
        state.tasks = tasks.into_iter().map(|task| (task.id, task)).collect();
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state().tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().tasks.is_empty()
    }

    pub fn history(&self) -> Vec<Recorded> {
        self.state().history.clone()
    }

    pub fn changes(&self) -> Vec<ViewChange> {
        self.state()
            .history
            .iter()
            .filter_map(|recorded| match &recorded.entry {
                BoardEntry::Change(change) => Some(change.clone()),
                BoardEntry::Notice(_) => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.state()
            .history
            .iter()
            .filter_map(|recorded| match &recorded.entry {
                BoardEntry::Notice(notice) => Some(notice.clone()),
                BoardEntry::Change(_) => None,
            })
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskView for TaskBoard {
    fn task(&self, id: TaskId) -> Option<Task> {
        self.state().tasks.get(&id).cloned()
    }

    fn apply(&self, change: ViewChange) {
        let mut state = self.state();
        match &change {
            ViewChange::Tentative { task }
            | ViewChange::Confirmed { task }
            | ViewChange::RolledBack { task }
            | ViewChange::Added { task } => {
                state.tasks.insert(task.id, task.clone());
            }
            ViewChange::Removed { task_id } => {
                state.tasks.remove(task_id);
            }
        }
        state.history.push(Recorded {
            at: Utc::now(),
            entry: BoardEntry::Change(change),
        });
    }

    fn notify(&self, notice: Notice) {
        self.state().history.push(Recorded {
            at: Utc::now(),
            entry: BoardEntry::Notice(notice),
        });
    }
}
