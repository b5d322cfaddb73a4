//! Remote task service seam.
//!
//! [`TaskRemote`] performs one logical mutation per call and resolves once the
//! service has answered. No retries happen behind it.
//!
//! [`MemoryRemote`] is an in-memory stand-in with scripted latency and
//! failures, used by `taskq run` and the test suite.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TitlesConfig;
use crate::error::{Error, Result};
use crate::task::{creation_title, NewTask, Task, TaskId, TaskUpdate};

pub trait TaskRemote: Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = Result<Vec<Task>>> + Send;

    fn create(&self, task: NewTask) -> impl Future<Output = Result<Task>> + Send;

    /// Apply `update` and return the stored task.
    fn update(&self, id: TaskId, update: TaskUpdate) -> impl Future<Output = Result<Task>> + Send;

    fn delete(&self, id: TaskId) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOp {
    List,
    Create,
    Update,
    Delete,
}

/// Field touched by an update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateField {
    Title,
    Completed,
    Priority,
    Tags,
}

impl UpdateField {
    fn is_set(&self, update: &TaskUpdate) -> bool {
        match self {
            UpdateField::Title => update.title.is_some(),
            UpdateField::Completed => update.is_completed.is_some(),
            UpdateField::Priority => update.priority.is_some(),
            UpdateField::Tags => update.tags.is_some(),
        }
    }
}

fn default_times() -> usize {
    1
}

/// Scripted behaviour for matching calls.
///
/// A rule applies to the next `times` calls that match `op`, and `task` and
/// `field` when given. `times = 0` never expires. The first live matching rule
/// wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRule {
    pub op: RemoteOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<UpdateField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Fail the call with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    #[serde(default = "default_times")]
    pub times: usize,
}

impl RemoteRule {
    pub fn new(op: RemoteOp) -> Self {
        Self {
            op,
            task: None,
            field: None,
            latency_ms: None,
            fail: None,
            times: default_times(),
        }
    }

    pub fn task(mut self, id: TaskId) -> Self {
        self.task = Some(id);
        self
    }

    pub fn field(mut self, field: UpdateField) -> Self {
        self.field = Some(field);
        self
    }

    pub fn latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.fail = Some(message.into());
        self
    }

    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    fn matches(&self, op: RemoteOp, task: Option<TaskId>, update: Option<&TaskUpdate>) -> bool {
        if self.op != op {
            return false;
        }
        if self.task.is_some() && self.task != task {
            return false;
        }
        match (self.field, update) {
            (Some(field), Some(update)) => field.is_set(update),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// One call as the remote received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCall {
    pub seq: usize,
    pub op: RemoteOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<TaskUpdate>,
}

#[derive(Debug, Default)]
struct RemoteState {
    tasks: BTreeMap<TaskId, Task>,
    next_id: u64,
    rules: Vec<RemoteRule>,
    calls: Vec<RemoteCall>,
    finished: Vec<usize>,
}

/// Scripted in-memory task service.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    latency: Duration,
    titles: TitlesConfig,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                next_id: 1,
                ..RemoteState::default()
            }),
            latency: Duration::ZERO,
            titles: TitlesConfig::default(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_titles(mut self, titles: TitlesConfig) -> Self {
        self.titles = titles;
        self
    }

    pub fn with_tasks(self, tasks: impl IntoIterator<Item = Task>) -> Self {
        {
            let mut state = self.state();
            for task in tasks {
                state.next_id = state.next_id.max(task.id.0 + 1);
                state.tasks.insert(task.id, task);
            }
        }
        self
    }

    pub fn push_rule(&self, rule: RemoteRule) {
        self.state().rules.push(rule);
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.state().tasks.get(&id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state().tasks.values().cloned().collect()
    }

    /// Calls in the order they arrived.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Sequence numbers of calls in the order they completed.
    pub fn finished(&self) -> Vec<usize> {
        self.state().finished.clone()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and consume the matching rule.
    fn receive(
        &self,
        op: RemoteOp,
        task: Option<TaskId>,
        update: Option<&TaskUpdate>,
    ) -> (usize, Duration, Option<String>) {
        let mut state = self.state();
        let seq = state.calls.len() + 1;
        state.calls.push(RemoteCall {
            seq,
            op,
            task,
            update: update.cloned(),
        });

        let mut latency = self.latency;
        let mut failure = None;
        let mut expired = None;
        if let Some((index, rule)) = state
            .rules
            .iter_mut()
            .enumerate()
            .find(|(_, rule)| rule.matches(op, task, update))
        {
            if let Some(ms) = rule.latency_ms {
                latency = Duration::from_millis(ms);
            }
            failure = rule.fail.clone();
            if rule.times == 1 {
                expired = Some(index);
            } else if rule.times > 1 {
                rule.times -= 1;
            }
        }
        if let Some(index) = expired {
            state.rules.remove(index);
        }
        debug!(seq, ?op, ?task, latency_ms = latency.as_millis() as u64, "remote call received");
        (seq, latency, failure)
    }

    async fn respond<T>(
        &self,
        seq: usize,
        latency: Duration,
        failure: Option<String>,
        handle: impl FnOnce(&mut RemoteState) -> Result<T>,
    ) -> Result<T> {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        state.finished.push(seq);
        if let Some(message) = failure {
            warn!(seq, %message, "remote call failed");
            return Err(Error::RemoteUnavailable(message));
        }
        handle(&mut state)
    }
}

impl TaskRemote for MemoryRemote {
    async fn list(&self) -> Result<Vec<Task>> {
        let (seq, latency, failure) = self.receive(RemoteOp::List, None, None);
        self.respond(seq, latency, failure, |state| {
            Ok(state.tasks.values().cloned().collect())
        })
        .await
    }

    async fn create(&self, task: NewTask) -> Result<Task> {
        let (seq, latency, failure) = self.receive(RemoteOp::Create, None, None);
        let title = creation_title(&task.title, &self.titles);
        self.respond(seq, latency, failure, move |state| {
            let title = title.map_err(|err| Error::RemoteRejected(err.to_string()))?;
            let id = TaskId(state.next_id);
            state.next_id += 1;
            let mut created = Task::new(id, title);
            created.priority = task.priority;
            created.tags = task.tags;
            state.tasks.insert(id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        let (seq, latency, failure) = self.receive(RemoteOp::Update, Some(id), Some(&update));
        let titles = &self.titles;
        self.respond(seq, latency, failure, move |state| {
            let mut update = update;
            if let Some(title) = update.title.take() {
                let title =
                    creation_title(&title, titles).map_err(|err| Error::RemoteRejected(err.to_string()))?;
                update.title = Some(title);
            }
            let task = state
                .tasks
                .get_mut(&id)
                .ok_or_else(|| Error::RemoteRejected(format!("task {id} not found")))?;
            task.apply_update(&update, Utc::now());
            Ok(task.clone())
        })
        .await
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        let (seq, latency, failure) = self.receive(RemoteOp::Delete, Some(id), None);
        self.respond(seq, latency, failure, move |state| {
            state
                .tasks
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| Error::RemoteRejected(format!("task {id} not found")))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_normalizes_title_like_the_service() {
        let remote = MemoryRemote::new().with_tasks([Task::new(TaskId(4), "draft")]);

        let renamed = remote
            .update(TaskId(4), TaskUpdate::title("  final  "))
            .await
            .unwrap();
        assert_eq!(renamed.title, "final");

        let blank = remote.update(TaskId(4), TaskUpdate::title("   ")).await.unwrap();
        assert_eq!(blank.title, "Untitled Task");

        let missing = remote.update(TaskId(99), TaskUpdate::completed(true)).await;
        assert!(matches!(missing, Err(Error::RemoteRejected(_))));
    }

    #[tokio::test]
    async fn create_assigns_ids_after_seeded_tasks() {
        let remote = MemoryRemote::new().with_tasks([Task::new(TaskId(10), "seed")]);
        let created = remote.create(NewTask::titled("next")).await.unwrap();
        assert_eq!(created.id, TaskId(11));
        assert_eq!(remote.tasks().len(), 2);
    }

    #[tokio::test]
    async fn rules_match_op_task_and_field_then_expire() {
        let remote = MemoryRemote::new().with_tasks([Task::new(TaskId(1), "a")]);
        remote.push_rule(
            RemoteRule::new(RemoteOp::Update)
                .task(TaskId(1))
                .field(UpdateField::Completed)
                .fail("offline"),
        );

        let renamed = remote.update(TaskId(1), TaskUpdate::title("b")).await;
        assert!(renamed.is_ok());

        let toggled = remote.update(TaskId(1), TaskUpdate::completed(true)).await;
        assert_eq!(toggled, Err(Error::RemoteUnavailable("offline".to_string())));
        assert!(!remote.task(TaskId(1)).unwrap().is_completed);

        let retried = remote.update(TaskId(1), TaskUpdate::completed(true)).await;
        assert!(retried.unwrap().is_completed);
        assert_eq!(remote.call_count(), 3);
        assert_eq!(remote.finished(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn delete_removes_task() {
        let remote = MemoryRemote::new().with_tasks([Task::new(TaskId(2), "gone soon")]);
        remote.delete(TaskId(2)).await.unwrap();
        assert!(remote.task(TaskId(2)).is_none());
        assert!(remote.delete(TaskId(2)).await.is_err());
    }
}
