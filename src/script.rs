//! Scenario files for `taskq run`.
//!
//! A scenario seeds the remote and the board with tasks, scripts how the
//! remote behaves, and lists timed user actions. Running it drives the
//! optimistic controller exactly as a UI would and reports what the user saw.
//!
//! ```toml
//! [remote]
//! latency_ms = 20
//!
//! [[remote.rules]]
//! op = "update"
//! task = 1
//! field = "completed"
//! fail = "connection reset"
//!
//! [[tasks]]
//! id = 1
//! title = "Buy milk"
//!
//! [[actions]]
//! at_ms = 0
//! action = "toggle"
//! task = 1
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::board::{Notice, Recorded, TaskBoard};
use crate::config::Config;
use crate::controller::{MutationOutcome, OptimisticController, PendingMutation, Submission};
use crate::error::{Error, Result};
use crate::mutation::{MutationKey, MutationKind};
use crate::remote::{MemoryRemote, RemoteRule};
use crate::task::{normalize_tags, NewTask, Priority, Task, TaskId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub remote: RemoteScript,
    #[serde(default)]
    pub tasks: Vec<SeedTask>,
    #[serde(default)]
    pub actions: Vec<ScheduledAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteScript {
    /// Overrides `[remote] latency_ms` from the config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub rules: Vec<RemoteRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTask {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SeedTask {
    fn into_task(self) -> Task {
        let mut task = Task::new(self.id, self.title);
        task.is_completed = self.is_completed;
        task.priority = self.priority;
        task.tags = normalize_tags(self.tags);
        task
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    /// Offset from the start of the run
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: UserAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    Create {
        title: String,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        tags: Vec<String>,
    },
    Toggle {
        task: TaskId,
    },
    Rename {
        task: TaskId,
        title: String,
    },
    Priority {
        task: TaskId,
        priority: Priority,
    },
    Tags {
        task: TaskId,
        tags: Vec<String>,
    },
    Delete {
        task: TaskId,
    },
}

impl UserAction {
    pub fn key(&self) -> MutationKey {
        match self {
            UserAction::Create { .. } => MutationKey::create(),
            UserAction::Toggle { task } => MutationKey::task(*task, MutationKind::Toggle),
            UserAction::Rename { task, .. } => MutationKey::task(*task, MutationKind::Rename),
            UserAction::Priority { task, .. } => MutationKey::task(*task, MutationKind::Priority),
            UserAction::Tags { task, .. } => MutationKey::task(*task, MutationKind::Tags),
            UserAction::Delete { task } => MutationKey::task(*task, MutationKind::Delete),
        }
    }

    fn submit(&self, controller: &OptimisticController<MemoryRemote, TaskBoard>) -> Result<Submission> {
        match self {
            UserAction::Create {
                title,
                priority,
                tags,
            } => controller.create(NewTask {
                title: title.clone(),
                priority: *priority,
                tags: normalize_tags(tags),
            }),
            UserAction::Toggle { task } => controller.toggle(*task),
            UserAction::Rename { task, title } => controller.rename(*task, title),
            UserAction::Priority { task, priority } => controller.set_priority(*task, *priority),
            UserAction::Tags { task, tags } => {
                controller.set_tags(*task, tags.iter().cloned().collect::<BTreeSet<_>>())
            }
            UserAction::Delete { task } => controller.delete(*task),
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id) {
                return Err(Error::InvalidArgument(format!(
                    "task {} is seeded more than once",
                    task.id
                )));
            }
        }
        Ok(())
    }
}

/// What happened to one scripted action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub index: usize,
    pub at_ms: u64,
    pub key: String,
    /// `queued`, `unchanged`, `ignored` or `rejected`
    pub submission: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MutationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tasks: Vec<Task>,
    pub actions: Vec<ActionReport>,
    pub notices: Vec<Notice>,
    pub remote_calls: usize,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub history: Vec<Recorded>,
}

impl RunReport {
    pub fn rolled_back(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action.outcome, Some(MutationOutcome::RolledBack { .. })))
            .count()
    }
}

/// Drive `scenario` through a fresh controller and wait for every lane to drain.
pub async fn run(scenario: Scenario, config: &Config) -> Result<RunReport> {
    let latency = scenario.remote.latency_ms.unwrap_or(config.remote.latency_ms);
    let seeds: Vec<Task> = scenario
        .tasks
        .into_iter()
        .map(SeedTask::into_task)
        .collect();

    let remote = MemoryRemote::new()
        .with_latency(Duration::from_millis(latency))
        .with_titles(config.titles.clone())
        .with_tasks(seeds.clone());
    for rule in scenario.remote.rules {
        remote.push_rule(rule);
    }
    let board = Arc::new(TaskBoard::with_tasks(seeds));
    let controller = OptimisticController::new(Arc::new(remote), Arc::clone(&board), config.clone());

    let mut actions = scenario.actions;
    actions.sort_by_key(|scheduled| scheduled.at_ms);

    let start = Instant::now();
    let mut reports = Vec::with_capacity(actions.len());
    let mut pending: Vec<(usize, PendingMutation)> = Vec::new();

    for (index, scheduled) in actions.into_iter().enumerate() {
        tokio::time::sleep_until(start + Duration::from_millis(scheduled.at_ms)).await;
        let key = scheduled.action.key().to_string();
        debug!(index, key = %key, "dispatching scripted action");

        let mut report = ActionReport {
            index,
            at_ms: scheduled.at_ms,
            key,
            submission: String::new(),
            outcome: None,
            error: None,
        };
        match scheduled.action.submit(&controller) {
            Ok(submission) => {
                report.submission = submission.as_str().to_string();
                if let Some(mutation) = submission.into_pending() {
                    pending.push((index, mutation));
                }
            }
            Err(err) => {
                report.submission = "rejected".to_string();
                report.error = Some(err.to_string());
            }
        }
        reports.push(report);
    }

    for (index, mutation) in pending {
        let outcome = mutation.settled().await;
        reports[index].outcome = Some(outcome);
    }
    controller.wait_idle().await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(actions = reports.len(), elapsed_ms, "scenario finished");

    Ok(RunReport {
        tasks: board.tasks(),
        actions: reports,
        notices: board.notices(),
        remote_calls: controller.remote().call_count(),
        elapsed_ms,
        history: board.history(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_rules_tasks_and_actions() {
        let scenario = Scenario::parse(
            r#"
[remote]
latency_ms = 5

[[remote.rules]]
op = "update"
task = 1
field = "completed"
fail = "offline"

[[tasks]]
id = 1
title = "Buy milk"
priority = "high"
tags = ["home"]

[[actions]]
at_ms = 10
action = "rename"
task = 1
title = "Buy oat milk"

[[actions]]
action = "create"
title = "Call mum"
"#,
        )
        .expect("parse scenario");

        assert_eq!(scenario.remote.latency_ms, Some(5));
        assert_eq!(scenario.remote.rules.len(), 1);
        assert_eq!(scenario.tasks[0].priority, Priority::High);
        assert_eq!(
            scenario.actions[0].action,
            UserAction::Rename {
                task: TaskId(1),
                title: "Buy oat milk".to_string()
            }
        );
        assert_eq!(scenario.actions[1].at_ms, 0);
        assert_eq!(scenario.actions[1].action.key().to_string(), "create");
    }

    #[test]
    fn duplicate_seed_ids_rejected() {
        let err = Scenario::parse(
            r#"
[[tasks]]
id = 1
title = "a"

[[tasks]]
id = 1
title = "b"
"#,
        )
        .expect_err("duplicate ids");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_rollback_and_final_state() {
        let scenario = Scenario::parse(
            r#"
[remote]
latency_ms = 30

[[remote.rules]]
op = "update"
field = "completed"
fail = "offline"

[[tasks]]
id = 1
title = "Buy milk"

[[actions]]
action = "toggle"
task = 1

[[actions]]
at_ms = 5
action = "rename"
task = 1
title = "  Buy oat milk "

[[actions]]
at_ms = 5
action = "rename"
task = 2
title = "missing"
"#,
        )
        .expect("parse scenario");

        let report = run(scenario, &Config::default()).await.expect("run");

        assert_eq!(report.tasks.len(), 1);
        assert!(!report.tasks[0].is_completed);
        assert_eq!(report.tasks[0].title, "Buy oat milk");
        assert_eq!(report.rolled_back(), 1);
        assert_eq!(report.actions[2].submission, "rejected");
        assert_eq!(report.remote_calls, 2);
        assert!(report
            .notices
            .iter()
            .any(|notice| matches!(notice, Notice::Failed { .. })));
    }
}
