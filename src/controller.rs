//! Optimistic update controller.
//!
//! Every user mutation goes through the same steps: compute the tentative
//! value, remember the pre-mutation value, show the guess, queue the remote
//! call on the `{task}-{kind}` lane, and once the call settles either show the
//! server value or put the snapshot back. Reconciliation runs inside the
//! queued action, so nothing else on the same lane can interleave with it.
//!
//! Create and delete are not speculative: the view only changes after the
//! remote call succeeds.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::board::{Notice, TaskView, ViewChange};
use crate::config::{Config, ReentryPolicy};
use crate::error::{Error, Result};
use crate::mutation::{
    merge_settled, plan, Chain, Intent, MutationKey, MutationKind, MutationState, Plan, Resolution,
};
use crate::queue::{KeyedQueue, Settlement};
use crate::remote::TaskRemote;
use crate::task::{creation_title, NewTask, Priority, Task, TaskId, TaskUpdate};

type Chains = Arc<Mutex<HashMap<MutationKey, Chain>>>;

fn lock_chains(chains: &Chains) -> MutexGuard<'_, HashMap<MutationKey, Chain>> {
    chains.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a queued mutation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Remote accepted; `task` is its answer
    Confirmed { task: Task },
    /// Remote accepted a delete
    Deleted { task_id: TaskId },
    /// Remote failed; the view went back to the snapshot
    RolledBack {
        #[serde(serialize_with = "serialize_error")]
        error: Error,
    },
    /// The task left the view before the mutation settled
    Discarded,
}

fn serialize_error<S: serde::Serializer>(
    error: &Error,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl MutationOutcome {
    pub fn state(&self) -> MutationState {
        match self {
            MutationOutcome::Confirmed { .. } | MutationOutcome::Deleted { .. } => {
                MutationState::Confirmed
            }
            MutationOutcome::RolledBack { .. } | MutationOutcome::Discarded => {
                MutationState::RolledBack
            }
        }
    }
}

/// A mutation that made it onto a lane.
#[must_use = "the mutation runs regardless; await `settled` to observe the outcome"]
pub struct PendingMutation {
    pub id: Ulid,
    pub key: MutationKey,
    /// `Tentative` for speculative kinds, `Submitted` otherwise
    pub state: MutationState,
    settlement: Settlement<MutationOutcome, Error>,
}

impl fmt::Debug for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMutation")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish()
    }
}

impl PendingMutation {
    /// Wait for the remote call and reconciliation to finish.
    pub async fn settled(self) -> MutationOutcome {
        match self.settlement.await {
            Ok(outcome) => outcome,
            Err(error) => MutationOutcome::RolledBack { error },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.settlement.is_finished()
    }
}

/// Result of asking the controller to mutate a task.
#[derive(Debug)]
pub enum Submission {
    Queued(PendingMutation),
    /// Nothing to send (blank or identical input)
    Unchanged,
    /// Same change already in flight and the policy is to ignore repeats
    Ignored,
}

impl Submission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Submission::Queued(_) => "queued",
            Submission::Unchanged => "unchanged",
            Submission::Ignored => "ignored",
        }
    }

    pub fn into_pending(self) -> Option<PendingMutation> {
        match self {
            Submission::Queued(pending) => Some(pending),
            Submission::Unchanged | Submission::Ignored => None,
        }
    }
}

/// Coordinates optimistic view updates with the remote service.
///
/// Owns its lane registry and snapshot chains; two controllers never share
/// ordering. All entry points are synchronous and must run inside a tokio
/// runtime.
pub struct OptimisticController<R, V> {
    remote: Arc<R>,
    view: Arc<V>,
    queue: KeyedQueue<MutationKey>,
    chains: Chains,
    config: Config,
}

impl<R, V> OptimisticController<R, V>
where
    R: TaskRemote,
    V: TaskView,
{
    pub fn new(remote: Arc<R>, view: Arc<V>, config: Config) -> Self {
        Self {
            remote,
            view,
            queue: KeyedQueue::new(),
            chains: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn view(&self) -> &Arc<V> {
        &self.view
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &KeyedQueue<MutationKey> {
        &self.queue
    }

    /// Whether a mutation of `kind` on `id` is waiting or running.
    pub fn is_in_flight(&self, id: TaskId, kind: MutationKind) -> bool {
        self.queue.is_busy(&MutationKey::task(id, kind))
    }

    /// Number of snapshot chains still held.
    pub fn open_chains(&self) -> usize {
        lock_chains(&self.chains).len()
    }

    /// Wait until every queued mutation has settled.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    pub fn toggle(&self, id: TaskId) -> Result<Submission> {
        self.mutate(id, Intent::Toggle)
    }

    pub fn rename(&self, id: TaskId, title: &str) -> Result<Submission> {
        self.mutate(id, Intent::Rename(title.to_string()))
    }

    pub fn set_priority(&self, id: TaskId, priority: Priority) -> Result<Submission> {
        self.mutate(id, Intent::SetPriority(priority))
    }

    pub fn set_tags(&self, id: TaskId, tags: BTreeSet<String>) -> Result<Submission> {
        self.mutate(id, Intent::SetTags(tags))
    }

    pub fn delete(&self, id: TaskId) -> Result<Submission> {
        self.mutate(id, Intent::Delete)
    }

    /// Create a task on the single creation lane.
    ///
    /// The task shows up once the remote has assigned it an id.
    pub fn create(&self, mut task: NewTask) -> Result<Submission> {
        task.title = creation_title(&task.title, &self.config.titles)?;
        let key = MutationKey::create();
        let id = Ulid::new();
        let remote = Arc::clone(&self.remote);
        let view = Arc::clone(&self.view);
        let state = MutationState::Idle.advance(MutationState::Submitted)?;

        debug!(mutation = %id, title = %task.title, "create submitted");
        let settlement = self.queue.enqueue(key, move || async move {
            let outcome = match remote.create(task).await {
                Ok(created) => {
                    info!(mutation = %id, task = %created.id, "create confirmed");
                    view.apply(ViewChange::Added {
                        task: created.clone(),
                    });
                    view.notify(Notice::Created {
                        task: created.clone(),
                    });
                    MutationOutcome::Confirmed { task: created }
                }
                Err(error) => {
                    warn!(mutation = %id, %error, "create failed");
                    view.notify(Notice::Failed {
                        task_id: None,
                        kind: MutationKind::Create,
                        message: format!("Could not create task: {error}"),
                    });
                    MutationOutcome::RolledBack { error }
                }
            };
            finish(state, outcome)
        });

        Ok(Submission::Queued(PendingMutation {
            id,
            key,
            state,
            settlement,
        }))
    }

    /// Fetch the current task list from the remote.
    pub async fn refresh(&self) -> Result<Vec<Task>> {
        self.remote.list().await
    }

    fn mutate(&self, id: TaskId, intent: Intent) -> Result<Submission> {
        let kind = intent.kind();
        let key = MutationKey::task(id, kind);

        // Read, plan and tentative write form one step against concurrent
        // reconciliation of the task's other lanes.
        let mut chains = lock_chains(&self.chains);
        let current = self.view.task(id).ok_or(Error::TaskNotFound(id))?;

        if self.config.controller.reentry == ReentryPolicy::Ignore && self.queue.is_busy(&key) {
            debug!(key = %key, "mutation ignored, already in flight");
            self.view.notify(Notice::Ignored {
                task_id: id,
                kind,
                message: format!("Still saving the previous {kind} of task {id}"),
            });
            return Ok(Submission::Ignored);
        }

        match plan(&current, &intent, &self.config.titles)? {
            Plan::Unchanged => {
                debug!(key = %key, "mutation unchanged, reverting input");
                self.view.apply(ViewChange::RolledBack { task: current });
                Ok(Submission::Unchanged)
            }
            Plan::Speculative { tentative, update } => {
                let state = MutationState::Idle.advance(MutationState::Tentative)?;
                chains
                    .entry(key)
                    .or_insert_with(|| Chain::start(current))
                    .push();
                self.view.apply(ViewChange::Tentative { task: tentative });
                drop(chains);
                Ok(self.submit_speculative(key, id, state, update))
            }
            Plan::Deferred => {
                drop(chains);
                self.submit_delete(key, id)
            }
        }
    }

    fn submit_speculative(
        &self,
        key: MutationKey,
        task_id: TaskId,
        state: MutationState,
        update: TaskUpdate,
    ) -> Submission {
        let id = Ulid::new();
        debug!(mutation = %id, key = %key, "tentative value shown");

        let remote = Arc::clone(&self.remote);
        let guard = SettleGuard {
            inner: Some((Arc::clone(&self.view), Arc::clone(&self.chains))),
            key,
            id,
        };
        let settlement = self.queue.enqueue(key, move || async move {
            let result = remote.update(task_id, update).await;
            finish(state, guard.settle(result))
        });

        Submission::Queued(PendingMutation {
            id,
            key,
            state,
            settlement,
        })
    }

    fn submit_delete(&self, key: MutationKey, task_id: TaskId) -> Result<Submission> {
        let id = Ulid::new();
        let remote = Arc::clone(&self.remote);
        let view = Arc::clone(&self.view);
        let chains = Arc::clone(&self.chains);

        let state = MutationState::Idle.advance(MutationState::Submitted)?;

        debug!(mutation = %id, key = %key, "delete submitted");
        let settlement = self.queue.enqueue(key, move || async move {
            let outcome = match remote.delete(task_id).await {
                Ok(()) => {
                    info!(mutation = %id, task = %task_id, "delete confirmed");
                    {
                        let mut chains = lock_chains(&chains);
                        chains.retain(|key, _| key.task != Some(task_id));
                        if view.task(task_id).is_some() {
                            view.apply(ViewChange::Removed { task_id });
                        }
                    }
                    view.notify(Notice::Deleted { task_id });
                    MutationOutcome::Deleted { task_id }
                }
                Err(error) => {
                    warn!(mutation = %id, task = %task_id, %error, "delete failed");
                    view.notify(Notice::Failed {
                        task_id: Some(task_id),
                        kind: MutationKind::Delete,
                        message: format!("Could not delete task {task_id}: {error}"),
                    });
                    MutationOutcome::RolledBack { error }
                }
            };
            finish(state, outcome)
        });

        Ok(Submission::Queued(PendingMutation {
            id,
            key,
            state,
            settlement,
        }))
    }
}

/// Drive a mutation from its submitted state through its outcome back to idle.
fn finish(state: MutationState, outcome: MutationOutcome) -> Result<MutationOutcome> {
    state.advance(outcome.state())?.advance(MutationState::Idle)?;
    Ok(outcome)
}

/// Settles a speculative mutation's chain exactly once.
///
/// Dropped unsettled (the remote call panicked, or the runtime dropped the
/// action before it ran), it settles the chain as a failure so later
/// mutations on the lane do not hold forever.
struct SettleGuard<V: TaskView> {
    inner: Option<(Arc<V>, Chains)>,
    key: MutationKey,
    id: Ulid,
}

impl<V: TaskView> SettleGuard<V> {
    fn settle(mut self, result: Result<Task>) -> MutationOutcome {
        match self.inner.take() {
            Some((view, chains)) => reconcile(&*view, &chains, self.key, self.id, result),
            None => MutationOutcome::Discarded,
        }
    }
}

impl<V: TaskView> Drop for SettleGuard<V> {
    fn drop(&mut self) {
        if let Some((view, chains)) = self.inner.take() {
            warn!(mutation = %self.id, key = %self.key, "mutation dropped before settling");
            reconcile(&*view, &chains, self.key, self.id, Err(Error::Abandoned));
        }
    }
}

/// Settle one speculative mutation against its chain and the view.
///
/// The chain lock is held from the chain update through the view write, so
/// settlements on different lanes of one task apply one at a time.
fn reconcile<V: TaskView>(
    view: &V,
    chains: &Chains,
    key: MutationKey,
    id: Ulid,
    result: Result<Task>,
) -> MutationOutcome {
    let kind = key.kind;
    let Some(task_id) = key.task else {
        return MutationOutcome::Discarded;
    };

    {
        let mut chains = lock_chains(chains);
        let resolution = match chains.get_mut(&key) {
            Some(chain) => {
                let resolution = chain.settle(result.as_ref());
                if chain.is_drained() {
                    chains.remove(&key);
                }
                resolution
            }
            None => {
                debug!(mutation = %id, key = %key, "chain dropped by delete, settlement discarded");
                return MutationOutcome::Discarded;
            }
        };
        let exclusive = !chains.keys().any(|other| other.task == Some(task_id));

        let Some(visible) = view.task(task_id) else {
            debug!(mutation = %id, key = %key, "task gone, settlement discarded");
            return MutationOutcome::Discarded;
        };
        match resolution {
            Resolution::Hold => {}
            Resolution::Confirm(server) => view.apply(ViewChange::Confirmed {
                task: merge_settled(kind, &visible, &server, exclusive),
            }),
            Resolution::Restore(snapshot) => view.apply(ViewChange::RolledBack {
                task: merge_settled(kind, &visible, &snapshot, false),
            }),
        }
    }

    match result {
        Ok(task) => {
            info!(mutation = %id, key = %key, "mutation confirmed");
            view.notify(Notice::Updated { task: task.clone() });
            MutationOutcome::Confirmed { task }
        }
        Err(error) => {
            warn!(mutation = %id, key = %key, %error, "mutation rolled back");
            view.notify(Notice::Failed {
                task_id: Some(task_id),
                kind,
                message: format!("Could not {} task {task_id}: {error}", kind.verb()),
            });
            MutationOutcome::RolledBack { error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_walks_the_state_machine_back_to_idle() {
        let outcome = MutationOutcome::Deleted { task_id: TaskId(3) };
        assert_eq!(finish(MutationState::Submitted, outcome.clone()), Ok(outcome));

        let rolled = MutationOutcome::Discarded;
        assert!(finish(MutationState::Tentative, rolled.clone()).is_ok());

        // Settling something that never left idle is a bookkeeping bug.
        let err = finish(MutationState::Idle, rolled).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidTransition {
                from: "idle".to_string(),
                to: "rolled_back".to_string()
            }
        );
    }
}
