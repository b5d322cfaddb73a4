//! Keyed serial queue.
//!
//! For every key at most one queued action runs at a time, and actions for
//! the same key run in the order they were enqueued. Different keys never wait
//! on each other.
//!
//! Each key owns a lane: a count of unsettled actions, an `executing` flag and
//! the completion signal of the most recently enqueued action. A new action
//! takes that signal as its predecessor and leaves its own in its place, so
//! the lane is an implicit FIFO chain fixed at enqueue time. Lanes are created
//! on first use and removed as soon as their last action settles.
//!
//! Actions are spawned onto the tokio runtime when they are enqueued. Dropping
//! the returned [`Settlement`] does not cancel the action.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// The runtime dropped a queued action before it settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queued action was abandoned before it settled")]
pub struct Abandoned;

#[derive(Debug, Default)]
struct Lane {
    queued: usize,
    executing: bool,
    tail: Option<oneshot::Receiver<()>>,
}

struct Shared<K> {
    lanes: Mutex<HashMap<K, Lane>>,
    idle: Notify,
}

impl<K> Shared<K> {
    fn lanes(&self) -> MutexGuard<'_, HashMap<K, Lane>> {
        // Lane bookkeeping never panics mid-update, so a poisoned map is still consistent.
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes asynchronous actions per key.
///
/// Cloning is cheap and yields a handle to the same lane registry.
pub struct KeyedQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for KeyedQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> Default for KeyedQueue<K>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedQueue<K>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedQueue")
            .field("lanes", &self.lane_count())
            .finish()
    }
}

impl<K> KeyedQueue<K>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                lanes: Mutex::new(HashMap::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue `action` behind every unsettled action for `key`.
    ///
    /// The action starts right away when the lane is idle. The returned
    /// settlement resolves to the action's own result. A panic inside the
    /// action is resumed in whoever awaits the settlement; the lane moves on
    /// either way.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F, Fut, T, E>(&self, key: K, action: F) -> Settlement<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let (predecessor, position) = {
            let mut lanes = self.shared.lanes();
            let lane = lanes.entry(key.clone()).or_default();
            lane.queued += 1;
            (lane.tail.replace(done_rx), lane.queued)
        };
        debug!(key = ?key, position, "action enqueued");

        let mut ticket = LaneTicket {
            shared: Arc::clone(&self.shared),
            key,
            done: Some(done_tx),
        };
        let handle = tokio::spawn(async move {
            if let Some(predecessor) = predecessor {
                // A dropped sender still means the predecessor is finished.
                let _ = predecessor.await;
            }
            ticket.start();
            let outcome = action().await;
            ticket.settle();
            outcome
        });

        Settlement { handle }
    }

    /// Whether `key` has any unsettled action, running or waiting.
    pub fn is_busy(&self, key: &K) -> bool {
        self.shared.lanes().contains_key(key)
    }

    /// Whether an action for `key` is currently running.
    pub fn is_executing(&self, key: &K) -> bool {
        self.shared
            .lanes()
            .get(key)
            .map(|lane| lane.executing)
            .unwrap_or(false)
    }

    /// Number of unsettled actions for `key`, including the running one.
    pub fn pending(&self, key: &K) -> usize {
        self.shared
            .lanes()
            .get(key)
            .map(|lane| lane.queued)
            .unwrap_or(0)
    }

    /// Number of lanes currently held.
    pub fn lane_count(&self) -> usize {
        self.shared.lanes().len()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.lanes().is_empty()
    }

    /// Wait until every lane has drained.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Membership of one action in its lane.
///
/// Settling (or dropping, when the action panics or the runtime shuts down)
/// releases the lane slot and wakes the next action.
struct LaneTicket<K: Hash + Eq + fmt::Debug> {
    shared: Arc<Shared<K>>,
    key: K,
    done: Option<oneshot::Sender<()>>,
}

impl<K: Hash + Eq + fmt::Debug> LaneTicket<K> {
    fn start(&self) {
        if let Some(lane) = self.shared.lanes().get_mut(&self.key) {
            lane.executing = true;
        }
        debug!(key = ?self.key, "action dispatched");
    }

    fn settle(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };

        let drained = {
            let mut lanes = self.shared.lanes();
            let remaining = match lanes.get_mut(&self.key) {
                Some(lane) => {
                    lane.queued = lane.queued.saturating_sub(1);
                    lane.executing = false;
                    lane.queued
                }
                None => 0,
            };
            if remaining == 0 {
                lanes.remove(&self.key);
            }
            debug!(key = ?self.key, remaining, "action settled");
            lanes.is_empty()
        };

        let _ = done.send(());
        if drained {
            self.shared.idle.notify_waiters();
        }
    }
}

impl<K: Hash + Eq + fmt::Debug> Drop for LaneTicket<K> {
    fn drop(&mut self) {
        self.settle();
    }
}

/// Outcome of a queued action.
///
/// Resolves to exactly what the action returned. If the runtime drops the
/// action before it settles, resolves to `E::from(Abandoned)`.
#[must_use = "dropping a settlement detaches from the result, the action still runs"]
pub struct Settlement<T, E> {
    handle: JoinHandle<Result<T, E>>,
}

impl<T, E> fmt::Debug for Settlement<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settlement")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl<T, E> Settlement<T, E> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T, E: From<Abandoned>> Future for Settlement<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Abandoned))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    struct Failed(&'static str);

    impl From<Abandoned> for Failed {
        fn from(_: Abandoned) -> Self {
            Failed("abandoned")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_runs_in_enqueue_order() {
        let queue = KeyedQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let slow_log = Arc::clone(&log);
        let slow = queue.enqueue("a", move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow_log.lock().unwrap().push("slow");
            Ok::<_, Failed>(1)
        });
        let fast_log = Arc::clone(&log);
        let fast = queue.enqueue("a", move || async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            fast_log.lock().unwrap().push("fast");
            Ok::<_, Failed>(2)
        });

        assert_eq!(queue.pending(&"a"), 2);
        assert_eq!(fast.await, Ok(2));
        assert_eq!(slow.await, Ok(1));
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_skip_later_actions() {
        let queue = KeyedQueue::new();
        let first = queue.enqueue(1u64, || async { Err::<u8, _>(Failed("boom")) });
        let second = queue.enqueue(1u64, || async { Ok::<_, Failed>(9u8) });

        assert_eq!(first.await, Err(Failed("boom")));
        assert_eq!(second.await, Ok(9));
        assert_eq!(queue.lane_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_settlement_still_runs() {
        let queue = KeyedQueue::new();
        let ran = Arc::new(StdMutex::new(false));

        let flag = Arc::clone(&ran);
        drop(queue.enqueue("k", move || async move {
            *flag.lock().unwrap() = true;
            Ok::<_, Failed>(())
        }));

        queue.wait_idle().await;
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn executing_flag_tracks_running_action() {
        let queue = KeyedQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = queue.enqueue("k", move || async move {
            let _ = release_rx.await;
            Ok::<_, Failed>(())
        });
        tokio::task::yield_now().await;

        assert!(queue.is_busy(&"k"));
        assert!(queue.is_executing(&"k"));
        release_tx.send(()).unwrap();
        running.await.unwrap();
        assert!(!queue.is_busy(&"k"));
        assert!(!queue.is_executing(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_surfaces_to_awaiter_and_lane_advances() {
        let queue = KeyedQueue::new();
        let panicking = queue.enqueue("k", || async {
            if true {
                panic!("action blew up");
            }
            Ok::<u8, Failed>(0)
        });
        let next = queue.enqueue("k", || async { Ok::<_, Failed>(3u8) });

        let joined = tokio::spawn(panicking).await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(next.await, Ok(3));
        assert!(queue.is_idle());
    }
}
