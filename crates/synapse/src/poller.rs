//! Polling subscription for the scheduled tasks of one resource.
//!
//! A subscription fetches the task list, publishes it, and fetches again after
//! the poll interval for as long as any task is `scheduled` or `active`. Polls
//! never overlap. Failed fetches keep the previous snapshot and are retried
//! per [`RetryPolicy`]; only [`TaskSubscription::unsubscribe`] (or dropping
//! the subscription) stops a loop that has not settled.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    synadmin_common::{Sleeper, TokioSleeper},
    tokio::{sync::watch, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    client::AdminClient,
    error::{AdminError, Result},
    rooms::DeleteRoomParams,
    tasks::{ScheduledTask, deletion_allowed, needs_refresh},
};

/// The calls the poller needs from the admin API.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn scheduled_tasks(
        &self,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScheduledTask>>;

    async fn delete_room(
        &self,
        room_id: &str,
        params: DeleteRoomParams,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[async_trait]
impl TaskApi for AdminClient {
    async fn scheduled_tasks(
        &self,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScheduledTask>> {
        self.scheduled_tasks_for_resource(resource_id, cancel).await
    }

    async fn delete_room(
        &self,
        room_id: &str,
        params: DeleteRoomParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        AdminClient::delete_room(self, room_id, params, cancel).await
    }
}

/// Delay before retrying after consecutive failed polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th failure in a row (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let factor = 1u32
                    .checked_shl(failures.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            },
        }
    }
}

/// Latest known state of a subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSnapshot {
    /// `None` until the first successful fetch.
    pub tasks: Option<Vec<ScheduledTask>>,
    /// Error of the most recent poll, cleared by the next success.
    pub last_error: Option<String>,
    pub polls: u64,
}

impl TaskSnapshot {
    pub fn is_settled(&self) -> bool {
        self.tasks.as_deref().is_some_and(|t| !needs_refresh(t))
    }

    /// `None` while nothing has been fetched yet.
    pub fn deletion_allowed(&self) -> Option<bool> {
        self.tasks.as_deref().map(deletion_allowed)
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    AllTerminal,
    Unsubscribed,
}

pub struct TaskPoller {
    api: Arc<dyn TaskApi>,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    retry: RetryPolicy,
}

impl TaskPoller {
    pub fn new(api: Arc<dyn TaskApi>, interval: Duration, retry: RetryPolicy) -> Self {
        Self::with_sleeper(api, interval, retry, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        api: Arc<dyn TaskApi>,
        interval: Duration,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            api,
            sleeper,
            interval,
            retry,
        }
    }

    /// Start polling `resource_id`. Cancelling `parent` stops the loop too.
    pub fn subscribe(&self, resource_id: impl Into<String>, parent: &CancellationToken) -> TaskSubscription {
        let resource_id = resource_id.into();
        let cancel = parent.child_token();
        let (tx, rx) = watch::channel(TaskSnapshot::default());
        let poll = PollLoop {
            api: Arc::clone(&self.api),
            sleeper: Arc::clone(&self.sleeper),
            interval: self.interval,
            retry: self.retry,
            resource_id,
            tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(poll.run());
        TaskSubscription {
            rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Ask the server to delete `resource_id`. Does not poll; subscribe again
    /// to see the new task.
    pub async fn trigger_deletion(
        &self,
        resource_id: &str,
        params: DeleteRoomParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.api.delete_room(resource_id, params, cancel).await
    }
}

struct PollLoop {
    api: Arc<dyn TaskApi>,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    retry: RetryPolicy,
    resource_id: String,
    tx: watch::Sender<TaskSnapshot>,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) -> PollOutcome {
        let mut failures = 0u32;
        loop {
            let result = self.api.scheduled_tasks(&self.resource_id, &self.cancel).await;
            if self.cancel.is_cancelled() {
                return PollOutcome::Unsubscribed;
            }
            let delay = match result {
                Ok(tasks) => {
                    failures = 0;
                    let pending = needs_refresh(&tasks);
                    debug!(resource_id = %self.resource_id, count = tasks.len(), pending, "scheduled tasks polled");
                    self.tx.send_modify(|snap| {
                        snap.tasks = Some(tasks);
                        snap.last_error = None;
                        snap.polls += 1;
                    });
                    if !pending {
                        info!(resource_id = %self.resource_id, "all scheduled tasks terminal, polling stopped");
                        return PollOutcome::AllTerminal;
                    }
                    self.interval
                },
                Err(AdminError::Cancelled) => return PollOutcome::Unsubscribed,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.delay(failures);
                    warn!(resource_id = %self.resource_id, %e, failures, ?delay, "scheduled task poll failed, keeping last snapshot");
                    self.tx.send_modify(|snap| {
                        snap.last_error = Some(e.to_string());
                        snap.polls += 1;
                    });
                    delay
                },
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PollOutcome::Unsubscribed,
                () = self.sleeper.sleep(delay) => {},
            }
        }
    }
}

/// Handle on a running poll loop. Dropping it unsubscribes.
pub struct TaskSubscription {
    rx: watch::Receiver<TaskSnapshot>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<PollOutcome>>,
}

impl TaskSubscription {
    pub fn snapshot(&self) -> TaskSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot. Returns `false` once the loop has
    /// ended and no further snapshots will come.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to end.
    pub async fn finished(mut self) -> PollOutcome {
        let Some(handle) = self.handle.take() else {
            return PollOutcome::Unsubscribed;
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%e, "scheduled task poll loop aborted");
                PollOutcome::Unsubscribed
            },
        }
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::tasks::{TaskStatus, task};

    const PURGE: &str = "shutdown_and_purge_room";

    /// Replays scripted responses, then waits for cancellation.
    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<VecDeque<Result<Vec<ScheduledTask>>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        deletions: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<Vec<ScheduledTask>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskApi for ScriptedApi {
        async fn scheduled_tasks(
            &self,
            _resource_id: &str,
            cancel: &CancellationToken,
        ) -> Result<Vec<ScheduledTask>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let next = self.script.lock().unwrap().pop_front();
            let res = match next {
                Some(res) => res,
                None => {
                    cancel.cancelled().await;
                    Err(AdminError::Cancelled)
                },
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            res
        }

        async fn delete_room(
            &self,
            room_id: &str,
            params: DeleteRoomParams,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.deletions
                .lock()
                .unwrap()
                .push((room_id.to_string(), params.block));
            Ok("del-1".into())
        }
    }

    /// Records requested delays and returns immediately.
    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    impl RecordingSleeper {
        fn delays(&self) -> Vec<Duration> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
            tokio::task::yield_now().await;
        }
    }

    const INTERVAL: Duration = Duration::from_secs(1);

    fn poller(api: Arc<ScriptedApi>, sleeper: Arc<RecordingSleeper>, retry: RetryPolicy) -> TaskPoller {
        TaskPoller::with_sleeper(api, INTERVAL, retry, sleeper)
    }

    fn transport_like() -> AdminError {
        AdminError::UnexpectedStatus {
            status: 502,
            url: "https://matrix.example.org/_synapse/admin/v1/scheduled_tasks".into(),
        }
    }

    #[test]
    fn test_fixed_retry_delay() {
        let policy = RetryPolicy::Fixed(Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_retry_delay_is_capped() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));
        assert_eq!(policy.delay(200), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_repolls_until_all_terminal() {
        let api = ScriptedApi::new(vec![
            Ok(vec![task("1", PURGE, TaskStatus::Scheduled)]),
            Ok(vec![task("1", PURGE, TaskStatus::Active)]),
            Ok(vec![task("1", PURGE, TaskStatus::Complete)]),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let poller = poller(Arc::clone(&api), Arc::clone(&sleeper), RetryPolicy::default());

        let mut sub = poller.subscribe("!room:example.org", &CancellationToken::new());
        while !sub.snapshot().is_settled() {
            assert!(sub.changed().await);
        }
        let snap = sub.snapshot();
        assert_eq!(sub.finished().await, PollOutcome::AllTerminal);

        assert_eq!(api.calls(), 3);
        assert_eq!(sleeper.delays(), vec![INTERVAL, INTERVAL]);
        assert_eq!(snap.polls, 3);
        assert_eq!(snap.deletion_allowed(), Some(false));
    }

    #[tokio::test]
    async fn test_terminal_list_is_fetched_once() {
        let api = ScriptedApi::new(vec![Ok(vec![
            task("1", PURGE, TaskStatus::Failed),
            task("2", PURGE, TaskStatus::Failed),
        ])]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let poller = poller(Arc::clone(&api), Arc::clone(&sleeper), RetryPolicy::default());

        let sub = poller.subscribe("!room:example.org", &CancellationToken::new());
        assert_eq!(sub.finished().await, PollOutcome::AllTerminal);
        assert_eq!(api.calls(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_settles_and_allows_deletion() {
        let api = ScriptedApi::new(vec![Ok(vec![])]);
        let poller = poller(
            Arc::clone(&api),
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        );
        let mut sub = poller.subscribe("!room:example.org", &CancellationToken::new());
        assert!(sub.changed().await);
        let snap = sub.snapshot();
        assert!(snap.is_settled());
        assert_eq!(snap.deletion_allowed(), Some(true));
        assert_eq!(sub.finished().await, PollOutcome::AllTerminal);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_snapshot_and_backs_off() {
        let api = ScriptedApi::new(vec![
            Ok(vec![task("1", PURGE, TaskStatus::Active)]),
            Err(transport_like()),
            Err(transport_like()),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let retry = RetryPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(150),
        };
        let poller = poller(Arc::clone(&api), Arc::clone(&sleeper), retry);

        let mut sub = poller.subscribe("!room:example.org", &CancellationToken::new());
        while sub.snapshot().polls < 3 {
            assert!(sub.changed().await);
        }
        let snap = sub.snapshot();
        assert_eq!(
            snap.tasks.as_ref().map(|t| t[0].status),
            Some(TaskStatus::Active)
        );
        assert!(snap.last_error.is_some());

        sub.unsubscribe();
        assert_eq!(sub.finished().await, PollOutcome::Unsubscribed);
        let delays = sleeper.delays();
        assert_eq!(delays[..2], [INTERVAL, Duration::from_millis(100)]);
        assert!(delays.iter().all(|d| *d <= INTERVAL));
    }

    #[tokio::test]
    async fn test_success_resets_backoff() {
        let api = ScriptedApi::new(vec![
            Err(transport_like()),
            Err(transport_like()),
            Ok(vec![task("1", PURGE, TaskStatus::Active)]),
            Err(transport_like()),
            Ok(vec![task("1", PURGE, TaskStatus::Complete)]),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let retry = RetryPolicy::Exponential {
            base: Duration::from_millis(10),
            max: Duration::from_secs(10),
        };
        let poller = poller(Arc::clone(&api), Arc::clone(&sleeper), retry);

        let sub = poller.subscribe("!room:example.org", &CancellationToken::new());
        assert_eq!(sub.finished().await, PollOutcome::AllTerminal);
        assert_eq!(sleeper.delays(), vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            INTERVAL,
            Duration::from_millis(10),
        ]);
    }

    #[tokio::test]
    async fn test_polls_never_overlap() {
        let script = (0..5)
            .map(|_| Ok(vec![task("1", PURGE, TaskStatus::Active)]))
            .chain([Ok(vec![task("1", PURGE, TaskStatus::Complete)])])
            .collect();
        let api = ScriptedApi::new(script);
        let poller = poller(
            Arc::clone(&api),
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        );
        let sub = poller.subscribe("!room:example.org", &CancellationToken::new());
        assert_eq!(sub.finished().await, PollOutcome::AllTerminal);
        assert_eq!(api.calls(), 6);
        assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_polling() {
        let api = ScriptedApi::new(vec![]);
        let poller = poller(
            Arc::clone(&api),
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        );
        let parent = CancellationToken::new();
        let sub = poller.subscribe("!room:example.org", &parent);
        parent.cancel();
        assert_eq!(sub.finished().await, PollOutcome::Unsubscribed);
        assert!(api.calls() <= 1);
    }

    #[tokio::test]
    async fn test_trigger_deletion_does_not_poll() {
        let api = ScriptedApi::new(vec![]);
        let poller = poller(
            Arc::clone(&api),
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        );
        let id = poller
            .trigger_deletion(
                "!room:example.org",
                DeleteRoomParams { block: true },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(id, "del-1");
        assert_eq!(api.calls(), 0);
        assert_eq!(*api.deletions.lock().unwrap(), vec![(
            "!room:example.org".to_string(),
            true
        )]);
    }
}
