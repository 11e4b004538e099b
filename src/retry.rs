use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Delays, in seconds, applied after 1, 2, 3... consecutive failures.
pub const DEFAULT_RETRY_LADDER: [u64; 7] = [60, 120, 240, 480, 960, 1920, 3600];

/// Used when a schedule is configured with an empty ladder.
const MAX_RETRY_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    interval: u64,
    ladder: Vec<u64>,
    retry_count: usize,
    lower_interval_limit: Option<u64>,
    upper_interval_limit: Option<u64>,
}

impl RetrySchedule {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            ladder: DEFAULT_RETRY_LADDER.to_vec(),
            retry_count: 0,
            lower_interval_limit: None,
            upper_interval_limit: None,
        }
    }

    #[cfg(test)]
    pub fn with_ladder(mut self, ladder: Vec<u64>) -> Self {
        self.ladder = ladder;
        self
    }

    #[cfg(test)]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: u64) {
        self.interval = interval;
    }

    #[cfg(test)]
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    pub fn set_lower_interval_limit(&mut self, limit: Option<u64>) {
        self.lower_interval_limit = limit;
    }

    #[cfg(test)]
    pub fn set_upper_interval_limit(&mut self, limit: Option<u64>) {
        self.upper_interval_limit = limit;
    }

    /// Records the outcome of a run and returns the delay before the next one.
    pub fn next_interval(&mut self, success: bool) -> u64 {
        let computed = if success {
            self.retry_count = 0;
            self.interval
        } else {
            let step = self
                .ladder
                .get(self.retry_count)
                .or(self.ladder.last())
                .copied()
                .unwrap_or(MAX_RETRY_INTERVAL_SECS);
            self.retry_count = (self.retry_count + 1).min(self.ladder.len());
            step
        };
        self.clamp(computed)
    }

    fn clamp(&self, seconds: u64) -> u64 {
        let seconds = self
            .lower_interval_limit
            .map_or(seconds, |lower| seconds.max(lower));
        self.upper_interval_limit
            .map_or(seconds, |upper| seconds.min(upper))
    }
}

/// Shared view of a timer's schedule, so the running task can adjust the
/// limits of the timer that drives it.
#[derive(Clone, Debug)]
pub struct ScheduleHandle {
    inner: Arc<Mutex<RetrySchedule>>,
}

impl ScheduleHandle {
    pub fn new(schedule: RetrySchedule) -> Self {
        Self {
            inner: Arc::new(Mutex::new(schedule)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RetrySchedule> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One unit of repeated work.
///
/// `Ok(true)` keeps the normal cadence and `Ok(false)` backs off. An `Err`
/// ends the loop: the timer does not reschedule after a task error, so tasks
/// that want to keep polling through failures must report them as
/// `Ok(false)`.
#[async_trait]
pub trait RetryTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<bool>;
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RetryTimer {
    task: Arc<dyn RetryTask>,
    schedule: ScheduleHandle,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    running: Option<Running>,
}

impl RetryTimer {
    pub fn new(task: Arc<dyn RetryTask>, schedule: ScheduleHandle) -> Self {
        Self {
            task,
            schedule,
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
            running: None,
        }
    }

    #[cfg(test)]
    pub fn schedule(&self) -> &ScheduleHandle {
        &self.schedule
    }

    pub fn is_scheduled(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Runs the task right away when `initial_delay` is zero. Must be called
    /// from within a tokio runtime.
    pub fn start(&mut self, initial_delay: Duration) {
        if self.is_scheduled() {
            self.stop();
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(
            Arc::clone(&self.task),
            self.schedule.clone(),
            Arc::clone(&self.run_lock),
            cancel.clone(),
            initial_delay,
        ));
        self.running = Some(Running { cancel, handle });
    }

    /// Cancels the pending run. A run already in progress completes, but the
    /// loop will not schedule another one.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }

    pub fn restart(&mut self, initial_delay: Duration) {
        self.stop();
        self.start(initial_delay);
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drive(
    task: Arc<dyn RetryTask>,
    schedule: ScheduleHandle,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
    initial_delay: Duration,
) {
    let mut delay = initial_delay;
    loop {
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // A previous loop that was stopped mid-run may still hold the lock.
        let outcome = {
            let _guard = tokio::select! {
                _ = cancel.cancelled() => return,
                guard = run_lock.lock() => guard,
            };
            task.run().await
        };

        if cancel.is_cancelled() {
            return;
        }

        match outcome {
            Ok(success) => {
                let seconds = schedule.lock().next_interval(success);
                debug!(success, seconds, "next run scheduled");
                delay = Duration::from_secs(seconds);
            }
            Err(err) => {
                debug!(error = %err, "task failed; timer stopped");
                return;
            }
        }
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::time::{Instant, sleep};

    use super::*;

    #[test]
    fn success_uses_base_interval() {
        let mut schedule = RetrySchedule::new(90);
        assert_eq!(schedule.next_interval(true), 90);
        assert_eq!(schedule.retry_count(), 0);
    }

    #[test]
    fn consecutive_failures_walk_the_ladder() {
        let mut schedule = RetrySchedule::new(60);
        for (n, expected) in DEFAULT_RETRY_LADDER.iter().enumerate() {
            assert_eq!(schedule.next_interval(false), *expected, "failure {}", n + 1);
        }
        assert_eq!(schedule.next_interval(false), 3600);
        assert_eq!(schedule.next_interval(false), 3600);
    }

    #[test]
    fn success_resets_backoff() {
        let mut schedule = RetrySchedule::new(45);
        schedule.next_interval(false);
        schedule.next_interval(false);
        schedule.next_interval(false);
        assert_eq!(schedule.next_interval(true), 45);
        assert_eq!(schedule.next_interval(false), 60);
    }

    #[test]
    fn limits_clamp_every_outcome() {
        let mut schedule = RetrySchedule::new(30);
        schedule.set_lower_interval_limit(Some(100));
        schedule.set_upper_interval_limit(Some(500));

        let mut seen = vec![schedule.next_interval(true)];
        for _ in 0..10 {
            seen.push(schedule.next_interval(false));
        }
        seen.push(schedule.next_interval(true));

        assert!(seen.iter().all(|interval| (100..=500).contains(interval)), "{seen:?}");
        assert_eq!(seen[0], 100);
        assert_eq!(seen[1], 100);
        assert_eq!(seen[3], 240);
        assert_eq!(seen[5], 500);
    }

    #[test]
    fn empty_ladder_backs_off_to_maximum() {
        let mut schedule = RetrySchedule::new(60).with_ladder(Vec::new());
        assert_eq!(schedule.next_interval(false), MAX_RETRY_INTERVAL_SECS);
    }

    struct ScriptedTask {
        outcomes: Mutex<VecDeque<anyhow::Result<bool>>>,
        runs: Mutex<Vec<Instant>>,
    }

    impl ScriptedTask {
        fn new(outcomes: Vec<anyhow::Result<bool>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                runs: Mutex::new(Vec::new()),
            })
        }

        fn runs(&self) -> Vec<Instant> {
            self.runs.lock().unwrap().clone()
        }

        fn gaps(&self) -> Vec<u64> {
            self.runs()
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl RetryTask for ScriptedTask {
        async fn run(&self) -> anyhow::Result<bool> {
            self.runs.lock().unwrap().push(Instant::now());
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(true))
        }
    }

    fn timer(task: &Arc<ScriptedTask>, interval: u64) -> RetryTimer {
        RetryTimer::new(task.clone(), ScheduleHandle::new(RetrySchedule::new(interval)))
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_delay_runs_immediately() {
        let task = ScriptedTask::new(Vec::new());
        let mut timer = timer(&task, 60);

        timer.start(Duration::ZERO);
        sleep(Duration::from_millis(1)).await;

        assert_eq!(task.runs().len(), 1);
        assert!(timer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn start_with_delay_waits_first() {
        let task = ScriptedTask::new(Vec::new());
        let mut timer = timer(&task, 60);

        timer.start(Duration::from_secs(30));
        sleep(Duration::from_secs(29)).await;
        assert!(task.runs().is_empty());
        sleep(Duration::from_secs(2)).await;
        assert_eq!(task.runs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_runs_repeat_at_base_interval() {
        let task = ScriptedTask::new(Vec::new());
        let mut timer = timer(&task, 60);

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(121)).await;

        assert_eq!(task.runs().len(), 3);
        assert_eq!(task.gaps(), vec![60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_back_off_then_recover() {
        let task = ScriptedTask::new(vec![Ok(false), Ok(false), Ok(false), Ok(true)]);
        let mut timer = timer(&task, 10);

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(60 + 120 + 240 + 10 + 1)).await;

        assert_eq!(task.gaps(), vec![60, 120, 240, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn task_error_stops_the_loop() {
        let task = ScriptedTask::new(vec![Ok(false), Err(anyhow::anyhow!("boom"))]);
        let mut timer = timer(&task, 10);

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(10_000)).await;

        assert_eq!(task.runs().len(), 2);
        assert!(!timer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_run() {
        let task = ScriptedTask::new(Vec::new());
        let mut timer = timer(&task, 60);

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(1)).await;
        timer.stop();
        timer.stop();
        sleep(Duration::from_secs(600)).await;

        assert_eq!(task.runs().len(), 1);
        assert!(!timer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_runs_again_immediately() {
        let task = ScriptedTask::new(Vec::new());
        let mut timer = timer(&task, 60);

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(1)).await;
        timer.schedule().lock().set_interval(5);
        timer.restart(Duration::ZERO);
        sleep(Duration::from_secs(6)).await;

        assert_eq!(task.runs().len(), 3);
        assert_eq!(task.gaps(), vec![1, 5]);
    }

    #[derive(Default)]
    struct SlowTask {
        started: Mutex<Vec<Instant>>,
        active: Mutex<usize>,
        max_active: Mutex<usize>,
    }

    #[async_trait]
    impl RetryTask for SlowTask {
        async fn run(&self) -> anyhow::Result<bool> {
            self.started.lock().unwrap().push(Instant::now());
            {
                let mut active = self.active.lock().unwrap();
                *active += 1;
                let mut max_active = self.max_active.lock().unwrap();
                *max_active = (*max_active).max(*active);
            }
            sleep(Duration::from_secs(10)).await;
            *self.active.lock().unwrap() -= 1;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restart_during_run_waits_for_it_to_finish() {
        let task = Arc::new(SlowTask::default());
        let begin = Instant::now();
        let mut timer = RetryTimer::new(task.clone(), ScheduleHandle::new(RetrySchedule::new(60)));

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(1)).await;
        timer.restart(Duration::ZERO);
        sleep(Duration::from_secs(24)).await;

        let offsets: Vec<_> = task
            .started
            .lock()
            .unwrap()
            .iter()
            .map(|at| (*at - begin).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 10]);
        assert_eq!(*task.max_active.lock().unwrap(), 1);
        assert_eq!(*task.active.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_run_lets_it_finish_without_rescheduling() {
        let task = Arc::new(SlowTask::default());
        let mut timer = RetryTimer::new(task.clone(), ScheduleHandle::new(RetrySchedule::new(60)));

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(1)).await;
        timer.stop();
        assert_eq!(*task.active.lock().unwrap(), 1);
        sleep(Duration::from_secs(600)).await;

        assert_eq!(task.started.lock().unwrap().len(), 1);
        assert_eq!(*task.active.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lower_limit_set_by_task_applies_to_next_delay() {
        struct RaisesLimit {
            schedule: ScheduleHandle,
            runs: Mutex<usize>,
        }

        #[async_trait]
        impl RetryTask for RaisesLimit {
            async fn run(&self) -> anyhow::Result<bool> {
                *self.runs.lock().unwrap() += 1;
                self.schedule.lock().set_lower_interval_limit(Some(300));
                Ok(true)
            }
        }

        let schedule = ScheduleHandle::new(RetrySchedule::new(60));
        let task = Arc::new(RaisesLimit {
            schedule: schedule.clone(),
            runs: Mutex::new(0),
        });
        let mut timer = RetryTimer::new(task.clone(), schedule);

        timer.start(Duration::ZERO);
        sleep(Duration::from_secs(299)).await;
        assert_eq!(*task.runs.lock().unwrap(), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(*task.runs.lock().unwrap(), 2);
    }
}
