use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::cache::EventCache;
use crate::error::{CoreError, Result};
use crate::event::TimestampedEvent;

/// External collaborator consumed by the dispatcher (spec §6). A schedule
/// owns its `last_seen_ts` and is responsible for updating it at the end of
/// `execute`; the dispatcher never inspects schedule state beyond this
/// contract.
pub trait PeriodicSchedule<E>: Send + Sync {
    fn name(&self) -> &str;
    fn period_secs(&self) -> u32;
    /// 0 if this schedule has never run.
    fn last_seen_ts(&self) -> i64;
    fn execute(
        &self,
        period_start: Option<i64>,
        period_end: Option<i64>,
        events: Vec<E>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// One unit of work handed to the serial dispatch worker: run a schedule,
/// then (only for the longest schedule on an eviction tick) evict the cache.
struct DispatchJob<E> {
    schedule: Arc<dyn PeriodicSchedule<E>>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    events: Vec<E>,
    evict_after: Option<usize>,
}

/// Maintains the sorted schedule list and decides, once per tick, which
/// schedules fire and what window each one sees (spec §4.C).
pub struct ScheduleDispatcher<E: TimestampedEvent> {
    schedules: Mutex<Vec<Arc<dyn PeriodicSchedule<E>>>>,
    cache: EventCache<E>,
    jobs_tx: mpsc::UnboundedSender<DispatchJob<E>>,
    last_evict_tick: AtomicI64,
}

impl<E: TimestampedEvent> ScheduleDispatcher<E> {
    /// `jobs_tx` feeds the serial dispatch worker the tick loop owns (see
    /// `crate::scheduler::Scheduler`); schedules always run in ascending
    /// period order because jobs are submitted in that order to a single
    /// consumer.
    pub fn new(cache: EventCache<E>, jobs_tx: mpsc::UnboundedSender<DispatchJob<E>>) -> Self {
        Self {
            schedules: Mutex::new(Vec::new()),
            cache,
            jobs_tx,
            last_evict_tick: AtomicI64::new(0),
        }
    }

    /// Validates `period_secs > 0`, inserts, and re-sorts ascending by
    /// period (I-4); ties keep registration order via a stable sort.
    pub async fn register(&self, schedule: Arc<dyn PeriodicSchedule<E>>) -> Result<()> {
        if schedule.period_secs() == 0 {
            return Err(CoreError::InvalidPeriod(schedule.name().to_string()));
        }
        let mut schedules = self.schedules.lock().await;
        schedules.push(schedule);
        schedules.sort_by_key(|s| s.period_secs());
        Ok(())
    }

    /// Runs once per tick (spec §4.C). Computes each ready schedule's window
    /// and enqueues its execution on the serial worker; eviction is enqueued
    /// alongside the longest schedule's job so it always runs after every
    /// ready schedule has consumed this tick's window (I-5).
    pub async fn dispatch(&self, tick: i64) {
        let schedules = self.schedules.lock().await.clone();
        if schedules.is_empty() {
            return;
        }

        let ready: Vec<_> = schedules
            .iter()
            .filter(|s| tick % s.period_secs() as i64 == 0)
            .cloned()
            .collect();
        if ready.is_empty() {
            return;
        }

        // The list is sorted ascending with ties in registration order, so
        // the longest-period schedule — ties broken to the last registered
        // — is always the last element.
        let longest = schedules.last().expect("non-empty").clone();

        let cache_empty = self.cache.is_empty().await;
        let longest_due = tick % longest.period_secs() as i64 == 0;
        let can_evict_now = !cache_empty && longest_due;

        let previous_evict_tick = self.last_evict_tick.load(Ordering::SeqCst);
        if can_evict_now {
            self.last_evict_tick.store(tick, Ordering::SeqCst);
        }
        let tick_after_eviction = tick == previous_evict_tick + 1;

        for schedule in ready {
            let is_longest = Arc::ptr_eq(&schedule, &longest);
            let force_from_head =
                is_longest || schedule.last_seen_ts() == 0 || tick_after_eviction;

            let period_start = if force_from_head {
                self.cache.first_timestamp().await
            } else {
                self.cache
                    .first_timestamp_since(schedule.last_seen_ts())
                    .await
            };

            let (period_end, events) = match period_start {
                None => (None, Vec::new()),
                Some(start) => {
                    let end = start + (schedule.period_secs() as i64 - 1) * 1000;
                    let events = self.cache.fetch(start, end).await;
                    (Some(end), events)
                }
            };

            let evict_after = (is_longest && can_evict_now).then(|| events.len());

            let job = DispatchJob {
                schedule,
                period_start,
                period_end,
                events,
                evict_after,
            };
            // An unbounded channel to a single consumer; the dispatch worker
            // outliving the send is the only postcondition we need here.
            let _ = self.jobs_tx.send(job);
        }
    }
}

/// Drains dispatch jobs one at a time, in submission order, so schedule
/// execution and the post-longest eviction happen serially with respect to
/// each other (spec §4.C, §5). Owned and spawned by `Scheduler`.
pub(crate) async fn run_dispatch_worker<E: TimestampedEvent>(
    cache: EventCache<E>,
    mut jobs_rx: mpsc::UnboundedReceiver<DispatchJob<E>>,
) {
    while let Some(job) = jobs_rx.recv().await {
        let name = job.schedule.name().to_string();
        if let Err(err) = job
            .schedule
            .execute(job.period_start, job.period_end, job.events)
        {
            tracing::error!(schedule = %name, %err, "schedule execute failed");
        }
        if let Some(n) = job.evict_after {
            cache.evict(n).await;
        }
    }
}

pub(crate) type DispatchJobSender<E> = mpsc::UnboundedSender<DispatchJob<E>>;
pub(crate) type DispatchJobReceiver<E> = mpsc::UnboundedReceiver<DispatchJob<E>>;

pub(crate) fn dispatch_channel<E: TimestampedEvent>(
) -> (DispatchJobSender<E>, DispatchJobReceiver<E>) {
    mpsc::unbounded_channel()
}
