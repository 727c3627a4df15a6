use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use tailbeat_core::PeriodicSchedule;
use tracing::{info, warn};

use crate::clf::ClfEvent;

/// `High`/`Normal` state transition emitted when the running average
/// request rate crosses `threshold_rps` (spec §8 scenario 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    High,
    Normal,
}

struct GaugeState {
    total_requests: u64,
    elapsed_secs: u64,
    high: bool,
    /// Consecutive seconds observed below `threshold_rps` while `high`;
    /// a drop back to "normal" requires `period_secs` of these in a row,
    /// so the gauge is quick to alert and slow to clear.
    below_streak: u32,
}

impl GaugeState {
    fn new() -> Self {
        Self {
            total_requests: 0,
            elapsed_secs: 0,
            high: false,
            below_streak: 0,
        }
    }
}

/// Tracks a running-average requests-per-second figure and alerts when it
/// crosses `threshold_rps` (spec §10.F). The average is cumulative over the
/// gauge's whole lifetime, recomputed one second at a time as each window
/// is processed.
pub struct TrafficGaugeSchedule {
    period_secs: u32,
    threshold_rps: f64,
    last_seen_ts: AtomicI64,
    state: Mutex<GaugeState>,
}

impl TrafficGaugeSchedule {
    pub fn new(period_secs: u32, threshold_rps: f64) -> Self {
        Self {
            period_secs,
            threshold_rps,
            last_seen_ts: AtomicI64::new(0),
            state: Mutex::new(GaugeState::new()),
        }
    }

    /// Folds one second's request count into the running average and
    /// returns a transition if this second's reading flips the alert
    /// state.
    fn record_second(&self, count: u64) -> Option<Transition> {
        let mut state = self.state.lock().expect("gauge state mutex poisoned");
        state.total_requests += count;
        state.elapsed_secs += 1;
        let avg = state.total_requests as f64 / state.elapsed_secs as f64;

        if !state.high {
            if avg >= self.threshold_rps {
                state.high = true;
                state.below_streak = 0;
                return Some(Transition::High);
            }
            None
        } else if avg < self.threshold_rps {
            state.below_streak += 1;
            if state.below_streak >= self.period_secs {
                state.high = false;
                state.below_streak = 0;
                return Some(Transition::Normal);
            }
            None
        } else {
            state.below_streak = 0;
            None
        }
    }
}

impl PeriodicSchedule<ClfEvent> for TrafficGaugeSchedule {
    fn name(&self) -> &str {
        "traffic-gauge"
    }

    fn period_secs(&self) -> u32 {
        self.period_secs
    }

    fn last_seen_ts(&self) -> i64 {
        self.last_seen_ts.load(Ordering::SeqCst)
    }

    fn execute(
        &self,
        period_start: Option<i64>,
        period_end: Option<i64>,
        events: Vec<ClfEvent>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let (Some(start), Some(end)) = (period_start, period_end) {
            let start_sec = start.div_euclid(1000);
            let end_sec = end.div_euclid(1000);

            for sec in start_sec..=end_sec {
                let count = events
                    .iter()
                    .filter(|e| e.timestamp_millis.div_euclid(1000) == sec)
                    .count() as u64;

                match self.record_second(count) {
                    Some(Transition::High) => {
                        warn!(second = sec, "high traffic")
                    }
                    Some(Transition::Normal) => {
                        info!(second = sec, "back to normal")
                    }
                    None => {}
                }
            }
        }

        if let Some(end) = period_end {
            self.last_seen_ts.store(end, Ordering::SeqCst);
        }
        Ok(())
    }
}
