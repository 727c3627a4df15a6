use std::sync::atomic::{AtomicI64, Ordering};

use tailbeat_core::PeriodicSchedule;
use tracing::info;

use crate::clf::ClfEvent;

/// Logs a one-line request-count / byte-total summary for each firing
/// (spec §8 scenario 2). Owns its own `last_seen_ts` per the
/// `PeriodicSchedule` contract.
pub struct GeneralStatsSchedule {
    period_secs: u32,
    last_seen_ts: AtomicI64,
}

impl GeneralStatsSchedule {
    pub fn new(period_secs: u32) -> Self {
        Self {
            period_secs,
            last_seen_ts: AtomicI64::new(0),
        }
    }
}

impl PeriodicSchedule<ClfEvent> for GeneralStatsSchedule {
    fn name(&self) -> &str {
        "general-stats"
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
        let request_count = events.len();
        let total_bytes: u64 = events.iter().map(|e| e.bytes).sum();
        let error_count = events.iter().filter(|e| e.status >= 500).count();

        info!(
            period_start,
            period_end,
            request_count,
            total_bytes,
            error_count,
            "general stats"
        );

        if let Some(end) = period_end {
            self.last_seen_ts.store(end, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(bytes: u64, status: u16) -> ClfEvent {
        ClfEvent {
            timestamp_millis: 0,
            host: "127.0.0.1".into(),
            method: "GET".into(),
            path: "/".into(),
            status,
            bytes,
        }
    }

    #[test]
    fn counts_bytes_and_requests_and_advances_last_seen_ts() {
        let schedule = GeneralStatsSchedule::new(3);
        assert_eq!(schedule.last_seen_ts(), 0);

        let events = vec![ev(150, 200), ev(150, 200), ev(150, 500)];
        schedule
            .execute(Some(1000), Some(3000), events)
            .unwrap();

        assert_eq!(schedule.last_seen_ts(), 3000);
    }

    #[test]
    fn empty_window_leaves_last_seen_ts_untouched_when_no_period_end() {
        let schedule = GeneralStatsSchedule::new(3);
        schedule.execute(None, None, Vec::new()).unwrap();
        assert_eq!(schedule.last_seen_ts(), 0);
    }
}
