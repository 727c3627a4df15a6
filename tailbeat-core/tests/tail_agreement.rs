//! End-to-end check that lines appended to the watched file after `start()`
//! show up, via a registered schedule, with every event accounted for.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tailbeat_core::{FileTailer, LineParser, ParseError, PeriodicSchedule, Scheduler, TimestampedEvent};

#[derive(Clone, Debug, PartialEq)]
struct Ev(i64);

impl TimestampedEvent for Ev {
    fn timestamp_millis(&self) -> i64 {
        self.0
    }
}

struct LineTsParser;

impl LineParser<Ev> for LineTsParser {
    fn parse(&self, line: &str) -> Result<Option<Ev>, ParseError> {
        line.trim()
            .parse::<i64>()
            .map(|ts| Some(Ev(ts)))
            .map_err(|_| ParseError(format!("bad line: {line}")))
    }
}

struct RecordingSchedule {
    seen: std::sync::Mutex<Vec<i64>>,
    last_seen_ts: std::sync::atomic::AtomicI64,
    fires: AtomicUsize,
}

impl PeriodicSchedule<Ev> for RecordingSchedule {
    fn name(&self) -> &str {
        "recording"
    }
    fn period_secs(&self) -> u32 {
        1
    }
    fn last_seen_ts(&self) -> i64 {
        self.last_seen_ts.load(Ordering::SeqCst)
    }
    fn execute(
        &self,
        _period_start: Option<i64>,
        period_end: Option<i64>,
        events: Vec<Ev>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.fires.fetch_add(1, Ordering::SeqCst);
        let mut seen = self.seen.lock().unwrap();
        seen.extend(events.iter().map(|e| e.0));
        if let Some(end) = period_end {
            self.last_seen_ts.store(end, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn appended_lines_are_eventually_delivered_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.log");
    std::fs::write(&path, "").unwrap();

    let tailer = FileTailer::new(&path, LineTsParser);
    let scheduler = Scheduler::new(tailer, true);

    let recorder = Arc::new(RecordingSchedule {
        seen: std::sync::Mutex::new(Vec::new()),
        last_seen_ts: std::sync::atomic::AtomicI64::new(0),
        fires: AtomicUsize::new(0),
    });
    scheduler
        .dispatcher()
        .register(recorder.clone())
        .await
        .unwrap();

    scheduler.start().await.unwrap();

    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "1000").unwrap();
        writeln!(f, "2000").unwrap();
        writeln!(f, "3000").unwrap();
    }

    tokio::time::sleep(Duration::from_millis(2300)).await;
    scheduler.stop().await.unwrap();

    let mut seen = recorder.seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1000, 2000, 3000]);
    assert!(recorder.fires.load(Ordering::SeqCst) >= 1);
    // Every ready tick evicts what the (only, longest) schedule consumed.
    assert!(scheduler.cache().is_empty().await);
}
