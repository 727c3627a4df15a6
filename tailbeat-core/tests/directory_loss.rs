//! Losing the watched file's parent directory must stop the whole system
//! without anyone calling `stop()` (spec's "parent directory lost" path).

use std::time::Duration;

use tailbeat_core::{FileTailer, LineParser, ParseError, Scheduler, TimestampedEvent};

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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn losing_parent_directory_stops_the_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.log");
    std::fs::write(&path, "").unwrap();

    let tailer = FileTailer::new(&path, LineTsParser);
    let scheduler = Scheduler::new(tailer, true);
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());

    std::fs::remove_dir_all(dir.path()).unwrap();

    // The tick loop only notices at the end of the ~1s iteration it is
    // currently in; give it a couple of iterations to observe and react.
    tokio::time::sleep(Duration::from_millis(2300)).await;
    assert!(!scheduler.is_running());
    assert!(!scheduler.join_tasks(0).await);
}
