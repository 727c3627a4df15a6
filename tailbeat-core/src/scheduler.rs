use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::EventCache;
use crate::dispatcher::{dispatch_channel, run_dispatch_worker, DispatchJobReceiver, ScheduleDispatcher};
use crate::error::{CoreError, Result};
use crate::event::TimestampedEvent;
use crate::tailer::{FileTailer, LineParser};

/// `{new, running, stopped}` (spec §4.D "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Running,
    Stopped,
}

enum IngestJob {
    Create,
    Modify,
}

struct Handles {
    tick: JoinHandle<()>,
    ingest: JoinHandle<()>,
    dispatch: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

/// Drives the whole pipeline: polls the file-system watch, hands ingestion
/// and dispatch work to their own workers, and maintains the ~1s tick
/// cadence with drift compensation (spec §4.D).
pub struct Scheduler<E: TimestampedEvent, P: LineParser<E>> {
    tailer: Arc<AsyncMutex<FileTailer<E, P>>>,
    path: PathBuf,
    parent: PathBuf,
    cache: EventCache<E>,
    dispatcher: Arc<ScheduleDispatcher<E>>,
    jobs_rx: AsyncMutex<Option<DispatchJobReceiver<E>>>,
    read_from_start: bool,
    data_available: Arc<AtomicBool>,
    state: StdMutex<State>,
    stop_flag: Arc<AtomicBool>,
    handles: AsyncMutex<Option<Handles>>,
    self_weak: OnceLock<Weak<Scheduler<E, P>>>,
}

impl<E: TimestampedEvent, P: LineParser<E> + 'static> Scheduler<E, P> {
    pub fn new(tailer: FileTailer<E, P>, read_from_start: bool) -> Arc<Self> {
        let path = tailer.path().to_path_buf();
        let parent = tailer.parent().to_path_buf();
        let cache = EventCache::new();
        let (jobs_tx, jobs_rx) = dispatch_channel();
        let dispatcher = Arc::new(ScheduleDispatcher::new(cache.clone(), jobs_tx));

        let scheduler = Arc::new(Self {
            tailer: Arc::new(AsyncMutex::new(tailer)),
            path,
            parent,
            cache,
            dispatcher,
            jobs_rx: AsyncMutex::new(Some(jobs_rx)),
            read_from_start,
            data_available: Arc::new(AtomicBool::new(false)),
            state: StdMutex::new(State::New),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handles: AsyncMutex::new(None),
            self_weak: OnceLock::new(),
        });
        let _ = scheduler.self_weak.set(Arc::downgrade(&scheduler));
        scheduler
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn dispatcher(&self) -> &Arc<ScheduleDispatcher<E>> {
        &self.dispatcher
    }

    pub fn cache(&self) -> &EventCache<E> {
        &self.cache
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == State::Running
    }

    /// Waits up to `timeout_ms`, then reports whether the scheduler is still
    /// running. `true` on timeout while still running (caller should keep
    /// polling); `false` once it is no longer running.
    pub async fn join_tasks(&self, timeout_ms: u64) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
        self.is_running()
    }

    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == State::Running {
                return Err(CoreError::AlreadyRunning);
            }
            *state = State::Running;
        }

        if !parent_dir_accessible(&self.parent) {
            *self.state.lock().unwrap() = State::Stopped;
            return Err(CoreError::ParentDirLost);
        }

        let (watch_tx, watch_rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.send(event);
            }
        })
        .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        watcher
            .watch(&self.parent, RecursiveMode::NonRecursive)
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;

        if !self.read_from_start {
            self.tailer.lock().await.move_to_end();
        }

        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel::<IngestJob>();
        let ingest_handle = tokio::spawn(run_ingest_worker(
            self.tailer.clone(),
            self.cache.clone(),
            self.data_available.clone(),
            ingest_rx,
        ));

        let jobs_rx = self
            .jobs_rx
            .lock()
            .await
            .take()
            .expect("dispatch receiver taken exactly once across restarts");
        let dispatch_handle = tokio::spawn(run_dispatch_worker(self.cache.clone(), jobs_rx));

        self.stop_flag.store(false, Ordering::SeqCst);
        let strong = self
            .self_weak
            .get()
            .expect("self_weak set in new()")
            .upgrade()
            .expect("scheduler outlives its own running task");
        let tick_handle = tokio::spawn(Self::run_tick_loop(strong, watch_rx, ingest_tx));

        *self.handles.lock().await = Some(Handles {
            tick: tick_handle,
            ingest: ingest_handle,
            dispatch: dispatch_handle,
            _watcher: watcher,
        });

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Running {
                return Err(CoreError::NotRunning);
            }
            *state = State::Stopped;
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handles) = self.handles.lock().await.take() {
            drop(handles._watcher);
            let _ = tokio::time::timeout(Duration::from_millis(200), handles.tick).await;
            let _ = tokio::time::timeout(Duration::from_millis(200), handles.ingest).await;
            let _ = tokio::time::timeout(Duration::from_millis(200), handles.dispatch).await;
        }
        Ok(())
    }

    /// The 1s (± drift compensation) loop described in spec §4.D. Runs as
    /// its own task; ingestion and dispatch are fanned out to their workers
    /// so this loop never blocks on file I/O or schedule callbacks.
    async fn run_tick_loop(
        self: Arc<Self>,
        mut watch_rx: mpsc::UnboundedReceiver<notify::Event>,
        ingest_tx: mpsc::UnboundedSender<IngestJob>,
    ) {
        let mut adjustment: i64 = 10;
        let mut tick: i64 = 1;

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }

            let t0 = Instant::now();
            let poll_ms = (1000 - adjustment).max(0) as u64;

            match tokio::time::timeout(Duration::from_millis(poll_ms), watch_rx.recv()).await {
                Ok(Some(first)) => {
                    self.handle_watch_event(first, &ingest_tx).await;
                    // Drain whatever else arrived in this poll window before
                    // moving on, mirroring a WatchKey returning a batch.
                    while let Ok(event) = watch_rx.try_recv() {
                        self.handle_watch_event(event, &ingest_tx).await;
                    }
                }
                Ok(None) => {
                    let err = CoreError::WatchClosed;
                    tracing::error!(%err);
                    self.stop_internal();
                    break;
                }
                Err(_elapsed) => {
                    // No event within the poll window; fall through to the
                    // drift-compensated sleep below.
                }
            }

            let elapsed = t0.elapsed().as_millis() as i64;
            if elapsed < 1000 {
                let sleep_ms = (999 - elapsed).max(0) as u64;
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                adjustment = (adjustment - 2).max(0);
            } else {
                adjustment += elapsed - 1000;
            }

            if self.data_available.load(Ordering::SeqCst) {
                self.dispatcher.dispatch(tick).await;
                tick += 1;
            }

            if !parent_dir_accessible(&self.parent) {
                tracing::error!("parent directory no longer accessible; stopping");
                self.stop_internal();
                break;
            }
        }
    }

    async fn handle_watch_event(
        &self,
        event: notify::Event,
        ingest_tx: &mpsc::UnboundedSender<IngestJob>,
    ) {
        let tailer = self.tailer.lock().await;
        let matches = event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| tailer.file_matches(n)));
        drop(tailer);
        if !matches {
            return;
        }

        match event.kind {
            notify::EventKind::Create(_) => {
                let _ = ingest_tx.send(IngestJob::Create);
            }
            notify::EventKind::Remove(_) => {
                self.cache.full_evict().await;
                self.tailer.lock().await.move_to_start();
                self.data_available.store(false, Ordering::SeqCst);
            }
            notify::EventKind::Modify(_) => {
                let _ = ingest_tx.send(IngestJob::Modify);
            }
            other => {
                tracing::debug!(?other, "ignoring unrecognized watch event kind");
            }
        }
    }

    /// Invoked from inside the tick loop itself when it detects a
    /// condition (watch closed, parent directory lost) that must stop the
    /// whole system. Marks the state machine stopped and abandons the
    /// ingestion/dispatch workers (daemon semantics, spec §4.D "Shutdown")
    /// without trying to join the very task calling this.
    fn stop_internal(&self) {
        *self.state.lock().unwrap() = State::Stopped;
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.handles.try_lock() {
            if let Some(handles) = guard.take() {
                handles.ingest.abort();
                handles.dispatch.abort();
                drop(handles._watcher);
            }
        }
    }
}

async fn run_ingest_worker<E: TimestampedEvent, P: LineParser<E>>(
    tailer: Arc<AsyncMutex<FileTailer<E, P>>>,
    cache: EventCache<E>,
    data_available: Arc<AtomicBool>,
    mut rx: mpsc::UnboundedReceiver<IngestJob>,
) {
    while let Some(job) = rx.recv().await {
        let mut tailer = tailer.lock().await;
        match job {
            IngestJob::Create => {
                cache.full_evict().await;
                tailer.move_to_start();
                match tailer.fetch_available_lines() {
                    Ok(events) => {
                        cache.add_all(events).await;
                        if !cache.is_empty().await {
                            data_available.store(true, Ordering::SeqCst);
                        }
                    }
                    Err(err) => tracing::error!(%err, "ingestion after CREATE failed"),
                }
            }
            IngestJob::Modify => match tailer.fetch_available_lines() {
                Ok(events) => {
                    if !events.is_empty() {
                        cache.add_all(events).await;
                    }
                    if !cache.is_empty().await {
                        data_available.store(true, Ordering::SeqCst);
                    }
                }
                Err(err) => tracing::error!(%err, "ingestion after MODIFY failed"),
            },
        }
    }
}

/// One of: does not exist, is not a directory, is not readable, is not
/// executable — all collapse to "can't list it" (spec §4.D step 6).
fn parent_dir_accessible(path: &std::path::Path) -> bool {
    std::fs::read_dir(path).is_ok()
}
