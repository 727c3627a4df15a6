//! Tick-driven tailer/cache/dispatcher core for soft-real-time log
//! monitoring. A `Scheduler` ties a `FileTailer` to an `EventCache` and a
//! `ScheduleDispatcher`, then drives the three on a ~1s cadence.

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod tailer;

pub use cache::EventCache;
pub use dispatcher::{PeriodicSchedule, ScheduleDispatcher};
pub use error::{CoreError, Result};
pub use event::TimestampedEvent;
pub use scheduler::Scheduler;
pub use tailer::{FileTailer, LineParser, ParseError};
