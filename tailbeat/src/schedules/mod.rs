//! Concrete `PeriodicSchedule` collaborators (spec §6, §10.F). The
//! dispatcher in `tailbeat-core` knows nothing about either of these; it
//! only calls `execute` with a window of `ClfEvent`s.

pub mod general_stats;
pub mod traffic_gauge;

pub use general_stats::GeneralStatsSchedule;
pub use traffic_gauge::TrafficGaugeSchedule;
