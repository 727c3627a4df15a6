/// The core's only requirement on an event: a stable UTC millisecond
/// timestamp and cheap shared-ownership semantics. Everything else about the
/// event (fields, format) belongs to the collaborating parser and schedules,
/// which the core never inspects (spec §3, "Event").
pub trait TimestampedEvent: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch, UTC.
    fn timestamp_millis(&self) -> i64;
}
