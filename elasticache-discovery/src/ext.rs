use tracing_subscriber::fmt::time::LocalTime;

/// Installs a pretty `tracing` subscriber with local RFC 3339 timestamps.
/// Panics if a global subscriber is already set.
pub fn init_logger(level: tracing::Level) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .pretty();
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_max_level(level)
        .init();
}
