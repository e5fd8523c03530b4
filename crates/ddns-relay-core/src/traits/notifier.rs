// # Notifier Trait
//
// Receives the human-readable summary of each completed drain, and lock
// watchdog alerts.
//
// ## Implementations
//
// - Log: `LogNotifier` (this module)
// - Webhook: `ddns-relay-webhook` crate

/// Trait for notifier implementations
///
/// Notification is fire-and-forget and best-effort: `notify` must return
/// promptly and must never fail the caller. Implementations that do I/O hand
/// the message off to a background task and only log delivery errors.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that writes messages to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::info!("drain summary:\n{}", message);
    }
}
