use filedav_core::{HookOutcome, NotificationSink, Signal};
use log::{debug, info};

/// Notification sink that reports upload lifecycle signals to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&self, signal: Signal, path: &str) -> HookOutcome {
        if signal.is_pre() {
            debug!("hook {}: {}", signal, path);
        } else {
            info!("hook {}: {}", signal, path);
        }
        HookOutcome::Continue
    }
}
