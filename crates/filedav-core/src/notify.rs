use std::fmt;
use std::sync::Mutex;

/// Lifecycle signals emitted around a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Create,
    Update,
    Write,
    PostCreate,
    PostUpdate,
    PostWrite,
}

impl Signal {
    /// Pre-commit signals; observers may veto these.
    pub fn is_pre(self) -> bool {
        matches!(self, Signal::Create | Signal::Update | Signal::Write)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Create => "create",
            Signal::Update => "update",
            Signal::Write => "write",
            Signal::PostCreate => "post_create",
            Signal::PostUpdate => "post_update",
            Signal::PostWrite => "post_write",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Veto,
}

/// Observer of upload lifecycle signals, called synchronously.
///
/// A [`HookOutcome::Veto`] returned for a pre-commit signal aborts the PUT;
/// it is ignored for post-commit signals.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, signal: Signal, path: &str) -> HookOutcome;
}

/// Sink that observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _signal: Signal, _path: &str) -> HookOutcome {
        HookOutcome::Continue
    }
}

/// Sink that records every signal, optionally vetoing one of them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Signal, String)>>,
    veto: Option<Signal>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vetoing(signal: Signal) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            veto: Some(signal),
        }
    }

    pub fn events(&self) -> Vec<(Signal, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.events().into_iter().map(|(signal, _)| signal).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&self, signal: Signal, path: &str) -> HookOutcome {
        if let Ok(mut events) = self.events.lock() {
            events.push((signal, path.to_string()));
        }
        if self.veto == Some(signal) {
            HookOutcome::Veto
        } else {
            HookOutcome::Continue
        }
    }
}
