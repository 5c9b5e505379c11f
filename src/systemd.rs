//! sd_notify integration for watch mode under a `Type=notify` unit.
//!
//! Every call is a no-op when disabled or off Linux, so callers never need
//! `#[cfg]` of their own.

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Startup finished; the first pass is about to run.
    pub(crate) fn ready(&self) {
        self.send(Message::Ready);
    }

    pub(crate) fn stopping(&self) {
        self.send(Message::Stopping);
    }

    /// Human-readable status shown by `systemctl status`.
    pub(crate) fn status(&self, msg: &str) {
        self.send(Message::Status(msg));
    }

    /// Keepalive ping, sent once per pass.
    pub(crate) fn watchdog(&self) {
        self.send(Message::Watchdog);
    }

    fn send(&self, message: Message<'_>) {
        if !self.enabled {
            return;
        }
        message.notify();
    }
}

#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    Watchdog,
}

impl Message<'_> {
    #[cfg(target_os = "linux")]
    fn notify(self) {
        use sd_notify::NotifyState;
        let state = match self {
            Message::Ready => NotifyState::Ready,
            Message::Stopping => NotifyState::Stopping,
            Message::Status(msg) => NotifyState::Status(msg),
            Message::Watchdog => NotifyState::Watchdog,
        };
        if let Err(e) = sd_notify::notify(false, &[state]) {
            tracing::debug!(error = %e, message = ?self, "sd_notify failed");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn notify(self) {}
}

/// One-line pass result for the unit's status field.
pub(crate) fn pass_status(mode: &str, done: u64, unchanged: u64, failed: u64) -> String {
    format!("Last {mode}: {done} transferred, {unchanged} unchanged, {failed} failed")
}
