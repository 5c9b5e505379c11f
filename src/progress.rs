//! Engine → caller event stream and the CLI's progress rendering.
//!
//! The engine never owns counters the caller reads; it returns summaries and
//! streams [`EngineEvent`]s through an optional channel. Without a channel,
//! events are logged directly.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::sync::error::ErrorKind;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Number of work items in the pass that just started.
    PassStarted { total: u64 },
    FileStarted { path: String },
    /// `parts` is `None` for a direct upload.
    FileUploaded { path: String, parts: Option<u32> },
    FileUnchanged { path: String },
    FileFailed {
        path: String,
        kind: ErrorKind,
        message: String,
    },
    PartProgress { path: String, done: u32, total: u32 },
    Reconstructed { path: String, bytes: u64 },
    /// A plain remote file pulled to the local mirror.
    Downloaded { path: String, bytes: u64 },
    /// Reconstruction or download skipped because the destination exists.
    Skipped { path: String },
    Log { level: tracing::Level, message: String },
}

impl EngineEvent {
    /// Whether this event completes one work item.
    fn completes_item(&self) -> bool {
        matches!(
            self,
            EngineEvent::FileUploaded { .. }
                | EngineEvent::FileUnchanged { .. }
                | EngineEvent::FileFailed { .. }
                | EngineEvent::Reconstructed { .. }
                | EngineEvent::Downloaded { .. }
                | EngineEvent::Skipped { .. }
        )
    }

    pub fn log(&self) {
        match self {
            EngineEvent::PassStarted { total } => tracing::debug!(total, "Pass started"),
            EngineEvent::FileStarted { path } => tracing::debug!(%path, "Started"),
            EngineEvent::FileUploaded { path, parts: None } => {
                tracing::info!(%path, "Uploaded")
            }
            EngineEvent::FileUploaded {
                path,
                parts: Some(n),
            } => tracing::info!(%path, parts = n, "Uploaded in parts"),
            EngineEvent::FileUnchanged { path } => tracing::debug!(%path, "Unchanged"),
            EngineEvent::FileFailed {
                path,
                kind,
                message,
            } => tracing::error!(%path, %kind, "{message}"),
            EngineEvent::PartProgress { path, done, total } => {
                tracing::trace!(%path, done, total, "Part transferred")
            }
            EngineEvent::Reconstructed { path, bytes } => {
                tracing::info!(%path, bytes, "Reconstructed")
            }
            EngineEvent::Downloaded { path, bytes } => {
                tracing::info!(%path, bytes, "Downloaded")
            }
            EngineEvent::Skipped { path } => {
                tracing::info!(%path, "Destination exists, skipped")
            }
            EngineEvent::Log { level, message } => {
                if *level == tracing::Level::ERROR {
                    tracing::error!("{message}")
                } else if *level == tracing::Level::WARN {
                    tracing::warn!("{message}")
                } else if *level == tracing::Level::INFO {
                    tracing::info!("{message}")
                } else if *level == tracing::Level::DEBUG {
                    tracing::debug!("{message}")
                } else {
                    tracing::trace!("{message}")
                }
            }
        }
    }
}

/// Cloneable sink handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct Events(Option<UnboundedSender<EngineEvent>>);

impl Events {
    pub fn channel() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self(Some(tx)), rx)
    }

    /// Log-only sink.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: EngineEvent) {
        match &self.0 {
            // A dropped receiver means the caller stopped listening.
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => event.log(),
        }
    }

    pub fn log(&self, level: tracing::Level, message: impl Into<String>) {
        self.emit(EngineEvent::Log {
            level,
            message: message.into(),
        });
    }
}

pub fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

/// Drain events into `pb` until every sender is dropped. Log lines are
/// printed with the bar suspended so they don't tear it.
pub fn spawn_renderer(
    mut rx: UnboundedReceiver<EngineEvent>,
    pb: ProgressBar,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                EngineEvent::PassStarted { total } => {
                    pb.set_length(*total);
                    pb.set_position(0);
                }
                EngineEvent::PartProgress { path, done, total } => {
                    pb.set_message(format!("{path} {done}/{total}"));
                }
                _ => {}
            }
            if event.completes_item() {
                pb.inc(1);
            }
            if !matches!(
                event,
                EngineEvent::PassStarted { .. } | EngineEvent::PartProgress { .. }
            ) {
                pb.suspend(|| event.log());
            }
        }
        pb.finish_and_clear();
    })
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {mins:02}m {secs:02}s")
    } else if mins > 0 {
        format!("{mins}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}
