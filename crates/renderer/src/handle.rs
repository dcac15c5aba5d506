use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::clock::TimeSample;

/// Outcome class of one compile attempt, mirrored into the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Ready,
    Warning,
    Error,
}

/// One compile attempt's outcome plus its human-readable diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub status: BuildStatus,
    pub message: String,
}

impl BuildReport {
    pub fn ready(message: impl Into<String>) -> Self {
        Self {
            status: BuildStatus::Ready,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: BuildStatus::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: BuildStatus::Error,
            message: message.into(),
        }
    }

    /// Whether the channel is usable (a warning still renders).
    pub fn is_usable(&self) -> bool {
        !matches!(self.status, BuildStatus::Error)
    }
}

/// Pixel payload of one rendered frame, tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// One-shot delivery of a [`BuildReport`] for a single compile attempt.
///
/// Compilation happens off-thread; the caller polls the ticket from its own
/// loop. Each ticket resolves exactly once.
pub struct CompileTicket {
    receiver: Option<Receiver<BuildReport>>,
}

impl CompileTicket {
    /// Creates a ticket plus the sender its worker reports through.
    pub fn pending() -> (Self, Sender<BuildReport>) {
        let (sender, receiver) = bounded(1);
        (
            Self {
                receiver: Some(receiver),
            },
            sender,
        )
    }

    /// Creates an already-resolved ticket for synchronous compile paths.
    pub fn immediate(report: BuildReport) -> Self {
        let (ticket, sender) = Self::pending();
        let _ = sender.send(report);
        ticket
    }

    /// Non-blocking poll; `Some` exactly once, then `None` forever.
    ///
    /// A worker that died before reporting resolves to an error report so
    /// the channel never shows a stale status.
    pub fn poll(&mut self) -> Option<BuildReport> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(report) => {
                self.receiver = None;
                Some(report)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.receiver = None;
                Some(BuildReport::error(
                    "compile worker exited before reporting a result",
                ))
            }
        }
    }

    /// Whether a report is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.receiver.is_some()
    }
}

/// The renderer capability consumed by the pipeline.
///
/// A handle is bound to one drawable surface and one virtual clock. The live
/// view and every capture job hold disjoint handles, which is what keeps an
/// export from disturbing the interactive render state.
pub trait RendererHandle {
    /// Starts an asynchronous recompile of the channel's full source text.
    fn compile(&mut self, source: &str) -> CompileTicket;

    /// Renders one live frame at the supplied time sample. No readback.
    fn render_frame(&mut self, sample: TimeSample) -> Result<()>;

    /// Renders one frame at the supplied virtual time and reads the pixels
    /// back. Deterministic for equal samples and equal compiled source.
    fn render_once(&mut self, sample: TimeSample) -> Result<Frame>;

    /// Updates the audio-reactive scalar fed to the shader.
    fn set_signal(&mut self, value: f32);

    /// Resizes the drawable surface.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Stops the handle; further render calls are no-ops or errors.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_resolves_once() {
        let (mut ticket, sender) = CompileTicket::pending();
        assert!(ticket.poll().is_none());
        sender.send(BuildReport::ready("ready")).unwrap();
        let report = ticket.poll().expect("resolved report");
        assert_eq!(report.status, BuildStatus::Ready);
        assert!(ticket.poll().is_none());
        assert!(!ticket.is_pending());
    }

    #[test]
    fn dropped_worker_resolves_to_error() {
        let (mut ticket, sender) = CompileTicket::pending();
        drop(sender);
        let report = ticket.poll().expect("error report");
        assert_eq!(report.status, BuildStatus::Error);
    }

    #[test]
    fn immediate_ticket_is_resolved() {
        let mut ticket = CompileTicket::immediate(BuildReport::warning("backbuffer unavailable"));
        assert_eq!(ticket.poll().unwrap().status, BuildStatus::Warning);
    }
}
