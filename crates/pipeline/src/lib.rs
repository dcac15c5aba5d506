//! Live recompilation and deterministic capture pipeline.
//!
//! The crate holds the control loop of the fraglive editing surface: it
//! decides when edited source is recompiled, tracks build health per
//! channel, merges audio signal sources into the per-frame scalar fed to
//! the visual renderer, and drives isolated offscreen capture jobs to an
//! exported media file.
//!
//! ```text
//!   edit events ─▶ CompileScheduler ─▶ RendererHandle::compile
//!                                            │ BuildReport
//!                                            ▼
//!                       BuildTracker ─▶ export/link gating
//!
//!   export intent ─▶ CaptureCoordinator ─▶ offscreen RendererHandle
//!                                            │ frames
//!                                            ▼
//!                                     FrameEncoder / StreamRecorder
//! ```
//!
//! Everything is single-threaded and cooperative: components expose
//! `mark_*`/`due`/`step` methods taking an explicit `Instant` so the host
//! loop owns all scheduling and tests can drive time deterministically.

mod capture;
mod debounce;
mod link;
mod mixer;
mod session;
mod status;

pub use capture::{
    AnimatedDriver, Artifact, CaptureCoordinator, CaptureError, EncodeSpec, EncoderSink,
    ExportFormat, ExportParams, ExportPlan, FrameEncoder, StepOutcome, StillWriter, StreamRecorder,
    ValidationError,
};
pub use debounce::{CompileScheduler, DEFAULT_QUIET_PERIOD};
pub use link::{decode_session, encode_session, SharedSession, MODE_CLASSIC};
pub use mixer::{SignalMixer, SignalSource};
pub use session::{Session, ViewState};
pub use status::BuildTracker;

/// One of the two independently compiled program slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Visual,
    Audio,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::Visual, ChannelId::Audio];

    pub(crate) fn index(self) -> usize {
        match self {
            ChannelId::Visual => 0,
            ChannelId::Audio => 1,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Visual => f.write_str("visual"),
            ChannelId::Audio => f.write_str("audio"),
        }
    }
}
