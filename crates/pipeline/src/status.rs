use renderer::{BuildReport, BuildStatus};
use tracing::debug;

use crate::ChannelId;

/// Last-known build outcome per channel and the export-ready predicate.
///
/// Reports overwrite the stored status (last-write-wins, no history).
/// Export readiness is a conjunction over the *active* channels, so callers
/// must re-read it after every report from either channel: the audio
/// channel failing after the visual one succeeded retroactively disables
/// export without any new visual edit.
#[derive(Debug)]
pub struct BuildTracker {
    reports: [BuildReport; 2],
    audio_enabled: bool,
}

impl BuildTracker {
    pub fn new() -> Self {
        Self {
            reports: [BuildReport::ready("ready"), BuildReport::ready("ready")],
            audio_enabled: false,
        }
    }

    /// Stores the outcome of a compile attempt for `channel`.
    pub fn report(&mut self, channel: ChannelId, report: BuildReport) {
        debug!(%channel, status = ?report.status, "build report");
        self.reports[channel.index()] = report;
    }

    pub fn status(&self, channel: ChannelId) -> &BuildReport {
        &self.reports[channel.index()]
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// True when every active channel last reported `Ready`.
    ///
    /// A `Warning` still renders but blocks export and link sharing.
    pub fn is_export_ready(&self) -> bool {
        let visual_ready =
            self.reports[ChannelId::Visual.index()].status == BuildStatus::Ready;
        let audio_ready = !self.audio_enabled
            || self.reports[ChannelId::Audio.index()].status == BuildStatus::Ready;
        visual_ready && audio_ready
    }
}

impl Default for BuildTracker {
    fn default() -> Self {
        Self::new()
    }
}
