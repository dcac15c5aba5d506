use std::time::{Duration, Instant};

use renderer::BuildReport;
use tracing::info;

use crate::debounce::CompileScheduler;
use crate::link::SharedSession;
use crate::status::BuildTracker;
use crate::ChannelId;

/// UI-affecting flags with no algorithmic weight of their own.
///
/// They exist so the rest of the machine has one owner per flag instead of
/// ambient globals; `edited` marks unsaved changes since the last load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub layer_hidden: bool,
    pub overlay: bool,
    pub fullscreen: bool,
    pub vim_mode: bool,
    pub sync_scroll: bool,
    pub font_size: i32,
    pub edited: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            layer_hidden: false,
            overlay: false,
            fullscreen: false,
            vim_mode: false,
            sync_scroll: false,
            font_size: 17,
            edited: false,
        }
    }
}

impl ViewState {
    pub fn toggle_overlay(&mut self) {
        self.overlay = !self.overlay;
    }

    pub fn toggle_vim_mode(&mut self) {
        self.vim_mode = !self.vim_mode;
    }

    pub fn bump_font_size(&mut self, delta: i32) {
        self.font_size = (self.font_size + delta).max(1);
    }
}

/// The one explicit session object owning the editing state.
///
/// A session holds both channel sources, the debounce scheduler, and the
/// build tracker; the capture coordinator stays outside and owns only the
/// encoding flag. All methods take an explicit `now` so the host loop (and
/// the tests) control time.
pub struct Session {
    sources: [String; 2],
    scheduler: CompileScheduler,
    tracker: BuildTracker,
    pub view: ViewState,
}

impl Session {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            sources: [String::new(), String::new()],
            scheduler: CompileScheduler::new(quiet_period),
            tracker: BuildTracker::new(),
            view: ViewState::default(),
        }
    }

    pub fn source(&self, channel: ChannelId) -> &str {
        &self.sources[channel.index()]
    }

    /// Seeds a channel without arming the debounce timer (initial load,
    /// link restore).
    pub fn load_source(&mut self, channel: ChannelId, source: impl Into<String>) {
        self.sources[channel.index()] = source.into();
    }

    /// Records a keystroke-level change: stores the full new text and
    /// restarts the channel's quiet-period timer.
    pub fn apply_edit(&mut self, channel: ChannelId, source: impl Into<String>, now: Instant) {
        self.sources[channel.index()] = source.into();
        self.scheduler.mark_edit(channel, now);
        self.view.edited = true;
    }

    /// Channels whose quiet period elapsed, paired with the source text
    /// current at fire time (never a diff).
    pub fn due_compiles(&mut self, now: Instant) -> Vec<(ChannelId, String)> {
        self.scheduler
            .due(now)
            .into_iter()
            .map(|channel| (channel, self.sources[channel.index()].clone()))
            .collect()
    }

    pub fn has_pending_compile(&self, channel: ChannelId) -> bool {
        self.scheduler.has_pending(channel)
    }

    /// Stores a renderer build report and returns the recomputed export
    /// gate. The gate must be consumed on every report from either channel:
    /// an audio failure after a visual success disables export without any
    /// new visual edit.
    pub fn record_report(&mut self, channel: ChannelId, report: BuildReport) -> bool {
        let was_ready = self.tracker.is_export_ready();
        self.tracker.report(channel, report);
        let ready = self.tracker.is_export_ready();
        if ready != was_ready {
            info!(export_ready = ready, "export gating changed");
        }
        ready
    }

    pub fn report(&self, channel: ChannelId) -> &BuildReport {
        self.tracker.status(channel)
    }

    pub fn export_ready(&self) -> bool {
        self.tracker.is_export_ready()
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.tracker.set_audio_enabled(enabled);
    }

    pub fn sound_enabled(&self) -> bool {
        self.tracker.audio_enabled()
    }

    /// Rebuilds channel contents and audio enablement from a decoded share
    /// link.
    pub fn restore(&mut self, shared: &SharedSession) {
        self.load_source(ChannelId::Visual, shared.source.clone());
        if let Some(sound_source) = &shared.sound_source {
            self.load_source(ChannelId::Audio, sound_source.clone());
        }
        self.set_sound_enabled(shared.sound);
        self.view.edited = false;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(crate::debounce::DEFAULT_QUIET_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::BuildStatus;

    #[test]
    fn edit_then_quiet_period_yields_latest_source() {
        let mut session = Session::default();
        let start = Instant::now();

        session.apply_edit(ChannelId::Visual, "void main() {}", start);
        session.apply_edit(
            ChannelId::Visual,
            "void main() { gl_FragColor = vec4(1.0); }",
            start + Duration::from_millis(300),
        );

        assert!(session
            .due_compiles(start + Duration::from_millis(1200))
            .is_empty());
        let due = session.due_compiles(start + Duration::from_millis(1400));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, ChannelId::Visual);
        assert_eq!(due[0].1, "void main() { gl_FragColor = vec4(1.0); }");
        assert!(session.view.edited);
    }

    #[test]
    fn audio_error_retroactively_closes_export_gate() {
        let mut session = Session::default();
        session.set_sound_enabled(true);

        assert!(session.record_report(ChannelId::Visual, BuildReport::ready("ready")));
        assert!(session.record_report(ChannelId::Audio, BuildReport::ready("ready")));
        assert!(session.export_ready());

        assert!(!session.record_report(
            ChannelId::Audio,
            BuildReport::error("undefined identifier")
        ));
        assert!(!session.export_ready());
        assert_eq!(
            session.report(ChannelId::Audio).status,
            BuildStatus::Error
        );
    }

    #[test]
    fn load_source_does_not_arm_the_debounce() {
        let mut session = Session::default();
        session.load_source(ChannelId::Visual, "void main() {}");
        assert!(!session.has_pending_compile(ChannelId::Visual));
        assert!(session
            .due_compiles(Instant::now() + Duration::from_secs(10))
            .is_empty());
        assert!(!session.view.edited);
    }

    #[test]
    fn view_state_toggles() {
        let mut view = ViewState::default();
        view.toggle_overlay();
        assert!(view.overlay);
        view.toggle_vim_mode();
        assert!(view.vim_mode);
        view.bump_font_size(2);
        assert_eq!(view.font_size, 19);
        view.bump_font_size(-100);
        assert_eq!(view.font_size, 1);
    }
}
