use std::time::{Duration, Instant};

use crate::ChannelId;

/// Quiet period used when no override is configured.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1000);

/// Coalesces keystroke-level edit events into one recompile per burst.
///
/// Each channel owns at most one pending deadline. Marking an edit while a
/// deadline is pending replaces it, so a channel recompiles exactly once,
/// one quiet period after the *last* edit of a burst. Channels debounce
/// independently and the scheduler never blocks on renderer completion; it
/// is a pure timing gate and raises no errors.
#[derive(Debug)]
pub struct CompileScheduler {
    quiet_period: Duration,
    deadlines: [Option<Instant>; 2],
}

impl CompileScheduler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadlines: [None, None],
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Records an edit on `channel`, restarting its quiet-period timer.
    pub fn mark_edit(&mut self, channel: ChannelId, now: Instant) {
        self.deadlines[channel.index()] = Some(now + self.quiet_period);
    }

    /// Whether a recompile is pending for `channel`.
    pub fn has_pending(&self, channel: ChannelId) -> bool {
        self.deadlines[channel.index()].is_some()
    }

    /// Returns the channels whose quiet period has elapsed and clears them.
    pub fn due(&mut self, now: Instant) -> Vec<ChannelId> {
        let mut fired = Vec::new();
        for channel in ChannelId::ALL {
            if let Some(deadline) = self.deadlines[channel.index()] {
                if now >= deadline {
                    self.deadlines[channel.index()] = None;
                    fired.push(channel);
                }
            }
        }
        fired
    }
}

impl Default for CompileScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_edits_fires_once_after_last_edit() {
        let mut scheduler = CompileScheduler::default();
        let start = Instant::now();

        for i in 0..5 {
            scheduler.mark_edit(ChannelId::Visual, start + Duration::from_millis(i * 100));
        }

        // One quiet period after the *first* edit nothing fires; the last
        // edit restarted the timer.
        assert!(scheduler
            .due(start + Duration::from_millis(1000))
            .is_empty());
        let fired = scheduler.due(start + Duration::from_millis(1400));
        assert_eq!(fired, vec![ChannelId::Visual]);
        assert!(!scheduler.has_pending(ChannelId::Visual));
    }

    #[test]
    fn channels_debounce_independently() {
        let mut scheduler = CompileScheduler::new(Duration::from_millis(500));
        let start = Instant::now();

        scheduler.mark_edit(ChannelId::Visual, start);
        scheduler.mark_edit(ChannelId::Audio, start + Duration::from_millis(400));

        let fired = scheduler.due(start + Duration::from_millis(500));
        assert_eq!(fired, vec![ChannelId::Visual]);
        assert!(scheduler.has_pending(ChannelId::Audio));

        let fired = scheduler.due(start + Duration::from_millis(900));
        assert_eq!(fired, vec![ChannelId::Audio]);
    }

    #[test]
    fn fired_deadline_does_not_repeat() {
        let mut scheduler = CompileScheduler::default();
        let start = Instant::now();
        scheduler.mark_edit(ChannelId::Visual, start);

        assert_eq!(
            scheduler.due(start + Duration::from_secs(2)),
            vec![ChannelId::Visual]
        );
        assert!(scheduler.due(start + Duration::from_secs(3)).is_empty());
    }
}
