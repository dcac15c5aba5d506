use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use pipeline::ChannelId;
use tracing::{debug, info};

/// Turns filesystem writes to the channel source files into edit events.
///
/// The notify debouncer only coalesces filesystem noise (editors tend to
/// emit several events per save); the pipeline's own quiet-period scheduler
/// still applies on top of this.
pub struct SourceWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<PathBuf>,
    visual: PathBuf,
    sound: Option<PathBuf>,
}

impl SourceWatcher {
    pub fn new(visual: &Path, sound: Option<&Path>) -> Result<Self> {
        let (tx, rx): (Sender<PathBuf>, Receiver<PathBuf>) = crossbeam_channel::unbounded();

        let mut debouncer = new_debouncer(
            std::time::Duration::from_millis(100),
            move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                if let Ok(events) = res {
                    for event in events {
                        if event.kind == DebouncedEventKind::Any {
                            let _ = tx.send(event.path);
                        }
                    }
                }
            },
        )
        .context("failed to create file watcher")?;

        // Watch the parent directories so editors that replace the file on
        // save (write-to-temp-then-rename) are still observed.
        let mut watched = BTreeSet::new();
        for path in std::iter::once(visual).chain(sound) {
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            if watched.insert(dir.clone()) {
                debouncer
                    .watcher()
                    .watch(&dir, notify::RecursiveMode::NonRecursive)
                    .with_context(|| format!("failed to watch {}", dir.display()))?;
            }
        }
        info!(
            visual = %visual.display(),
            sound = ?sound.map(|path| path.display().to_string()),
            "watching channel sources"
        );

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
            visual: visual.to_path_buf(),
            sound: sound.map(Path::to_path_buf),
        })
    }

    /// Drains pending filesystem events into deduplicated channel edits.
    pub fn drain_changes(&self) -> Vec<ChannelId> {
        let mut channels = Vec::new();
        while let Ok(path) = self.receiver.try_recv() {
            let channel = if same_file(&path, &self.visual) {
                Some(ChannelId::Visual)
            } else if self.sound.as_deref().is_some_and(|sound| same_file(&path, sound)) {
                Some(ChannelId::Audio)
            } else {
                debug!(path = %path.display(), "ignoring change to unrelated file");
                None
            };
            if let Some(channel) = channel {
                if !channels.contains(&channel) {
                    channels.push(channel);
                }
            }
        }
        channels
    }
}

fn same_file(event_path: &Path, target: &Path) -> bool {
    event_path.file_name() == target.file_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    #[test]
    fn reports_edits_to_watched_channels() {
        let dir = tempfile::tempdir().unwrap();
        let visual = dir.path().join("scene.frag");
        let sound = dir.path().join("tone.frag");
        fs::write(&visual, "void main() {}").unwrap();
        fs::write(&sound, "vec2 mainSound(float t) { return vec2(0.0); }").unwrap();

        let watcher = SourceWatcher::new(&visual, Some(&sound)).unwrap();
        fs::write(&visual, "void main() { gl_FragColor = vec4(1.0); }").unwrap();

        // The debouncer flushes after its 100 ms window; poll with a bound.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen = watcher.drain_changes();
            if !seen.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        assert_eq!(seen, vec![ChannelId::Visual]);
    }
}
