use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use pipeline::{ChannelId, Session, SignalMixer};
use renderer::{
    BuildStatus, CompileTicket, OffscreenOptions, OffscreenRenderer, RendererHandle, ShaderKind,
    SystemTimeSource, TimeSource,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{FileAudioSource, LiveAudioSource};
use crate::cli::RunArgs;
use crate::config::SessionConfig;
use crate::defaults::{DEFAULT_SOUND_SOURCE, DEFAULT_VISUAL_SOURCE};
use crate::watch::SourceWatcher;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Sound shaders render into the packed-PCM strip, not the display surface.
const SOUND_SURFACE: (u32, u32) = (512, 16);

pub fn run(args: RunArgs) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("fraglive.toml"));
    let config = SessionConfig::load_or_default(&config_path)?;

    let quiet = Duration::from_millis(args.quiet_ms.unwrap_or(config.quiet_ms));
    let (width, height) = args.size.unwrap_or((1280, 720));

    let visual_source = match &args.shader {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read shader at {}", path.display()))?,
        None => DEFAULT_VISUAL_SOURCE.to_string(),
    };
    let sound_enabled = args.sound.is_some() || config.sound_enabled;
    let sound_source = match &args.sound {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read sound source at {}", path.display()))?,
        ),
        None => sound_enabled.then(|| DEFAULT_SOUND_SOURCE.to_string()),
    };

    let mut session = Session::new(quiet);
    session.load_source(ChannelId::Visual, visual_source);
    session.set_sound_enabled(sound_enabled);
    if let Some(sound) = sound_source {
        session.load_source(ChannelId::Audio, sound);
    }

    let mut visual = OffscreenRenderer::new(OffscreenOptions {
        width,
        height,
        kind: ShaderKind::Visual,
    })?;
    let mut audio = if sound_enabled {
        Some(OffscreenRenderer::new(OffscreenOptions {
            width: SOUND_SURFACE.0,
            height: SOUND_SURFACE.1,
            kind: ShaderKind::Sound,
        })?)
    } else {
        None
    };

    // Compile both active channels up front; edits recompile via debounce.
    let mut tickets: [Option<CompileTicket>; 2] = [
        Some(visual.compile(session.source(ChannelId::Visual))),
        audio
            .as_mut()
            .map(|handle| handle.compile(session.source(ChannelId::Audio))),
    ];

    let watcher = args
        .shader
        .as_ref()
        .map(|shader| SourceWatcher::new(shader, args.sound.as_deref()))
        .transpose()?;

    let mut mixer = SignalMixer::new();
    if let Some(path) = &args.audio_file {
        mixer.add_source(Box::new(FileAudioSource::open(path)?));
    }
    if args.live_audio {
        match LiveAudioSource::new() {
            Ok(source) => mixer.add_source(Box::new(source)),
            Err(err) => warn!(error = %err, "live audio unavailable; continuing without it"),
        }
    }

    let frame_budget = match args.fps {
        Some(fps) if fps > 0.0 => Some(Duration::from_secs_f32(1.0 / fps)),
        Some(_) => None,
        None => Some(Duration::from_secs_f32(1.0 / 60.0)),
    };

    let mut clock = SystemTimeSource::new();
    let mut frames_rendered: u64 = 0;
    info!(width, height, sound = sound_enabled, "session running");

    loop {
        let now = Instant::now();

        if let Some(watcher) = &watcher {
            for channel in watcher.drain_changes() {
                let path = match channel {
                    ChannelId::Visual => args.shader.as_ref(),
                    ChannelId::Audio => args.sound.as_ref(),
                };
                let Some(path) = path else { continue };
                match fs::read_to_string(path) {
                    Ok(text) => session.apply_edit(channel, text, now),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to re-read edited source");
                    }
                }
            }
        }

        for (channel, source) in session.due_compiles(now) {
            debug!(%channel, "quiet period elapsed; recompiling");
            let ticket = match channel {
                ChannelId::Visual => Some(visual.compile(&source)),
                ChannelId::Audio => audio.as_mut().map(|handle| handle.compile(&source)),
            };
            if ticket.is_some() {
                tickets[index_of(channel)] = ticket;
            }
        }

        for channel in ChannelId::ALL {
            let slot = &mut tickets[index_of(channel)];
            if let Some(ticket) = slot {
                if let Some(report) = ticket.poll() {
                    match report.status {
                        BuildStatus::Ready => info!(%channel, "{}", report.message),
                        BuildStatus::Warning => warn!(%channel, "{}", report.message),
                        BuildStatus::Error => warn!(%channel, "build failed: {}", report.message),
                    }
                    session.record_report(channel, report);
                    *slot = None;
                }
            }
        }

        // Mix once per live frame; a zero total leaves the renderer's
        // current signal value untouched.
        if let Some(total) = mixer.sample() {
            visual.set_signal(total);
        }

        let sample = clock.sample();
        visual.render_frame(sample)?;
        if let Some(handle) = &mut audio {
            handle.render_frame(sample)?;
        }
        frames_rendered += 1;

        if args.frames.is_some_and(|limit| frames_rendered >= limit) {
            info!(frames_rendered, "frame limit reached; exiting");
            return Ok(());
        }
        if let Some(budget) = frame_budget {
            let spent = now.elapsed();
            if spent < budget {
                thread::sleep(budget - spent);
            }
        }
    }
}

fn index_of(channel: ChannelId) -> usize {
    match channel {
        ChannelId::Visual => 0,
        ChannelId::Audio => 1,
    }
}
