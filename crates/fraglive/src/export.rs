use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use pipeline::{
    CaptureCoordinator, ChannelId, ExportFormat, ExportParams, Session, StepOutcome,
};
use renderer::{
    compile_report, BuildReport, BuildStatus, CompileTicket, OffscreenOptions, OffscreenRenderer,
    RendererHandle, ShaderKind,
};
use tracing::{info, warn};

use crate::cli::ExportArgs;
use crate::config::SessionConfig;
use crate::encode;

pub fn run_export(args: ExportArgs) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("fraglive.toml"));
    let config = SessionConfig::load_or_default(&config_path)?;
    let params = resolve_params(&args, &config)?;

    let visual_source = fs::read_to_string(&args.shader)
        .with_context(|| format!("failed to read shader at {}", args.shader.display()))?;
    let sound_source = args
        .sound
        .as_ref()
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read sound source at {}", path.display()))
        })
        .transpose()?;

    // Every active channel must be build-ready before a capture may start.
    let mut session = Session::new(Duration::from_millis(config.quiet_ms));
    session.load_source(ChannelId::Visual, visual_source.clone());
    session.record_report(
        ChannelId::Visual,
        compile_report(ShaderKind::Visual, &visual_source),
    );
    if let Some(sound) = &sound_source {
        session.set_sound_enabled(true);
        session.load_source(ChannelId::Audio, sound.clone());
        session.record_report(ChannelId::Audio, compile_report(ShaderKind::Sound, sound));
    }
    if !session.export_ready() {
        for channel in ChannelId::ALL {
            let report = session.report(channel);
            if report.status != BuildStatus::Ready {
                warn!(%channel, "{}", report.message);
            }
        }
        bail!("export blocked: not every active channel is build-ready");
    }

    // The capture job owns an isolated renderer sized to the request; the
    // live view, if any, is never touched.
    let mut capture_renderer = OffscreenRenderer::new(OffscreenOptions {
        width: params.width,
        height: params.height,
        kind: ShaderKind::Visual,
    })?;
    let ticket = capture_renderer.compile(&visual_source);
    let report = wait_for_report(ticket, Duration::from_secs(30))?;
    if !report.is_usable() {
        bail!("capture renderer rejected the shader: {}", report.message);
    }

    let mut coordinator = CaptureCoordinator::new();
    coordinator
        .begin(
            params,
            Box::new(capture_renderer),
            encode::sink_for(params.format),
            &args.out_dir,
            Instant::now(),
        )
        .context("failed to start capture")?;

    // The stream recorder consumes frames in real time; frame-pull
    // captures run as fast as frames render.
    let pace = matches!(params.format, ExportFormat::Mp4)
        .then(|| Duration::from_secs_f32(1.0 / params.framerate.max(1) as f32));

    let mut last_logged: u8 = 0;
    loop {
        match coordinator.step(Instant::now()) {
            Ok(StepOutcome::Progress(percent)) => {
                if percent >= last_logged.saturating_add(10) {
                    info!(percent, "capture progress");
                    last_logged = percent;
                }
                if let Some(budget) = pace {
                    thread::sleep(budget);
                }
            }
            Ok(StepOutcome::Finished(artifact)) => {
                info!(frames = artifact.frames_encoded, "export complete");
                println!("{}", artifact.path.display());
                return Ok(());
            }
            Err(err) => return Err(err).context("capture failed"),
        }
    }
}

fn resolve_params(args: &ExportArgs, config: &SessionConfig) -> Result<ExportParams> {
    let format = match args.format {
        Some(format) => format,
        None => ExportFormat::parse(&config.export.format).with_context(|| {
            format!(
                "config export.format '{}' is not a known format",
                config.export.format
            )
        })?,
    };
    let params = ExportParams {
        format,
        frame_count: args.frames.unwrap_or(config.export.frames),
        width: args.width.unwrap_or(config.export.width),
        height: args.height.unwrap_or(config.export.height),
        framerate: args.framerate.unwrap_or(config.export.framerate),
        quality: args.quality.unwrap_or(config.export.quality),
        start_time: args.start_time.unwrap_or(config.export.start_time),
    };
    params.validate()?;
    Ok(params)
}

fn wait_for_report(mut ticket: CompileTicket, timeout: Duration) -> Result<BuildReport> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(report) = ticket.poll() {
            return Ok(report);
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for the capture shader to compile");
        }
        thread::sleep(Duration::from_millis(10));
    }
}
