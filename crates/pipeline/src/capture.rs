use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;
use renderer::{Frame, RendererHandle, SteppedTimeSource, TimeSample, TimeSource};
use tracing::{debug, info, warn};

/// Media container produced by one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Gif,
    Webm,
    Mp4,
    Png,
    Jpg,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gif" => Some(Self::Gif),
            "webm" => Some(Self::Webm),
            "mp4" => Some(Self::Mp4),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }

    pub fn is_animated(self) -> bool {
        matches!(self, Self::Gif | Self::Webm | Self::Mp4)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Driving mechanism of an animated export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedDriver {
    /// Push each rendered frame explicitly; stop at the requested count.
    FramePull,
    /// Continuous recorder bound to the surface; stop when the computed
    /// recording duration elapses. Under scheduling jitter the encoded
    /// frame count may diverge from the requested one, unlike the
    /// frame-counted path.
    Stream,
}

/// Export shape, selected exactly once at job creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPlan {
    Animated { driver: AnimatedDriver },
    Still,
}

impl ExportPlan {
    pub fn for_format(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Gif | ExportFormat::Webm => ExportPlan::Animated {
                driver: AnimatedDriver::FramePull,
            },
            ExportFormat::Mp4 => ExportPlan::Animated {
                driver: AnimatedDriver::Stream,
            },
            ExportFormat::Png | ExportFormat::Jpg => ExportPlan::Still,
        }
    }
}

/// Rejected export parameter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("frame count must be at least 1 (got {0})")]
    FrameCount(u32),
    #[error("resolution must be at least 1x1 (got {0}x{1})")]
    Resolution(u32, u32),
    #[error("framerate must be between 10 and 60 (got {0})")]
    Framerate(u32),
    #[error("quality must be between 0 and 100 (got {0})")]
    Quality(f32),
    #[error("start time must be a finite, non-negative number of seconds (got {0})")]
    StartTime(f32),
}

/// User-confirmed export configuration.
///
/// For still formats the frame count is implicitly one and the framerate is
/// irrelevant, but the declared bounds hold for every field regardless so a
/// malformed dialog never reaches the capture machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportParams {
    pub format: ExportFormat,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Normalized 0-100.
    pub quality: f32,
    /// Virtual-time offset of the first frame, in seconds.
    pub start_time: f32,
}

impl ExportParams {
    /// Checks every declared bound; any violation blocks the capture start.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.frame_count < 1 {
            return Err(ValidationError::FrameCount(self.frame_count));
        }
        if self.width < 1 || self.height < 1 {
            return Err(ValidationError::Resolution(self.width, self.height));
        }
        if !(10..=60).contains(&self.framerate) {
            return Err(ValidationError::Framerate(self.framerate));
        }
        if !self.quality.is_finite() || !(0.0..=100.0).contains(&self.quality) {
            return Err(ValidationError::Quality(self.quality));
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(ValidationError::StartTime(self.start_time));
        }
        Ok(())
    }

    /// Requested recording length of the animated paths.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.frame_count) / f64::from(self.framerate.max(1)))
    }
}

impl Default for ExportParams {
    /// Defaults used when nothing is configured.
    fn default() -> Self {
        Self {
            format: ExportFormat::Gif,
            frame_count: 180,
            width: 512,
            height: 256,
            framerate: 60,
            quality: 100.0,
            start_time: 0.0,
        }
    }
}

/// Everything an encoder needs to open its output.
#[derive(Debug, Clone)]
pub struct EncodeSpec {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub quality: f32,
}

/// Failure taxonomy of the capture machine.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A second export while one is active; callers treat this as a silent
    /// no-op rather than a surfaced error.
    #[error("an export is already in progress")]
    Busy,
    #[error("no capture in progress")]
    Idle,
    #[error(transparent)]
    InvalidParams(#[from] ValidationError),
    #[error("encoder sink does not match the {0} export plan")]
    SinkMismatch(ExportFormat),
    #[error("encoder error: {0}")]
    Encoder(String),
    #[error("stream recorder error: {0}")]
    Stream(String),
    #[error("capture renderer error: {0}")]
    Renderer(String),
}

/// Frame-pull encoder capability: each rendered frame is pushed explicitly
/// and the artifact is finalized once the frame counter stops the job.
pub trait FrameEncoder {
    fn begin(&mut self, spec: &EncodeSpec) -> Result<(), CaptureError>;
    fn push_frame(&mut self, frame: &Frame) -> Result<(), CaptureError>;
    fn finish(&mut self) -> Result<(), CaptureError>;
}

/// Stream recorder capability: started before rendering begins, fed
/// continuously, stopped by elapsed recording time.
pub trait StreamRecorder {
    fn start(&mut self, spec: &EncodeSpec) -> Result<(), CaptureError>;
    fn append_frame(&mut self, frame: &Frame) -> Result<(), CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Still-image writer capability for the png/jpg path.
pub trait StillWriter {
    fn write(&mut self, frame: &Frame, spec: &EncodeSpec) -> Result<(), CaptureError>;
}

/// The encoder handed to a job, matching its export plan.
pub enum EncoderSink {
    FramePull(Box<dyn FrameEncoder>),
    Stream(Box<dyn StreamRecorder>),
    Still(Box<dyn StillWriter>),
}

/// Finished export.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub frames_encoded: u32,
}

/// Result of driving the active job by one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Whole-percent progress, reported on every frame.
    Progress(u8),
    Finished(Artifact),
}

struct CaptureJob {
    params: ExportParams,
    plan: ExportPlan,
    spec: EncodeSpec,
    renderer: Box<dyn RendererHandle>,
    sink: EncoderSink,
    clock: SteppedTimeSource,
    frames_done: u32,
    started: Instant,
    last_progress: u8,
}

impl CaptureJob {
    fn step(&mut self, now: Instant) -> Result<StepOutcome, CaptureError> {
        match self.plan {
            ExportPlan::Still => self.step_still(),
            ExportPlan::Animated {
                driver: AnimatedDriver::FramePull,
            } => self.step_frame_pull(),
            ExportPlan::Animated {
                driver: AnimatedDriver::Stream,
            } => self.step_stream(now),
        }
    }

    fn step_still(&mut self) -> Result<StepOutcome, CaptureError> {
        let sample = TimeSample::new(self.params.start_time, 0);
        let frame = self.render(sample)?;
        let EncoderSink::Still(writer) = &mut self.sink else {
            return Err(CaptureError::SinkMismatch(self.params.format));
        };
        writer.write(&frame, &self.spec)?;
        self.frames_done = 1;
        self.renderer.stop();
        Ok(StepOutcome::Finished(self.artifact()))
    }

    fn step_frame_pull(&mut self) -> Result<StepOutcome, CaptureError> {
        // One discrete virtual-time step per captured frame; wall-clock
        // jitter between calls cannot change the sampled sequence.
        let sample = self.clock.sample();
        let frame = self.render(sample)?;
        let EncoderSink::FramePull(encoder) = &mut self.sink else {
            return Err(CaptureError::SinkMismatch(self.params.format));
        };
        encoder.push_frame(&frame)?;
        self.frames_done += 1;

        if self.frames_done >= self.params.frame_count {
            self.renderer.stop();
            encoder.finish()?;
            return Ok(StepOutcome::Finished(self.artifact()));
        }
        Ok(StepOutcome::Progress(self.record_progress(
            self.frames_done * 100 / self.params.frame_count,
        )))
    }

    fn step_stream(&mut self, now: Instant) -> Result<StepOutcome, CaptureError> {
        let elapsed = now.saturating_duration_since(self.started);
        let duration = self.params.duration();
        let EncoderSink::Stream(recorder) = &mut self.sink else {
            return Err(CaptureError::SinkMismatch(self.params.format));
        };

        if elapsed >= duration {
            self.renderer.stop();
            recorder.stop()?;
            return Ok(StepOutcome::Finished(self.artifact()));
        }

        let sample = TimeSample::new(
            self.params.start_time + elapsed.as_secs_f32(),
            u64::from(self.frames_done),
        );
        let frame = self
            .renderer
            .render_once(sample)
            .map_err(|err| CaptureError::Renderer(format!("{err:#}")))?;
        recorder.append_frame(&frame)?;
        self.frames_done += 1;

        let percent = (elapsed.as_secs_f64() / duration.as_secs_f64() * 100.0) as u8;
        Ok(StepOutcome::Progress(self.record_progress(
            u32::from(percent.min(99)),
        )))
    }

    fn render(&mut self, sample: TimeSample) -> Result<Frame, CaptureError> {
        self.renderer
            .render_once(sample)
            .map_err(|err| CaptureError::Renderer(format!("{err:#}")))
    }

    fn record_progress(&mut self, percent: u32) -> u8 {
        self.last_progress = percent.min(100) as u8;
        self.last_progress
    }

    fn artifact(&self) -> Artifact {
        Artifact {
            path: self.spec.path.clone(),
            format: self.params.format,
            frames_encoded: self.frames_done,
        }
    }
}

impl Drop for CaptureJob {
    fn drop(&mut self) {
        // Every exit path stops the isolated renderer with the job.
        self.renderer.stop();
    }
}

/// Orchestrates at most one capture job at a time.
///
/// The coordinator owns the `is_encoding` flag protecting the whole
/// machine: a second export intent while a job is active is rejected, not
/// queued, and every exit path (completion, encoder failure, cancel)
/// releases the job's renderer and clears the flag.
#[derive(Default)]
pub struct CaptureCoordinator {
    job: Option<CaptureJob>,
}

impl CaptureCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_encoding(&self) -> bool {
        self.job.is_some()
    }

    /// Progress of the active job, if any.
    pub fn progress(&self) -> Option<u8> {
        self.job.as_ref().map(|job| job.last_progress)
    }

    /// Destination of the active job, if any.
    pub fn active_path(&self) -> Option<&Path> {
        self.job.as_ref().map(|job| job.spec.path.as_path())
    }

    /// Validates the parameters and starts a job against the supplied
    /// isolated renderer and encoder.
    ///
    /// The stream recorder is started here, before the first frame renders;
    /// the frame-pull encoder opens its output here as well so an
    /// unwritable destination fails the transition instead of the first
    /// `step`.
    pub fn begin(
        &mut self,
        params: ExportParams,
        renderer: Box<dyn RendererHandle>,
        mut sink: EncoderSink,
        out_dir: &Path,
        now: Instant,
    ) -> Result<(), CaptureError> {
        if self.job.is_some() {
            return Err(CaptureError::Busy);
        }
        params.validate()?;

        let plan = ExportPlan::for_format(params.format);
        let spec = EncodeSpec {
            path: artifact_path(out_dir, params.format),
            width: params.width,
            height: params.height,
            framerate: params.framerate,
            quality: params.quality,
        };

        match (plan, &mut sink) {
            (ExportPlan::Animated { driver: AnimatedDriver::FramePull }, EncoderSink::FramePull(encoder)) => {
                encoder.begin(&spec)?;
            }
            (ExportPlan::Animated { driver: AnimatedDriver::Stream }, EncoderSink::Stream(recorder)) => {
                recorder.start(&spec)?;
            }
            (ExportPlan::Still, EncoderSink::Still(_)) => {}
            _ => return Err(CaptureError::SinkMismatch(params.format)),
        }

        info!(
            format = %params.format,
            frames = params.frame_count,
            width = params.width,
            height = params.height,
            path = %spec.path.display(),
            "starting capture"
        );

        self.job = Some(CaptureJob {
            clock: SteppedTimeSource::new(params.start_time, params.framerate),
            params,
            plan,
            spec,
            renderer,
            sink,
            frames_done: 0,
            started: now,
            last_progress: 0,
        });
        Ok(())
    }

    /// Drives the active job by one frame.
    ///
    /// On error the job is abandoned, its resources released, and the
    /// partial output removed; the coordinator is immediately ready for a
    /// fresh export.
    pub fn step(&mut self, now: Instant) -> Result<StepOutcome, CaptureError> {
        let Some(job) = self.job.as_mut() else {
            return Err(CaptureError::Idle);
        };

        match job.step(now) {
            Ok(StepOutcome::Finished(artifact)) => {
                info!(path = %artifact.path.display(), frames = artifact.frames_encoded, "capture finished");
                self.job = None;
                Ok(StepOutcome::Finished(artifact))
            }
            Ok(progress) => Ok(progress),
            Err(err) => {
                warn!(error = %err, "capture failed; releasing resources");
                if let Some(job) = self.job.take() {
                    remove_partial(&job.spec.path);
                }
                Err(err)
            }
        }
    }

    /// Stops the active job without producing an artifact.
    pub fn cancel(&mut self) {
        if let Some(job) = self.job.take() {
            remove_partial(&job.spec.path);
            info!(path = %job.spec.path.display(), "capture cancelled");
        }
    }
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %err, "could not remove partial artifact");
        }
    }
}

/// Synthesizes a unique, format-appropriate artifact destination.
fn artifact_path(out_dir: &Path, format: ExportFormat) -> PathBuf {
    out_dir.join(format!("{}.{}", uuid_stem(), format.extension()))
}

fn uuid_stem() -> String {
    let mut rng = rand::thread_rng();
    let mut stem = String::with_capacity(36);
    for c in "xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx".chars() {
        match c {
            'x' => {
                let digit: u32 = rng.gen_range(0..16);
                stem.push(char::from_digit(digit, 16).unwrap_or('0'));
            }
            'y' => {
                let digit: u32 = rng.gen_range(8..12);
                stem.push(char::from_digit(digit, 16).unwrap_or('8'));
            }
            other => stem.push(other),
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use renderer::CompileTicket;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RendererLog {
        samples: Vec<TimeSample>,
        stopped: bool,
    }

    struct FakeRenderer {
        log: Rc<RefCell<RendererLog>>,
    }

    impl FakeRenderer {
        fn new() -> (Self, Rc<RefCell<RendererLog>>) {
            let log = Rc::new(RefCell::new(RendererLog::default()));
            (Self { log: log.clone() }, log)
        }
    }

    impl RendererHandle for FakeRenderer {
        fn compile(&mut self, _source: &str) -> CompileTicket {
            CompileTicket::immediate(renderer::BuildReport::ready("ready"))
        }

        fn render_frame(&mut self, _sample: TimeSample) -> AnyResult<()> {
            Ok(())
        }

        fn render_once(&mut self, sample: TimeSample) -> AnyResult<Frame> {
            self.log.borrow_mut().samples.push(sample);
            Ok(Frame {
                width: 1,
                height: 1,
                rgba: vec![sample.frame_index as u8, 0, 0, 255],
            })
        }

        fn set_signal(&mut self, _value: f32) {}

        fn resize(&mut self, _width: u32, _height: u32) -> AnyResult<()> {
            Ok(())
        }

        fn stop(&mut self) {
            self.log.borrow_mut().stopped = true;
        }
    }

    #[derive(Default)]
    struct EncoderLog {
        begun: u32,
        pushed: u32,
        finished: u32,
        fail_on_push: Option<u32>,
    }

    struct FakeEncoder {
        log: Rc<RefCell<EncoderLog>>,
    }

    impl FakeEncoder {
        fn new() -> (Self, Rc<RefCell<EncoderLog>>) {
            let log = Rc::new(RefCell::new(EncoderLog::default()));
            (Self { log: log.clone() }, log)
        }
    }

    impl FrameEncoder for FakeEncoder {
        fn begin(&mut self, _spec: &EncodeSpec) -> Result<(), CaptureError> {
            self.log.borrow_mut().begun += 1;
            Ok(())
        }

        fn push_frame(&mut self, _frame: &Frame) -> Result<(), CaptureError> {
            let mut log = self.log.borrow_mut();
            if log.fail_on_push == Some(log.pushed) {
                return Err(CaptureError::Encoder("disk full".into()));
            }
            log.pushed += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), CaptureError> {
            self.log.borrow_mut().finished += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecorderLog {
        started: u32,
        appended: u32,
        stopped: u32,
    }

    struct FakeRecorder {
        log: Rc<RefCell<RecorderLog>>,
    }

    impl FakeRecorder {
        fn new() -> (Self, Rc<RefCell<RecorderLog>>) {
            let log = Rc::new(RefCell::new(RecorderLog::default()));
            (Self { log: log.clone() }, log)
        }
    }

    impl StreamRecorder for FakeRecorder {
        fn start(&mut self, _spec: &EncodeSpec) -> Result<(), CaptureError> {
            self.log.borrow_mut().started += 1;
            Ok(())
        }

        fn append_frame(&mut self, _frame: &Frame) -> Result<(), CaptureError> {
            self.log.borrow_mut().appended += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            self.log.borrow_mut().stopped += 1;
            Ok(())
        }
    }

    struct FakeStill {
        written: Rc<RefCell<u32>>,
    }

    impl StillWriter for FakeStill {
        fn write(&mut self, _frame: &Frame, _spec: &EncodeSpec) -> Result<(), CaptureError> {
            *self.written.borrow_mut() += 1;
            Ok(())
        }
    }

    fn gif_params(frame_count: u32) -> ExportParams {
        ExportParams {
            format: ExportFormat::Gif,
            frame_count,
            ..ExportParams::default()
        }
    }

    #[test]
    fn validation_table() {
        assert!(matches!(
            gif_params(0).validate(),
            Err(ValidationError::FrameCount(0))
        ));
        let accepted = ExportParams {
            format: ExportFormat::Gif,
            frame_count: 1,
            width: 100,
            height: 100,
            framerate: 60,
            quality: 100.0,
            start_time: 0.0,
        };
        assert!(accepted.validate().is_ok());
        assert!(matches!(
            ExportParams {
                framerate: 5,
                ..accepted
            }
            .validate(),
            Err(ValidationError::Framerate(5))
        ));
        assert!(matches!(
            ExportParams {
                quality: 150.0,
                ..accepted
            }
            .validate(),
            Err(ValidationError::Quality(_))
        ));
        assert!(matches!(
            ExportParams {
                width: 0,
                ..accepted
            }
            .validate(),
            Err(ValidationError::Resolution(0, 100))
        ));
        assert!(matches!(
            ExportParams {
                start_time: -1.0,
                ..accepted
            }
            .validate(),
            Err(ValidationError::StartTime(_))
        ));
    }

    #[test]
    fn invalid_params_never_start_a_job() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, _) = FakeRenderer::new();
        let (encoder, log) = FakeEncoder::new();
        let dir = tempfile::tempdir().unwrap();

        let err = coordinator
            .begin(
                gif_params(0),
                Box::new(renderer),
                EncoderSink::FramePull(Box::new(encoder)),
                dir.path(),
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidParams(_)));
        assert!(!coordinator.is_encoding());
        assert_eq!(log.borrow().begun, 0);
    }

    #[test]
    fn frame_pull_capture_pushes_exactly_frame_count_frames() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, render_log) = FakeRenderer::new();
        let (encoder, encoder_log) = FakeEncoder::new();
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        coordinator
            .begin(
                gif_params(3),
                Box::new(renderer),
                EncoderSink::FramePull(Box::new(encoder)),
                dir.path(),
                start,
            )
            .unwrap();
        assert!(coordinator.is_encoding());

        // Inject irregular wall-clock gaps between frame callbacks.
        let jitter = [7, 150, 33];
        let mut now = start;
        let mut finished = None;
        for gap in jitter {
            now += Duration::from_millis(gap);
            match coordinator.step(now).unwrap() {
                StepOutcome::Finished(artifact) => finished = Some(artifact),
                StepOutcome::Progress(_) => {}
            }
        }

        let artifact = finished.expect("three steps complete a 3-frame job");
        assert_eq!(artifact.frames_encoded, 3);
        assert_eq!(artifact.format, ExportFormat::Gif);
        assert_eq!(
            artifact.path.extension().and_then(|ext| ext.to_str()),
            Some("gif")
        );
        assert!(!coordinator.is_encoding());

        let encoder_log = encoder_log.borrow();
        assert_eq!(encoder_log.begun, 1);
        assert_eq!(encoder_log.pushed, 3);
        assert_eq!(encoder_log.finished, 1);

        // Virtual time is stepped, not wall-clock sampled.
        let samples: Vec<f32> = render_log
            .borrow()
            .samples
            .iter()
            .map(|sample| sample.seconds)
            .collect();
        assert_eq!(samples.len(), 3);
        for (index, seconds) in samples.iter().enumerate() {
            let expected = index as f32 / 60.0;
            assert!((seconds - expected).abs() < 1e-6);
        }
        assert!(render_log.borrow().stopped);
    }

    #[test]
    fn identical_parameters_sample_identical_virtual_times() {
        let run = |jitter: &[u64]| -> Vec<TimeSample> {
            let mut coordinator = CaptureCoordinator::new();
            let (renderer, render_log) = FakeRenderer::new();
            let (encoder, _) = FakeEncoder::new();
            let dir = tempfile::tempdir().unwrap();
            let mut now = Instant::now();
            coordinator
                .begin(
                    ExportParams {
                        start_time: 2.5,
                        ..gif_params(4)
                    },
                    Box::new(renderer),
                    EncoderSink::FramePull(Box::new(encoder)),
                    dir.path(),
                    now,
                )
                .unwrap();
            for gap in jitter {
                now += Duration::from_millis(*gap);
                coordinator.step(now).unwrap();
            }
            let samples = render_log.borrow().samples.clone();
            samples
        };

        let smooth = run(&[16, 16, 16, 16]);
        let jittery = run(&[1, 400, 3, 250]);
        assert_eq!(smooth, jittery);
        assert!((smooth[0].seconds - 2.5).abs() < 1e-6);
    }

    #[test]
    fn concurrent_capture_is_rejected_and_leaves_job_untouched() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, _) = FakeRenderer::new();
        let (encoder, encoder_log) = FakeEncoder::new();
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        coordinator
            .begin(
                gif_params(3),
                Box::new(renderer),
                EncoderSink::FramePull(Box::new(encoder)),
                dir.path(),
                start,
            )
            .unwrap();
        coordinator.step(start + Duration::from_millis(16)).unwrap();

        let (second_renderer, _) = FakeRenderer::new();
        let (second_encoder, second_log) = FakeEncoder::new();
        let err = coordinator
            .begin(
                gif_params(10),
                Box::new(second_renderer),
                EncoderSink::FramePull(Box::new(second_encoder)),
                dir.path(),
                start,
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::Busy));
        assert_eq!(second_log.borrow().begun, 0);

        // The original job continues to completion.
        coordinator.step(start + Duration::from_millis(32)).unwrap();
        let outcome = coordinator.step(start + Duration::from_millis(48)).unwrap();
        assert!(matches!(outcome, StepOutcome::Finished(_)));
        assert_eq!(encoder_log.borrow().pushed, 3);
    }

    #[test]
    fn encoder_failure_releases_everything() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, render_log) = FakeRenderer::new();
        let (encoder, encoder_log) = FakeEncoder::new();
        encoder_log.borrow_mut().fail_on_push = Some(1);
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        coordinator
            .begin(
                gif_params(10),
                Box::new(renderer),
                EncoderSink::FramePull(Box::new(encoder)),
                dir.path(),
                start,
            )
            .unwrap();
        coordinator.step(start + Duration::from_millis(16)).unwrap();
        let err = coordinator
            .step(start + Duration::from_millis(32))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Encoder(_)));
        assert!(!coordinator.is_encoding(), "flag must never stay stuck");
        assert!(render_log.borrow().stopped);
        assert_eq!(encoder_log.borrow().finished, 0);
    }

    #[test]
    fn stream_capture_stops_by_duration_not_frame_count() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, _) = FakeRenderer::new();
        let (recorder, recorder_log) = FakeRecorder::new();
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        // 30 frames at 60 fps: a 500 ms recording.
        coordinator
            .begin(
                ExportParams {
                    format: ExportFormat::Mp4,
                    frame_count: 30,
                    ..ExportParams::default()
                },
                Box::new(renderer),
                EncoderSink::Stream(Box::new(recorder)),
                dir.path(),
                start,
            )
            .unwrap();
        assert_eq!(recorder_log.borrow().started, 1);

        // A slow host delivers only a handful of frame callbacks.
        let mut now = start;
        let mut finished = false;
        for _ in 0..6 {
            now += Duration::from_millis(120);
            if let StepOutcome::Finished(artifact) = coordinator.step(now).unwrap() {
                assert!(artifact.frames_encoded < 30);
                finished = true;
                break;
            }
        }
        assert!(finished, "recording must stop once the duration elapses");
        assert_eq!(recorder_log.borrow().stopped, 1);
        assert!(!coordinator.is_encoding());
    }

    #[test]
    fn still_capture_finishes_in_one_step() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, render_log) = FakeRenderer::new();
        let written = Rc::new(RefCell::new(0));
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        coordinator
            .begin(
                ExportParams {
                    format: ExportFormat::Png,
                    frame_count: 1,
                    start_time: 1.25,
                    ..ExportParams::default()
                },
                Box::new(renderer),
                EncoderSink::Still(Box::new(FakeStill {
                    written: written.clone(),
                })),
                dir.path(),
                start,
            )
            .unwrap();

        let outcome = coordinator.step(start).unwrap();
        let StepOutcome::Finished(artifact) = outcome else {
            panic!("still capture should finish on the first step");
        };
        assert_eq!(artifact.frames_encoded, 1);
        assert_eq!(
            artifact.path.extension().and_then(|ext| ext.to_str()),
            Some("png")
        );
        assert_eq!(*written.borrow(), 1);
        let log = render_log.borrow();
        assert_eq!(log.samples.len(), 1);
        assert!((log.samples[0].seconds - 1.25).abs() < 1e-6);
        assert!(!coordinator.is_encoding());
    }

    #[test]
    fn cancel_discards_job_without_finalizing() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, render_log) = FakeRenderer::new();
        let (encoder, encoder_log) = FakeEncoder::new();
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        coordinator
            .begin(
                gif_params(100),
                Box::new(renderer),
                EncoderSink::FramePull(Box::new(encoder)),
                dir.path(),
                start,
            )
            .unwrap();
        coordinator.step(start + Duration::from_millis(16)).unwrap();
        coordinator.cancel();

        assert!(!coordinator.is_encoding());
        assert!(render_log.borrow().stopped);
        assert_eq!(encoder_log.borrow().finished, 0);
        assert!(matches!(
            coordinator.step(start + Duration::from_millis(32)),
            Err(CaptureError::Idle)
        ));
    }

    #[test]
    fn progress_is_floored_whole_percent() {
        let mut coordinator = CaptureCoordinator::new();
        let (renderer, _) = FakeRenderer::new();
        let (encoder, _) = FakeEncoder::new();
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();

        coordinator
            .begin(
                gif_params(3),
                Box::new(renderer),
                EncoderSink::FramePull(Box::new(encoder)),
                dir.path(),
                start,
            )
            .unwrap();
        let outcome = coordinator.step(start).unwrap();
        assert_eq!(outcome, StepOutcome::Progress(33));
        assert_eq!(coordinator.progress(), Some(33));
        let outcome = coordinator.step(start).unwrap();
        assert_eq!(outcome, StepOutcome::Progress(66));
    }

    #[test]
    fn format_parsing_and_plans() {
        assert_eq!(ExportFormat::parse("GIF"), Some(ExportFormat::Gif));
        assert_eq!(ExportFormat::parse("jpeg"), Some(ExportFormat::Jpg));
        assert_eq!(ExportFormat::parse("mov"), None);
        assert_eq!(
            ExportPlan::for_format(ExportFormat::Webm),
            ExportPlan::Animated {
                driver: AnimatedDriver::FramePull
            }
        );
        assert_eq!(
            ExportPlan::for_format(ExportFormat::Mp4),
            ExportPlan::Animated {
                driver: AnimatedDriver::Stream
            }
        );
        assert_eq!(ExportPlan::for_format(ExportFormat::Jpg), ExportPlan::Still);
    }
}
