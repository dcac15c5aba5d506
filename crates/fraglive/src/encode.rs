use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::process::{Child, Command, Stdio};

use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Delay, ExtendedColorType, ImageEncoder, RgbaImage};
use pipeline::{
    CaptureError, EncodeSpec, EncoderSink, ExportFormat, FrameEncoder, StillWriter, StreamRecorder,
};
use renderer::Frame;
use tracing::debug;

/// Builds the encoder matching an export format.
///
/// GIF and the still formats are encoded in-process with the `image` crate;
/// WebM and MP4 pipe raw frames into a spawned `ffmpeg`. The pipeline only
/// ever sees the capability traits.
pub fn sink_for(format: ExportFormat) -> EncoderSink {
    match format {
        ExportFormat::Gif => EncoderSink::FramePull(Box::new(GifFrameEncoder::default())),
        ExportFormat::Webm => EncoderSink::FramePull(Box::new(FfmpegFrameEncoder::default())),
        ExportFormat::Mp4 => EncoderSink::Stream(Box::new(FfmpegStreamRecorder::default())),
        ExportFormat::Png | ExportFormat::Jpg => {
            EncoderSink::Still(Box::new(StillImageWriter { format }))
        }
    }
}

fn encoder_err(err: impl std::fmt::Display) -> CaptureError {
    CaptureError::Encoder(err.to_string())
}

fn rgba_image(frame: &Frame) -> Result<RgbaImage, CaptureError> {
    RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| CaptureError::Encoder("frame buffer does not match its dimensions".into()))
}

/// In-process animated GIF encoder.
#[derive(Default)]
pub struct GifFrameEncoder {
    encoder: Option<GifEncoder<BufWriter<File>>>,
    framerate: u32,
}

impl FrameEncoder for GifFrameEncoder {
    fn begin(&mut self, spec: &EncodeSpec) -> Result<(), CaptureError> {
        let file = File::create(&spec.path).map_err(encoder_err)?;
        let mut encoder =
            GifEncoder::new_with_speed(BufWriter::new(file), speed_for_quality(spec.quality));
        encoder.set_repeat(Repeat::Infinite).map_err(encoder_err)?;
        self.encoder = Some(encoder);
        self.framerate = spec.framerate.max(1);
        Ok(())
    }

    fn push_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| CaptureError::Encoder("gif encoder was not started".into()))?;
        let delay = Delay::from_numer_denom_ms(1000, self.framerate);
        let gif_frame = image::Frame::from_parts(rgba_image(frame)?, 0, 0, delay);
        encoder.encode_frame(gif_frame).map_err(encoder_err)
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        // Dropping the encoder writes the trailer and flushes the file.
        self.encoder
            .take()
            .ok_or_else(|| CaptureError::Encoder("gif encoder was not started".into()))?;
        Ok(())
    }
}

/// Maps normalized quality onto the gif crate's 1 (best) to 30 (fastest).
fn speed_for_quality(quality: f32) -> i32 {
    let quality = quality.clamp(0.0, 100.0);
    (31.0 - quality / 100.0 * 30.0).clamp(1.0, 30.0) as i32
}

/// PNG/JPEG still writer.
pub struct StillImageWriter {
    pub format: ExportFormat,
}

impl StillWriter for StillImageWriter {
    fn write(&mut self, frame: &Frame, spec: &EncodeSpec) -> Result<(), CaptureError> {
        let file = File::create(&spec.path).map_err(encoder_err)?;
        let writer = BufWriter::new(file);
        match self.format {
            ExportFormat::Png => PngEncoder::new(writer)
                .write_image(
                    &frame.rgba,
                    frame.width,
                    frame.height,
                    ExtendedColorType::Rgba8,
                )
                .map_err(encoder_err),
            ExportFormat::Jpg => {
                // JPEG has no alpha channel.
                let rgb = image::DynamicImage::ImageRgba8(rgba_image(frame)?).to_rgb8();
                JpegEncoder::new_with_quality(writer, spec.quality.clamp(1.0, 100.0) as u8)
                    .write_image(
                        rgb.as_raw(),
                        frame.width,
                        frame.height,
                        ExtendedColorType::Rgb8,
                    )
                    .map_err(encoder_err)
            }
            other => Err(CaptureError::Encoder(format!(
                "{other} is not a still format"
            ))),
        }
    }
}

/// Frame-pull WebM encoder backed by an `ffmpeg` child process.
#[derive(Default)]
pub struct FfmpegFrameEncoder {
    child: Option<Child>,
}

impl FrameEncoder for FfmpegFrameEncoder {
    fn begin(&mut self, spec: &EncodeSpec) -> Result<(), CaptureError> {
        self.child = Some(spawn_ffmpeg(
            spec,
            &[
                "-c:v",
                "libvpx-vp9",
                "-b:v",
                "0",
                "-crf",
                &crf_for_quality(spec.quality).to_string(),
            ],
        )?);
        Ok(())
    }

    fn push_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        write_raw_frame(self.child.as_mut(), frame).map_err(CaptureError::Encoder)
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        let child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::Encoder("webm encoder was not started".into()))?;
        finalize_ffmpeg(child).map_err(CaptureError::Encoder)
    }
}

/// Stream-shaped MP4 recorder backed by an `ffmpeg` child process.
///
/// Started before rendering begins and stopped by the coordinator's
/// duration timer rather than a frame counter.
#[derive(Default)]
pub struct FfmpegStreamRecorder {
    child: Option<Child>,
}

impl StreamRecorder for FfmpegStreamRecorder {
    fn start(&mut self, spec: &EncodeSpec) -> Result<(), CaptureError> {
        let child = spawn_ffmpeg(
            spec,
            &[
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-crf",
                &crf_for_quality(spec.quality).to_string(),
            ],
        )
        .map_err(|err| CaptureError::Stream(err.to_string()))?;
        self.child = Some(child);
        Ok(())
    }

    fn append_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        write_raw_frame(self.child.as_mut(), frame).map_err(CaptureError::Stream)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::Stream("mp4 recorder was not started".into()))?;
        finalize_ffmpeg(child).map_err(CaptureError::Stream)
    }
}

fn spawn_ffmpeg(spec: &EncodeSpec, codec_args: &[&str]) -> Result<Child, CaptureError> {
    let mut command = Command::new("ffmpeg");
    command
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-video_size",
            &format!("{}x{}", spec.width, spec.height),
            "-framerate",
            &spec.framerate.max(1).to_string(),
            "-i",
            "-",
        ])
        .args(codec_args)
        .arg(&spec.path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    debug!(path = %spec.path.display(), "spawning ffmpeg");
    command.spawn().map_err(|err| {
        CaptureError::Encoder(format!(
            "failed to spawn ffmpeg (is it installed and on PATH?): {err}"
        ))
    })
}

fn write_raw_frame(child: Option<&mut Child>, frame: &Frame) -> Result<(), String> {
    let child = child.ok_or_else(|| "encoder process was not started".to_string())?;
    let stdin = child
        .stdin
        .as_mut()
        .ok_or_else(|| "encoder stdin already closed".to_string())?;
    stdin
        .write_all(&frame.rgba)
        .map_err(|err| format!("failed to feed frame to ffmpeg: {err}"))
}

fn finalize_ffmpeg(mut child: Child) -> Result<(), String> {
    drop(child.stdin.take());
    let status = child
        .wait()
        .map_err(|err| format!("failed to wait for ffmpeg: {err}"))?;
    if status.success() {
        return Ok(());
    }
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr);
    }
    Err(format!(
        "ffmpeg exited with {status}: {}",
        stderr.trim()
    ))
}

/// Maps normalized quality onto x264/vp9 CRF (lower is better).
fn crf_for_quality(quality: f32) -> u32 {
    let quality = quality.clamp(0.0, 100.0);
    (51.0 - quality / 100.0 * 33.0) as u32
}
