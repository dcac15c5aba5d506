use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pipeline::ExportFormat;

#[derive(Parser, Debug)]
#[command(
    name = "fraglive",
    author,
    version,
    about = "Headless live-coding surface for classic-mode GLSL",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Visual channel source file; a built-in shader is used when omitted.
    #[arg(value_name = "SHADER")]
    pub shader: Option<PathBuf>,

    /// Sound channel source file; supplying it enables the audio channel.
    #[arg(long, value_name = "FILE")]
    pub sound: Option<PathBuf>,

    /// Live render resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// FPS cap for the live loop (0 = uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Override the quiet period before an edited channel recompiles.
    #[arg(long, value_name = "MILLISECONDS")]
    pub quiet_ms: Option<u64>,

    /// Mix a local WAV file into the audio-reactive signal.
    #[arg(long, value_name = "FILE")]
    pub audio_file: Option<PathBuf>,

    /// Mix the default audio input device into the signal.
    #[arg(long)]
    pub live_audio: bool,

    /// Stop after this many live frames (scripted/headless runs).
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Session config file (defaults to `./fraglive.toml`).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export the shader to an image or animation file.
    Export(ExportArgs),
    /// Print or decode a shareable session link.
    Link(LinkArgs),
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Visual channel source file to export.
    #[arg(value_name = "SHADER")]
    pub shader: PathBuf,

    /// Sound channel source file; its build health gates the export.
    #[arg(long, value_name = "FILE")]
    pub sound: Option<PathBuf>,

    /// Output container: gif, webm, mp4, png, or jpg.
    #[arg(long, value_parser = parse_export_format)]
    pub format: Option<ExportFormat>,

    /// Number of frames to capture (animated formats).
    #[arg(long)]
    pub frames: Option<u32>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Capture framerate, 10-60.
    #[arg(long)]
    pub framerate: Option<u32>,

    /// Encoding quality, 0-100.
    #[arg(long)]
    pub quality: Option<f32>,

    /// Virtual time of the first captured frame, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub start_time: Option<f32>,

    /// Directory receiving the artifact.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Session config file (defaults to `./fraglive.toml`).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct LinkArgs {
    /// Visual channel source file to share.
    #[arg(value_name = "SHADER")]
    pub shader: Option<PathBuf>,

    /// Sound channel source file to share.
    #[arg(long, value_name = "FILE")]
    pub sound: Option<PathBuf>,

    /// Decode a previously generated query string instead of encoding.
    #[arg(long, value_name = "QUERY")]
    pub decode: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_export_format(value: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(value)
        .ok_or_else(|| format!("unknown format '{value}'; expected gif, webm, mp4, png, or jpg"))
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{w}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_surface_sizes() {
        assert_eq!(parse_surface_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_surface_size("640X480").unwrap(), (640, 480));
        assert!(parse_surface_size("1280").is_err());
        assert!(parse_surface_size("0x720").is_err());
    }

    #[test]
    fn parses_export_formats() {
        assert_eq!(parse_export_format("gif").unwrap(), ExportFormat::Gif);
        assert_eq!(parse_export_format("JPEG").unwrap(), ExportFormat::Jpg);
        assert!(parse_export_format("mov").is_err());
    }

    #[test]
    fn export_subcommand_parses() {
        let cli = Cli::parse_from([
            "fraglive", "export", "demo.frag", "--format", "gif", "--frames", "3",
        ]);
        let Some(Command::Export(args)) = cli.command else {
            panic!("expected export subcommand");
        };
        assert_eq!(args.shader, PathBuf::from("demo.frag"));
        assert_eq!(args.format, Some(ExportFormat::Gif));
        assert_eq!(args.frames, Some(3));
    }
}
