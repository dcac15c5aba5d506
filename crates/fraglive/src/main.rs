mod audio;
mod cli;
mod config;
mod defaults;
mod encode;
mod export;
mod run;
mod watch;

use std::fs;

use anyhow::{Context, Result};
use pipeline::{decode_session, encode_session, ChannelId, Session};
use renderer::{compile_report, ShaderKind};

use cli::{Command, LinkArgs};
use defaults::DEFAULT_VISUAL_SOURCE;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Export(args)) => export::run_export(args),
        Some(Command::Link(args)) => run_link(args),
        None => run::run(cli.run),
    }
}

fn run_link(args: LinkArgs) -> Result<()> {
    if let Some(query) = &args.decode {
        let shared = decode_session(query);
        println!("mode: {}", shared.mode);
        println!("sound: {}", shared.sound);
        println!("--- visual source ---");
        println!("{}", shared.source);
        if let Some(sound) = &shared.sound_source {
            println!("--- sound source ---");
            println!("{sound}");
        }
        return Ok(());
    }

    let visual = match &args.shader {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read shader at {}", path.display()))?,
        None => DEFAULT_VISUAL_SOURCE.to_string(),
    };

    let mut session = Session::default();
    session.load_source(ChannelId::Visual, visual.clone());
    session.record_report(
        ChannelId::Visual,
        compile_report(ShaderKind::Visual, &visual),
    );
    if let Some(path) = &args.sound {
        let sound = fs::read_to_string(path)
            .with_context(|| format!("failed to read sound source at {}", path.display()))?;
        session.set_sound_enabled(true);
        session.load_source(ChannelId::Audio, sound.clone());
        session.record_report(ChannelId::Audio, compile_report(ShaderKind::Sound, &sound));
    }

    println!("{}", encode_session(&session));
    Ok(())
}
