//! `voxlink`: command-line host for the voxlink audio pipeline.
//!
//! ```text
//! voxlink [--settings PATH] devices
//! voxlink [--settings PATH] loopback [--rate HZ] [--device NAME] [--seconds N] [--record FILE]
//! voxlink [--settings PATH] play FILE [--device NAME]
//! ```

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use tracing::info;

use crate::commands::{LoopbackArgs, PlayArgs};
use crate::settings::{default_settings_path, load_settings, save_settings};

#[derive(Debug)]
enum Command {
    Devices,
    Loopback(LoopbackArgs),
    Play(PlayArgs),
}

#[derive(Debug)]
struct Args {
    settings_path: Option<PathBuf>,
    command: Command,
}

fn usage() -> &'static str {
    "usage: voxlink [--settings PATH] <devices | loopback [--rate HZ] [--device NAME] \
     [--seconds N] [--record FILE] | play FILE [--device NAME]>"
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut settings_path: Option<PathBuf> = None;
    let mut command: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut rate: Option<u32> = None;
    let mut device: Option<String> = None;
    let mut seconds: Option<u64> = None;
    let mut record: Option<PathBuf> = None;

    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match arg.as_str() {
            "--settings" => settings_path = Some(PathBuf::from(value("--settings")?)),
            "--rate" => {
                let raw = value("--rate")?;
                rate = Some(raw.parse().with_context(|| format!("invalid --rate '{raw}'"))?);
            }
            "--device" => device = Some(value("--device")?),
            "--seconds" => {
                let raw = value("--seconds")?;
                seconds = Some(
                    raw.parse()
                        .with_context(|| format!("invalid --seconds '{raw}'"))?,
                );
            }
            "--record" => record = Some(PathBuf::from(value("--record")?)),
            "-h" | "--help" => bail!("{}", usage()),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{}", usage()),
            _ if command.is_none() => command = Some(arg),
            _ => positional.push(arg),
        }
    }

    let command = match command.as_deref() {
        Some("devices") => Command::Devices,
        Some("loopback") => Command::Loopback(LoopbackArgs {
            sample_rate: rate,
            device,
            seconds: seconds.unwrap_or(10),
            record,
        }),
        Some("play") => {
            let file = positional
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("play needs a FILE\n{}", usage()))?;
            Command::Play(PlayArgs {
                file: PathBuf::from(file),
                device,
            })
        }
        Some(other) => bail!("unknown command '{other}'\n{}", usage()),
        None => bail!("{}", usage()),
    };

    Ok(Args {
        settings_path,
        command,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxlink=info")),
        )
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let settings_path = args.settings_path.unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        sample_rate = settings.sample_rate,
        warmup_buffers = settings.warmup_buffers,
        preferred_device = ?settings.preferred_device,
        "settings loaded"
    );
    if !settings_path.exists() {
        if let Err(e) = save_settings(&settings_path, &settings) {
            tracing::warn!("could not write default settings: {e}");
        }
    }

    match args.command {
        Command::Devices => commands::list_devices(),
        Command::Loopback(loopback) => commands::run_loopback(&settings, loopback).await,
        Command::Play(play) => commands::run_play(&settings, play).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Args> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn loopback_flags_are_parsed() {
        let args = parse(&[
            "--settings", "/tmp/s.json", "loopback", "--rate", "16000", "--device", "USB Headset",
            "--seconds", "3", "--record", "out.wav",
        ])
        .expect("parse");
        assert_eq!(args.settings_path, Some(PathBuf::from("/tmp/s.json")));
        match args.command {
            Command::Loopback(l) => {
                assert_eq!(l.sample_rate, Some(16_000));
                assert_eq!(l.device.as_deref(), Some("USB Headset"));
                assert_eq!(l.seconds, 3);
                assert_eq!(l.record, Some(PathBuf::from("out.wav")));
            }
            other => panic!("expected loopback, got {other:?}"),
        }
    }

    #[test]
    fn play_requires_a_file() {
        assert!(parse(&["play"]).is_err());
        match parse(&["play", "hello.wav"]).expect("parse").command {
            Command::Play(p) => assert_eq!(p.file, PathBuf::from("hello.wav")),
            other => panic!("expected play, got {other:?}"),
        }
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["dance"]).is_err());
        assert!(parse(&["loopback", "--rate", "fast"]).is_err());
        assert!(parse(&["loopback", "--rate"]).is_err());
        assert!(parse(&["devices", "--verbose"]).is_err());
    }
}
