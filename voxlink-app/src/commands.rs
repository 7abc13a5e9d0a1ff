//! Command implementations for the `voxlink` binary.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use crossbeam_channel::RecvTimeoutError;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use voxlink_core::audio::device::list_input_devices;
use voxlink_core::audio::format::FRAME_DURATION;
use voxlink_core::{
    read_wave_file, write_wave_file, AudioPipeline, AudioStatus, CpalBackend, DeviceStateEvent,
    SessionStatusEvent,
};

use crate::settings::AppSettings;

#[derive(Debug)]
pub struct LoopbackArgs {
    pub sample_rate: Option<u32>,
    pub device: Option<String>,
    pub seconds: u64,
    pub record: Option<PathBuf>,
}

#[derive(Debug)]
pub struct PlayArgs {
    pub file: PathBuf,
    pub device: Option<String>,
}

pub fn list_devices() -> anyhow::Result<()> {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no audio input devices found");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{marker} {:>2}  {}", device.index, device.name);
    }
    Ok(())
}

/// Microphone → speaker loopback: every captured frame is fed straight back
/// into the playback queue.
pub async fn run_loopback(settings: &AppSettings, args: LoopbackArgs) -> anyhow::Result<()> {
    let pipeline = Arc::new(AudioPipeline::new(CpalBackend::new(), settings.pipeline_config()));
    let cancelled = spawn_ctrl_c_watch();
    spawn_event_logging(&pipeline);

    let rate = args.sample_rate.unwrap_or(settings.sample_rate);
    let device = args.device.or_else(|| settings.preferred_device.clone());
    start_or_bail(&pipeline, rate, device.as_deref())?;

    let duration = Duration::from_secs(args.seconds);
    let recording = args.record.is_some();
    let worker = {
        let pipeline = Arc::clone(&pipeline);
        let cancelled = Arc::clone(&cancelled);
        tokio::task::spawn_blocking(move || {
            let frames = pipeline.frames();
            let deadline = Instant::now() + duration;
            let mut recorded: Vec<i16> = Vec::new();
            while Instant::now() < deadline && !cancelled.load(Ordering::Relaxed) {
                match frames.recv_timeout(FRAME_DURATION * 5) {
                    Ok(frame) => {
                        pipeline.play_samples(&frame.samples);
                        if recording {
                            recorded.extend_from_slice(&frame.samples);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            recorded
        })
    };
    let recorded = worker.await.context("loopback worker panicked")?;

    let snapshot = pipeline.diagnostics_snapshot();
    pipeline.stop();
    info!(
        diagnostics = %serde_json::to_string(&snapshot)?,
        "loopback finished"
    );

    if let Some(path) = args.record {
        write_wave_file(&path, &recorded, rate)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), samples = recorded.len(), "capture recorded");
    }
    Ok(())
}

/// Play a WAV file through the warm-up-gated playback path, paced at real time.
pub async fn run_play(settings: &AppSettings, args: PlayArgs) -> anyhow::Result<()> {
    let data = read_wave_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    info!(
        file = %args.file.display(),
        sample_rate = data.sample_rate,
        duration_ms = data.duration().as_millis() as u64,
        "playing wave file"
    );

    let pipeline = Arc::new(AudioPipeline::new(CpalBackend::new(), settings.pipeline_config()));
    let cancelled = spawn_ctrl_c_watch();
    spawn_event_logging(&pipeline);

    let device = args.device.or_else(|| settings.preferred_device.clone());
    start_or_bail(&pipeline, data.sample_rate, device.as_deref())?;

    let worker = {
        let pipeline = Arc::clone(&pipeline);
        let cancelled = Arc::clone(&cancelled);
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            for (i, block) in data.frames(FRAME_DURATION).enumerate() {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                pipeline.play_samples(block);
                // Stay at most a warm-up's worth of frames ahead of the device.
                let ahead = pipeline.config().warmup_buffers as u32;
                let due = FRAME_DURATION * (i as u32).saturating_sub(ahead);
                if let Some(wait) = due.checked_sub(started.elapsed()) {
                    std::thread::sleep(wait);
                }
            }
            // Let the queue drain before releasing the device.
            let drain_deadline = Instant::now() + Duration::from_secs(2);
            while pipeline.diagnostics_snapshot().queued_bytes > 0
                && Instant::now() < drain_deadline
                && !cancelled.load(Ordering::Relaxed)
            {
                std::thread::sleep(FRAME_DURATION);
            }
        })
    };
    worker.await.context("playback worker panicked")?;

    let snapshot = pipeline.diagnostics_snapshot();
    pipeline.stop();
    info!(
        diagnostics = %serde_json::to_string(&snapshot)?,
        "playback finished"
    );
    Ok(())
}

fn start_or_bail(pipeline: &AudioPipeline, rate: u32, device: Option<&str>) -> anyhow::Result<()> {
    let result = pipeline.start(rate, device);
    let status = AudioStatus::from_result(&result);
    result.map_err(|e| anyhow!("could not start audio ({status:?}) at {rate} Hz on {device:?}: {e}"))
}

fn spawn_ctrl_c_watch() -> Arc<AtomicBool> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancelled
}

fn spawn_event_logging(pipeline: &AudioPipeline) {
    let mut status_rx = pipeline.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(SessionStatusEvent { state, detail }) => {
                    info!(?state, detail = detail.as_deref().unwrap_or(""), "session status");
                }
                Err(RecvError::Lagged(n)) => warn!("status listener lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut device_rx = pipeline.subscribe_device_state();
    tokio::spawn(async move {
        loop {
            match device_rx.recv().await {
                Ok(DeviceStateEvent {
                    connected: false,
                    device,
                    ..
                }) => {
                    warn!(device = device.as_str(), "audio device disconnected");
                }
                Ok(event) => info!(device = event.device.as_str(), "device available"),
                Err(RecvError::Lagged(n)) => warn!("device listener lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
