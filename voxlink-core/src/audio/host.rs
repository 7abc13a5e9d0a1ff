//! cpal-backed platform services.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Both session streams are therefore built, started and dropped on a
//! dedicated device thread. The pipeline talks to that thread through a
//! command channel; a sync oneshot reports open success or failure back to
//! the caller of `open`, and each command carries its own reply channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::audio::device::{DeviceId, DeviceState};
use crate::audio::{
    AudioBackend, CaptureBuffer, CaptureCallback, DeviceStateCallback, DeviceWatch, OpenRequest,
    PlaybackCallback, StreamHandle,
};
use crate::error::{Result, VoxlinkError};

/// Audio services on the system default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn input_device_names(host: &Host) -> Result<Vec<String>> {
    let devices = host
        .input_devices()
        .map_err(|e| VoxlinkError::AudioDevice(e.to_string()))?;
    Ok(devices
        .enumerate()
        .map(|(idx, device)| {
            device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1))
        })
        .collect())
}

impl AudioBackend for CpalBackend {
    fn device_names(&self) -> Result<Vec<String>> {
        input_device_names(&cpal::default_host())
    }

    fn open(
        &self,
        request: &OpenRequest,
        capture: CaptureCallback,
        playback: PlaybackCallback,
    ) -> Result<Box<dyn StreamHandle>> {
        let request = request.clone();
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<DeviceCommand>();
        // Sync oneshot: device thread signals open success/failure to open().
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("voxlink-audio".into())
            .spawn(move || {
                // ── Open both streams (must happen on THIS thread, cpal::Stream is !Send) ──
                let streams = match SessionStreams::open(&request, capture, playback) {
                    Ok(s) => {
                        let _ = open_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                streams.serve(cmd_rx);
            })?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStreamHandle {
                cmd_tx,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoxlinkError::AudioStream(
                    "audio device thread exited before opening streams".into(),
                ))
            }
        }
    }

    fn watch_device(
        &self,
        device: &DeviceId,
        poll_interval: Duration,
        on_change: DeviceStateCallback,
    ) -> Result<Box<dyn DeviceWatch>> {
        PollingWatch::spawn(device.name.clone(), poll_interval, on_change)
            .map(|w| Box::new(w) as Box<dyn DeviceWatch>)
    }
}

enum DeviceCommand {
    StartPlayback(mpsc::Sender<Result<()>>),
    Stop(mpsc::Sender<Result<()>>),
}

struct SessionStreams {
    input: Stream,
    output: Stream,
}

impl SessionStreams {
    fn open(
        request: &OpenRequest,
        mut capture: CaptureCallback,
        mut playback: PlaybackCallback,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let input_device = find_input_device(&host, &request.device)?;
        let output_device = find_output_device(&host, &request.device.name)?;

        let sample_rate = request.format.sample_rate;
        let frames = request.format.samples_per_quantum(request.buffer_duration) as u32;

        let input_config = mono16_config(&input_device, Direction::Input, sample_rate, frames)?;
        let output_config = mono16_config(&output_device, Direction::Output, sample_rate, frames)?;

        info!(
            device = request.device.name.as_str(),
            sample_rate,
            frames_per_buffer = frames,
            "opening capture and playback streams"
        );

        let input = input_device
            .build_input_stream(
                &input_config,
                move |data: &[i16], _info| capture(CaptureBuffer::Pcm16(data)),
                |err| error!("audio input stream error: {err}"),
                None,
            )
            .map_err(|e| VoxlinkError::AudioStream(e.to_string()))?;

        // Byte scratch for the queue; grows to the largest callback size once.
        let mut scratch: Vec<u8> = Vec::new();
        let output = output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [i16], _info| {
                    let wanted = data.len() * 2;
                    if scratch.len() < wanted {
                        scratch.resize(wanted, 0);
                    }
                    let written = playback(&mut scratch[..wanted]).min(wanted);
                    let whole = written / 2;
                    for (dst, pair) in data.iter_mut().zip(scratch[..whole * 2].chunks_exact(2)) {
                        *dst = i16::from_le_bytes([pair[0], pair[1]]);
                    }
                    // cpal needs the whole buffer written; pad a short read.
                    data[whole..].fill(0);
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| VoxlinkError::AudioStream(e.to_string()))?;

        // Some hosts start output streams on creation; hold it until warm-up.
        if let Err(e) = output.pause() {
            debug!("output stream pause after build not supported: {e}");
        }

        input
            .play()
            .map_err(|e| VoxlinkError::AudioStream(e.to_string()))?;

        Ok(Self { input, output })
    }

    fn serve(self, commands: Receiver<DeviceCommand>) {
        for command in commands.iter() {
            match command {
                DeviceCommand::StartPlayback(reply) => {
                    let result = self
                        .output
                        .play()
                        .map_err(|e| VoxlinkError::PlaybackStart(e.to_string()));
                    let _ = reply.send(result);
                }
                DeviceCommand::Stop(reply) => {
                    let result = self.pause_all();
                    // Streams drop here, releasing the device on this thread.
                    drop(self);
                    let _ = reply.send(result);
                    return;
                }
            }
        }
        debug!("stream handle dropped without stop; releasing streams");
    }

    fn pause_all(&self) -> Result<()> {
        let input = self.input.pause();
        let output = self.output.pause();
        match (input, output) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), _) | (_, Err(e)) => Err(VoxlinkError::Stop(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Input,
    Output,
}

fn find_input_device(host: &Host, id: &DeviceId) -> Result<Device> {
    let mut devices = host
        .input_devices()
        .map_err(|e| VoxlinkError::AudioDevice(e.to_string()))?;
    devices
        .find(|device| device.name().map(|n| n == id.name).unwrap_or(false))
        .ok_or_else(|| VoxlinkError::DeviceNotFound {
            name: id.name.clone(),
        })
}

/// Playback uses the output endpoint with the same name as the capture
/// device (headsets expose both), otherwise the default output.
fn find_output_device(host: &Host, name: &str) -> Result<Device> {
    let matched = host.output_devices().ok().and_then(|mut devices| {
        devices.find(|device| device.name().map(|n| n == name).unwrap_or(false))
    });
    if let Some(device) = matched {
        return Ok(device);
    }
    warn!(
        device = name,
        "no output endpoint with matching name, using default output device"
    );
    host.default_output_device()
        .ok_or(VoxlinkError::NoDevicesAvailable)
}

/// Mono i16 at `sample_rate` with a fixed `frames` buffer where the device
/// allows it. No conversion is performed: a device that cannot run this
/// format natively is rejected.
fn mono16_config(
    device: &Device,
    direction: Direction,
    sample_rate: u32,
    frames: u32,
) -> Result<StreamConfig> {
    let ranges: Vec<_> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| VoxlinkError::AudioDevice(e.to_string()))?
            .collect(),
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| VoxlinkError::AudioDevice(e.to_string()))?
            .collect(),
    };

    let supported = ranges
        .into_iter()
        .find(|range| {
            range.channels() == 1
                && range.sample_format() == SampleFormat::I16
                && range.min_sample_rate().0 <= sample_rate
                && range.max_sample_rate().0 >= sample_rate
        })
        .ok_or_else(|| {
            VoxlinkError::AudioStream(format!(
                "{direction:?} device does not support mono 16-bit PCM at {sample_rate} Hz"
            ))
        })?;

    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => {
            debug!(?direction, frames, "fixed buffer size unsupported, using device default");
            BufferSize::Default
        }
    };

    Ok(StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size,
    })
}

struct CpalStreamHandle {
    cmd_tx: Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStreamHandle {
    fn request(&self, make: impl FnOnce(mpsc::Sender<Result<()>>) -> DeviceCommand) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .map_err(|_| VoxlinkError::AudioStream("audio device thread is gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| VoxlinkError::AudioStream("audio device thread did not reply".into()))?
    }
}

impl StreamHandle for CpalStreamHandle {
    fn start_playback(&mut self) -> Result<()> {
        self.request(DeviceCommand::StartPlayback)
    }

    fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let result = self.request(DeviceCommand::Stop);
        if thread.join().is_err() {
            error!("audio device thread panicked");
        }
        result
    }
}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("error releasing audio streams: {e}");
        }
    }
}

/// Device-change monitoring by polling enumeration.
///
/// cpal has no hot-plug notifications, so a low-priority thread re-lists
/// input devices every `interval` and reports presence transitions of the
/// session device.
struct PollingWatch {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl PollingWatch {
    fn spawn(name: String, interval: Duration, on_change: DeviceStateCallback) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = Arc::clone(&active);

        let thread = thread::Builder::new()
            .name("voxlink-device-watch".into())
            .spawn(move || {
                let host = cpal::default_host();
                // The device was present when the session resolved it.
                let mut connected = true;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let present = match input_device_names(&host) {
                        Ok(names) => names.iter().any(|n| *n == name),
                        Err(e) => {
                            debug!("device poll failed: {e}");
                            continue;
                        }
                    };
                    if present != connected && thread_active.load(Ordering::Acquire) {
                        connected = present;
                        on_change(if present {
                            DeviceState::Connected
                        } else {
                            DeviceState::Disconnected
                        });
                    }
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            active,
        })
    }
}

impl DeviceWatch for PollingWatch {
    fn unregister(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("device watch thread panicked");
            }
        }
    }
}

impl Drop for PollingWatch {
    fn drop(&mut self) {
        self.unregister();
    }
}
