//! Audio hardware: cpal capture and playback streams.
//!
//! cpal streams are not `Send`, so both live on a dedicated thread owned by
//! [`AudioStreams`]. The callbacks only copy bytes into the capture
//! [`FrameWriter`] and out of the [`PlaybackSelector`]; neither blocks.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, StreamConfig, SupportedBufferSize};
use cpal::{SupportedStreamConfig, SupportedStreamConfigRange};
use std::sync::mpsc;
use std::thread::JoinHandle;
use thiserror::Error;

use crate::frame_buffer::FrameWriter;
use crate::playback::PlaybackSelector;

pub mod capture;
pub mod channel;
pub mod output;

pub use channel::ChannelExtractor;

/// PCM16: two bytes per mono sample
pub const BYTES_PER_SAMPLE: usize = 2;
pub const SAMPLE_RATE: u32 = 24_000;
pub const FRAMES_PER_BUFFER: usize = 512;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No default {0} device available")]
    NoDevice(&'static str),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Device query failed: {0}")]
    Device(String),

    #[error("No {direction} configuration supports {sample_rate} Hz")]
    UnsupportedConfig {
        direction: &'static str,
        sample_rate: u32,
    },

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Target channel {channel} is out of range for {channels} channels")]
    InvalidChannel { channel: usize, channels: usize },

    #[error("Failed to build stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Audio thread failed: {0}")]
    Thread(String),
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Substring of the input device name; `None` uses the default device
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub frames_per_buffer: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: SAMPLE_RATE,
            frames_per_buffer: FRAMES_PER_BUFFER,
        }
    }
}

/// Running capture and playback streams. Dropping the handle stops both and
/// releases the devices.
pub struct AudioStreams {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStreams {
    /// Open both devices and start streaming. Returns once the streams are
    /// playing or failed to start.
    pub fn start(
        config: AudioConfig,
        capture: FrameWriter,
        playback: PlaybackSelector,
    ) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || {
                let streams = match open_streams(&config, capture, playback) {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Either an explicit stop or the handle being dropped
                let _ = stop_rx.recv();
                drop(streams);
                log::info!("🔇 Audio streams stopped");
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Thread("audio thread exited during startup".into()))
            }
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
    }
}

impl Drop for AudioStreams {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_streams(
    config: &AudioConfig,
    capture: FrameWriter,
    playback: PlaybackSelector,
) -> Result<(cpal::Stream, cpal::Stream), AudioError> {
    let host = cpal::default_host();
    log::info!("Using audio host: {}", host.id().name());

    let input = find_device(&host, config.input_device.as_deref(), Direction::Input)?;
    let output = find_device(&host, config.output_device.as_deref(), Direction::Output)?;

    let supported = input
        .supported_input_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let input_config = choose_config(supported, config, Direction::Input)?;
    let supported = output
        .supported_output_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let output_config = choose_config(supported, config, Direction::Output)?;

    log::info!(
        "🎙️  Input: {} ({} ch, {:?})",
        device_name(&input),
        input_config.channels(),
        input_config.sample_format()
    );
    log::info!(
        "🔊 Output: {} ({} ch, {:?})",
        device_name(&output),
        output_config.channels(),
        output_config.sample_format()
    );

    let gate = playback.gate().clone();
    let input_stream = capture::build_input_stream(
        &input,
        &stream_config(&input_config, config.frames_per_buffer),
        input_config.sample_format(),
        capture,
        gate,
    )?;
    let output_stream = output::build_output_stream(
        &output,
        &stream_config(&output_config, config.frames_per_buffer),
        output_config.sample_format(),
        playback,
    )?;

    input_stream.play()?;
    output_stream.play()?;
    log::info!("Audio streams started at {} Hz", config.sample_rate);

    Ok((input_stream, output_stream))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown>".to_string())
}

fn find_device(
    host: &cpal::Host,
    name: Option<&str>,
    direction: Direction,
) -> Result<Device, AudioError> {
    let Some(wanted) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device.ok_or(AudioError::NoDevice(direction.as_str()));
    };

    let devices: Vec<Device> = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::Device(e.to_string()))?
    .collect();

    for device in devices {
        let name = device_name(&device);
        if name.contains(wanted) {
            log::info!("Found matching {} device: {}", direction.as_str(), name);
            return Ok(device);
        }
        log::debug!("Skipping {} device: {}", direction.as_str(), name);
    }
    Err(AudioError::DeviceNotFound(wanted.to_string()))
}

/// Pick a configuration at the wanted rate, preferring fewer channels and
/// PCM16 when a device offers several
fn choose_config(
    supported: impl Iterator<Item = SupportedStreamConfigRange>,
    config: &AudioConfig,
    direction: Direction,
) -> Result<SupportedStreamConfig, AudioError> {
    let rate = config.sample_rate;
    supported
        .filter(|range| {
            range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate
        })
        .filter(|range| is_supported_format(range.sample_format()))
        .min_by_key(|range| {
            (
                range.channels(),
                range.sample_format() != SampleFormat::I16,
            )
        })
        .map(|range| range.with_sample_rate(cpal::SampleRate(rate)))
        .ok_or(AudioError::UnsupportedConfig {
            direction: direction.as_str(),
            sample_rate: rate,
        })
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::I16 | SampleFormat::I32 | SampleFormat::U16 | SampleFormat::F32
    )
}

fn stream_config(supported: &SupportedStreamConfig, frames: usize) -> StreamConfig {
    let mut config = supported.config();
    let frames = frames as u32;
    config.buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    };
    config
}
