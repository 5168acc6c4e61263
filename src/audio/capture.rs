use cpal::traits::DeviceTrait;
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::{AudioError, ChannelExtractor, BYTES_PER_SAMPLE};
use crate::frame_buffer::FrameWriter;
use crate::playback::PlaybackGate;

/// Build the microphone stream for whatever sample format the device uses
pub(crate) fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    writer: FrameWriter,
    gate: PlaybackGate,
) -> Result<Stream, AudioError> {
    match format {
        SampleFormat::I16 => build::<i16>(device, config, writer, gate),
        SampleFormat::I32 => build::<i32>(device, config, writer, gate),
        SampleFormat::U16 => build::<u16>(device, config, writer, gate),
        SampleFormat::F32 => build::<f32>(device, config, writer, gate),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build<T>(
    device: &Device,
    config: &StreamConfig,
    mut writer: FrameWriter,
    gate: PlaybackGate,
) -> Result<Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let extractor = ChannelExtractor::new(0, config.channels as usize)?;
    // Sized for one buffer so the callback does not allocate in steady state
    let mut scratch: Vec<u8> = Vec::with_capacity(super::FRAMES_PER_BUFFER * 4 * BYTES_PER_SAMPLE);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            on_input(data, &gate, &extractor, &mut scratch, &mut writer);
        },
        |err| log::error!("Audio input stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Body of the input callback. Returns the number of bytes queued.
fn on_input<T>(
    data: &[T],
    gate: &PlaybackGate,
    extractor: &ChannelExtractor,
    scratch: &mut Vec<u8>,
    writer: &mut FrameWriter,
) -> usize
where
    T: SizedSample,
    i16: FromSample<T>,
{
    // Half-duplex: drop the microphone while the assistant is talking
    if gate.is_playing() {
        return 0;
    }
    encode_pcm16(data, extractor, scratch);
    writer.push(scratch.as_slice())
}

/// Replace `out` with the mono PCM16 little-endian encoding of `data`
pub fn encode_pcm16<T>(data: &[T], extractor: &ChannelExtractor, out: &mut Vec<u8>)
where
    T: SizedSample,
    i16: FromSample<T>,
{
    out.clear();
    for sample in extractor.extract(data) {
        out.extend_from_slice(&i16::from_sample(sample).to_le_bytes());
    }
}
