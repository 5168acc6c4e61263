use cpal::traits::DeviceTrait;
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::{AudioError, ChannelExtractor, BYTES_PER_SAMPLE};
use crate::playback::PlaybackSelector;

/// Build the speaker stream for whatever sample format the device uses
pub(crate) fn build_output_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    selector: PlaybackSelector,
) -> Result<Stream, AudioError> {
    match format {
        SampleFormat::I16 => build::<i16>(device, config, selector),
        SampleFormat::I32 => build::<i32>(device, config, selector),
        SampleFormat::U16 => build::<u16>(device, config, selector),
        SampleFormat::F32 => build::<f32>(device, config, selector),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build<T>(
    device: &Device,
    config: &StreamConfig,
    selector: PlaybackSelector,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let spreader = ChannelExtractor::new(0, config.channels as usize)?;
    let mut scratch: Vec<u8> = Vec::with_capacity(super::FRAMES_PER_BUFFER * BYTES_PER_SAMPLE);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / spreader.total_channels();
            scratch.resize(frames * BYTES_PER_SAMPLE, 0);
            selector.fill(&mut scratch);
            decode_pcm16(&scratch, &spreader, data);
        },
        |err| log::error!("Audio output stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Write mono PCM16 little-endian bytes to every channel of `out`
pub fn decode_pcm16<T>(pcm: &[u8], spreader: &ChannelExtractor, out: &mut [T])
where
    T: SizedSample + FromSample<i16>,
{
    let samples = pcm
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| T::from_sample(i16::from_le_bytes([b[0], b[1]])));
    spreader.spread(samples, out);
}
