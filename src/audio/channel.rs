use super::AudioError;

/// Maps between interleaved device frames and the mono wire stream
#[derive(Debug, Clone, Copy)]
pub struct ChannelExtractor {
    target_channel: usize,
    total_channels: usize,
}

impl ChannelExtractor {
    pub fn new(target_channel: usize, total_channels: usize) -> Result<Self, AudioError> {
        if total_channels == 0 || target_channel >= total_channels {
            return Err(AudioError::InvalidChannel {
                channel: target_channel,
                channels: total_channels,
            });
        }

        Ok(Self {
            target_channel,
            total_channels,
        })
    }

    pub fn total_channels(&self) -> usize {
        self.total_channels
    }

    /// Samples of the target channel, without allocating
    pub fn extract<'a, T: Copy>(&self, interleaved: &'a [T]) -> impl Iterator<Item = T> + 'a {
        interleaved
            .iter()
            .skip(self.target_channel)
            .step_by(self.total_channels)
            .copied()
    }

    /// Write each mono sample to every channel of its frame
    pub fn spread<T: Copy>(&self, mono: impl IntoIterator<Item = T>, interleaved: &mut [T]) {
        for (frame, sample) in interleaved.chunks_mut(self.total_channels).zip(mono) {
            frame.fill(sample);
        }
    }
}
