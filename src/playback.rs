use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use crate::response::ResponseStore;

/// Shared "assistant is speaking" flag.
///
/// Set by the playback callback, read by the capture callback to discard
/// microphone input while audio is playing. This is a half-duplex heuristic,
/// not echo cancellation.
#[derive(Debug, Clone, Default)]
pub struct PlaybackGate {
    playing: Arc<AtomicBool>,
}

impl PlaybackGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }
}

/// Picks playback bytes from the response store on every hardware pull
#[derive(Clone)]
pub struct PlaybackSelector {
    responses: Arc<Mutex<ResponseStore>>,
    gate: PlaybackGate,
    bytes_per_sample: usize,
}

impl PlaybackSelector {
    pub fn new(
        responses: Arc<Mutex<ResponseStore>>,
        gate: PlaybackGate,
        bytes_per_sample: usize,
    ) -> Self {
        Self {
            responses,
            gate,
            bytes_per_sample: bytes_per_sample.max(1),
        }
    }

    /// Fill one hardware frame. Never blocks: if the store is busy the frame
    /// is silence and the gate keeps its previous state.
    pub fn fill(&self, out: &mut [u8]) -> usize {
        let mut responses = match self.responses.try_lock() {
            Ok(responses) => responses,
            // A panic elsewhere must not silence playback for good
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0);
                return 0;
            }
        };
        let taken = responses.take_audio(out, self.bytes_per_sample);
        drop(responses);

        self.gate.set_playing(taken > 0);
        taken
    }

    /// Convenience for a pull of `frame_count` samples
    pub fn pull_frames(&self, frame_count: usize) -> Vec<u8> {
        let mut out = vec![0u8; frame_count * self.bytes_per_sample];
        self.fill(&mut out);
        out
    }

    pub fn gate(&self) -> &PlaybackGate {
        &self.gate
    }
}
