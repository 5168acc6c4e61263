//! Moves captured microphone bytes onto the wire.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::frame_buffer::FrameReader;
use crate::protocol::ClientEvent;

/// Why the pump stopped and how much it forwarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub chunks_sent: usize,
    pub bytes_sent: usize,
    /// True when the outbound queue closed underneath the pump
    pub connection_closed: bool,
}

pub struct CapturePump {
    interval: Duration,
}

impl CapturePump {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Drain the buffer every tick and send whatever accumulated as one
    /// `input_audio_buffer.append`. Runs until cancelled or the outbound
    /// queue is closed.
    pub async fn run(
        &self,
        mut reader: FrameReader,
        outbound: mpsc::Sender<ClientEvent>,
        cancel: CancellationToken,
    ) -> PumpStats {
        let mut stats = PumpStats::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("Capture pump running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Capture pump cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if reader.is_empty() {
                continue;
            }
            let chunk = reader.drain();
            let len = chunk.len();

            if outbound.send(ClientEvent::append_audio(&chunk)).await.is_err() {
                log::warn!("Connection closed, capture pump stopping");
                stats.connection_closed = true;
                break;
            }
            stats.chunks_sent += 1;
            stats.bytes_sent += len;
            log::trace!("Sent {} captured bytes", len);
        }

        log::info!(
            "🎙️  Capture pump stopped after {} chunks ({} bytes)",
            stats.chunks_sent,
            stats.bytes_sent
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_buffer::frame_buffer;
    use crate::protocol::decode_audio;

    fn audio_of(event: ClientEvent) -> Vec<u8> {
        match event {
            ClientEvent::AppendAudio { audio } => decode_audio(&audio).unwrap(),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pump_forwards_in_capture_order() {
        let (mut writer, reader) = frame_buffer(64);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        writer.push(&[1, 2, 3]);
        writer.push(&[4, 5]);

        let pump = CapturePump::new(Duration::from_millis(5));
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { pump.run(reader, tx, cancel).await }
        });

        let first = audio_of(rx.recv().await.unwrap());
        assert_eq!(first, vec![1, 2, 3, 4, 5]);

        writer.push(&[6]);
        let second = audio_of(rx.recv().await.unwrap());
        assert_eq!(second, vec![6]);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.chunks_sent, 2);
        assert_eq!(stats.bytes_sent, 6);
        assert!(!stats.connection_closed);
    }

    #[tokio::test]
    async fn test_pump_skips_empty_ticks() {
        let (_writer, reader) = frame_buffer(16);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let pump = CapturePump::new(Duration::from_millis(1));
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { pump.run(reader, tx, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.chunks_sent, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pump_stops_when_connection_closes() {
        let (mut writer, reader) = frame_buffer(16);
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        writer.push(&[9, 9]);

        let stats = CapturePump::new(Duration::from_millis(1))
            .run(reader, tx, CancellationToken::new())
            .await;
        assert!(stats.connection_closed);
        assert_eq!(stats.chunks_sent, 0);
    }
}
