//! Accumulation of server responses.
//!
//! Each response collects streamed audio (consumed from the front by
//! playback) and transcript text (append-only). Responses are kept in
//! creation order, which is also the playback priority order.

use std::collections::VecDeque;
use strum::Display;

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ResponseStatus {
    Created,
    Streaming,
    Done,
}

#[derive(Debug)]
pub struct Response {
    id: String,
    audio: VecDeque<u8>,
    transcript: String,
    audio_done: bool,
    transcript_done: bool,
    streamed: bool,
    /// Total audio bytes ever appended
    received_audio: usize,
}

impl Response {
    fn new(id: String) -> Self {
        Self {
            id,
            audio: VecDeque::new(),
            transcript: String::new(),
            audio_done: false,
            transcript_done: false,
            streamed: false,
            received_audio: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ResponseStatus {
        if self.audio_done && self.transcript_done {
            ResponseStatus::Done
        } else if self.streamed {
            ResponseStatus::Streaming
        } else {
            ResponseStatus::Created
        }
    }

    /// Audio bytes not yet played
    pub fn pending_audio(&self) -> usize {
        self.audio.len()
    }

    pub fn received_audio(&self) -> usize {
        self.received_audio
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn is_audio_done(&self) -> bool {
        self.audio_done
    }

    pub fn is_transcript_done(&self) -> bool {
        self.transcript_done
    }

    /// Finished and nothing left to play
    fn is_retired(&self) -> bool {
        self.status() == ResponseStatus::Done && self.audio.is_empty()
    }
}

/// All responses of the session, in creation order
#[derive(Debug)]
pub struct ResponseStore {
    responses: VecDeque<Response>,
    max_retained: usize,
}

impl ResponseStore {
    pub fn new(max_retained: usize) -> Self {
        Self {
            responses: VecDeque::new(),
            max_retained: max_retained.max(1),
        }
    }

    /// Register a new response. Returns false if the id is already known.
    pub fn create(&mut self, id: &str) -> bool {
        if self.get(id).is_some() {
            return false;
        }
        self.responses.push_back(Response::new(id.to_string()));
        self.evict_retired();
        true
    }

    pub fn get(&self, id: &str) -> Option<&Response> {
        self.responses.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Response, ProtocolError> {
        self.responses
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ProtocolError::UnknownResponse(id.to_string()))
    }

    pub fn append_audio(&mut self, id: &str, bytes: &[u8]) -> Result<usize, ProtocolError> {
        let response = self.get_mut(id)?;
        response.audio.extend(bytes);
        response.received_audio += bytes.len();
        response.streamed = true;
        Ok(response.audio.len())
    }

    pub fn finish_audio(&mut self, id: &str) -> Result<(), ProtocolError> {
        self.get_mut(id)?.audio_done = true;
        Ok(())
    }

    pub fn append_transcript(&mut self, id: &str, text: &str) -> Result<(), ProtocolError> {
        let response = self.get_mut(id)?;
        response.transcript.push_str(text);
        response.streamed = true;
        Ok(())
    }

    /// Mark the transcript final and return it.
    ///
    /// When the server supplies the full transcript and nothing was streamed,
    /// the supplied text becomes the transcript.
    pub fn finish_transcript(
        &mut self,
        id: &str,
        full: Option<&str>,
    ) -> Result<String, ProtocolError> {
        let response = self.get_mut(id)?;
        if let Some(full) = full {
            if response.transcript.is_empty() {
                response.transcript.push_str(full);
            }
        }
        response.transcript_done = true;
        Ok(response.transcript.clone())
    }

    /// `response.done`: nothing more will arrive for this response
    pub fn finish(&mut self, id: &str) -> Result<(), ProtocolError> {
        let response = self.get_mut(id)?;
        response.audio_done = true;
        response.transcript_done = true;
        Ok(())
    }

    /// Copy audio from the oldest response holding at least `min_bytes` into
    /// `out`. Only one response is read per call. Returns the number of bytes
    /// taken, which are placed at the end of `out`; the front is zero-filled.
    pub fn take_audio(&mut self, out: &mut [u8], min_bytes: usize) -> usize {
        let min_bytes = min_bytes.max(1);
        let Some(response) = self
            .responses
            .iter_mut()
            .find(|r| r.audio.len() >= min_bytes)
        else {
            out.fill(0);
            return 0;
        };

        let available = response.audio.len();
        let take = if available >= out.len() {
            out.len()
        } else {
            // Short frames keep whole samples only
            available - available % min_bytes
        };

        let pad = out.len() - take;
        out[..pad].fill(0);
        for (slot, byte) in out[pad..].iter_mut().zip(response.audio.drain(..take)) {
            *slot = byte;
        }
        take
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.responses.iter().map(|r| r.id.as_str())
    }

    fn evict_retired(&mut self) {
        while self.responses.len() > self.max_retained {
            let Some(index) = self.responses.iter().position(Response::is_retired) else {
                break;
            };
            if let Some(evicted) = self.responses.remove(index) {
                log::debug!("Evicting finished response {}", evicted.id);
            }
        }
    }
}
