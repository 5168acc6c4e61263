use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use strum::Display;

use crate::correlation::PendingRequests;
use crate::response::ResponseStore;

const TRANSCRIPT_HISTORY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Per-session state shared between the dispatcher, tool invocations and
/// the playback callback
#[derive(Debug)]
pub struct SessionState {
    responses: Arc<Mutex<ResponseStore>>,
    pending: PendingRequests,
    transcripts: Mutex<VecDeque<Utterance>>,
    invoked_calls: Mutex<HashSet<String>>,
    user_speaking: AtomicBool,
    tool_calls: AtomicUsize,
}

impl SessionState {
    pub fn new(max_retained_responses: usize) -> Self {
        Self {
            responses: Arc::new(Mutex::new(ResponseStore::new(max_retained_responses))),
            pending: PendingRequests::new(),
            transcripts: Mutex::new(VecDeque::with_capacity(TRANSCRIPT_HISTORY)),
            invoked_calls: Mutex::new(HashSet::new()),
            user_speaking: AtomicBool::new(false),
            tool_calls: AtomicUsize::new(0),
        }
    }

    /// Handle for the playback side
    pub fn responses(&self) -> Arc<Mutex<ResponseStore>> {
        Arc::clone(&self.responses)
    }

    pub fn lock_responses(&self) -> MutexGuard<'_, ResponseStore> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn record_utterance(&self, speaker: Speaker, text: &str) {
        let mut transcripts = self.transcripts.lock().unwrap_or_else(|e| e.into_inner());
        if transcripts.len() == TRANSCRIPT_HISTORY {
            transcripts.pop_front();
        }
        transcripts.push_back(Utterance {
            speaker,
            text: text.to_string(),
            at: Utc::now(),
        });
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        let transcripts = self.transcripts.lock().unwrap_or_else(|e| e.into_inner());
        transcripts.iter().cloned().collect()
    }

    /// Returns true the first time a call id is seen
    pub fn claim_call(&self, call_id: &str) -> bool {
        let mut calls = self.invoked_calls.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = calls.insert(call_id.to_string());
        if fresh {
            self.tool_calls.fetch_add(1, Ordering::AcqRel);
        }
        fresh
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls.load(Ordering::Acquire)
    }

    pub fn set_user_speaking(&self, speaking: bool) {
        self.user_speaking.store(speaking, Ordering::Release);
    }

    pub fn is_user_speaking(&self) -> bool {
        self.user_speaking.load(Ordering::Acquire)
    }

    /// Ambient state handed to tools that work on the session rather than
    /// on literal call arguments
    pub fn snapshot(&self) -> Value {
        let utterances = self.utterances();
        let last_user = utterances
            .iter()
            .rev()
            .find(|u| u.speaker == Speaker::User)
            .map(|u| u.text.clone());
        serde_json::json!({
            "user_speaking": self.is_user_speaking(),
            "last_user_transcript": last_user,
            "utterances": utterances,
        })
    }
}
