//! Message envelope
//!
//! The logical message unit carried inside the ciphertext: unix timestamp,
//! sender id, and the message body, serialized as compact JSON before
//! encryption. A ciphertext that opens but does not parse as an envelope
//! is treated downstream as a likely wrong-key decode.

use chrono::{Local, LocalResult, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One chat message, before encryption / after decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unix timestamp (seconds)
    pub t: u64,

    /// Sender's numeric id
    pub f: u32,

    /// Message body
    pub m: String,
}

impl Envelope {
    pub fn new(sender_id: u32, text: impl Into<String>) -> Self {
        Self {
            t: unix_now(),
            f: sender_id,
            m: text.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Console form: `HH:MM:SS [<sender>] <text>`
    pub fn display_line(&self) -> String {
        format!("{} [{}] {}", format_clock(self.t), self.f, self.m)
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Local-time clock string for a unix timestamp.
pub fn format_clock(ts: u64) -> String {
    match Local.timestamp_opt(ts as i64, 0) {
        LocalResult::Single(dt) => dt.format("%H:%M:%S").to_string(),
        _ => format!("@{}", ts),
    }
}
