//! Session state
//!
//! Who we are on the channel, where query names point, and the next
//! outbound sequence id. Constructed once from validated configuration;
//! only the outbound pipeline mutates it.

use rand::Rng;

use crate::codec::MAX_LABEL_LEN;

/// Smallest valid participant id
pub const MIN_LOCAL_ID: u32 = 1;

/// Largest valid participant id
pub const MAX_LOCAL_ID: u32 = 99;

#[derive(Debug, Clone)]
pub struct Session {
    local_id: u32,
    domain_suffix: String,
    char_limit: usize,
    next_seq_id: u64,
}

impl Session {
    /// Create a session, picking a random id and a random starting
    /// sequence when none is configured.
    pub fn new(local_id: Option<u32>, domain_suffix: String, char_limit: usize) -> Self {
        let mut rng = rand::thread_rng();
        let local_id = local_id.unwrap_or_else(|| rng.gen_range(MIN_LOCAL_ID..=MAX_LOCAL_ID));

        Self {
            local_id,
            domain_suffix,
            char_limit: char_limit.clamp(1, MAX_LABEL_LEN),
            next_seq_id: rng.gen_range(0..1000),
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn domain_suffix(&self) -> &str {
        &self.domain_suffix
    }

    /// Active per-chunk character limit.
    pub fn char_limit(&self) -> usize {
        self.char_limit
    }

    pub fn next_seq_id(&self) -> u64 {
        self.next_seq_id
    }

    /// Lower the active char limit (adaptive sizing).
    pub(crate) fn set_char_limit(&mut self, limit: usize) {
        self.char_limit = limit;
    }

    /// Advance the sequence id after a full dispatch.
    pub(crate) fn advance_seq(&mut self) {
        self.next_seq_id += 1;
    }
}
