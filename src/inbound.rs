//! Inbound reassembly engine
//!
//! Continuously consumes captured DNS query packets, buffers fragments
//! per `(sender, seq)` key, and on completion decrypts and emits the
//! message. Each key moves through exactly one lifecycle:
//!
//! ```text
//! Empty → Accumulating → Complete → Emitted
//! ```
//!
//! The first fragment creates the entry and fixes the expected total;
//! duplicates at an index overwrite; completion fires exactly when every
//! index is present. A completed entry is decrypted once, successfully or
//! not, and never touched again, so a replayed or late fragment cannot
//! produce duplicate output. The engine owns its map exclusively and
//! hands finished messages to the display path over a channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::capture::{CapturedPacket, PacketSource};
use crate::codec::{self, Fragment};
use crate::crypto::SessionCipher;
use crate::dns;
use crate::envelope::{self, Envelope};

/// Per-poll capture timeout; shutdown is observed between polls
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Reassembly entries older than this are swept
const ENTRY_TTL: Duration = Duration::from_secs(600);

/// Hard cap on tracked (sender, seq) keys
const MAX_ENTRIES: usize = 1024;

/// How often the stale-entry sweep runs
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A fully decoded inbound message, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub timestamp: u64,
    pub sender_id: u32,
    pub text: String,
}

impl InboundMessage {
    /// Console form: `HH:MM:SS [<sender>] <text>`
    pub fn display_line(&self) -> String {
        format!(
            "{} [{}] {}",
            envelope::format_clock(self.timestamp),
            self.sender_id,
            self.text
        )
    }
}

type ReassemblyKey = (u32, u64);

#[derive(Debug)]
struct ReassemblyEntry {
    total: u32,
    chunks: BTreeMap<u32, String>,
    emitted: bool,
    first_seen: Instant,
}

impl ReassemblyEntry {
    fn new(total: u32) -> Self {
        Self {
            total,
            chunks: BTreeMap::new(),
            emitted: false,
            first_seen: Instant::now(),
        }
    }

    fn complete(&self) -> bool {
        self.chunks.len() == self.total as usize
    }

    /// Chunks concatenated in ascending integer index order.
    fn compiled(&self) -> String {
        codec::concat_chunks(self.chunks.values().map(String::as_str))
    }
}

#[derive(Debug, Error)]
enum EmitError {
    #[error("hex decode failed")]
    Decode,

    #[error("decryption failed")]
    Decrypt,

    #[error("envelope did not parse")]
    Envelope,
}

/// The receive half of the channel, run as its own task.
pub struct ReassemblyEngine<S> {
    source: S,
    cipher: Arc<SessionCipher>,
    local_id: u32,
    dns_port: u16,
    entries: HashMap<ReassemblyKey, ReassemblyEntry>,
    delivery: mpsc::UnboundedSender<InboundMessage>,
    shutdown: watch::Receiver<bool>,
    last_sweep: Instant,
}

impl<S: PacketSource> ReassemblyEngine<S> {
    pub fn new(
        source: S,
        cipher: Arc<SessionCipher>,
        local_id: u32,
        dns_port: u16,
        delivery: mpsc::UnboundedSender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            cipher,
            local_id,
            dns_port,
            entries: HashMap::new(),
            delivery,
            shutdown,
            last_sweep: Instant::now(),
        }
    }

    /// Run until the shutdown flag flips. Every capture poll is bounded,
    /// so the flag is observed promptly even on an idle network.
    pub async fn run(mut self) {
        log::info!("reassembly engine started (local id {})", self.local_id);

        while !*self.shutdown.borrow() {
            match self.source.poll_packet(POLL_TIMEOUT).await {
                Ok(Some(packet)) => self.on_packet(&packet),
                Ok(None) => {}
                Err(e) => {
                    // don't spin on a broken source
                    log::error!("capture error: {}", e);
                    tokio::time::sleep(POLL_TIMEOUT).await;
                }
            }

            if self.last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep();
            }
        }

        log::info!("reassembly engine stopped");
    }

    /// Route one captured packet. Anything that is not a channel query is
    /// dropped without comment; the capture filter sees plenty of
    /// ordinary DNS traffic.
    pub fn on_packet(&mut self, packet: &CapturedPacket) {
        if packet.dst_port != self.dns_port {
            return;
        }

        let name = match dns::extract_query_name(&packet.data) {
            Ok(name) => name,
            Err(_) => return,
        };

        let fragment = match codec::parse_query_name(&name) {
            Ok(fragment) => fragment,
            Err(_) => return,
        };

        self.on_fragment(fragment);
    }

    fn on_fragment(&mut self, fragment: Fragment) {
        if fragment.sender_id == self.local_id {
            // our own queries come back through the capture source
            return;
        }

        let key = (fragment.sender_id, fragment.seq_id);
        if self.entries.len() >= MAX_ENTRIES && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }

        let ready = {
            let entry = self.entries.entry(key).or_insert_with(|| {
                log::debug!(
                    "new message sequence {} from user {}",
                    fragment.seq_id,
                    fragment.sender_id
                );
                ReassemblyEntry::new(fragment.total)
            });

            if entry.emitted {
                return;
            }

            log::debug!(
                "received part {}/{} for msg sequence {} from user {}",
                fragment.index + 1,
                entry.total,
                fragment.seq_id,
                fragment.sender_id
            );
            entry.chunks.insert(fragment.index, fragment.payload);
            entry.complete()
        };

        if ready {
            self.emit(key);
        }
    }

    /// Decrypt and deliver a completed entry; exactly one attempt per key.
    fn emit(&mut self, key: ReassemblyKey) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.emitted = true;
        let compiled = entry.compiled();
        let (sender_id, seq_id) = key;

        match decode_and_open(&self.cipher, &compiled) {
            Ok(envelope) => {
                let _ = self.delivery.send(InboundMessage {
                    timestamp: envelope.t,
                    sender_id: envelope.f,
                    text: envelope.m,
                });
            }
            Err(e) => {
                log::warn!(
                    "received a message that could not be decrypted (user {}, sequence {}): {}",
                    sender_id,
                    seq_id,
                    e
                );
            }
        }
    }

    /// Drop entries older than the TTL.
    fn sweep(&mut self) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.first_seen.elapsed() < ENTRY_TTL);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            log::debug!("swept {} stale reassembly entries", dropped);
        }
        self.last_sweep = Instant::now();
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.first_seen)
            .map(|(key, _)| *key)
        {
            log::debug!("reassembly buffer full, evicting {:?}", key);
            self.entries.remove(&key);
        }
    }

    #[cfg(test)]
    fn entry(&self, key: &ReassemblyKey) -> Option<&ReassemblyEntry> {
        self.entries.get(key)
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

fn decode_and_open(cipher: &SessionCipher, compiled: &str) -> Result<Envelope, EmitError> {
    let ciphertext = hex::decode(compiled).map_err(|_| EmitError::Decode)?;
    let plaintext = cipher.open(&ciphertext).map_err(|_| EmitError::Decrypt)?;
    Envelope::from_json(&plaintext).map_err(|_| EmitError::Envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::keyring::Keyring;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    struct NullSource;

    #[async_trait]
    impl PacketSource for NullSource {
        async fn poll_packet(
            &mut self,
            _wait: Duration,
        ) -> Result<Option<CapturedPacket>, CaptureError> {
            Ok(None)
        }
    }

    fn cipher(material_byte: u8) -> Arc<SessionCipher> {
        let material = BASE64.encode(vec![material_byte; 64]);
        let secret = Keyring::import(&material, "pass").unwrap();
        Arc::new(SessionCipher::derive(&secret).unwrap())
    }

    fn engine(
        cipher: Arc<SessionCipher>,
        local_id: u32,
    ) -> (
        ReassemblyEngine<NullSource>,
        mpsc::UnboundedReceiver<InboundMessage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            ReassemblyEngine::new(NullSource, cipher, local_id, 53, tx, shutdown_rx),
            rx,
        )
    }

    /// Fragments for `text` as sender `sender_id`, sealed under `cipher`.
    fn fragments_for(
        cipher: &SessionCipher,
        sender_id: u32,
        seq_id: u64,
        text: &str,
        char_limit: usize,
    ) -> Vec<Fragment> {
        let envelope = Envelope {
            t: 1421148145,
            f: sender_id,
            m: text.to_string(),
        };
        let ciphertext = cipher.seal(&envelope.to_json().unwrap()).unwrap();
        let chunks = codec::encode_chunks(&ciphertext, char_limit);
        let total = chunks.len() as u32;
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Fragment {
                sender_id,
                seq_id,
                index: index as u32,
                total,
                payload,
            })
            .collect()
    }

    #[test]
    fn test_in_order_reassembly_emits_message() {
        let key = cipher(1);
        let (mut engine, mut rx) = engine(Arc::clone(&key), 5);

        for fragment in fragments_for(&key, 9, 412, "A test", 40) {
            engine.on_fragment(fragment);
        }

        let message = rx.try_recv().unwrap();
        assert_eq!(message.sender_id, 9);
        assert_eq!(message.timestamp, 1421148145);
        assert_eq!(message.text, "A test");
    }

    #[test]
    fn test_order_independent_reassembly() {
        let key = cipher(1);

        // every rotation of the fragment list produces the same message
        let fragments = fragments_for(&key, 9, 412, "order independent payload", 20);
        assert!(fragments.len() >= 3);

        for rotation in 0..fragments.len() {
            let (mut engine, mut rx) = engine(Arc::clone(&key), 5);
            let mut shuffled = fragments.clone();
            shuffled.rotate_left(rotation);
            shuffled.reverse();

            for fragment in shuffled {
                engine.on_fragment(fragment);
            }

            assert_eq!(rx.try_recv().unwrap().text, "order independent payload");
        }
    }

    #[test]
    fn test_integer_index_ordering() {
        // indexes 2, 10 concatenate numerically, not lexically
        let mut entry = ReassemblyEntry::new(11);
        for index in 0..11u32 {
            entry.chunks.insert(index, format!("{:02}", index));
        }
        assert!(entry.complete());
        assert_eq!(
            entry.compiled(),
            "0001020304050607080910"
        );
    }

    #[test]
    fn test_duplicate_index_overwrites() {
        let key = cipher(1);
        let (mut engine, mut rx) = engine(Arc::clone(&key), 5);

        let fragments = fragments_for(&key, 9, 412, "duplicated", 40);
        let first = fragments[0].clone();

        // corrupted copy of part 0 arrives first, good copy overwrites it
        let mut corrupted = first.clone();
        corrupted.payload = "00".repeat(first.payload.len() / 2);
        engine.on_fragment(corrupted);
        for fragment in fragments {
            engine.on_fragment(fragment);
        }

        assert_eq!(rx.try_recv().unwrap().text, "duplicated");
    }

    #[test]
    fn test_loopback_fragments_are_discarded() {
        let key = cipher(1);
        let (mut engine, mut rx) = engine(Arc::clone(&key), 9);

        for fragment in fragments_for(&key, 9, 412, "talking to myself", 40) {
            engine.on_fragment(fragment);
        }

        assert_eq!(engine.entry_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emission_is_idempotent() {
        let key = cipher(1);
        let (mut engine, mut rx) = engine(Arc::clone(&key), 5);

        let fragments = fragments_for(&key, 9, 412, "once only", 40);
        for fragment in fragments.clone() {
            engine.on_fragment(fragment);
        }
        assert!(rx.try_recv().is_ok());

        // replay the whole set: no further output, no state change
        for fragment in fragments {
            engine.on_fragment(fragment);
        }
        assert!(rx.try_recv().is_err());
        assert!(engine.entry(&(9, 412)).unwrap().emitted);
    }

    #[test]
    fn test_wrong_key_warns_once_and_never_delivers() {
        let sender_key = cipher(1);
        let (mut engine, mut rx) = engine(cipher(2), 5);

        let fragments = fragments_for(&sender_key, 9, 412, "unreadable", 40);
        for fragment in fragments.clone() {
            engine.on_fragment(fragment);
        }

        assert!(rx.try_recv().is_err());
        assert!(engine.entry(&(9, 412)).unwrap().emitted);

        // late duplicates do not retrigger the decrypt attempt
        for fragment in fragments {
            engine.on_fragment(fragment);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_incomplete_entry_stays_pending() {
        let key = cipher(1);
        let (mut engine, mut rx) = engine(Arc::clone(&key), 5);

        let mut fragments = fragments_for(&key, 9, 412, "missing a piece of this one", 20);
        assert!(fragments.len() >= 2);
        fragments.remove(1);

        for fragment in fragments {
            engine.on_fragment(fragment);
        }

        assert!(rx.try_recv().is_err());
        let entry = engine.entry(&(9, 412)).unwrap();
        assert!(!entry.emitted);
        assert!(!entry.complete());
    }

    #[test]
    fn test_malformed_packets_are_ignored() {
        let key = cipher(1);
        let (mut engine, mut rx) = engine(Arc::clone(&key), 5);
        let src = "127.0.0.1:9999".parse().unwrap();

        for data in [
            Vec::new(),
            vec![0xffu8; 4],
            vec![0x00u8; 64],
            b"completely arbitrary bytes on port 53".to_vec(),
        ] {
            engine.on_packet(&CapturedPacket {
                data,
                src,
                dst_port: 53,
            });
        }

        // a well-formed DNS query that is not channel traffic
        let packet = dns::build_query_packet("www.example.com", 7, 0x0001).unwrap();
        engine.on_packet(&CapturedPacket {
            data: packet,
            src,
            dst_port: 53,
        });

        assert_eq!(engine.entry_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_other_ports_are_ignored() {
        let key = cipher(1);
        let (mut engine, _rx) = engine(Arc::clone(&key), 5);
        let src = "127.0.0.1:9999".parse().unwrap();

        let fragment = &fragments_for(&key, 9, 412, "hi", 40)[0];
        let name = codec::build_query_name(
            fragment.sender_id,
            fragment.seq_id,
            fragment.index,
            fragment.total,
            &fragment.payload,
            "example.com",
        );
        let packet = dns::build_query_packet(&name, 7, 0x0001).unwrap();

        engine.on_packet(&CapturedPacket {
            data: packet,
            src,
            dst_port: 8080,
        });
        assert_eq!(engine.entry_count(), 0);
    }

    #[test]
    fn test_capacity_eviction() {
        let key = cipher(1);
        let (mut engine, _rx) = engine(Arc::clone(&key), 5);

        for seq in 0..(MAX_ENTRIES as u64 + 10) {
            engine.on_fragment(Fragment {
                sender_id: 9,
                seq_id: seq,
                index: 0,
                total: 2,
                payload: "ab".to_string(),
            });
        }

        assert!(engine.entry_count() <= MAX_ENTRIES);
        // the newest key always survives an eviction
        assert!(engine.entry(&(9, MAX_ENTRIES as u64 + 9)).is_some());
    }

    #[test]
    fn test_sweep_drops_aged_entries() {
        let key = cipher(1);
        let (mut engine, _rx) = engine(Arc::clone(&key), 5);

        engine.on_fragment(Fragment {
            sender_id: 9,
            seq_id: 1,
            index: 0,
            total: 2,
            payload: "ab".to_string(),
        });
        assert_eq!(engine.entry_count(), 1);

        // age the entry past the TTL by hand
        engine
            .entries
            .get_mut(&(9, 1))
            .unwrap()
            .first_seen = Instant::now() - ENTRY_TTL - Duration::from_secs(1);
        engine.sweep();

        assert_eq!(engine.entry_count(), 0);
    }
}
