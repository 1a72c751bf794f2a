//! Outbound pipeline
//!
//! Turns a line of user text into a sequence of DNS queries: envelope →
//! seal → hex chunks → one query per chunk, dispatched in ascending index
//! order. The channel has no acknowledgments; a fragment whose query
//! fails is simply gone, and the peer's reassembly entry for that message
//! never completes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::capture::MAX_PACKET_SIZE;
use crate::codec::{self, MAX_LABEL_LEN, MAX_NAME_LEN};
use crate::crypto::{CryptoError, SessionCipher};
use crate::dns;
use crate::envelope::Envelope;
use crate::session::Session;

/// Step by which the char limit degrades when names run long
const CHAR_LIMIT_STEP: usize = 5;

/// Below this char limit the channel is barely usable
const CHAR_LIMIT_FLOOR: usize = 15;

/// How long to wait for a resolver response before giving up on it
const RESPONSE_WAIT: Duration = Duration::from_secs(2);

/// Record type for an outbound query. The receiver accepts any type; A
/// blends best with ordinary traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Txt,
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 0x0001,
            RecordType::Txt => 0x0010,
        }
    }
}

/// Per-fragment dispatch failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("query send failed: {0}")]
    Send(#[from] std::io::Error),

    #[error("query name not encodable: {0}")]
    BadName(#[from] dns::PacketError),
}

/// Failures preparing a message for dispatch
#[derive(Debug, Error)]
pub enum SendError {
    #[error("envelope serialization failed: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result of one send attempt.
///
/// `Sent` means every fragment was handed to the resolver, never that the
/// peer received anything; `TransportFailed` means at least one fragment
/// was lost on dispatch and the message will stay incomplete on the
/// receiving side. Neither outcome is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { fragments: usize },
    TransportFailed { dispatched: usize, failed: usize },
}

/// Dispatches a single DNS query and surfaces resolution failure.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn query(&self, name: &str, rtype: RecordType) -> Result<(), TransportError>;
}

/// Sends raw DNS query packets to a recursive resolver over UDP.
///
/// Responses carry no channel data; each one is read only so the socket
/// queue drains, then dropped unseen.
pub struct UdpResolver {
    socket: UdpSocket,
}

impl UdpResolver {
    pub async fn connect(resolver: SocketAddr) -> Result<Self, TransportError> {
        let local: SocketAddr = if resolver.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        }
        .parse()
        .unwrap();

        let socket = UdpSocket::bind(local).await?;
        socket.connect(resolver).await?;
        log::info!(
            "resolver transport bound to {} → {}",
            socket.local_addr()?,
            resolver
        );

        Ok(Self { socket })
    }
}

#[async_trait]
impl QueryTransport for UdpResolver {
    async fn query(&self, name: &str, rtype: RecordType) -> Result<(), TransportError> {
        let transaction_id = rand::random::<u16>();
        let packet = dns::build_query_packet(name, transaction_id, rtype.code())?;
        self.socket.send(&packet).await?;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        match timeout(RESPONSE_WAIT, self.socket.recv(&mut buf)).await {
            Ok(Ok(_)) | Err(_) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Send(e)),
        }
    }
}

/// The interactive send half of the channel. Owns the session state; the
/// sequence id advances only after a full dispatch, so a crash mid-send
/// never reuses a sequence for a different message.
pub struct Outbound {
    session: Session,
    cipher: Arc<SessionCipher>,
    transport: Arc<dyn QueryTransport>,
}

impl Outbound {
    pub fn new(
        session: Session,
        cipher: Arc<SessionCipher>,
        transport: Arc<dyn QueryTransport>,
    ) -> Self {
        Self {
            session,
            cipher,
            transport,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Encrypt, fragment, and dispatch one message.
    pub async fn send_message(&mut self, text: &str) -> Result<DeliveryOutcome, SendError> {
        let envelope = Envelope::new(self.session.local_id(), text);
        let plaintext = envelope.to_json()?;

        self.fit_char_limit();
        let ciphertext = self.cipher.seal(&plaintext)?;
        let chunks = codec::encode_chunks(&ciphertext, self.session.char_limit());
        let total = chunks.len() as u32;
        let seq_id = self.session.next_seq_id();

        let mut dispatched = 0usize;
        let mut failed = 0usize;
        for (index, chunk) in chunks.iter().enumerate() {
            let name = codec::build_query_name(
                self.session.local_id(),
                seq_id,
                index as u32,
                total,
                chunk,
                self.session.domain_suffix(),
            );
            log::debug!("querying {}", name);

            match self.transport.query(&name, RecordType::A).await {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    // no retransmission: the peer's entry for this seq id
                    // just never completes
                    log::debug!("fragment {}/{} dropped: {}", index + 1, total, e);
                    failed += 1;
                }
            }
        }

        self.session.advance_seq();

        Ok(if failed == 0 {
            DeliveryOutcome::Sent {
                fragments: dispatched,
            }
        } else {
            DeliveryOutcome::TransportFailed { dispatched, failed }
        })
    }

    /// Shrink the char limit until the worst-case query name fits the
    /// 253-byte budget. Dropping below the floor is reported but not
    /// fatal; the session continues degraded.
    fn fit_char_limit(&mut self) {
        let mut limit = self.session.char_limit().min(MAX_LABEL_LEN);
        while projected_name_len(&self.session, limit) > MAX_NAME_LEN && limit > CHAR_LIMIT_STEP {
            limit -= CHAR_LIMIT_STEP;
            log::debug!("char limit lowered to {}", limit);
        }

        if limit < CHAR_LIMIT_FLOOR {
            log::warn!(
                "available name length is getting low (char limit {}); consider reconnecting with a shorter domain suffix",
                limit
            );
        }

        if limit != self.session.char_limit() {
            self.session.set_char_limit(limit);
        }
    }
}

/// Worst-case name length for the session's current fields, assuming a
/// two-digit index and a four-digit chunk total.
fn projected_name_len(session: &Session, char_limit: usize) -> usize {
    format!(
        "{}.{}.99.1000..{}",
        session.local_id(),
        session.next_seq_id(),
        session.domain_suffix()
    )
    .len()
        + char_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::Keyring;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::sync::Mutex;

    struct RecordingTransport {
        names: Mutex<Vec<String>>,
        fail_from: Option<usize>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                names: Mutex::new(Vec::new()),
                fail_from: None,
            })
        }

        fn failing_from(index: usize) -> Arc<Self> {
            Arc::new(Self {
                names: Mutex::new(Vec::new()),
                fail_from: Some(index),
            })
        }

        fn names(&self) -> Vec<String> {
            self.names.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryTransport for RecordingTransport {
        async fn query(&self, name: &str, _rtype: RecordType) -> Result<(), TransportError> {
            let mut names = self.names.lock().unwrap();
            if let Some(fail_from) = self.fail_from {
                if names.len() >= fail_from {
                    return Err(TransportError::Send(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "nxdomain",
                    )));
                }
            }
            names.push(name.to_string());
            Ok(())
        }
    }

    fn test_cipher() -> Arc<SessionCipher> {
        let material = BASE64.encode(vec![7u8; 64]);
        let secret = Keyring::import(&material, "pass").unwrap();
        Arc::new(SessionCipher::derive(&secret).unwrap())
    }

    fn test_outbound(transport: Arc<RecordingTransport>, suffix: &str) -> Outbound {
        let session = Session::new(Some(7), suffix.to_string(), 63);
        Outbound::new(session, test_cipher(), transport)
    }

    #[tokio::test]
    async fn test_fragments_ascend_and_fit_budget() {
        let transport = RecordingTransport::new();
        let mut outbound = test_outbound(Arc::clone(&transport), "chat.example.com");
        let seq = outbound.session().next_seq_id();

        let outcome = outbound
            .send_message("a somewhat longer message that needs several fragments to travel")
            .await
            .unwrap();

        let names = transport.names();
        assert!(matches!(outcome, DeliveryOutcome::Sent { fragments } if fragments == names.len()));
        assert!(names.len() > 1);

        for (i, name) in names.iter().enumerate() {
            assert!(name.len() <= MAX_NAME_LEN);
            assert!(name.split('.').all(|l| l.len() <= MAX_LABEL_LEN));
            let fragment = codec::parse_query_name(name).unwrap();
            assert_eq!(fragment.sender_id, 7);
            assert_eq!(fragment.seq_id, seq);
            assert_eq!(fragment.index, i as u32);
            assert_eq!(fragment.total, names.len() as u32);
        }
    }

    #[tokio::test]
    async fn test_seq_advances_after_dispatch() {
        let transport = RecordingTransport::new();
        let mut outbound = test_outbound(Arc::clone(&transport), "chat.example.com");
        let first = outbound.session().next_seq_id();

        outbound.send_message("one").await.unwrap();
        assert_eq!(outbound.session().next_seq_id(), first + 1);

        outbound.send_message("two").await.unwrap();
        assert_eq!(outbound.session().next_seq_id(), first + 2);
    }

    #[tokio::test]
    async fn test_transport_failures_are_swallowed() {
        let transport = RecordingTransport::failing_from(1);
        let mut outbound = test_outbound(Arc::clone(&transport), "chat.example.com");
        let first = outbound.session().next_seq_id();

        let outcome = outbound
            .send_message("long enough to split into more than one fragment for sure")
            .await
            .unwrap();

        match outcome {
            DeliveryOutcome::TransportFailed { dispatched, failed } => {
                assert_eq!(dispatched, 1);
                assert!(failed >= 1);
            }
            other => panic!("expected TransportFailed, got {:?}", other),
        }
        // a failed dispatch still consumes the sequence id
        assert_eq!(outbound.session().next_seq_id(), first + 1);
    }

    #[tokio::test]
    async fn test_char_limit_shrinks_for_long_suffix() {
        let long_suffix = format!(
            "{}.{}.{}.example.com",
            "x".repeat(60),
            "y".repeat(60),
            "z".repeat(60)
        );
        let transport = RecordingTransport::new();
        let mut outbound = test_outbound(Arc::clone(&transport), &long_suffix);

        outbound.send_message("hello").await.unwrap();

        assert!(outbound.session().char_limit() < 63);
        for name in transport.names() {
            assert!(name.len() <= MAX_NAME_LEN);
        }
    }

    #[tokio::test]
    async fn test_short_suffix_keeps_full_limit() {
        let transport = RecordingTransport::new();
        let mut outbound = test_outbound(Arc::clone(&transport), "ex.io");

        outbound.send_message("hi").await.unwrap();
        assert_eq!(outbound.session().char_limit(), 63);
    }
}
