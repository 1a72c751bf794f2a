//! dnswhisper: covert pairwise messaging over DNS query names
//!
//! dnswhisper tunnels short encrypted text messages through ordinary DNS
//! queries. Each message is sealed with a per-session symmetric cipher,
//! hex-encoded, split into label-sized chunks, and dispatched as a series
//! of query names; the peer reassembles captured queries back into the
//! ciphertext and decrypts opportunistically. There is no handshake, no
//! acknowledgment, and no retransmission: a lost fragment silently breaks
//! that one message, which is the price of looking like DNS.
//!
//! ## Quick Start
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dnswhisper::{Keyring, Outbound, Session, SessionCipher, UdpResolver};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let secret = Keyring::import("bWF0ZXJpYWw...", "passphrase")?;
//! let cipher = Arc::new(SessionCipher::derive(&secret)?);
//!
//! let session = Session::new(Some(7), "chat.example.com".to_string(), 63);
//! let resolver = Arc::new(UdpResolver::connect("8.8.8.8:53".parse()?).await?);
//!
//! let mut outbound = Outbound::new(session, cipher, resolver);
//! outbound.send_message("hello over port 53").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### As a Command-Line Tool
//!
//! ```bash
//! dnswhisper -d chat.example.com -r 8.8.8.8:53 -i 7 -k channel.key
//! ```
//!
//! ## Architecture
//!
//! ```text
//! stdin ──▶ Outbound ──▶ Codec ──▶ UdpResolver ──▶ [port 53]
//!             │                                        │
//!         SessionCipher ◀──────────────────────────────┘
//!             │                                   UdpPacketSource
//!             ▼                                        │
//! stdout ◀── ReassemblyEngine ◀── Codec ◀──────────────┘
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod envelope;
pub mod inbound;
pub mod keyring;
pub mod outbound;
pub mod session;

// Re-export core types
pub use capture::{CaptureError, CapturedPacket, PacketSource, UdpPacketSource};
pub use codec::{Fragment, ParseError, MAX_LABEL_LEN, MAX_NAME_LEN};
pub use config::ChannelConfig;
pub use crypto::{CryptoError, SessionCipher};
pub use envelope::Envelope;
pub use inbound::{InboundMessage, ReassemblyEngine};
pub use keyring::{Fingerprint, ImportedSecret, KeyImportError, Keyring};
pub use outbound::{
    DeliveryOutcome, Outbound, QueryTransport, RecordType, SendError, TransportError, UdpResolver,
};
pub use session::Session;

/// Channel error types
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Key material could not be imported
    #[error("key import error: {0}")]
    KeyImport(#[from] keyring::KeyImportError),

    /// Key derivation or cipher failure
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    /// Outbound query dispatch failure
    #[error("transport error: {0}")]
    Transport(#[from] outbound::TransportError),

    /// Capture source failure
    #[error("capture error: {0}")]
    Capture(#[from] capture::CaptureError),

    /// Query name was not channel traffic
    #[error("query name parse error: {0}")]
    Parse(#[from] codec::ParseError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
