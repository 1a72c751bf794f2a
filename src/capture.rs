//! Packet capture seam
//!
//! The reassembly engine consumes raw packets from a [`PacketSource`]; the
//! shipped source is a UDP socket bound on the DNS port. Every poll
//! carries a fixed timeout so the engine can observe its shutdown flag
//! between polls instead of blocking forever on an idle network.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Maximum UDP DNS packet size (RFC 1035)
pub const MAX_PACKET_SIZE: usize = 512;

/// Capture source failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// A raw packet pulled off the capture source.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub data: Vec<u8>,
    pub src: SocketAddr,
    pub dst_port: u16,
}

/// Source of raw traffic on the DNS port.
///
/// Implementations filter by port; the engine does the protocol-level
/// filtering. A libpcap-style promiscuous source fits behind this trait
/// the same way the UDP socket source does.
#[async_trait]
pub trait PacketSource: Send {
    /// Wait up to `wait` for the next packet; `None` on timeout.
    async fn poll_packet(&mut self, wait: Duration)
        -> Result<Option<CapturedPacket>, CaptureError>;
}

/// UDP socket capture bound on the DNS port.
pub struct UdpPacketSource {
    socket: UdpSocket,
    local_port: u16,
    buf: Vec<u8>,
}

impl UdpPacketSource {
    pub async fn bind(addr: SocketAddr) -> Result<Self, CaptureError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        log::info!("capture source listening on {}", local_addr);

        Ok(Self {
            socket,
            local_port: local_addr.port(),
            buf: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

#[async_trait]
impl PacketSource for UdpPacketSource {
    async fn poll_packet(
        &mut self,
        wait: Duration,
    ) -> Result<Option<CapturedPacket>, CaptureError> {
        match timeout(wait, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, src))) => Ok(Some(CapturedPacket {
                data: self.buf[..len].to_vec(),
                src,
                dst_port: self.local_port,
            })),
            Ok(Err(e)) => Err(CaptureError::Io(e)),
            Err(_) => Ok(None),
        }
    }
}
