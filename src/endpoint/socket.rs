//! Async UDP socket carrying CoAP datagrams.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::core::DEFAULT_MAX_MESSAGE_SIZE;

/// Default receive buffer size.
///
/// Larger than any acceptable message so oversized datagrams are seen
/// whole and can be rejected instead of silently truncated.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// UDP socket with its receive buffer.
#[derive(Debug)]
pub struct CoapSocket {
    socket: UdpSocket,
    recv_buffer: Vec<u8>,
    max_message_size: usize,
}

impl CoapSocket {
    /// Bind a socket with default buffer sizes.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        CoapSocketBuilder::new().bind(addr).await
    }

    /// Local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Largest datagram this endpoint sends or accepts.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Send one datagram.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > self.max_message_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "datagram of {} bytes exceeds {}",
                    data.len(),
                    self.max_message_size
                ),
            ));
        }
        self.socket.send_to(data, addr).await
    }

    /// Receive one datagram and its sender.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }
}

/// Builder for [`CoapSocket`].
#[derive(Debug, Clone)]
pub struct CoapSocketBuilder {
    recv_buffer_size: usize,
    max_message_size: usize,
}

impl Default for CoapSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoapSocketBuilder {
    /// Create a builder with default sizes.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Set the largest datagram to send.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Bind to `addr`.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<CoapSocket> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(self.from_socket(socket))
    }

    /// Wrap an existing socket.
    pub fn from_socket(self, socket: UdpSocket) -> CoapSocket {
        CoapSocket {
            socket,
            // A buffer no larger than the message limit would truncate
            // oversized datagrams into plausible ones.
            recv_buffer: vec![0u8; self.recv_buffer_size.max(self.max_message_size + 1)],
            max_message_size: self.max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_bind() {
        let socket = CoapSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_socket_send_recv() {
        let mut server = CoapSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let client = CoapSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let data = [0x40, 0x00, 0x00, 0x01];
        client
            .send_to(&data, server.local_addr().unwrap())
            .await
            .unwrap();

        let (received, from) = server.recv_from().await.unwrap();
        assert_eq!(received, data);
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_send_rejects_oversized() {
        let socket = CoapSocketBuilder::new()
            .max_message_size(16)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let err = socket
            .send_to(&[0u8; 17], socket.local_addr().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_builder() {
        let builder = CoapSocketBuilder::new()
            .recv_buffer_size(4096)
            .max_message_size(1024);
        assert_eq!(builder.recv_buffer_size, 4096);
        assert_eq!(builder.max_message_size, 1024);
    }
}
