//! UDP datagram endpoint with bounded receives and idempotent close

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::SockRef;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::MAX_DGRAM;

/// A UDP socket bound to a single local address, used by exactly one connection
pub struct Endpoint {
    socket: UdpSocket,
    closed: AtomicBool,
}

impl Endpoint {
    /// Bind to `addr`. Pass port `0` for an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            closed: AtomicBool::new(false),
        })
    }

    /// Local address actually bound (useful after binding to port 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Best-effort send; errors are returned to the caller for logging, never panics
    pub async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, peer).await
    }

    /// Receive a datagram with no timeout; used by the listener, which blocks
    /// indefinitely waiting for the next SYN.
    pub async fn recv_any(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DGRAM];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, peer))
    }

    /// Receive a datagram, bounded by `timeout_dur`. `None` means the timeout elapsed.
    pub async fn recv_from(
        &self,
        timeout_dur: Duration,
    ) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; MAX_DGRAM];
        match timeout(timeout_dur, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, peer))) => {
                buf.truncate(len);
                Ok(Some((buf, peer)))
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Idempotent close: attempts a best-effort half-shutdown before releasing the socket
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sock_ref = SockRef::from(&self.socket);
        // Unconnected UDP sockets commonly reject shutdown(); ignore the error.
        let _ = sock_ref.shutdown(std::net::Shutdown::Both);
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}
