//! Per-connection reliability engine: handshake, data transfer, teardown
//!
//! Each [`Connection`] owns exactly one [`Endpoint`] and is driven
//! sequentially by a single task; there is no shared mutable state between
//! connections and therefore nothing to lock.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::config::{
    HANDSHAKE_ATTEMPTS, HANDSHAKE_LINGER, IDLE_TIMEOUT, SR_SEGMENT_ATTEMPTS, SW_SEGMENT_ATTEMPTS,
    TEARDOWN_WAIT, WINDOW_SIZE,
};
use crate::endpoint::Endpoint;
use crate::error::{ProtocolError, Result};
use crate::filestore::{ChunkReader, ChunkWriter};
use crate::packet::{
    OperationDescriptor, PacketHeader, RecoveryMode, ACK, FIN, FNAME, OP, PSH, SYN,
};
use crate::reliable::{ReliableConfig, RtoEstimator};

/// True if `a` precedes `b` in TCP's wraparound-aware sequence ordering
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

fn random_isn() -> u32 {
    rand::thread_rng().gen_range(0..=1000)
}

/// Coarse lifecycle state, tracked mainly so [`Connection::close`] is idempotent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Established,
    Closed,
}

struct InFlightSegment {
    data: Vec<u8>,
    sent_at: Instant,
    attempts: u32,
}

/// One reliable, ordered, point-to-point connection over an unreliable datagram socket
pub struct Connection {
    endpoint: Endpoint,
    peer: SocketAddr,
    /// Next sequence number this side will send
    local_seq: u32,
    /// Cumulative next-expected-byte advertised back to the peer
    remote_seq: u32,
    mode: RecoveryMode,
    operation: crate::packet::Operation,
    filename: String,
    rto: RtoEstimator,
    state: ConnState,
}

impl Connection {
    /// Client-side handshake: SYN, await SYN-ACK, final ACK, then reliably send
    /// the operation descriptor and file name.
    pub async fn connect(
        bind_addr: SocketAddr,
        server_addr: SocketAddr,
        operation: crate::packet::Operation,
        mode: RecoveryMode,
        filename: &str,
    ) -> Result<Self> {
        let endpoint = Endpoint::bind(bind_addr).await?;
        let mut rto = RtoEstimator::new(ReliableConfig::default());
        let isn_c = random_isn();

        let mut attempts = 0u32;
        let (server_isn, peer) = loop {
            attempts += 1;
            if attempts > HANDSHAKE_ATTEMPTS {
                return Err(ProtocolError::HandshakeFailed(
                    "no SYN-ACK received".into(),
                ));
            }
            let syn = PacketHeader::new(isn_c, 0, SYN)?;
            endpoint.send_to(&syn.encode(&[]), server_addr).await?;

            match endpoint.recv_from(rto.rto()).await? {
                Some((buf, from)) if from.ip() == server_addr.ip() => {
                    if let Ok((h, _)) = PacketHeader::parse(&buf) {
                        if h.has(SYN | ACK) && h.ack == isn_c.wrapping_add(1) {
                            break (h.seq, from);
                        }
                    }
                }
                Some(_) => continue,
                None => {
                    rto.backoff();
                    continue;
                }
            }
        };

        let mut conn = Self {
            endpoint,
            peer,
            local_seq: isn_c.wrapping_add(1),
            remote_seq: server_isn.wrapping_add(1),
            mode,
            operation,
            filename: filename.to_string(),
            rto,
            state: ConnState::Established,
        };

        let final_ack = PacketHeader::new(conn.local_seq, conn.remote_seq, ACK)?;
        conn.endpoint
            .send_to(&final_ack.encode(&[]), conn.peer)
            .await?;

        // Linger: re-ACK duplicate SYN-ACKs in case our final ACK was lost.
        let linger_deadline = Instant::now() + HANDSHAKE_LINGER;
        loop {
            let remaining = linger_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match conn.endpoint.recv_from(remaining).await? {
                Some((buf, from)) if from == conn.peer => {
                    if let Ok((h, _)) = PacketHeader::parse(&buf) {
                        if h.has(SYN | ACK) {
                            conn.endpoint
                                .send_to(&final_ack.encode(&[]), conn.peer)
                                .await?;
                        }
                    }
                }
                _ => break,
            }
        }

        debug!(peer = %conn.peer, "handshake complete (client)");

        let desc = OperationDescriptor { op: operation, mode };
        conn.sw_send_segment(&desc.encode(), PSH | OP).await?;
        conn.sw_send_segment(filename.as_bytes(), PSH | FNAME).await?;

        Ok(conn)
    }

    /// Server-side handshake on a freshly bound ephemeral endpoint, given the
    /// client's address and initial sequence number observed on the listening
    /// socket.
    pub async fn accept(
        local_addr: SocketAddr,
        client_addr: SocketAddr,
        client_isn: u32,
    ) -> Result<Self> {
        let endpoint = Endpoint::bind(local_addr).await?;
        let mut rto = RtoEstimator::new(ReliableConfig::default());
        let server_isn = random_isn();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > HANDSHAKE_ATTEMPTS {
                return Err(ProtocolError::HandshakeFailed(
                    "no final ACK received".into(),
                ));
            }
            let syn_ack = PacketHeader::new(server_isn, client_isn.wrapping_add(1), SYN | ACK)?;
            endpoint
                .send_to(&syn_ack.encode(&[]), client_addr)
                .await?;

            match endpoint.recv_from(rto.rto()).await? {
                Some((buf, from)) if from == client_addr => {
                    if let Ok((h, _)) = PacketHeader::parse(&buf) {
                        if h.has(SYN) && !h.has(ACK) {
                            // Duplicate SYN while we wait: retry SYN-ACK with the same server_isn.
                            trace!(peer = %client_addr, "duplicate SYN during handshake");
                            continue;
                        }
                        if h.has(ACK) && h.ack == server_isn.wrapping_add(1) {
                            break;
                        }
                    }
                }
                Some(_) => continue,
                None => {
                    rto.backoff();
                    continue;
                }
            }
        }

        let mut conn = Self {
            endpoint,
            peer: client_addr,
            local_seq: server_isn.wrapping_add(1),
            remote_seq: client_isn.wrapping_add(1),
            mode: RecoveryMode::StopAndWait,
            operation: crate::packet::Operation::Upload,
            filename: String::new(),
            rto,
            state: ConnState::Established,
        };

        debug!(peer = %conn.peer, "handshake complete (server)");

        let op_payload = conn.recv_expected(PSH | OP).await?;
        let desc = OperationDescriptor::decode(&op_payload)?;
        conn.operation = desc.op;
        conn.mode = desc.mode;

        let fname_payload = conn.recv_expected(PSH | FNAME).await?;
        conn.filename = String::from_utf8_lossy(&fname_payload).trim().to_string();
        if conn.filename.is_empty() {
            return Err(ProtocolError::InvalidFileName("empty file name".into()));
        }

        Ok(conn)
    }

    /// Local ephemeral (or well-known, for a plain client bind) address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Peer address this connection exchanges datagrams with
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Operation negotiated during the handshake
    pub fn operation(&self) -> crate::packet::Operation {
        self.operation
    }

    /// Recovery mode negotiated during the handshake
    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    /// File name negotiated during the handshake
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Reliably send a single small control segment (Stop-and-Wait, always)
    async fn sw_send_segment(&mut self, payload: &[u8], flags: u8) -> Result<()> {
        let seq = self.local_seq;
        let units = (payload.len() as u32).max(1);
        let expected = seq.wrapping_add(units);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if attempts > SW_SEGMENT_ATTEMPTS {
                return Err(ProtocolError::Timeout);
            }
            let header = PacketHeader::new(seq, self.remote_seq, flags)?;
            let sent_at = Instant::now();
            self.endpoint.send_to(&header.encode(payload), self.peer).await?;

            match self.endpoint.recv_from(self.rto.rto()).await? {
                Some((buf, from)) if from == self.peer => {
                    let (h, _) = match PacketHeader::parse(&buf) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if !h.has(ACK) {
                        continue;
                    }
                    if h.ack == expected {
                        if attempts == 1 {
                            self.rto.sample(sent_at.elapsed());
                        }
                        self.local_seq = expected;
                        return Ok(());
                    }
                    // An ACK claiming more than we sent is dropped rather than trusted
                    // (see design notes on the source's ACK-overshoot behavior); any
                    // other value is a stale/duplicate ACK. Either way, keep waiting.
                }
                Some(_) => continue,
                None => {
                    self.rto.backoff();
                    continue;
                }
            }
        }
    }

    /// Receive a single reliably-sent control segment, ACKing in order and
    /// re-ACKing out-of-order or duplicate arrivals.
    async fn recv_expected(&mut self, want_flags: u8) -> Result<Vec<u8>> {
        loop {
            match self.endpoint.recv_from(IDLE_TIMEOUT).await? {
                Some((raw, from)) if from == self.peer => {
                    let (h, payload) = match PacketHeader::parse(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if h.has(FIN) {
                        self.ack_fin(&h).await?;
                        return Err(ProtocolError::ConnectionReset);
                    }
                    if h.seq == self.remote_seq && h.has(want_flags) {
                        let consumed = (payload.len() as u32).max(1);
                        self.remote_seq = self.remote_seq.wrapping_add(consumed);
                        self.send_ack().await?;
                        return Ok(payload.to_vec());
                    }
                    self.send_ack().await?;
                }
                Some(_) => continue,
                None => return Err(ProtocolError::IdleTimeout),
            }
        }
    }

    async fn send_ack(&self) -> Result<()> {
        let ack = PacketHeader::new(self.local_seq, self.remote_seq, ACK)?;
        self.endpoint.send_to(&ack.encode(&[]), self.peer).await?;
        Ok(())
    }

    async fn ack_fin(&mut self, fin_header: &PacketHeader) -> Result<()> {
        let _ = fin_header;
        self.remote_seq = self.remote_seq.wrapping_add(1);
        let ack = PacketHeader::new(self.local_seq, self.remote_seq, ACK | FIN)?;
        self.endpoint.send_to(&ack.encode(&[]), self.peer).await?;
        Ok(())
    }

    /// Send the full contents of `reader` using the negotiated recovery mode
    pub async fn send_file(&mut self, reader: &mut ChunkReader) -> Result<()> {
        match self.mode {
            RecoveryMode::StopAndWait => {
                while let Some(chunk) = reader.next_chunk().await? {
                    self.sw_send_segment(&chunk, PSH).await?;
                }
                Ok(())
            }
            RecoveryMode::SelectiveRepeat => self.sr_send_all(reader).await,
        }
    }

    /// Receive a full file into `writer` using the negotiated recovery mode,
    /// stopping when the peer sends FIN.
    pub async fn recv_file(&mut self, writer: &mut ChunkWriter) -> Result<()> {
        match self.mode {
            RecoveryMode::StopAndWait => self.sw_recv_all(writer).await,
            RecoveryMode::SelectiveRepeat => self.sr_recv_all(writer).await,
        }
    }

    async fn sw_recv_all(&mut self, writer: &mut ChunkWriter) -> Result<()> {
        loop {
            match self.endpoint.recv_from(IDLE_TIMEOUT).await? {
                Some((raw, from)) if from == self.peer => {
                    let (h, payload) = match PacketHeader::parse(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if h.has(FIN) {
                        self.ack_fin(&h).await?;
                        return Ok(());
                    }
                    if h.has(PSH) && h.seq == self.remote_seq {
                        writer.write_chunk(payload).await?;
                        self.remote_seq = self.remote_seq.wrapping_add(payload.len() as u32);
                    }
                    self.send_ack().await?;
                }
                Some(_) => continue,
                None => return Err(ProtocolError::IdleTimeout),
            }
        }
    }

    async fn sr_send_all(&mut self, reader: &mut ChunkReader) -> Result<()> {
        let mut in_flight: BTreeMap<u32, InFlightSegment> = BTreeMap::new();
        let mut send_base = self.local_seq;
        let mut next_seq = self.local_seq;
        let mut eof = false;
        let window_bytes = WINDOW_SIZE * crate::config::PAYLOAD_SIZE as u32;

        loop {
            while !eof
                && in_flight.len() < WINDOW_SIZE as usize
                && next_seq.wrapping_sub(send_base) < window_bytes
            {
                let chunk = match reader.next_chunk().await? {
                    Some(c) => c,
                    None => {
                        eof = true;
                        break;
                    }
                };
                let header = PacketHeader::new(next_seq, self.remote_seq, PSH)?;
                self.endpoint.send_to(&header.encode(&chunk), self.peer).await?;
                let len = chunk.len() as u32;
                in_flight.insert(
                    next_seq,
                    InFlightSegment {
                        data: chunk,
                        sent_at: Instant::now(),
                        attempts: 1,
                    },
                );
                next_seq = next_seq.wrapping_add(len);
            }

            if in_flight.is_empty() {
                if eof {
                    break;
                }
                continue;
            }

            let now = Instant::now();
            let earliest = in_flight
                .values()
                .map(|p| p.sent_at + self.rto.rto())
                .min()
                .unwrap();
            let wait = earliest.saturating_duration_since(now);

            match self.endpoint.recv_from(wait).await? {
                Some((raw, from)) if from == self.peer => {
                    let (h, _) = match PacketHeader::parse(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if !h.has(ACK) {
                        continue;
                    }
                    let acked: Vec<u32> = in_flight
                        .keys()
                        .copied()
                        .filter(|&s| seq_lt(s, h.ack))
                        .collect();
                    for s in acked {
                        if let Some(seg) = in_flight.remove(&s) {
                            if seg.attempts == 1 {
                                self.rto.sample(seg.sent_at.elapsed());
                            }
                        }
                    }
                    if seq_lt(send_base, h.ack) {
                        send_base = h.ack;
                    }
                }
                Some(_) => continue,
                None => {
                    if let Some((&seq, seg)) =
                        in_flight.iter_mut().min_by_key(|(_, p)| p.sent_at)
                    {
                        if seg.attempts >= SR_SEGMENT_ATTEMPTS {
                            return Err(ProtocolError::Timeout);
                        }
                        warn!(peer = %self.peer, seq, "retransmitting segment");
                        let header = PacketHeader::new(seq, self.remote_seq, PSH)?;
                        self.endpoint
                            .send_to(&header.encode(&seg.data), self.peer)
                            .await?;
                        seg.attempts += 1;
                        seg.sent_at = Instant::now();
                        self.rto.backoff();
                    }
                }
            }

            if eof && in_flight.is_empty() {
                break;
            }
        }

        self.local_seq = send_base;
        Ok(())
    }

    async fn sr_recv_all(&mut self, writer: &mut ChunkWriter) -> Result<()> {
        let mut out_of_order: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        let window_bytes = WINDOW_SIZE * crate::config::PAYLOAD_SIZE as u32;

        loop {
            match self.endpoint.recv_from(IDLE_TIMEOUT).await? {
                Some((raw, from)) if from == self.peer => {
                    let (h, payload) = match PacketHeader::parse(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if h.has(FIN) {
                        self.ack_fin(&h).await?;
                        return Ok(());
                    }
                    if !h.has(PSH) {
                        continue;
                    }
                    let s = h.seq;
                    if s == self.remote_seq {
                        writer.write_chunk(payload).await?;
                        self.remote_seq = self.remote_seq.wrapping_add(payload.len() as u32);
                        while let Some(buffered) = out_of_order.remove(&self.remote_seq) {
                            self.remote_seq =
                                self.remote_seq.wrapping_add(buffered.len() as u32);
                            writer.write_chunk(&buffered).await?;
                        }
                    } else if seq_lt(self.remote_seq, s)
                        && seq_lt(s, self.remote_seq.wrapping_add(window_bytes))
                    {
                        out_of_order.entry(s).or_insert_with(|| payload.to_vec());
                    }
                    self.send_ack().await?;
                }
                Some(_) => continue,
                None => return Err(ProtocolError::IdleTimeout),
            }
        }
    }

    /// Idempotent graceful teardown: send FIN, wait briefly for the peer's
    /// ACK, then close unconditionally.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        if let Ok(header) = PacketHeader::new(self.local_seq, self.remote_seq, FIN) {
            let _ = self.endpoint.send_to(&header.encode(&[]), self.peer).await;
            let _ = self.endpoint.recv_from(TEARDOWN_WAIT).await;
        }
        self.endpoint.close();
    }
}
