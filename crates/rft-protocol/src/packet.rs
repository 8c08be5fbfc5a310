//! Wire header framing for the reliable file-transfer protocol
//!
//! # Performance notes
//! - Zero-copy parsing using `Bytes` slices
//! - Pre-allocated serialization buffers

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ProtocolError, Result};

/// SYN flag: requests connection establishment
pub const SYN: u8 = 0x01;
/// ACK flag: the `ack` field carries a valid cumulative acknowledgement
pub const ACK: u8 = 0x02;
/// FIN flag: requests graceful teardown
pub const FIN: u8 = 0x04;
/// PSH flag: payload carries user data
pub const PSH: u8 = 0x08;
/// FNAME flag: payload carries a file name
pub const FNAME: u8 = 0x10;
/// OP flag: payload carries an operation descriptor
pub const OP: u8 = 0x20;

const VALID_FLAGS: u8 = SYN | ACK | FIN | PSH | FNAME | OP;

/// Fixed-size header: `seq(u32) | ack(u32) | flags(u8) | reserved(u16)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// This packet's own sequence number
    pub seq: u32,
    /// Cumulative acknowledgement (valid only when `ACK` is set)
    pub ack: u32,
    /// Bitwise-OR of the flag constants
    pub flags: u8,
}

impl PacketHeader {
    /// Size of the fixed header in bytes
    pub const SIZE: usize = 11;

    /// Build a header, rejecting unknown flag bits
    pub fn new(seq: u32, ack: u32, flags: u8) -> Result<Self> {
        if flags & !VALID_FLAGS != 0 {
            return Err(ProtocolError::InvalidFlags(flags));
        }
        Ok(Self { seq, ack, flags })
    }

    /// True if every bit in `mask` is set
    #[inline]
    pub fn has(&self, mask: u8) -> bool {
        self.flags & mask == mask
    }

    /// Parse a header from the front of `data`, returning the header and the payload slice
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::PacketTooShort {
                expected: Self::SIZE,
                got: data.len(),
            });
        }

        let seq = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let ack = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let flags = data[8];
        // data[9..11] is the reserved checksum field; transmitted as zero, ignored on receipt.

        if flags & !VALID_FLAGS != 0 {
            return Err(ProtocolError::InvalidFlags(flags));
        }

        Ok((Self { seq, ack, flags }, &data[Self::SIZE..]))
    }

    /// Serialize the header followed by `payload` into a fresh buffer
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE + payload.len());
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u8(self.flags);
        buf.put_u16(0);
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// The two file-transfer operations negotiated during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Client is sending a file to the server
    Upload,
    /// Client is requesting a file from the server
    Download,
}

impl Operation {
    fn to_byte(self) -> u8 {
        match self {
            Operation::Upload => 0,
            Operation::Download => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Operation::Upload),
            1 => Ok(Operation::Download),
            other => Err(ProtocolError::InvalidOperation(format!(
                "unknown operation byte {other}"
            ))),
        }
    }
}

/// The two loss-recovery strategies a connection can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Window of exactly one outstanding segment
    StopAndWait,
    /// Sliding window with out-of-order buffering at the receiver
    SelectiveRepeat,
}

impl RecoveryMode {
    fn to_byte(self) -> u8 {
        match self {
            RecoveryMode::StopAndWait => 1,
            RecoveryMode::SelectiveRepeat => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(RecoveryMode::StopAndWait),
            2 => Ok(RecoveryMode::SelectiveRepeat),
            other => Err(ProtocolError::InvalidOperation(format!(
                "unknown recovery mode byte {other}"
            ))),
        }
    }
}

/// The two-byte payload carried by a packet with the `OP` flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Requested operation
    pub op: Operation,
    /// Negotiated recovery mode
    pub mode: RecoveryMode,
}

impl OperationDescriptor {
    /// Encode as the two-byte wire payload
    pub fn encode(&self) -> [u8; 2] {
        [self.op.to_byte(), self.mode.to_byte()]
    }

    /// Decode from a two-byte wire payload
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(ProtocolError::InvalidOperation(
                "operation descriptor payload too short".into(),
            ));
        }
        Ok(Self {
            op: Operation::from_byte(data[0])?,
            mode: RecoveryMode::from_byte(data[1])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_all_flag_combinations() {
        for flags in 0..=VALID_FLAGS {
            if flags & !VALID_FLAGS != 0 {
                continue;
            }
            let header = PacketHeader::new(42, 7, flags).unwrap();
            let encoded = header.encode(b"hello");
            let (decoded, payload) = PacketHeader::parse(&encoded).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(payload, b"hello");
        }
    }

    #[test]
    fn rejects_short_datagram() {
        let err = PacketHeader::parse(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, ProtocolError::PacketTooShort { .. }));
    }

    #[test]
    fn rejects_unknown_flag_bits() {
        let err = PacketHeader::new(0, 0, 0x80).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFlags(0x80)));
    }

    #[test]
    fn operation_descriptor_round_trip() {
        let desc = OperationDescriptor {
            op: Operation::Download,
            mode: RecoveryMode::SelectiveRepeat,
        };
        let encoded = desc.encode();
        let decoded = OperationDescriptor::decode(&encoded).unwrap();
        assert_eq!(decoded, desc);
    }

    #[test]
    fn has_checks_all_bits_in_mask() {
        let header = PacketHeader::new(0, 0, PSH | FNAME).unwrap();
        assert!(header.has(PSH));
        assert!(header.has(FNAME));
        assert!(header.has(PSH | FNAME));
        assert!(!header.has(SYN));
    }
}
