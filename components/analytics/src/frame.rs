//! Wire header for measurement packets.
//!
//! Every datagram starts with a fixed 32-byte header; anything after it is
//! opaque filler chosen by the sender. All fields are little-endian.

/// Sentinel written to the first eight bytes of every packet.
pub const MARKER: u64 = 0x12345678;
pub const HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Truncated,
    BadMarker,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Truncated => "truncated",
            DropReason::BadMarker => "bad_marker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderParseError {
    pub reason: DropReason,
    /// The sentinel value actually seen, for `BadMarker`.
    pub marker: Option<u64>,
}

impl HeaderParseError {
    fn new(reason: DropReason) -> Self {
        Self { reason, marker: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sequence number across the whole stream.
    pub stream_sn: u64,
    /// Sequence number within the packet's flowlet.
    pub flow_sn: u64,
    /// Sender timestamp, nanoseconds since the unix epoch.
    pub sent_at_ns: u64,
}

impl PacketHeader {
    pub fn parse(buf: &[u8]) -> Result<PacketHeader, HeaderParseError> {
        if buf.len() < HEADER_LEN {
            return Err(HeaderParseError::new(DropReason::Truncated));
        }
        let marker = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        if marker != MARKER {
            return Err(HeaderParseError { reason: DropReason::BadMarker, marker: Some(marker) });
        }
        Ok(PacketHeader {
            stream_sn: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            flow_sn: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            sent_at_ns: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }

    /// Encodes the header into the first `HEADER_LEN` bytes of `buf`.
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&MARKER.to_le_bytes());
        buf[8..16].copy_from_slice(&self.stream_sn.to_le_bytes());
        buf[16..24].copy_from_slice(&self.flow_sn.to_le_bytes());
        buf[24..32].copy_from_slice(&self.sent_at_ns.to_le_bytes());
    }
}
