//! Fixed-size demo record exchanged by the sample client.
//!
//! # Wire format
//!
//! All integers are **little-endian**.
//!
//! ```text
//!  0                               8                              16
//! +-------------------------------+-------------------------------+
//! |      Timestamp (ns, i64)      |          Value (i64)          |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! Records are not framed; a stream is simply records back to back.  A
//! record may straddle two deliveries, so [`for_each_packet`] reports the
//! trailing partial record as unconsumed and the engine hands it back with
//! the next chunk.

/// Byte length of one record on the wire.
pub const PACKET_LEN: usize = 16;

const OFF_TS: usize = 0;
const OFF_VAL: usize = 8;

/// A timestamped counter value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packet {
    /// Sender's wall-clock time in nanoseconds.
    pub ts: i64,
    pub val: i64,
}

impl Packet {
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[OFF_TS..OFF_TS + 8].copy_from_slice(&self.ts.to_le_bytes());
        buf[OFF_VAL..OFF_VAL + 8].copy_from_slice(&self.val.to_le_bytes());
        buf
    }

    /// Parse the record at the start of `buf`.  Extra bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let Some(raw) = buf.first_chunk::<PACKET_LEN>() else {
            return Err(PacketError::BufferTooShort);
        };
        let mut ts = [0u8; 8];
        let mut val = [0u8; 8];
        ts.copy_from_slice(&raw[OFF_TS..OFF_TS + 8]);
        val.copy_from_slice(&raw[OFF_VAL..OFF_VAL + 8]);
        Ok(Self {
            ts: i64::from_le_bytes(ts),
            val: i64::from_le_bytes(val),
        })
    }
}

/// Errors that can arise when parsing a record.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a record")]
    BufferTooShort,
}

/// Decode every complete record in `data`, in order.
///
/// Returns the length of the trailing partial record, suitable as the
/// return value of a [`crate::client::TcpClient::read`] handler.
pub fn for_each_packet<F>(data: &[u8], mut f: F) -> usize
where
    F: FnMut(Packet),
{
    let mut chunks = data.chunks_exact(PACKET_LEN);
    for chunk in chunks.by_ref() {
        // chunks_exact yields full records only
        if let Ok(p) = Packet::decode(chunk) {
            f(p);
        }
    }
    chunks.remainder().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let p = Packet { ts: 1_700_000_000_123_456_789, val: -42 };
        assert_eq!(Packet::decode(&p.encode()), Ok(p));
    }

    #[test]
    fn fields_little_endian_on_wire() {
        let bytes = Packet { ts: 0x0102_0304_0506_0708, val: 1 }.encode();
        assert_eq!(&bytes[OFF_TS..OFF_TS + 8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[OFF_VAL..OFF_VAL + 8], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn decode_short_buffer_returns_error() {
        assert_eq!(Packet::decode(&[0u8; PACKET_LEN - 1]), Err(PacketError::BufferTooShort));
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn for_each_packet_reports_partial_tail() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&Packet { ts: 1, val: 10 }.encode());
        stream.extend_from_slice(&Packet { ts: 2, val: 20 }.encode());
        stream.extend_from_slice(&[0xAA; 5]);

        let mut vals = Vec::new();
        let left = for_each_packet(&stream, |p| vals.push(p.val));
        assert_eq!(vals, [10, 20]);
        assert_eq!(left, 5);
    }

    #[test]
    fn for_each_packet_on_partial_only() {
        let mut calls = 0;
        assert_eq!(for_each_packet(&[1, 2, 3], |_| calls += 1), 3);
        assert_eq!(calls, 0);
    }
}
