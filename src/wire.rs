//! The fixed 24-byte big-endian segment header and its wire encoding.
//!
//! `conv_id`, `ts`, `sn`, `una`, and `len` are each 4 bytes; `cmd` and
//! `frg` are 1 byte each; `wnd` is 2 bytes — matching the wire-format
//! layout (4+1+1+2+4+4+4+4 = 24 bytes).

use thiserror::Error as ThisError;

/// The segment carries application data and is retransmitted until the peer
/// acknowledges it.
pub const CMD_PUSH: u32 = 81;
/// A pure acknowledgement, either piggybacked on window updates or emitted by
/// the delayed-ACK timer.
pub const CMD_ACK: u32 = 82;
/// Reserved. Recognised on the wire but has no defined effect.
pub const CMD_PROBE: u32 = 85;

/// Size in bytes of the fixed header, excluding payload.
pub const HEADER_LEN: usize = 24;

/// The eight big-endian fields that precede every segment's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub conv_id: u32,
    pub cmd: u32,
    pub frg: u32,
    pub wnd: u32,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub len: u32,
}

impl Header {
    /// Appends the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.conv_id.to_be_bytes());
        out.push(self.cmd as u8);
        out.push(self.frg as u8);
        out.extend_from_slice(&(self.wnd as u16).to_be_bytes());
        out.extend_from_slice(&self.ts.to_be_bytes());
        out.extend_from_slice(&self.sn.to_be_bytes());
        out.extend_from_slice(&self.una.to_be_bytes());
        out.extend_from_slice(&self.len.to_be_bytes());
    }

    /// Decodes a header from the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// Does not validate `conv_id` or `len` against a connection or datagram
    /// size — those checks need context this function doesn't have and are
    /// performed by [`crate::control_block::ControlBlock::input`].
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                have: bytes.len(),
                need: HEADER_LEN,
            });
        }
        let conv_id = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let cmd = bytes[4] as u32;
        let frg = bytes[5] as u32;
        let wnd = u16::from_be_bytes(bytes[6..8].try_into().unwrap()) as u32;
        let ts = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        let sn = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        let una = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
        let len = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        Ok(Self {
            conv_id,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            len,
        })
    }
}

/// Errors that can occur while decoding a raw datagram into a [`Header`].
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Fewer than [`HEADER_LEN`] bytes were supplied.
    #[error("datagram too short for a header: have {have}, need {need}")]
    Truncated { have: usize, need: usize },
    /// `header.conv_id` does not match the control block decoding it.
    #[error("conv_id mismatch: segment={segment}, connection={connection}")]
    ConvIdMismatch { segment: u32, connection: u32 },
    /// The declared `len` field does not match the remaining datagram size.
    #[error("length mismatch: header declared {declared}, datagram carried {actual}")]
    LengthMismatch { declared: u32, actual: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let header = Header {
            conv_id: 0xcafebabe,
            cmd: CMD_PUSH,
            frg: 2,
            wnd: 128,
            ts: 12345,
            sn: 7,
            una: 3,
            len: 10,
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes);
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = [0u8; HEADER_LEN - 1];
        assert_eq!(
            Header::decode(&bytes),
            Err(WireError::Truncated {
                have: HEADER_LEN - 1,
                need: HEADER_LEN
            })
        );
    }

    #[test]
    fn field_order_is_big_endian() {
        // conv_id = 1 should occupy the first four bytes, most significant first.
        let header = Header {
            conv_id: 1,
            ..Default::default()
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
    }
}
