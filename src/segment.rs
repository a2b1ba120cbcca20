//! [`Segment`], the in-memory unit of transmission.

use crate::wire::Header;

/// A segment queued, buffered, or received by a [`crate::control_block::ControlBlock`].
///
/// Carries the same fields as the wire [`Header`] plus the transmission
/// bookkeeping (`rto`, `fastack`, `xmit`) that never goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub conv_id: u32,
    pub cmd: u32,
    pub frg: u32,
    pub wnd: u32,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub data: Vec<u8>,
    /// Retransmission timeout in effect for this segment at the time it was
    /// last sent.
    pub rto: u32,
    /// Count of higher-`sn` acknowledgements observed for this segment.
    /// Incremented but never consulted; see the fast-retransmit open
    /// question in DESIGN.md.
    pub fastack: u32,
    /// Number of times this segment has been handed to the output sink.
    pub xmit: u32,
}

impl Segment {
    /// Builds a segment with the given header fields and payload; transmission
    /// bookkeeping starts at zero.
    pub fn new(conv_id: u32, cmd: u32, frg: u32, data: Vec<u8>) -> Self {
        Self {
            conv_id,
            cmd,
            frg,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            data,
            rto: 0,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The wire header for this segment.
    pub fn header(&self) -> Header {
        Header {
            conv_id: self.conv_id,
            cmd: self.cmd,
            frg: self.frg,
            wnd: self.wnd,
            ts: self.ts,
            sn: self.sn,
            una: self.una,
            len: self.len(),
        }
    }

    /// Encodes the header followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(crate::wire::HEADER_LEN + self.data.len());
        self.header().encode(&mut out);
        out.extend_from_slice(&self.data);
        out
    }

    /// Builds a segment from a decoded header and the payload bytes that
    /// followed it on the wire.
    pub fn from_header(header: Header, data: Vec<u8>) -> Self {
        Self {
            conv_id: header.conv_id,
            cmd: header.cmd,
            frg: header.frg,
            wnd: header.wnd,
            ts: header.ts,
            sn: header.sn,
            una: header.una,
            data,
            rto: 0,
            fastack: 0,
            xmit: 0,
        }
    }
}
