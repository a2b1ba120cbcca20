use thiserror::Error as ThisError;

/// The failure modes of the control block's public API.
///
/// Each variant corresponds to one of the negative return codes described for
/// the C-shaped API surface: callers that care about the exact "kind" can
/// match on the variant instead of comparing magic integers.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// A null/invalid argument was supplied, the MTU was too small, the
    /// requested congestion-control algorithm is unknown, or the control
    /// block has already been released.
    #[error("bad argument")]
    BadArgument,
    /// `send` would push queued plus buffered fragments past `2 * snd_wnd`.
    #[error("send window exhausted")]
    WindowExhausted,
    /// A segment could not be allocated. The Rust rendition never produces
    /// this itself (the global allocator aborts rather than returning), but
    /// the variant is kept for interface parity with ports of the original
    /// C API, where a caller-supplied allocator could fail.
    #[error("allocation failure")]
    AllocationFailure,
    /// `recv`'s caller-supplied buffer cannot hold the next complete message.
    #[error("caller buffer too small for the next message")]
    BufferTooSmall,
    /// `input`'s header was rejected: `conv_id` mismatch or a declared `len`
    /// that does not match the remaining datagram size.
    #[error("segment header rejected: {0}")]
    DecodeReject(#[from] crate::wire::WireError),
    /// The output sink returned a negative value.
    #[error("output sink reported failure")]
    SinkFailure,
}
