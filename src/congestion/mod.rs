//! The pluggable congestion-control interface and its registry.
//!
//! A [`ControlBlock`](crate::control_block::ControlBlock) holds one
//! `Box<dyn CongestionControl>` and calls into it at the same four points
//! the reference implementation's `dcp_cc_ops` vtable is invoked: a packet
//! being sent, an ACK arriving, a loss being detected, and whenever the
//! congestion window or pacing rate is needed to decide what to send next.

mod bbr;

pub use bbr::Bbr;

/// Capability set a congestion-control algorithm implements.
///
/// Mirrors `struct dcp_cc_ops` field-for-field rather than collapsing it
/// into a leaner trait, so that adding a second algorithm later only means
/// writing a new impl, not reshaping every call site in `ControlBlock`.
pub trait CongestionControl {
    /// Called once when the algorithm is installed on a connection.
    fn init(&mut self) {}

    /// Called when the connection releases the algorithm. The default no-op
    /// is correct for any implementation whose state is plain `Drop`-able
    /// Rust (i.e. all of them): the reference implementation's explicit
    /// `release` callback exists only to free heap state the allocator
    /// wouldn't otherwise know about.
    fn release(&mut self) {}

    /// An RTT sample and the number of bytes it acknowledged.
    fn on_ack(&mut self, rtt_sample_ms: i32, bytes_acked: u32, now_ms: u32);

    /// A segment was judged lost (RTO fired or a fast-retransmit threshold
    /// was crossed) and is about to be resent.
    fn on_loss(&mut self, lost_sn: u32, now_ms: u32);

    /// A fresh segment was just handed to the output sink.
    fn on_pkt_sent(&mut self, bytes_sent: u32);

    /// The congestion window, in bytes. `mss` and `rmt_wnd` (the peer's
    /// receive window, in packets) are supplied by the caller rather than
    /// read back off the owning control block, so the trait doesn't need a
    /// handle to its owner.
    fn get_cwnd(&self, mss: u32, rmt_wnd: u32, nocwnd: bool) -> u32;

    /// The pacing rate, in bytes per second.
    fn get_pacing_rate(&self) -> u64;
}

/// Looks up a congestion-control algorithm by name, as `set_congestion_control`
/// does for its caller-supplied string.
pub fn by_name(name: &str) -> Option<Box<dyn CongestionControl>> {
    match name {
        "bbr" => Some(Box::new(Bbr::new())),
        _ => None,
    }
}
