//! [`ControlBlock`], the per-connection state machine: segmentation,
//! sliding-window send/receive, retransmission, delayed acknowledgement, and
//! pacing, all driven synchronously by an externally supplied clock and a
//! shared [`Scheduler`].

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::congestion::{self, CongestionControl};
use crate::error::TransportError;
use crate::rtt::RttEstimator;
use crate::scheduler::{Scheduler, TimerKind};
use crate::segment::Segment;
use crate::wire::{self, Header, WireError};

/// A sink for encoded datagrams, registered via [`ControlBlock::set_output`].
///
/// Takes the place of the reference implementation's
/// `(buffer, len, cb, user) -> int` callback; the closure captures whatever
/// state it needs instead of being handed a `user` pointer back, and reports
/// failure through `Result` instead of a negative return.
pub type OutputSink = Box<dyn FnMut(&[u8]) -> Result<(), TransportError>>;

/// The per-connection state machine.
pub struct ControlBlock {
    self_weak: Weak<RefCell<ControlBlock>>,
    scheduler: Rc<RefCell<Scheduler>>,

    conv_id: u32,
    token: u32,
    is_released: bool,

    mtu: u32,
    mss: u32,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    snd_wnd: u32,
    rcv_wnd: u32,
    rmt_wnd: u32,

    rtt: RttEstimator,

    cc: Box<dyn CongestionControl>,
    nocwnd: bool,

    output: Option<OutputSink>,

    snd_queue: VecDeque<Segment>,
    snd_buf: BTreeMap<u32, Segment>,
    rcv_buf: BTreeMap<u32, Segment>,
    rcv_queue: VecDeque<Segment>,

    ack_delayed_until: u32,
    ack_delay_ms: u32,
    #[allow(dead_code)]
    fastresend: u32,

    rto_timer_armed: bool,
    pacing_timer_armed: bool,
}

impl ControlBlock {
    /// Creates a control block registered against `scheduler`. Installs the
    /// default ("bbr") congestion-control algorithm. Emits nothing.
    pub fn create(
        conv_id: u32,
        token: u32,
        config: Config,
        scheduler: Rc<RefCell<Scheduler>>,
    ) -> Result<Rc<RefCell<Self>>, TransportError> {
        config.validate()?;
        let mut cc = congestion::by_name("bbr").expect("bbr is always registered");
        cc.init();

        let cb = Rc::new_cyclic(|weak| {
            RefCell::new(Self {
                self_weak: weak.clone(),
                scheduler,
                conv_id,
                token,
                is_released: false,
                mtu: config.mtu,
                mss: config.mss(),
                snd_una: 0,
                snd_nxt: 0,
                rcv_nxt: 0,
                snd_wnd: config.snd_wnd,
                rcv_wnd: config.rcv_wnd,
                rmt_wnd: config.rmt_wnd_init,
                rtt: RttEstimator::new(config.initial_rto, config.minrto, config.rto_cap),
                cc,
                nocwnd: false,
                output: None,
                snd_queue: VecDeque::new(),
                snd_buf: BTreeMap::new(),
                rcv_buf: BTreeMap::new(),
                rcv_queue: VecDeque::new(),
                ack_delayed_until: 0,
                ack_delay_ms: config.ack_delay_ms,
                fastresend: config.fastresend,
                rto_timer_armed: false,
                pacing_timer_armed: false,
            })
        });
        Ok(cb)
    }

    pub fn conv_id(&self) -> u32 {
        self.conv_id
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn is_released(&self) -> bool {
        self.is_released
    }

    /// Releases the connection: idempotent, frees every queue, and releases
    /// congestion-control state. Pending scheduler callbacks targeting this
    /// control block observe [`Self::is_released`] and return immediately;
    /// they're never explicitly unregistered (see [`Scheduler`]'s module
    /// docs for why that's safe).
    pub fn release(&mut self) {
        if self.is_released {
            return;
        }
        debug!(conv_id = self.conv_id, "releasing control block");
        self.is_released = true;
        self.cc.release();
        self.snd_queue.clear();
        self.snd_buf.clear();
        self.rcv_buf.clear();
        self.rcv_queue.clear();
    }

    /// Registers the substrate sink. A negative-equivalent (`Err`) return
    /// from `sink` propagates as a transmission error but never mutates
    /// control-block state.
    pub fn set_output(&mut self, sink: impl FnMut(&[u8]) -> Result<(), TransportError> + 'static) {
        self.output = Some(Box::new(sink));
    }

    /// Updates the MTU and recomputes the MSS. Requires `mtu` to leave room
    /// for at least one byte of payload after the fixed header.
    pub fn set_mtu(&mut self, mtu: u32) -> Result<(), TransportError> {
        if self.is_released || mtu < wire::HEADER_LEN as u32 + 1 {
            return Err(TransportError::BadArgument);
        }
        self.mtu = mtu;
        self.mss = mtu - wire::HEADER_LEN as u32;
        Ok(())
    }

    /// Switches congestion-control algorithm by name. Unlike the reference
    /// implementation (which releases the old algorithm before looking up
    /// the new one, leaving the connection with no algorithm at all on an
    /// unrecognised name), this looks the new algorithm up first: an unknown
    /// name fails without disturbing the one already installed.
    pub fn set_cc(&mut self, name: &str) -> Result<(), TransportError> {
        if self.is_released {
            return Err(TransportError::BadArgument);
        }
        let mut new_cc = congestion::by_name(name).ok_or(TransportError::BadArgument)?;
        self.cc.release();
        new_cc.init();
        self.cc = new_cc;
        Ok(())
    }

    /// Fragments `data` into `ceil(len/mss)` PUSH segments and appends them
    /// to the send queue, in order. Fails without mutating state if doing so
    /// would push `snd_queue.len() + snd_buf.len()` past `2 * snd_wnd`.
    pub fn send(&mut self, data: &[u8], now_ms: u32) -> Result<(), TransportError> {
        if self.is_released || data.is_empty() {
            return Err(TransportError::BadArgument);
        }
        let count = (data.len() as u32).div_ceil(self.mss);
        if self.snd_queue.len() as u32 + self.snd_buf.len() as u32 + count > self.snd_wnd * 2 {
            return Err(TransportError::WindowExhausted);
        }

        let mut offset = 0usize;
        for i in 0..count {
            let remaining = data.len() - offset;
            let size = remaining.min(self.mss as usize);
            let chunk = data[offset..offset + size].to_vec();
            offset += size;
            let frg = (count - 1) - i;
            self.snd_queue
                .push_back(Segment::new(self.conv_id, wire::CMD_PUSH, frg, chunk));
        }
        trace!(conv_id = self.conv_id, count, "queued fragments for send");

        if !self.pacing_timer_armed {
            self.arm_timer(TimerKind::Pacing, 0);
            self.pacing_timer_armed = true;
        }
        Ok(())
    }

    /// Drains the next complete message (a run of segments ending in
    /// `frg == 0`) from the receive queue into `buf`. `Ok(0)` means no
    /// segments are queued; a message is never returned partially.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.is_released {
            return Err(TransportError::BadArgument);
        }
        if self.rcv_queue.is_empty() {
            return Ok(0);
        }

        let mut peek_size = 0usize;
        let mut found_terminator = false;
        for seg in self.rcv_queue.iter() {
            peek_size += seg.data.len();
            if seg.frg == 0 {
                found_terminator = true;
                break;
            }
        }
        // The queue can hold a contiguous-`sn` prefix whose last fragment
        // hasn't arrived yet (`parse_data` promotes as far as the gap, not
        // as far as a `frg == 0`) — that's not a complete message yet.
        if !found_terminator {
            return Ok(0);
        }
        if peek_size > buf.len() {
            return Err(TransportError::BufferTooSmall);
        }

        let mut written = 0usize;
        while let Some(seg) = self.rcv_queue.pop_front() {
            let frg = seg.frg;
            buf[written..written + seg.data.len()].copy_from_slice(&seg.data);
            written += seg.data.len();
            if frg == 0 {
                break;
            }
        }
        Ok(written)
    }

    /// Decodes one datagram and applies it: advances the cumulative-ACK
    /// position, then dispatches on command.
    pub fn input(&mut self, datagram: &[u8], now_ms: u32) -> Result<(), TransportError> {
        if self.is_released {
            return Err(TransportError::BadArgument);
        }
        let header = Header::decode(datagram)?;
        if header.conv_id != self.conv_id {
            return Err(TransportError::DecodeReject(WireError::ConvIdMismatch {
                segment: header.conv_id,
                connection: self.conv_id,
            }));
        }
        let payload = &datagram[wire::HEADER_LEN..];
        if header.len as usize != payload.len() {
            return Err(TransportError::DecodeReject(WireError::LengthMismatch {
                declared: header.len,
                actual: payload.len() as u32,
            }));
        }

        self.rmt_wnd = header.wnd;
        self.parse_una(header.una);

        match header.cmd {
            wire::CMD_PUSH => self.handle_push(header, payload, now_ms),
            wire::CMD_ACK => self.handle_ack(header, now_ms),
            wire::CMD_PROBE => {}
            other => trace!(conv_id = self.conv_id, cmd = other, "ignoring unknown command"),
        }
        Ok(())
    }

    fn handle_push(&mut self, header: Header, payload: &[u8], now_ms: u32) {
        if header.sn < self.rcv_nxt || header.sn >= self.rcv_nxt + self.rcv_wnd {
            warn!(
                conv_id = self.conv_id,
                sn = header.sn,
                rcv_nxt = self.rcv_nxt,
                "dropping out-of-window PUSH"
            );
            return;
        }
        let seg = Segment::from_header(header, payload.to_vec());
        self.parse_data(seg);

        if self.ack_delayed_until == 0 {
            self.arm_timer(TimerKind::AckDelay, self.ack_delay_ms);
            self.ack_delayed_until = now_ms + self.ack_delay_ms;
        }
    }

    fn handle_ack(&mut self, header: Header, now_ms: u32) {
        if header.ts == 0 || now_ms < header.ts {
            return;
        }
        let rtt = (now_ms - header.ts) as i32;
        self.rtt.sample(rtt);
        self.parse_fastack(header.sn);
        self.cc.on_ack(rtt, 0, now_ms);

        if !self.pacing_timer_armed && !self.snd_queue.is_empty() {
            self.arm_timer(TimerKind::Pacing, 0);
            self.pacing_timer_armed = true;
        }
    }

    /// Advances the cumulative-ACK cursor. A `una` at or behind the current
    /// one — reachable whenever the substrate reorders datagrams — is
    /// ignored rather than applied, keeping `snd_una` monotone.
    fn parse_una(&mut self, una: u32) {
        if una <= self.snd_una {
            return;
        }
        let acked: Vec<u32> = self.snd_buf.range(..una).map(|(sn, _)| *sn).collect();
        for sn in acked {
            self.snd_buf.remove(&sn);
        }
        self.snd_una = una;
    }

    fn parse_fastack(&mut self, sn: u32) {
        if let Some(seg) = self.snd_buf.get_mut(&sn) {
            seg.fastack += 1;
        }
    }

    /// Inserts a PUSH payload into the receive buffer (dropping exact-`sn`
    /// duplicates) and promotes any now-contiguous prefix into the receive
    /// queue.
    fn parse_data(&mut self, seg: Segment) {
        let sn = seg.sn;
        if self.rcv_buf.contains_key(&sn) {
            trace!(conv_id = self.conv_id, sn, "dropping duplicate PUSH");
            return;
        }
        self.rcv_buf.insert(sn, seg);

        while self.rcv_buf.contains_key(&self.rcv_nxt) {
            let seg = self.rcv_buf.remove(&self.rcv_nxt).expect("checked above");
            self.rcv_queue.push_back(seg);
            self.rcv_nxt += 1;
        }
    }

    /// The pacing wake: promotes at most one segment from the send queue to
    /// the send buffer, subject to the congestion window, then re-arms
    /// itself if more remain.
    fn on_flush(&mut self, now_ms: u32) {
        if self.is_released {
            return;
        }
        self.pacing_timer_armed = false;
        if self.snd_queue.is_empty() {
            return;
        }

        let cwnd_pkts = (self.cc.get_cwnd(self.mss, self.rmt_wnd, self.nocwnd) / self.mss).max(1);
        if self.snd_buf.len() as u32 >= cwnd_pkts {
            return;
        }

        let mut seg = self.snd_queue.pop_front().expect("checked non-empty above");
        seg.sn = self.snd_nxt;
        self.snd_nxt += 1;
        seg.ts = now_ms;
        seg.wnd = self.rcv_queue.len() as u32;
        seg.una = self.rcv_nxt;
        seg.rto = self.rtt.rto() as u32;
        seg.xmit = 1;
        seg.cmd = wire::CMD_PUSH;
        seg.conv_id = self.conv_id;

        let wire_len = seg.len() + wire::HEADER_LEN as u32;
        if let Err(err) = self.output_segment(&seg) {
            warn!(conv_id = self.conv_id, sn = seg.sn, %err, "output sink rejected PUSH");
        } else {
            trace!(conv_id = self.conv_id, sn = seg.sn, "sent PUSH");
        }
        self.snd_buf.insert(seg.sn, seg);
        self.cc.on_pkt_sent(wire_len);

        if !self.rto_timer_armed {
            let rto = self.rtt.rto() as u32;
            self.arm_timer(TimerKind::Rto, rto);
            self.rto_timer_armed = true;
        }

        if !self.snd_queue.is_empty() {
            let rate = self.cc.get_pacing_rate();
            let mut delay_ms = 1u32;
            if rate > 0 {
                delay_ms = ((wire_len as u64 * 1000) / rate) as u32;
                if delay_ms == 0 {
                    delay_ms = 1;
                }
            }
            self.arm_timer(TimerKind::Pacing, delay_ms);
            self.pacing_timer_armed = true;
        }
    }

    /// The RTO wake: retransmits the head of the send buffer only (see
    /// `DESIGN.md` for why a full replay isn't done here) and doubles the
    /// RTO.
    fn on_rto_timeout(&mut self, now_ms: u32) {
        if self.is_released {
            return;
        }
        self.rto_timer_armed = false;

        let sn = match self.snd_buf.keys().next().copied() {
            Some(sn) => sn,
            None => return,
        };

        self.rtt.back_off();
        let rto = self.rtt.rto() as u32;
        {
            let seg = self.snd_buf.get_mut(&sn).expect("sn came from this map");
            seg.rto = rto;
            seg.xmit += 1;
            seg.ts = now_ms;
            seg.wnd = self.rcv_queue.len() as u32;
            seg.una = self.rcv_nxt;
        }
        let retransmitted = self.snd_buf.get(&sn).expect("sn came from this map").clone();

        if let Err(err) = self.output_segment(&retransmitted) {
            warn!(conv_id = self.conv_id, sn, %err, "output sink rejected retransmit");
        } else {
            debug!(conv_id = self.conv_id, sn, xmit = retransmitted.xmit, rto, "retransmitted");
        }
        self.cc.on_loss(sn, now_ms);

        if !self.snd_buf.is_empty() {
            self.arm_timer(TimerKind::Rto, rto);
            self.rto_timer_armed = true;
        }
    }

    /// The delayed-ACK wake: flushes one cumulative ACK covering everything
    /// received since the timer was armed.
    fn on_ack_delay_timeout(&mut self, _now_ms: u32) {
        if self.is_released {
            return;
        }
        self.ack_delayed_until = 0;

        let mut ack = Segment::new(self.conv_id, wire::CMD_ACK, 0, Vec::new());
        ack.wnd = self.rcv_queue.len() as u32;
        ack.una = self.rcv_nxt;

        if let Err(err) = self.output_segment(&ack) {
            warn!(conv_id = self.conv_id, %err, "output sink rejected ACK");
        } else {
            trace!(conv_id = self.conv_id, una = ack.una, "sent ACK");
        }
    }

    /// Dispatches a scheduler wake to the matching handler. `now_ms` is the
    /// scheduler's current processing time, not necessarily the exact
    /// instant this timer was due.
    pub(crate) fn on_timer(&mut self, kind: TimerKind, now_ms: u32) {
        match kind {
            TimerKind::Rto => self.on_rto_timeout(now_ms),
            TimerKind::AckDelay => self.on_ack_delay_timeout(now_ms),
            TimerKind::Pacing => self.on_flush(now_ms),
        }
    }

    fn output_segment(&mut self, seg: &Segment) -> Result<(), TransportError> {
        let bytes = seg.encode();
        match &mut self.output {
            Some(sink) => sink(&bytes),
            None => Err(TransportError::SinkFailure),
        }
    }

    fn arm_timer(&mut self, kind: TimerKind, timeout_ms: u32) {
        if let Some(rc) = self.self_weak.upgrade() {
            self.scheduler.borrow_mut().add(&rc, timeout_ms, kind);
        }
    }
}
