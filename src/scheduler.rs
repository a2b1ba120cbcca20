//! A hashed timer wheel shared by every control block on a connection's
//! runtime, plus the re-entrancy-safe dispatch function built around it.
//!
//! The wheel has a fixed resolution and number of slots
//! ([`Config::timer_resolution_ms`], [`Config::wheel_slots`]); a timer that
//! would land more than `wheel_slots * resolution_ms` milliseconds in the
//! future collapses onto the furthest reachable slot instead of wrapping
//! around and firing early. This isn't just a theoretical edge case: the RTO
//! cap is 60000ms, about six times past the default wheel's 1024*10ms =
//! 10.24s span, so a long-backed-off connection routinely outruns one wheel
//! revolution and hits the clamp; see [`Scheduler::add`] for how that's
//! handled.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::config::Config;
use crate::control_block::ControlBlock;

/// Which per-connection timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// A retransmission timeout: resend the head of the send buffer and back
    /// off the RTO.
    Rto,
    /// The delayed-ACK timer: flush any ACK owed to the peer.
    AckDelay,
    /// The pacing wake: promote one segment from the send queue to the send
    /// buffer and hand it to the output sink.
    Pacing,
}

struct TimerNode {
    target: Weak<RefCell<ControlBlock>>,
    kind: TimerKind,
}

/// Shared timer wheel. Held behind `Rc<RefCell<_>>` so every control block
/// that needs to arm or re-arm a timer can reach it without the scheduler
/// owning its connections.
pub struct Scheduler {
    resolution_ms: u32,
    wheel_slots: u32,
    wheel: Vec<VecDeque<TimerNode>>,
    current_slot: u32,
    last_tick_ms: u32,
}

impl Scheduler {
    pub fn new(config: &Config) -> Rc<RefCell<Self>> {
        let mut wheel = Vec::with_capacity(config.wheel_slots as usize);
        wheel.resize_with(config.wheel_slots as usize, VecDeque::new);
        Rc::new(RefCell::new(Self {
            resolution_ms: config.timer_resolution_ms,
            wheel_slots: config.wheel_slots,
            wheel,
            current_slot: 0,
            last_tick_ms: 0,
        }))
    }

    /// Arms a timer `timeout_ms` after the scheduler's last processed tick.
    ///
    /// Matches the reference allocator's behaviour of measuring from the
    /// wheel's own clock rather than from a `now` the caller might supply:
    /// a control block that arms a timer between two `run_due` calls is
    /// scheduled relative to the *previous* tick, not the current instant.
    /// A timeout below one resolution step is rounded up to it; a timeout
    /// that would outrun a full wheel revolution is clamped to the furthest
    /// reachable slot, which only ever makes it fire early, never late.
    pub fn add(&mut self, target: &Rc<RefCell<ControlBlock>>, timeout_ms: u32, kind: TimerKind) {
        let timeout_ms = timeout_ms.max(self.resolution_ms);
        let max_span = self.wheel_slots * self.resolution_ms;
        let timeout_ms = timeout_ms.min(max_span);
        // Round up rather than truncate: `run_due` fires everything in a
        // visited slot unconditionally, so a slot chosen by floor division
        // (e.g. 25ms at a 10ms resolution landing in the 20ms slot) would
        // fire the timer before the caller's requested delay elapsed.
        // Rounding up trades that for the opposite, bounded error: firing up
        // to one resolution step late, never early.
        let ticks = timeout_ms.div_ceil(self.resolution_ms).max(1);
        let slot = (self.current_slot + ticks) % self.wheel_slots;
        self.wheel[slot as usize].push_back(TimerNode {
            target: Rc::downgrade(target),
            kind,
        });
    }

    /// Advances the wheel to `now_ms`, draining every slot crossed along the
    /// way, and returns the timers due to fire. Does not dispatch them: the
    /// borrow on `self` ends here so a dispatched callback is free to call
    /// back into [`Scheduler::add`] without a double-borrow panic.
    fn run_due(&mut self, now_ms: u32) -> Vec<(Weak<RefCell<ControlBlock>>, TimerKind)> {
        // Floor to the resolution boundary so a caller polling faster than
        // the wheel's resolution doesn't lose the sub-resolution remainder
        // on every call — the remainder has to survive in `last_tick_ms`
        // until it accumulates to a full tick.
        let now_ms = now_ms - (now_ms % self.resolution_ms);
        if now_ms <= self.last_tick_ms {
            return Vec::new();
        }
        let elapsed = now_ms - self.last_tick_ms;
        let mut ticks = elapsed / self.resolution_ms;
        // A caller that hasn't polled in longer than a full revolution would
        // otherwise spin through every slot; one revolution is enough to
        // visit (and drain) all of them.
        ticks = ticks.min(self.wheel_slots);

        let mut due = Vec::new();
        for _ in 0..ticks {
            self.current_slot = (self.current_slot + 1) % self.wheel_slots;
            for node in self.wheel[self.current_slot as usize].drain(..) {
                due.push((node.target, node.kind));
            }
        }
        self.last_tick_ms = now_ms;
        due
    }
}

/// Advances `scheduler` to `now_ms` and dispatches every timer that fired.
///
/// Collecting due timers first and dispatching afterward (rather than
/// calling back into the connection mid-drain) is what lets a handler
/// re-arm its own timer: by the time [`ControlBlock::on_timer`] runs, the
/// scheduler borrow used to collect `due` has already been released.
pub fn scheduler_run(scheduler: &Rc<RefCell<Scheduler>>, now_ms: u32) {
    let due = scheduler.borrow_mut().run_due(now_ms);
    for (target, kind) in due {
        if let Some(cb) = target.upgrade() {
            cb.borrow_mut().on_timer(kind, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_block::ControlBlock;

    fn test_config() -> Config {
        Config {
            wheel_slots: 8,
            timer_resolution_ms: 10,
            ..Config::default()
        }
    }

    fn dummy_cb(scheduler: &Rc<RefCell<Scheduler>>) -> Rc<RefCell<ControlBlock>> {
        ControlBlock::create(1, 0, test_config(), Rc::clone(scheduler)).unwrap()
    }

    #[test]
    fn timer_fires_after_requested_delay_rounded_to_resolution() {
        let scheduler = Scheduler::new(&test_config());
        let cb = dummy_cb(&scheduler);
        scheduler.borrow_mut().add(&cb, 25, TimerKind::AckDelay);
        // 25ms rounds up to 3 ticks of 10ms = slot 3; arriving at 20ms (tick 2)
        // must not fire it yet.
        let fired = scheduler.borrow_mut().run_due(20);
        assert!(fired.is_empty());
        let fired = scheduler.borrow_mut().run_due(30);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, TimerKind::AckDelay);
    }

    #[test]
    fn timeout_below_resolution_still_fires_on_next_tick() {
        let scheduler = Scheduler::new(&test_config());
        let cb = dummy_cb(&scheduler);
        scheduler.borrow_mut().add(&cb, 1, TimerKind::Rto);
        let fired = scheduler.borrow_mut().run_due(10);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn timeout_beyond_wheel_span_clamps_to_furthest_slot() {
        let scheduler = Scheduler::new(&test_config());
        let cb = dummy_cb(&scheduler);
        // Wheel spans 8*10=80ms; ask for far more.
        scheduler.borrow_mut().add(&cb, 10_000, TimerKind::Rto);
        let fired = scheduler.borrow_mut().run_due(80);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn stale_target_is_silently_dropped_on_dispatch() {
        let scheduler = Scheduler::new(&test_config());
        {
            let cb = dummy_cb(&scheduler);
            scheduler.borrow_mut().add(&cb, 10, TimerKind::Rto);
        } // cb dropped; only the scheduler's Weak handle remains.
        scheduler_run(&scheduler, 10);
    }

    #[test]
    fn run_due_is_idempotent_for_same_now() {
        let scheduler = Scheduler::new(&test_config());
        let cb = dummy_cb(&scheduler);
        scheduler.borrow_mut().add(&cb, 10, TimerKind::Rto);
        let first = scheduler.borrow_mut().run_due(10);
        assert_eq!(first.len(), 1);
        let second = scheduler.borrow_mut().run_due(10);
        assert!(second.is_empty());
    }
}
