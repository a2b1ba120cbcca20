//! A reliable, ordered, message-oriented transport layered over an
//! unreliable datagram substrate: fragmentation, a sliding-window sender and
//! receiver, loss recovery via retransmission timeout, delayed
//! acknowledgement, and pacing under a pluggable congestion-control
//! interface.
//!
//! The clock and the datagram substrate are both supplied by the caller:
//! every public entry point takes an explicit millisecond timestamp, and
//! outbound datagrams are handed to a sink registered with
//! [`ControlBlock::set_output`]. A [`Scheduler`] drives retransmission,
//! delayed-ACK, and pacing wakes for every control block registered to it;
//! advancing it is the caller's responsibility ([`scheduler_run`]).
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use arq_core::{scheduler_run, Config, ControlBlock, Scheduler};
//!
//! let scheduler = Scheduler::new(&Config::default());
//! let cb = ControlBlock::create(1, 0, Config::default(), Rc::clone(&scheduler)).unwrap();
//! cb.borrow_mut().set_output(|_datagram| Ok(()));
//! cb.borrow_mut().send(b"hello", 0).unwrap();
//! scheduler_run(&scheduler, 0);
//! ```

pub mod config;
pub mod congestion;
pub mod control_block;
pub mod error;
pub mod rtt;
pub mod scheduler;
pub mod segment;
pub mod wire;

pub use config::Config;
pub use congestion::{Bbr, CongestionControl};
pub use control_block::{ControlBlock, OutputSink};
pub use error::TransportError;
pub use rtt::RttEstimator;
pub use scheduler::{scheduler_run, Scheduler, TimerKind};
pub use segment::Segment;
pub use wire::{Header, WireError, CMD_ACK, CMD_PROBE, CMD_PUSH, HEADER_LEN};
