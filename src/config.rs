//! Tunables for a control block and the scheduler it registers timers with.
//!
//! Collecting them into one struct, rather than scattering defaults across
//! call sites, makes the full set of knobs inspectable and lets tests
//! override a handful of them (e.g. a tighter `snd_wnd` to exercise
//! window-exhaustion) without touching unrelated construction code.

use crate::error::TransportError;
use crate::wire::HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub mtu: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub rmt_wnd_init: u32,
    pub minrto: i32,
    pub initial_rto: i32,
    pub rto_cap: i32,
    pub fastresend: u32,
    pub ack_delay_ms: u32,
    pub timer_resolution_ms: u32,
    pub wheel_slots: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: 1400,
            snd_wnd: 32,
            rcv_wnd: 128,
            rmt_wnd_init: 128,
            minrto: 100,
            initial_rto: 200,
            rto_cap: 60_000,
            fastresend: 2,
            ack_delay_ms: 20,
            timer_resolution_ms: 10,
            wheel_slots: 1024,
        }
    }
}

impl Config {
    /// MSS derived from `mtu` and the fixed header overhead.
    pub fn mss(&self) -> u32 {
        self.mtu - HEADER_LEN as u32
    }

    /// Validates the tunables, mirroring the bounds `set_mtu` and the
    /// constructors enforce individually.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.mtu <= HEADER_LEN as u32 {
            return Err(TransportError::BadArgument);
        }
        if self.snd_wnd == 0 || self.rcv_wnd == 0 {
            return Err(TransportError::BadArgument);
        }
        if !(self.minrto <= self.initial_rto && self.initial_rto <= self.rto_cap) {
            return Err(TransportError::BadArgument);
        }
        if self.wheel_slots == 0 || self.timer_resolution_ms == 0 {
            return Err(TransportError::BadArgument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.mtu, 1400);
        assert_eq!(config.mss(), 1376);
        assert_eq!(config.snd_wnd, 32);
        assert_eq!(config.rcv_wnd, 128);
        assert_eq!(config.minrto, 100);
        assert_eq!(config.initial_rto, 200);
        assert_eq!(config.rto_cap, 60_000);
        assert_eq!(config.fastresend, 2);
        assert_eq!(config.ack_delay_ms, 20);
        assert_eq!(config.timer_resolution_ms, 10);
        assert_eq!(config.wheel_slots, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_mtu_too_small() {
        let config = Config {
            mtu: 24,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(TransportError::BadArgument));
    }
}
