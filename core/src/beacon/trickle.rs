//! Trickle interval timer (RFC 6206)
//!
//! The interval doubles while the channel looks consistent and snaps
//! back to the minimum on inconsistency. A transmission happens at the
//! end of an interval only when fewer than `k` consistent messages were
//! heard during it.

use std::time::{Duration, Instant};

/// Default minimum interval
pub const DEFAULT_I_MIN: Duration = Duration::from_millis(100);

/// Default maximum interval
pub const DEFAULT_I_MAX: Duration = Duration::from_secs(60);

/// Default redundancy constant
pub const DEFAULT_K: u32 = 3;

/// Upper bound of the random transmit backoff used by the BLE scheduler
pub const BLE_MAX_BACKOFF: Duration = Duration::from_millis(50);

/// The BLE advertising channels, each with its own timer
pub const BLE_ADVERTISING_CHANNELS: [u8; 3] = [37, 38, 39];

/// One adaptive interval timer
#[derive(Debug, Clone)]
pub struct TrickleTimer {
    i_min: Duration,
    i_max: Duration,
    k: u32,
    current: Duration,
    consistent: u32,
    interval_start: Instant,
}

impl TrickleTimer {
    pub fn new(i_min: Duration, i_max: Duration, k: u32) -> Self {
        Self {
            i_min,
            i_max,
            k,
            current: i_min,
            consistent: 0,
            interval_start: Instant::now(),
        }
    }

    /// Record a consistent message heard during the current interval
    pub fn record_consistent(&mut self) {
        self.consistent += 1;
    }

    /// Record an inconsistency: snap back to the minimum interval
    pub fn record_inconsistent(&mut self, now: Instant) {
        self.current = self.i_min;
        self.consistent = 0;
        self.interval_start = now;
    }

    /// End the current interval.
    ///
    /// Returns whether to transmit (heard fewer than `k` consistent
    /// messages), then doubles the interval up to the cap and resets the
    /// counter.
    pub fn end_of_interval(&mut self, now: Instant) -> bool {
        let transmit = self.consistent < self.k;
        self.current = (self.current * 2).min(self.i_max);
        self.consistent = 0;
        self.interval_start = now;
        transmit
    }

    /// The interval currently in effect
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// When the current interval started
    pub fn interval_start(&self) -> Instant {
        self.interval_start
    }

    /// Whether the current interval has elapsed at `now`
    pub fn interval_elapsed(&self, now: Instant) -> bool {
        now.duration_since(self.interval_start) >= self.current
    }
}

impl Default for TrickleTimer {
    fn default() -> Self {
        Self::new(DEFAULT_I_MIN, DEFAULT_I_MAX, DEFAULT_K)
    }
}

/// A transmit decision from the BLE scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleTransmitDecision {
    pub channel: u8,
    /// Random 0–50 ms backoff to decorrelate transmitters
    pub backoff: Duration,
}

/// Per-channel Trickle scheduling for BLE advertising.
///
/// Channels 37, 38 and 39 run independent timers; each positive
/// transmit decision carries a uniform random backoff.
#[derive(Debug)]
pub struct BleTrickleScheduler {
    timers: [TrickleTimer; 3],
}

impl BleTrickleScheduler {
    pub fn new(i_min: Duration, i_max: Duration, k: u32) -> Self {
        Self {
            timers: [
                TrickleTimer::new(i_min, i_max, k),
                TrickleTimer::new(i_min, i_max, k),
                TrickleTimer::new(i_min, i_max, k),
            ],
        }
    }

    fn timer_index(channel: u8) -> Option<usize> {
        BLE_ADVERTISING_CHANNELS.iter().position(|&c| c == channel)
    }

    pub fn record_consistent(&mut self, channel: u8) {
        if let Some(idx) = Self::timer_index(channel) {
            self.timers[idx].record_consistent();
        }
    }

    pub fn record_inconsistent(&mut self, channel: u8, now: Instant) {
        if let Some(idx) = Self::timer_index(channel) {
            self.timers[idx].record_inconsistent(now);
        }
    }

    /// End the interval on `channel`; `Some` decision means transmit
    /// after the embedded backoff.
    pub fn end_of_interval(&mut self, channel: u8, now: Instant) -> Option<BleTransmitDecision> {
        use rand::Rng;
        let idx = Self::timer_index(channel)?;
        if !self.timers[idx].end_of_interval(now) {
            return None;
        }
        let backoff_micros = rand::thread_rng().gen_range(0..=BLE_MAX_BACKOFF.as_micros() as u64);
        Some(BleTransmitDecision {
            channel,
            backoff: Duration::from_micros(backoff_micros),
        })
    }

    pub fn current_interval(&self, channel: u8) -> Option<Duration> {
        Self::timer_index(channel).map(|idx| self.timers[idx].current_interval())
    }
}

impl Default for BleTrickleScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_I_MIN, DEFAULT_I_MAX, DEFAULT_K)
    }
}
