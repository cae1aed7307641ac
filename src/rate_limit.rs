use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub skipped: u64,
}

// The first poll always ticks. Later polls tick once `interval` has passed
// since the last granted tick; late polls do not catch up.
#[derive(Debug, Clone)]
pub struct TickLimiter {
    interval: Duration,
    last_tick: Option<Instant>,
    stats: TickStats,
}

impl TickLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: None,
            stats: TickStats::default(),
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        Self::new(Duration::from_secs(1) / hz.max(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether a tick should run at `now`. Records the tick when it should.
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last_tick {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if due {
            self.last_tick = Some(now);
            self.stats.ticks += 1;
        } else {
            self.stats.skipped += 1;
        }
        due
    }

    /// Time left until the next tick is due, zero if it is due already.
    pub fn time_until_next(&self, now: Instant) -> Duration {
        match self.last_tick {
            None => Duration::ZERO,
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    /// Seconds since the previous tick, or the nominal interval before the
    /// first one.
    pub fn delta_seconds(&self, now: Instant) -> f32 {
        match self.last_tick {
            None => self.interval.as_secs_f32(),
            Some(last) => now.saturating_duration_since(last).as_secs_f32(),
        }
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.last_tick = None;
        self.stats = TickStats::default();
    }
}
