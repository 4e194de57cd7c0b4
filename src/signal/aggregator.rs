use tokio::time::{Duration, Instant};

use crate::config::types::Settings;

/// Inputs below this value release the channel immediately.
pub const RELEASE_THRESHOLD: f32 = 0.1;

/// Power requested while a channel is released.
pub const RELEASED_POWER: i32 = 1;

/// Maps an averaged 0-1 signal to a 0-1 power level.
///
/// ```text
///   1.0 |             ______ (max_limit)
///       |            /
///       |           /
/// min   |     _____/ (min_limit)
/// power |    |
///       +----+------------------->
///        start_limit
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerCurve {
    pub start_limit: f32,
    pub min_limit: f32,
    pub max_limit: f32,
    pub min_power: f32,
}

impl PowerCurve {
    pub fn from_settings(settings: &Settings) -> Self {
        PowerCurve {
            start_limit: settings.start_limit,
            min_limit: settings.min_limit,
            max_limit: settings.max_limit,
            min_power: settings.min_power,
        }
    }

    pub fn map(&self, average: f32) -> f32 {
        if average < self.start_limit {
            0.0
        } else if average <= self.min_limit {
            self.min_power
        } else if average >= self.max_limit {
            1.0
        } else {
            (average - self.min_limit) / (self.max_limit - self.min_limit) * (1.0 - self.min_power)
                + self.min_power
        }
    }
}

impl Default for PowerCurve {
    fn default() -> Self {
        PowerCurve::from_settings(&Settings::default())
    }
}

/// Moving-window average of one channel's input.
#[derive(Debug, Clone)]
pub struct ChannelAverager {
    window: Duration,
    curve: PowerCurve,
    max_power: u16,
    queue: Vec<f32>,
    last_flush: Instant,
}

impl ChannelAverager {
    pub fn new(window: Duration, curve: PowerCurve, max_power: u16, now: Instant) -> Self {
        ChannelAverager {
            window,
            curve,
            max_power,
            queue: Vec::new(),
            last_flush: now,
        }
    }

    /// Feeds one input value. Returns the power to request for this channel, if any.
    ///
    /// While `gate_open` is false values keep queueing and the averaged update is deferred to
    /// the next window.
    pub fn update(&mut self, value: f32, now: Instant, gate_open: bool) -> Option<i32> {
        if value < RELEASE_THRESHOLD {
            return Some(RELEASED_POWER);
        }

        if now.duration_since(self.last_flush) <= self.window {
            self.queue.push(value);
            return None;
        }

        self.last_flush = now;
        if self.queue.is_empty() || !gate_open {
            self.queue.push(value);
            return None;
        }

        let average = self.queue.iter().sum::<f32>() / self.queue.len() as f32;
        self.queue.clear();

        let level = self.curve.map(average);
        if level < RELEASE_THRESHOLD {
            Some(RELEASED_POWER)
        } else {
            Some((self.max_power as f32 * level) as i32)
        }
    }
}
