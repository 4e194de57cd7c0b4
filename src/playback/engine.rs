use std::sync::Arc;
use log::{debug, info, warn};
use tokio::time::{sleep, Duration, Instant};

use crate::device::constants::{FRAME_SPACING, LIVENESS_INTERVAL, PLAYBACK_TICK};
use crate::device::link::GattLink;
use crate::device::session::DeviceSession;
use crate::device::types::Channel;
use crate::error::DeviceError;
use crate::pattern::{Pattern, PatternSource, PatternStore};

/// Why a playback loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The requested duration elapsed. Power is left as it is.
    Completed,
    /// The session's stop flag was raised.
    Stopped,
    /// The liveness probe failed and the reconnect attempt did not bring the link back.
    LinkLost,
}

/// Plays patterns on the device, one frame at a time.
pub struct PlaybackEngine<L> {
    session: Arc<DeviceSession<L>>,
    patterns: Arc<PatternStore>,
}

impl<L> Clone for PlaybackEngine<L> {
    fn clone(&self) -> Self {
        PlaybackEngine {
            session: self.session.clone(),
            patterns: self.patterns.clone(),
        }
    }
}

impl<L: GattLink> PlaybackEngine<L> {
    pub fn new(session: Arc<DeviceSession<L>>, patterns: Arc<PatternStore>) -> Self {
        PlaybackEngine { session, patterns }
    }

    pub fn session(&self) -> &Arc<DeviceSession<L>> {
        &self.session
    }

    fn pattern_for(&self, source: &PatternSource) -> Pattern {
        match source {
            PatternSource::ByName(name) => self.patterns.resolve(name).clone(),
            PatternSource::Literal(pattern) => pattern.clone(),
        }
    }

    /// Sets both channels to `power` and plays `pattern` on `channel`, repeating it until
    /// `duration` has elapsed.
    ///
    /// The loop also ends when the session is stopped or its link is lost. A pattern switch
    /// requested through the session restarts the loop at the first frame of the new pattern.
    pub async fn signal(
        &self,
        power: i32,
        pattern: PatternSource,
        duration: Duration,
        channel: Channel,
    ) -> Result<PlaybackOutcome, DeviceError> {
        self.run(channel, pattern, power, duration).await
    }

    pub async fn run(
        &self,
        channel: Channel,
        pattern: PatternSource,
        power: i32,
        duration: Duration,
    ) -> Result<PlaybackOutcome, DeviceError> {
        let session = &self.session;
        let target = session.data_characteristic(channel)?;

        session.clear_stop();
        session.set_pwm(power, power).await?;

        let mut source = pattern;
        if let PatternSource::ByName(name) = &source {
            session.set_active_pattern(channel, name);
        }
        // a request made before this loop started is already reflected in `source`
        session.take_switch_request(channel);

        info!("Playing on channel {} ({}) for {:?}", channel, target, duration);

        let end_time = Instant::now() + duration;
        let mut last_write: Option<Instant> = None;
        let mut last_liveness_check = Instant::now();

        while Instant::now() < end_time {
            if session.take_switch_request(channel) {
                source = PatternSource::ByName(session.active_pattern(channel));
            }

            let pattern = self.pattern_for(&source);
            if pattern.is_empty() {
                warn!("Pattern for channel {} has no frames, stopping playback", channel);
                return Ok(PlaybackOutcome::Completed);
            }
            debug!("Channel {}: starting pattern of {} frame(s)", channel, pattern.len());

            let mut index = 0;
            while index < pattern.len() {
                if session.take_switch_request(channel) {
                    source = PatternSource::ByName(session.active_pattern(channel));
                    break;
                }

                let now = Instant::now();
                if let Some(last_write) = last_write {
                    if now.duration_since(last_write) < FRAME_SPACING {
                        sleep(PLAYBACK_TICK).await;
                        continue;
                    }
                }

                if now >= end_time {
                    info!("Channel {}: hit time limit, stopping", channel);
                    return Ok(PlaybackOutcome::Completed);
                }
                if session.stop_requested() {
                    info!("Channel {}: stop requested", channel);
                    return Ok(PlaybackOutcome::Stopped);
                }
                if now.duration_since(last_liveness_check) > LIVENESS_INTERVAL {
                    if !session.is_running().await {
                        warn!("Channel {}: device is not responding, stopping playback", channel);
                        return Ok(PlaybackOutcome::LinkLost);
                    }
                    last_liveness_check = Instant::now();
                }

                let frame = &pattern.frames()[index];
                match session.write_frame(channel, frame).await {
                    Ok(()) => session.power_gate().open(),
                    Err(err) => warn!("Channel {}: failed to write pattern frame: {}", channel, err),
                }
                last_write = Some(Instant::now());
                index += 1;

                sleep(PLAYBACK_TICK).await;
            }
        }

        Ok(PlaybackOutcome::Completed)
    }
}
