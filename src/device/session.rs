use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use btleplug::api::Characteristic;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::device::codec::{decode_battery, encode_pattern, encode_power};
use crate::device::constants::{
    BATTERY_LEVEL_CHARACTERISTIC, BATTERY_SERVICE, CONFIG_CHARACTERISTIC, IO_DEADLINE, MAX_POWER,
    POWER_HYSTERESIS, PWM_AB2_CHARACTERISTIC, PWM_SERVICE, RECONNECT_RETRIES, SAFE_MAX_POWER,
};
use crate::device::link::GattLink;
use crate::device::types::{Channel, DeviceState, PowerGate, PowerState, PwmOutcome};
use crate::error::{DeviceError, ProtocolRangeError};
use crate::pattern::PatternFrame;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Cap power at 768 instead of 2047.
    pub safe_mode: bool,
    /// Route logical channel A to the `...1506` characteristic and B to `...1505`.
    pub channels_swapped: bool,
    /// Deadline of the first connection attempt, doubled after every failure.
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            safe_mode: true,
            channels_swapped: true,
            connect_timeout: Duration::from_secs(40),
        }
    }
}

#[derive(Debug, Clone)]
struct Characteristics {
    battery: Characteristic,
    power: Characteristic,
    channel_a: Characteristic,
    channel_b: Characteristic,
    config: Option<Characteristic>,
}

impl Characteristics {
    fn data(&self, channel: Channel) -> &Characteristic {
        match channel {
            Channel::A => &self.channel_a,
            Channel::B => &self.channel_b,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    state: DeviceState,
    characteristics: Option<Characteristics>,
    power: PowerState,
    active_patterns: [String; 2],
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, DeviceError>>,
{
    tokio::select! {
        _ = sleep(deadline) => Err(DeviceError::Timeout(deadline)),
        result = fut => result,
    }
}

/// Connection to one Coyote box.
///
/// Methods take `&self` so the session can be shared (`Arc`) between the OSC front end and the
/// playback loops. Bookkeeping lives behind a mutex that is never held across an await.
pub struct DeviceSession<L> {
    link: L,
    options: SessionOptions,
    gate: PowerGate,
    inner: Mutex<SessionState>,
    stop: AtomicBool,
    switch_requested: [AtomicBool; 2],
}

impl<L: GattLink> DeviceSession<L> {
    pub fn new(link: L, options: SessionOptions, gate: PowerGate) -> Self {
        DeviceSession {
            link,
            options,
            gate,
            inner: Mutex::new(SessionState {
                state: DeviceState::Disconnected,
                characteristics: None,
                power: PowerState::default(),
                active_patterns: [String::new(), String::new()],
            }),
            stop: AtomicBool::new(false),
            switch_requested: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut inner = self.inner.lock().expect("Failed to lock DeviceSession inner");
        f(&mut inner)
    }

    fn set_state(&self, state: DeviceState) {
        self.with_inner(|inner| inner.state = state);
    }

    fn connected_characteristics(&self) -> Result<Characteristics, DeviceError> {
        self.with_inner(|inner| match (&inner.state, &inner.characteristics) {
            (DeviceState::Connected, Some(characteristics)) => Ok(characteristics.clone()),
            _ => Err(DeviceError::NotConnected),
        })
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn power_gate(&self) -> &PowerGate {
        &self.gate
    }

    pub fn state(&self) -> DeviceState {
        self.with_inner(|inner| inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == DeviceState::Connected
    }

    pub fn power(&self) -> PowerState {
        self.with_inner(|inner| inner.power)
    }

    pub fn max_power(&self) -> u16 {
        if self.options.safe_mode { SAFE_MAX_POWER } else { MAX_POWER }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn active_pattern(&self, channel: Channel) -> String {
        self.with_inner(|inner| inner.active_patterns[channel.index()].clone())
    }

    pub fn set_active_pattern(&self, channel: Channel, name: &str) {
        self.with_inner(|inner| inner.active_patterns[channel.index()] = name.to_string());
    }

    /// Makes a running playback loop on `channel` restart with the pattern `name`.
    pub fn switch_pattern(&self, channel: Channel, name: &str) {
        info!("Switching channel {} to pattern {:?}", channel, name);
        self.set_active_pattern(channel, name);
        self.switch_requested[channel.index()].store(true, Ordering::SeqCst);
    }

    pub fn switch_patterns(&self, pattern_a: &str, pattern_b: &str) {
        self.switch_pattern(Channel::A, pattern_a);
        self.switch_pattern(Channel::B, pattern_b);
    }

    /// Returns whether a pattern switch was requested for `channel` and resets the request.
    pub fn take_switch_request(&self, channel: Channel) -> bool {
        self.switch_requested[channel.index()].swap(false, Ordering::SeqCst)
    }

    /// Uuid of the characteristic that receives pattern frames for `channel`.
    pub fn data_characteristic(&self, channel: Channel) -> Result<Uuid, DeviceError> {
        Ok(self.connected_characteristics()?.data(channel).uuid)
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, DeviceError> {
        with_deadline(Duration::from_millis(IO_DEADLINE), self.link.read(characteristic)).await
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), DeviceError> {
        with_deadline(Duration::from_millis(IO_DEADLINE), self.link.write(characteristic, data)).await
    }

    async fn read_battery(&self, characteristic: &Characteristic) -> Result<u8, DeviceError> {
        let data = self.read(characteristic).await?;
        decode_battery(&data).ok_or(DeviceError::EmptyRead(characteristic.uuid))
    }

    /// Connects with up to `retries` attempts, then binds the characteristics and runs a
    /// read/write self-test.
    pub async fn connect(&self, retries: u32) -> Result<(), DeviceError> {
        info!("Connecting to device...");
        self.set_state(DeviceState::Connecting);

        let already_connected = matches!(self.link.is_connected().await, Ok(true));

        if !already_connected {
            let mut timeout = self.options.connect_timeout;
            let mut last_error = None;
            let mut connected = false;

            for attempt in 1..=retries {
                match with_deadline(timeout, self.link.connect()).await {
                    Ok(()) => {
                        info!("Connected!");
                        connected = true;
                        break;
                    },
                    Err(err) => {
                        warn!("Connection attempt {}/{} failed: {}. Retrying...", attempt, retries, err);
                        last_error = Some(err);
                        timeout = timeout.saturating_mul(2);
                    },
                }
            }

            if !connected {
                error!("Failed to connect to bluetooth device.");
                self.set_state(DeviceState::Disconnected);
                return Err(DeviceError::Connection {
                    attempts: retries,
                    source: Box::new(last_error.unwrap_or(DeviceError::NotConnected)),
                });
            }
        }

        let characteristics = match self.bind_characteristics().await {
            Ok(characteristics) => characteristics,
            Err(err) => {
                self.set_state(DeviceState::Disconnected);
                return Err(err);
            },
        };

        self.with_inner(|inner| {
            inner.characteristics = Some(characteristics.clone());
            inner.state = DeviceState::Connected;
        });

        self.self_test(&characteristics).await;
        info!("Device ready");
        Ok(())
    }

    async fn bind_characteristics(&self) -> Result<Characteristics, DeviceError> {
        info!("Discovering services...");
        let discovered = with_deadline(self.options.connect_timeout, self.link.discover()).await?;

        let find = |service: Uuid, uuid: Uuid| {
            discovered.iter().find(|c| c.service_uuid == service && c.uuid == uuid).cloned()
        };
        let require = |service: Uuid, uuid: Uuid| {
            find(service, uuid).ok_or(DeviceError::MissingCharacteristic(uuid))
        };
        let swapped = self.options.channels_swapped;

        let characteristics = Characteristics {
            battery: require(BATTERY_SERVICE, BATTERY_LEVEL_CHARACTERISTIC)?,
            power: require(PWM_SERVICE, PWM_AB2_CHARACTERISTIC)?,
            channel_a: require(PWM_SERVICE, Channel::A.data_characteristic(swapped))?,
            channel_b: require(PWM_SERVICE, Channel::B.data_characteristic(swapped))?,
            config: find(PWM_SERVICE, CONFIG_CHARACTERISTIC),
        };

        debug!(
            "Channel A -> {}, channel B -> {}, config {}",
            characteristics.channel_a.uuid,
            characteristics.channel_b.uuid,
            if characteristics.config.is_some() { "present" } else { "absent" },
        );

        Ok(characteristics)
    }

    async fn self_test(&self, characteristics: &Characteristics) {
        match self.read_battery(&characteristics.battery).await {
            Ok(level) => info!("Current device battery level: {}%", level),
            Err(err) => warn!("Failed to query battery level: {}", err),
        }

        let message = encode_power(0, 0);
        info!("Writing {:?} to {}", message, characteristics.power.uuid);

        if let Err(err) = self.write(&characteristics.power, &message).await {
            warn!("Device read/write functionality could not be confirmed: {}", err);
            return;
        }
        self.with_inner(|inner| inner.power = PowerState::default());

        match self.read(&characteristics.power).await {
            Ok(echo) if echo == message => info!("Device read/write functionality confirmed"),
            Ok(echo) => warn!("Device read/write functionality could not be confirmed: wrote {:?}, read {:?}", message, echo),
            Err(err) => warn!("Device read/write functionality could not be confirmed: {}", err),
        }
    }

    /// Sets the power of both channels. A negative value keeps the channel's current power.
    ///
    /// Changes below the hysteresis on both channels are dropped. Values outside of the
    /// permitted range are logged and dropped.
    pub async fn set_pwm(&self, pow_a: i32, pow_b: i32) -> Result<PwmOutcome, DeviceError> {
        let characteristics = self.connected_characteristics()?;
        let current = self.power();

        let pow_a = if pow_a < 0 { current.pow_a as i32 } else { pow_a };
        let pow_b = if pow_b < 0 { current.pow_b as i32 } else { pow_b };

        if (pow_a - current.pow_a as i32).abs() < POWER_HYSTERESIS
            && (pow_b - current.pow_b as i32).abs() < POWER_HYSTERESIS
        {
            return Ok(PwmOutcome::Unchanged);
        }

        info!("set_pwm({}, {})", pow_a, pow_b);
        self.gate.close();

        self.write_power(&characteristics.power, pow_a, pow_b).await
    }

    async fn write_power(&self, characteristic: &Characteristic, pow_a: i32, pow_b: i32) -> Result<PwmOutcome, DeviceError> {
        let max = self.max_power();
        let in_range = |value: i32| (0..=max as i32).contains(&value);

        if !in_range(pow_a) || !in_range(pow_b) {
            let err = ProtocolRangeError { pow_a, pow_b, max };
            if self.options.safe_mode {
                error!("Caution, safe mode is enabled.");
            }
            error!("{}", err);
            return Ok(PwmOutcome::Rejected(err));
        }

        let power = PowerState { pow_a: pow_a as u16, pow_b: pow_b as u16 };
        let message = encode_power(power.pow_a, power.pow_b);

        self.write(characteristic, &message).await?;
        self.with_inner(|inner| inner.power = power);

        match self.read(characteristic).await {
            Ok(echo) => debug!("Wrote {:?} to power characteristic, confirmation: {:?}", message, echo),
            Err(err) => warn!("Failed to read back power: {}", err),
        }

        Ok(PwmOutcome::Written(power))
    }

    /// Requests running playback loops to end and sets both channels to zero, regardless of
    /// the hysteresis.
    pub async fn stop(&self) -> Result<(), DeviceError> {
        let characteristics = match self.connected_characteristics() {
            Ok(characteristics) => characteristics,
            Err(_) => return Ok(()),
        };

        info!("Stopping output");
        self.stop.store(true, Ordering::SeqCst);
        self.write_power(&characteristics.power, 0, 0).await?;
        Ok(())
    }

    /// Closes the connection. Does nothing when not connected.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        if !self.is_connected() {
            return Ok(());
        }

        info!("Disconnecting...");
        self.stop.store(true, Ordering::SeqCst);
        self.with_inner(|inner| {
            inner.state = DeviceState::Disconnected;
            inner.characteristics = None;
        });

        with_deadline(Duration::from_millis(IO_DEADLINE), self.link.disconnect()).await?;
        info!("Disconnected!");
        Ok(())
    }

    /// Battery charge in percent, or 0 when not connected.
    pub async fn get_battery_level(&self) -> Result<u8, DeviceError> {
        match self.connected_characteristics() {
            Ok(characteristics) => self.read_battery(&characteristics.battery).await,
            Err(_) => Ok(0),
        }
    }

    /// Liveness probe: reads the power characteristic.
    ///
    /// A failed read triggers one reconnect attempt and reports `false` whatever its result.
    pub async fn is_running(&self) -> bool {
        let characteristics = match self.connected_characteristics() {
            Ok(characteristics) => characteristics,
            Err(_) => return false,
        };

        match self.read(&characteristics.power).await {
            Ok(_) => true,
            Err(err) => {
                warn!("Liveness probe failed: {}", err);
                info!("Reconnecting...");
                if let Err(err) = self.connect(RECONNECT_RETRIES).await {
                    error!("Reconnect failed: {}", err);
                    // disconnect() skips the link once the state is Disconnected
                    if let Err(err) = with_deadline(Duration::from_millis(IO_DEADLINE), self.link.disconnect()).await {
                        debug!("Failed to close the link: {}", err);
                    }
                }
                false
            },
        }
    }

    /// Encodes `frame` and writes it to the data characteristic of `channel`.
    pub async fn write_frame(&self, channel: Channel, frame: &PatternFrame) -> Result<(), DeviceError> {
        let characteristics = self.connected_characteristics()?;
        let message = encode_pattern(frame.pulse_ms, frame.pause_ms, frame.amplitude);
        self.write(characteristics.data(channel), &message).await
    }
}
