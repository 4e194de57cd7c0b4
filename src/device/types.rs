use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{PWM_A34_CHARACTERISTIC, PWM_B34_CHARACTERISTIC};
use crate::error::ProtocolRangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    pub fn index(self) -> usize {
        match self {
            Channel::A => 0,
            Channel::B => 1,
        }
    }

    /// The characteristic that carries pattern frames for this logical channel.
    ///
    /// The vendor's labels are crossed on the hardware: `...1505` ("A") drives output B and
    /// `...1506` ("B") drives output A.
    pub fn data_characteristic(self, swapped: bool) -> Uuid {
        match (self, swapped) {
            (Channel::A, true) | (Channel::B, false) => PWM_B34_CHARACTERISTIC,
            (Channel::B, true) | (Channel::A, false) => PWM_A34_CHARACTERISTIC,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Channel::A => "a",
            Channel::B => "b",
        };

        write!(f, "{}", result)
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" | "A" => Ok(Channel::A),
            "b" | "B" => Ok(Channel::B),
            other => Err(format!("unknown channel {:?}, expected a or b", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerState {
    pub pow_a: u16,
    pub pow_b: u16,
}

impl PowerState {
    pub fn get(&self, channel: Channel) -> u16 {
        match channel {
            Channel::A => self.pow_a,
            Channel::B => self.pow_b,
        }
    }
}

/// Connection lifecycle of a [`crate::device::session::DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmOutcome {
    /// Both channels moved by less than the hysteresis, nothing was sent.
    Unchanged,
    /// The requested power is outside of the permitted range, nothing was sent.
    Rejected(ProtocolRangeError),
    Written(PowerState),
}

/// Cooperative "power update permitted" flag.
///
/// Closed by `set_pwm`, opened again once the playback loop managed to write a pattern frame.
/// The OSC front end holds back averaged updates while it is closed.
#[derive(Debug, Clone)]
pub struct PowerGate {
    open: Arc<AtomicBool>,
}

impl PowerGate {
    pub fn new() -> Self {
        PowerGate { open: Arc::new(AtomicBool::new(true)) }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Default for PowerGate {
    fn default() -> Self {
        PowerGate::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_channels_cross_the_vendor_labels() {
        assert_eq!(Channel::A.data_characteristic(true), PWM_B34_CHARACTERISTIC);
        assert_eq!(Channel::B.data_characteristic(true), PWM_A34_CHARACTERISTIC);
        assert_eq!(Channel::A.data_characteristic(false), PWM_A34_CHARACTERISTIC);
        assert_eq!(Channel::B.data_characteristic(false), PWM_B34_CHARACTERISTIC);
    }

    #[test]
    fn channel_parses_either_case() {
        assert_eq!("a".parse::<Channel>(), Ok(Channel::A));
        assert_eq!("B".parse::<Channel>(), Ok(Channel::B));
        assert!("c".parse::<Channel>().is_err());
    }

    #[test]
    fn gate_is_shared_between_clones() {
        let gate = PowerGate::new();
        let other = gate.clone();
        assert!(other.is_open());
        gate.close();
        assert!(!other.is_open());
        other.open();
        assert!(gate.is_open());
    }
}
