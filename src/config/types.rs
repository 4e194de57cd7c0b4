use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::device::session::SessionOptions;
use crate::device::types::Channel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Bluetooth address of the Coyote. Empty to pick it by advertised name.
    pub device_uid: String,
    pub safe_mode: bool,
    pub channels_swapped: bool,
    pub max_power_a: u16,
    pub max_power_b: u16,
    pub pattern_a: String,
    pub pattern_b: String,
    pub osc_addr_a: String,
    pub osc_addr_b: String,
    pub connect_timeout_secs: u64,
    pub connect_retries: u32,
    pub osc_host: String,
    pub osc_port: u16,
    pub window_secs: f32,
    pub start_limit: f32,
    pub min_limit: f32,
    pub max_limit: f32,
    pub min_power: f32,
    /// Directory holding `pattern_dict.json`. Relative paths resolve against the working
    /// directory.
    pub pattern_dir: PathBuf,
}

impl Settings {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            safe_mode: self.safe_mode,
            channels_swapped: self.channels_swapped,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn max_power(&self, channel: Channel) -> u16 {
        match channel {
            Channel::A => self.max_power_a,
            Channel::B => self.max_power_b,
        }
    }

    pub fn pattern(&self, channel: Channel) -> &str {
        match channel {
            Channel::A => &self.pattern_a,
            Channel::B => &self.pattern_b,
        }
    }

    pub fn osc_addr(&self, channel: Channel) -> &str {
        match channel {
            Channel::A => &self.osc_addr_a,
            Channel::B => &self.osc_addr_b,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f32(self.window_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Power both channels idle at while playback runs.
    pub fn idle_power(&self, channel: Channel) -> i32 {
        (self.max_power(channel) as f32 * self.min_power) as i32
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            device_uid: "C9:9F:E4:2E:31:60".to_string(),
            safe_mode: true,
            channels_swapped: true,
            max_power_a: 300,
            max_power_b: 300,
            pattern_a: "vibrator_4".to_string(),
            pattern_b: "vibrator_4".to_string(),
            osc_addr_a: "/avatar/parameters/EarLDis".to_string(),
            osc_addr_b: "/avatar/parameters/EarRDis".to_string(),
            connect_timeout_secs: 40,
            connect_retries: 10,
            osc_host: "127.0.0.1".to_string(),
            osc_port: 9001,
            window_secs: 0.1,
            start_limit: 0.05,
            min_limit: 0.2,
            max_limit: 0.8,
            min_power: 0.5,
            pattern_dir: PathBuf::from("data/estim"),
        }
    }
}
