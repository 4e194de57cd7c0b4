use std::io;
use std::path::PathBuf;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use btleplug;
use serde_json;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

/// Failure to build the pattern table. Fatal at startup, there is no partial table.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Failed to read pattern file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse pattern file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("Pattern {name:?} has no frames")]
    Empty { name: String },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Power ({pow_a}, {pow_b}) is outside of the permitted range 0-{max}")]
pub struct ProtocolRangeError {
    pub pow_a: i32,
    pub pow_b: i32,
    pub max: u16,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("Device operation took longer than {0:?}")]
    Timeout(Duration),

    #[error("Failed to connect after {attempts} attempt(s): {source}")]
    Connection { attempts: u32, source: Box<DeviceError> },

    #[error("A required bluetooth characteristic is not available: {0}")]
    MissingCharacteristic(Uuid),

    #[error("The device is not connected")]
    NotConnected,

    #[error("No compatible device found")]
    NotFound,

    #[error("Read from characteristic {0} returned no data")]
    EmptyRead(Uuid),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to load patterns: {source}")]
    PatternError { #[from] source: PatternError },

    #[error("Device error: {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to bind OSC socket: {source}")]
    OscBind { source: io::Error },

    #[error("Failed to start async runtime: {source}")]
    Runtime { source: io::Error },
}
