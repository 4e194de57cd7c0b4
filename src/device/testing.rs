//! In-memory peripheral for exercising the session and the playback loop.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic};
use uuid::Uuid;

use crate::device::constants::{
    BATTERY_LEVEL_CHARACTERISTIC, BATTERY_SERVICE, CONFIG_CHARACTERISTIC, PWM_A34_CHARACTERISTIC,
    PWM_AB2_CHARACTERISTIC, PWM_B34_CHARACTERISTIC, PWM_SERVICE,
};
use crate::device::link::GattLink;
use crate::device::session::{DeviceSession, SessionOptions};
use crate::device::types::PowerGate;
use crate::error::DeviceError;

#[derive(Debug, Default)]
pub struct MockState {
    pub connected: bool,
    pub fail_connect: bool,
    /// `connect` never resolves.
    pub hang_connect: bool,
    pub fail_reads: bool,
    pub fail_writes: bool,
    /// Reads of the power characteristic return something other than what was written.
    pub corrupt_echo: bool,
    pub missing: Vec<Uuid>,
    /// Characteristics reported under an unrelated service.
    pub misplaced: Vec<Uuid>,
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub values: HashMap<Uuid, Vec<u8>>,
    pub writes: Vec<(Uuid, Vec<u8>)>,
    pub reads: Vec<Uuid>,
}

#[derive(Debug, Default)]
pub struct MockLink {
    state: Mutex<MockState>,
}

fn characteristic(uuid: Uuid, service_uuid: Uuid) -> Characteristic {
    Characteristic {
        uuid,
        service_uuid,
        properties: CharPropFlags::READ | CharPropFlags::WRITE,
        descriptors: BTreeSet::new(),
    }
}

fn link_error() -> DeviceError {
    DeviceError::Btle { source: btleplug::Error::NotConnected }
}

impl MockLink {
    pub fn new() -> Self {
        let link = MockLink::default();
        link.with(|state| {
            state.values.insert(BATTERY_LEVEL_CHARACTERISTIC, vec![87]);
        });
        link
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.with(|state| {
            state.writes.iter()
                .filter(|(target, _)| *target == uuid)
                .map(|(_, data)| data.clone())
                .collect()
        })
    }

    pub fn reads_of(&self, uuid: Uuid) -> usize {
        self.with(|state| state.reads.iter().filter(|target| **target == uuid).count())
    }

    pub fn connect_calls(&self) -> u32 {
        self.with(|state| state.connect_calls)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.with(|state| state.disconnect_calls)
    }
}

#[async_trait]
impl GattLink for MockLink {
    async fn connect(&self) -> Result<(), DeviceError> {
        let hang = self.with(|state| {
            state.connect_calls += 1;
            state.hang_connect
        });

        if hang {
            std::future::pending::<()>().await;
        }

        self.with(|state| {
            if state.fail_connect {
                Err(link_error())
            } else {
                state.connected = true;
                Ok(())
            }
        })
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.with(|state| {
            state.disconnect_calls += 1;
            state.connected = false;
        });
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.with(|state| state.connected))
    }

    async fn discover(&self) -> Result<Vec<Characteristic>, DeviceError> {
        let all = [
            characteristic(BATTERY_LEVEL_CHARACTERISTIC, BATTERY_SERVICE),
            characteristic(PWM_AB2_CHARACTERISTIC, PWM_SERVICE),
            characteristic(PWM_A34_CHARACTERISTIC, PWM_SERVICE),
            characteristic(PWM_B34_CHARACTERISTIC, PWM_SERVICE),
            characteristic(CONFIG_CHARACTERISTIC, PWM_SERVICE),
        ];

        Ok(self.with(|state| {
            all.into_iter()
                .filter(|c| !state.missing.contains(&c.uuid))
                .map(|c| if state.misplaced.contains(&c.uuid) { characteristic(c.uuid, Uuid::nil()) } else { c })
                .collect()
        }))
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, DeviceError> {
        self.with(|state| {
            state.reads.push(characteristic.uuid);
            if state.fail_reads {
                return Err(link_error());
            }

            let value = state.values.get(&characteristic.uuid).cloned().unwrap_or_default();
            if state.corrupt_echo && characteristic.uuid == PWM_AB2_CHARACTERISTIC {
                return Ok(vec![0xFF; 3]);
            }
            Ok(value)
        })
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), DeviceError> {
        self.with(|state| {
            if state.fail_writes {
                return Err(link_error());
            }

            state.values.insert(characteristic.uuid, data.to_vec());
            state.writes.push((characteristic.uuid, data.to_vec()));
            Ok(())
        })
    }
}

/// A session connected (with the self-test done) to a fresh [`MockLink`].
pub async fn connected_session(options: SessionOptions) -> DeviceSession<MockLink> {
    let session = DeviceSession::new(MockLink::new(), options, PowerGate::new());
    session.connect(1).await.unwrap();
    session
}
