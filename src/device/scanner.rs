use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use log::{debug, info, warn};
use tokio::time::{sleep, Duration, Instant};

use crate::device::constants::{DEVICE_NAME, SCAN_DEADLINE, SCAN_POLL_DELAY};
use crate::error::DeviceError;

/// How to recognise the Coyote among the advertising peripherals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Bluetooth address, compared case-insensitively. macOS hides addresses, there the
    /// platform peripheral id is matched instead.
    Address(String),
    /// Advertised local name.
    Name(String),
}

impl DeviceSelector {
    /// An empty uid means "find the device by its advertised name".
    pub fn from_uid(uid: &str) -> Self {
        let uid = uid.trim();
        if uid.is_empty() {
            DeviceSelector::Name(DEVICE_NAME.to_string())
        } else {
            DeviceSelector::Address(uid.to_string())
        }
    }
}

/// What the scanner knows about an advertising peripheral.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub address: String,
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub handle: T,
}

/// Picks the peripheral to use. Several name matches resolve to the strongest signal.
pub fn select_candidate<T>(selector: &DeviceSelector, candidates: Vec<Candidate<T>>) -> Option<Candidate<T>> {
    match selector {
        DeviceSelector::Address(uid) => candidates.into_iter().find(|candidate| {
            candidate.address.eq_ignore_ascii_case(uid)
                || candidate.id.to_ascii_lowercase().contains(&uid.to_ascii_lowercase())
        }),
        DeviceSelector::Name(name) => {
            let mut matches: Vec<Candidate<T>> = candidates
                .into_iter()
                .filter(|candidate| candidate.name.as_deref() == Some(name.as_str()))
                .collect();

            matches.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));

            for skipped in matches.iter().skip(1) {
                warn!("More than one Coyote was found. Skipping {} ({:?} dBm)", skipped.address, skipped.rssi);
            }

            matches.into_iter().next()
        },
    }
}

async fn start_scanning(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    let adapters = manager.adapters().await?;

    for adapter in &adapters {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(ScanFilter::default()).await?;
    }

    Ok(adapters)
}

async fn stop_scanning(adapters: &[Adapter]) {
    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            debug!("Failed to stop scanning: {}", err);
        }
    }
}

async fn list_candidates(adapters: &[Adapter]) -> Vec<Candidate<Peripheral>> {
    let mut candidates = Vec::new();

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    debug!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    candidates.push(Candidate {
                        address: properties.address.to_string(),
                        id: format!("{:?}", peripheral.id()),
                        name: properties.local_name,
                        rssi: properties.rssi,
                        handle: peripheral,
                    });
                },
            }
        }
    }

    candidates
}

/// Scans all adapters until a peripheral matches `selector` or the scan deadline passes.
pub async fn find_device(selector: &DeviceSelector) -> Result<Peripheral, DeviceError> {
    let manager = Manager::new().await?;
    let adapters = start_scanning(&manager).await?;
    let deadline = Instant::now() + Duration::from_millis(SCAN_DEADLINE);

    info!("Looking for {:?}", selector);

    let found = loop {
        let candidates = list_candidates(&adapters).await;
        debug!("{} peripheral(s) visible", candidates.len());

        if let Some(candidate) = select_candidate(selector, candidates) {
            info!(
                "Using peripheral {} {}",
                candidate.address,
                candidate.name.as_deref().unwrap_or("NONE"),
            );
            break Some(candidate.handle);
        }

        if Instant::now() >= deadline {
            break None;
        }

        sleep(Duration::from_millis(SCAN_POLL_DELAY)).await;
    };

    stop_scanning(&adapters).await;
    found.ok_or(DeviceError::NotFound)
}
