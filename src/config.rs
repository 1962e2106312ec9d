//! Bridge configuration.
//!
//! Loaded once at startup from JSON and never changed afterwards. Every
//! section has defaults, and the defaults describe the reference install:
//! four sensors on `can0` feeding a Holley ECU.

use crate::bus::MAX_EXTENDED_ID;
use crate::discovery::TPMS_COMPANY_ID;
use crate::payload::{PayloadError, PayloadProfile, STANDARD_PROFILE};
use crate::registry::{normalize_address, SignalIds, WheelPosition, MAX_SENSORS};
use crate::units;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder payload in the reference device table.
const REFERENCE_PLACEHOLDER: &str = "80eaca502ed8580903001c0700005f00";
const CHANNEL_TOKEN: &str = "{channel}";
/// Upper bound for any cadence interval.
const MAX_INTERVAL_MS: u64 = 3_600_000;
/// Recovery holds the loop for the settle time, so keep it short.
const MAX_SETTLE_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no sensors configured")]
    NoSensors,
    #[error("{count} sensors configured, at most {max} supported")]
    TooManySensors { count: usize, max: usize },
    #[error("invalid sensor address {0:?}")]
    InvalidAddress(String),
    #[error("sensor {0} is configured more than once")]
    DuplicateAddress(String),
    #[error("wheel position {0} is assigned to more than one sensor")]
    DuplicateLocation(WheelPosition),
    #[error("sensor {address}: frame id {id:#x} is not a 29-bit identifier")]
    InvalidFrameId { address: String, id: u32 },
    #[error("sensor {address}: unknown payload profile {profile:?}")]
    UnknownProfile { address: String, profile: String },
    #[error("profile {name:?}: {source}")]
    Profile {
        name: String,
        #[source]
        source: PayloadError,
    },
    #[error("sensor {address}: placeholder payload {reason}")]
    Placeholder { address: String, reason: String },
    #[error("invalid cadence: {0}")]
    Cadence(&'static str),
    #[error("invalid bus settings: {0}")]
    Bus(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub channel: String,
    /// Pause between bringing the interface back up and reopening it.
    pub settle_ms: u64,
    /// Command run to take the interface down; `{channel}` is substituted.
    pub link_down: Vec<String>,
    pub link_up: Vec<String>,
}

impl BusSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Link command for the requested direction with the channel filled in.
    pub fn link_command(&self, up: bool) -> Vec<String> {
        let template = if up { &self.link_up } else { &self.link_down };
        template
            .iter()
            .map(|arg| arg.replace(CHANNEL_TOKEN, &self.channel))
            .collect()
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            channel: "can0".to_string(),
            settle_ms: 500,
            link_down: vec!["ifdown".to_string(), CHANNEL_TOKEN.to_string()],
            link_up: vec!["ifup".to_string(), CHANNEL_TOKEN.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceSettings {
    pub delivery_period_ms: u64,
    /// Run a discovery refresh before every n-th delivery pass.
    pub refresh_every: u32,
    pub scan_window_ms: u64,
    /// Extra time a scan may take past its window before it is abandoned.
    pub scan_grace_ms: u64,
}

impl CadenceSettings {
    pub fn delivery_period(&self) -> Duration {
        Duration::from_millis(self.delivery_period_ms)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms.saturating_add(self.scan_grace_ms))
    }
}

impl Default for CadenceSettings {
    fn default() -> Self {
        Self {
            delivery_period_ms: 1000,
            refresh_every: 5,
            scan_window_ms: 5000,
            scan_grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub address: String,
    pub location: WheelPosition,
    #[serde(default = "default_profile_name")]
    pub profile: String,
    pub pressure_id: u32,
    pub temperature_id: u32,
    pub battery_id: u32,
    /// Payload served until the first advertisement is seen. All zeros if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl SensorConfig {
    pub fn signals(&self) -> SignalIds {
        SignalIds {
            pressure_id: self.pressure_id,
            temperature_id: self.temperature_id,
            battery_id: self.battery_id,
        }
    }
}

fn default_profile_name() -> String {
    STANDARD_PROFILE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bus: BusSettings,
    pub cadence: CadenceSettings,
    /// Manufacturer data entry carrying the TPMS payload.
    pub company_id: u16,
    /// Extra payload profiles; a name here shadows a built-in one.
    pub profiles: BTreeMap<String, PayloadProfile>,
    pub sensors: Vec<SensorConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus: BusSettings::default(),
            cadence: CadenceSettings::default(),
            company_id: TPMS_COMPANY_ID,
            profiles: BTreeMap::new(),
            sensors: reference_sensors(),
        }
    }
}

// Holley inputs: pressure on 0x...627 inputs 1-4, temperature 5-8, battery on 0x...628
fn reference_sensors() -> Vec<SensorConfig> {
    let table: [(&str, WheelPosition, u32, u32, u32); 4] = [
        ("80:EA:CA:50:2E:D8", WheelPosition::DriverFront, 0x1E20_2627, 0x1E21_2627, 0x1E20_2628),
        ("81:EA:CA:50:2E:61", WheelPosition::PassengerFront, 0x1E20_6627, 0x1E21_6627, 0x1E20_6628),
        ("82:EA:CA:50:2D:18", WheelPosition::DriverRear, 0x1E20_A627, 0x1E21_A627, 0x1E20_A628),
        ("83:EA:CA:50:2D:34", WheelPosition::PassengerRear, 0x1E20_E627, 0x1E21_E627, 0x1E20_E628),
    ];

    table
        .iter()
        .map(|&(address, location, pressure_id, temperature_id, battery_id)| SensorConfig {
            address: address.to_string(),
            location,
            profile: default_profile_name(),
            pressure_id,
            temperature_id,
            battery_id,
            placeholder: Some(REFERENCE_PLACEHOLDER.to_string()),
        })
        .collect()
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Configured profile by that name, else the built-in one.
    pub fn resolve_profile(&self, name: &str) -> Option<PayloadProfile> {
        self.profiles
            .get(name)
            .copied()
            .or_else(|| PayloadProfile::builtin(name))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.channel.is_empty() {
            return Err(ConfigError::Bus("channel is empty"));
        }
        if self.bus.settle_ms > MAX_SETTLE_MS {
            return Err(ConfigError::Bus("settle_ms must be at most 5000"));
        }
        if self.cadence.delivery_period_ms == 0 {
            return Err(ConfigError::Cadence("delivery period must be non-zero"));
        }
        let intervals = [
            self.cadence.delivery_period_ms,
            self.cadence.scan_window_ms,
            self.cadence.scan_grace_ms,
        ];
        if intervals.iter().any(|&ms| ms > MAX_INTERVAL_MS) {
            return Err(ConfigError::Cadence("intervals must be at most one hour"));
        }
        if self.cadence.refresh_every == 0 {
            return Err(ConfigError::Cadence("refresh_every must be at least 1"));
        }

        for (name, profile) in &self.profiles {
            profile.validate().map_err(|source| ConfigError::Profile {
                name: name.clone(),
                source,
            })?;
        }

        if self.sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }
        if self.sensors.len() > MAX_SENSORS {
            return Err(ConfigError::TooManySensors {
                count: self.sensors.len(),
                max: MAX_SENSORS,
            });
        }

        let mut addresses = HashSet::new();
        let mut locations = HashSet::new();
        for sensor in &self.sensors {
            let address = normalize_address(&sensor.address)
                .ok_or_else(|| ConfigError::InvalidAddress(sensor.address.clone()))?;
            if !addresses.insert(address.clone()) {
                return Err(ConfigError::DuplicateAddress(address));
            }
            if !locations.insert(sensor.location) {
                return Err(ConfigError::DuplicateLocation(sensor.location));
            }

            let ids = [sensor.pressure_id, sensor.temperature_id, sensor.battery_id];
            if let Some(&id) = ids.iter().find(|&&id| id > MAX_EXTENDED_ID) {
                return Err(ConfigError::InvalidFrameId { address, id });
            }

            let profile = self.resolve_profile(&sensor.profile).ok_or_else(|| {
                ConfigError::UnknownProfile {
                    address: address.clone(),
                    profile: sensor.profile.clone(),
                }
            })?;

            if let Some(placeholder) = &sensor.placeholder {
                if placeholder.len() != profile.payload_len {
                    return Err(ConfigError::Placeholder {
                        address,
                        reason: format!(
                            "is {} hex chars, profile expects {}",
                            placeholder.len(),
                            profile.payload_len
                        ),
                    });
                }
                if let Err(e) = units::hex_to_bytes(placeholder) {
                    return Err(ConfigError::Placeholder {
                        address,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
