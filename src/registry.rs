use crate::config::{BridgeConfig, ConfigError};
use crate::payload::PayloadProfile;
use crate::units;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_SENSORS: usize = 8;

/// Wheel a sensor is mounted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelPosition {
    DriverFront,
    PassengerFront,
    DriverRear,
    PassengerRear,
}

impl WheelPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WheelPosition::DriverFront => "driver_front",
            WheelPosition::PassengerFront => "passenger_front",
            WheelPosition::DriverRear => "driver_rear",
            WheelPosition::PassengerRear => "passenger_rear",
        }
    }
}

impl fmt::Display for WheelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound CAN identifiers for the three signals of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalIds {
    pub pressure_id: u32,
    pub temperature_id: u32,
    pub battery_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Upper-case `##:##:##:##:##:##` hardware address.
    pub address: String,
    /// Last accepted advertisement, lower-case hex.
    pub raw_payload: String,
    pub signals: SignalIds,
    pub location: WheelPosition,
    pub profile: PayloadProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted,
    UnknownSensor,
    WrongLength { expected: usize, actual: usize },
    MalformedHex,
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted)
    }
}

/// Canonical form of a `##:##:##:##:##:##` address, or `None` if malformed.
pub fn normalize_address(address: &str) -> Option<String> {
    let octets: std::vec::Vec<&str> = address.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    let well_formed = octets
        .iter()
        .all(|octet| octet.len() == 2 && octet.bytes().all(|b| b.is_ascii_hexdigit()));
    if !well_formed {
        return None;
    }
    Some(address.to_ascii_uppercase())
}

/// Allow-list of known sensors and their latest payloads.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    records: Vec<SensorRecord, MAX_SENSORS>,
}

impl SensorRegistry {
    /// Build the registry from a configuration, validating it first.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut records = Vec::new();
        for sensor in &config.sensors {
            let profile = config
                .resolve_profile(&sensor.profile)
                .ok_or_else(|| ConfigError::UnknownProfile {
                    address: sensor.address.clone(),
                    profile: sensor.profile.clone(),
                })?;
            let address = normalize_address(&sensor.address)
                .ok_or_else(|| ConfigError::InvalidAddress(sensor.address.clone()))?;
            let raw_payload = sensor
                .placeholder
                .clone()
                .map(|hex| hex.to_ascii_lowercase())
                .unwrap_or_else(|| "0".repeat(profile.payload_len));

            let record = SensorRecord {
                address,
                raw_payload,
                signals: sensor.signals(),
                location: sensor.location,
                profile,
            };
            records.push(record).map_err(|_| ConfigError::TooManySensors {
                count: config.sensors.len(),
                max: MAX_SENSORS,
            })?;
        }

        Ok(Self { records })
    }

    /// Offer a newly observed payload for `identity`.
    ///
    /// Only a known sensor with a well-formed payload of its profile length
    /// replaces the stored value; anything else leaves the record untouched.
    pub fn update(&mut self, identity: &str, raw_hex: &str) -> UpdateOutcome {
        let Some(record) = self.find_mut(identity) else {
            return UpdateOutcome::UnknownSensor;
        };

        let expected = record.profile.payload_len;
        if raw_hex.len() != expected {
            return UpdateOutcome::WrongLength {
                expected,
                actual: raw_hex.len(),
            };
        }
        if units::hex_to_bytes(raw_hex).is_err() {
            return UpdateOutcome::MalformedHex;
        }

        record.raw_payload = raw_hex.to_ascii_lowercase();
        UpdateOutcome::Accepted
    }

    /// Same as [`SensorRegistry::update`] for raw manufacturer data.
    pub fn update_from_bytes(&mut self, identity: &str, data: &[u8]) -> UpdateOutcome {
        self.update(identity, &hex::encode(data))
    }

    /// Copy of every record, in configuration order.
    pub fn snapshot(&self) -> std::vec::Vec<SensorRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn get(&self, identity: &str) -> Option<&SensorRecord> {
        self.records
            .iter()
            .find(|record| record.address.eq_ignore_ascii_case(identity))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn find_mut(&mut self, identity: &str) -> Option<&mut SensorRecord> {
        self.records
            .iter_mut()
            .find(|record| record.address.eq_ignore_ascii_case(identity))
    }
}
