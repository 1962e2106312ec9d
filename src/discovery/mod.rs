//! Sources of BLE advertisements.
//!
//! The bridge asks a source for one scan at a time and only looks at the
//! manufacturer data entry for [`TPMS_COMPANY_ID`].

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod replay;

#[cfg(feature = "bluez")]
pub use bluez::BluezSource;
pub use replay::ReplaySource;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Company identifier the sensors put their payload under.
pub const TPMS_COMPANY_ID: u16 = 0x0100;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("scan backend error: {0}")]
    Backend(String),
    #[error("cannot read replay file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse replay data: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub address: String,
    #[serde(with = "hex_map")]
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl Advertisement {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            manufacturer_data: HashMap::new(),
        }
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company_id, data);
        self
    }
}

/// Devices seen during one scan, by address.
pub type ScanResults = HashMap<String, Advertisement>;

pub fn scan_results(advertisements: impl IntoIterator<Item = Advertisement>) -> ScanResults {
    advertisements
        .into_iter()
        .map(|adv| (adv.address.clone(), adv))
        .collect()
}

pub trait AdvertisementSource {
    /// Scan for `window` and report every device seen.
    fn discover(&mut self, window: Duration) -> impl Future<Output = Result<ScanResults, DiscoveryError>> + Send;
}

// Manufacturer data as `{"256": "80eaca..."}` in JSON
mod hex_map {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::{BTreeMap, HashMap};

    pub fn serialize<S: Serializer>(map: &HashMap<u16, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        let sorted: BTreeMap<u16, String> = map.iter().map(|(id, data)| (*id, hex::encode(data))).collect();
        serializer.collect_map(sorted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashMap<u16, Vec<u8>>, D::Error> {
        HashMap::<u16, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(id, text)| Ok((id, hex::decode(&text).map_err(D::Error::custom)?)))
            .collect()
    }
}
