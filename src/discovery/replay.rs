//! Replays recorded scans from a JSON file, for bench runs without a radio.
//!
//! The file holds an array of scans, each an array of advertisements:
//!
//! ```json
//! [
//!   [ { "address": "80:EA:CA:50:2E:D8", "manufacturer_data": { "256": "80eaca502ed8580903001c0700005f00" } } ],
//!   []
//! ]
//! ```

use super::{scan_results, AdvertisementSource, Advertisement, DiscoveryError, ScanResults};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    scans: Vec<Vec<Advertisement>>,
    next: usize,
    paced: bool,
}

impl ReplaySource {
    pub fn from_scans(scans: Vec<Vec<Advertisement>>) -> Self {
        Self {
            scans,
            next: 0,
            paced: false,
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, DiscoveryError> {
        Ok(Self::from_scans(serde_json::from_str(text)?))
    }

    pub fn from_file(path: &Path) -> Result<Self, DiscoveryError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Take the full scan window on each call, like a real radio would.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}

impl AdvertisementSource for ReplaySource {
    async fn discover(&mut self, window: Duration) -> Result<ScanResults, DiscoveryError> {
        if self.paced {
            tokio::time::sleep(window).await;
        }
        if self.scans.is_empty() {
            return Ok(ScanResults::new());
        }

        let index = self.next % self.scans.len();
        self.next = self.next.wrapping_add(1);
        debug!(index, devices = self.scans[index].len(), "replaying scan");
        Ok(scan_results(self.scans[index].iter().cloned()))
    }
}
