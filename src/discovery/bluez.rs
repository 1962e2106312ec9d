//! BlueZ scanning over D-Bus.

use super::{scan_results, Advertisement, AdvertisementSource, DiscoveryError, ScanResults};
use bluez_async::{BluetoothSession, DiscoveryFilter};
use std::time::Duration;
use tracing::warn;

pub struct BluezSource {
    session: BluetoothSession,
}

impl BluezSource {
    pub async fn connect() -> Result<Self, DiscoveryError> {
        let (_, session) = BluetoothSession::new()
            .await
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;
        Ok(Self { session })
    }
}

impl AdvertisementSource for BluezSource {
    async fn discover(&mut self, window: Duration) -> Result<ScanResults, DiscoveryError> {
        self.session
            .start_discovery_with_filter(&DiscoveryFilter {
                duplicate_data: Some(true),
                ..DiscoveryFilter::default()
            })
            .await
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;

        tokio::time::sleep(window).await;

        let devices = self.session.get_devices().await;
        if let Err(e) = self.session.stop_discovery().await {
            warn!(error = %e, "cannot stop BLE discovery");
        }
        let devices = devices.map_err(|e| DiscoveryError::Backend(e.to_string()))?;

        Ok(scan_results(devices.into_iter().map(|device| Advertisement {
            address: device.mac_address.to_string(),
            manufacturer_data: device.manufacturer_data,
        })))
    }
}
