//! The bridge main loop.
//!
//! One pass per delivery period. Before every `refresh_every`-th pass the
//! bridge scans for advertisements and folds the matching payloads into the
//! registry, then the delivery pipeline sends the registry out on the bus.

use crate::bus::BusConnector;
use crate::config::{BridgeConfig, CadenceSettings, ConfigError};
use crate::discovery::{AdvertisementSource, DiscoveryError, ScanResults};
use crate::pipeline::{CycleReport, DeliveryPipeline};
use crate::recovery::{BusSupervisor, SupervisorSettings};
use crate::registry::{SensorRegistry, UpdateOutcome};
use crate::scheduler::{CycleScheduler, RefreshOutcome, SchedulerStats};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Process exit status after an external interrupt.
pub const INTERRUPT_EXIT_CODE: u8 = 130;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("discovery backend unavailable: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("no backend for {0}")]
    NoBackend(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownReason {
    Interrupted,
}

impl ShutdownReason {
    pub fn exit_code(self) -> u8 {
        match self {
            ShutdownReason::Interrupted => INTERRUPT_EXIT_CODE,
        }
    }
}

pub struct TpmsBridge<S: AdvertisementSource, C: BusConnector> {
    registry: SensorRegistry,
    source: S,
    bus: BusSupervisor<C>,
    pipeline: DeliveryPipeline,
    scheduler: CycleScheduler,
    cadence: CadenceSettings,
    company_id: u16,
    last_report: Option<CycleReport>,
}

impl<S: AdvertisementSource, C: BusConnector> TpmsBridge<S, C> {
    pub fn new(config: &BridgeConfig, source: S, connector: C) -> Result<Self, BridgeError> {
        let registry = SensorRegistry::from_config(config)?;
        let bus = BusSupervisor::new(
            connector,
            SupervisorSettings {
                channel: config.bus.channel.clone(),
                settle: config.bus.settle(),
            },
        );

        Ok(Self {
            registry,
            source,
            bus,
            pipeline: DeliveryPipeline::new(),
            scheduler: CycleScheduler::new(config.cadence.refresh_every),
            cadence: config.cadence.clone(),
            company_id: config.company_id,
            last_report: None,
        })
    }

    pub fn with_pipeline(mut self, pipeline: DeliveryPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Scan once and fold the results into the registry.
    ///
    /// A scan that errors or outlives the window plus grace brings no new
    /// data; the registry keeps what it had.
    pub async fn refresh(&mut self) -> RefreshOutcome {
        let timeout = self.cadence.scan_timeout();
        let scan = self.source.discover(self.cadence.scan_window());
        let result = tokio::time::timeout(timeout, scan).await;

        let outcome = match result {
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "discovery timed out, keeping previous payloads");
                RefreshOutcome::TimedOut
            }
            Ok(Err(e)) => {
                warn!(error = %e, "discovery failed, keeping previous payloads");
                RefreshOutcome::Failed
            }
            Ok(Ok(results)) => {
                let accepted = self.apply_scan(&results);
                info!(devices = results.len(), accepted, "discovery refresh complete");
                RefreshOutcome::Completed {
                    devices: results.len(),
                    accepted,
                }
            }
        };

        self.scheduler.record_refresh(outcome);
        outcome
    }

    /// Offer every registered device's TPMS payload to the registry.
    /// Returns how many were accepted.
    pub fn apply_scan(&mut self, results: &ScanResults) -> usize {
        let mut accepted = 0;

        for adv in results.values() {
            if !self.registry.contains(&adv.address) {
                continue;
            }
            let Some(data) = adv.manufacturer_data.get(&self.company_id) else {
                debug!(address = %adv.address, "no TPMS manufacturer data");
                continue;
            };

            match self.registry.update_from_bytes(&adv.address, data) {
                UpdateOutcome::Accepted => {
                    debug!(address = %adv.address, "payload updated");
                    accepted += 1;
                }
                outcome => warn!(address = %adv.address, ?outcome, "ignoring advertisement"),
            }
        }

        accepted
    }

    /// Send the whole registry once. `None` when the bus could not be
    /// recovered; the next pass tries again.
    pub fn deliver_pass(&mut self) -> Option<CycleReport> {
        let records = self.registry.snapshot();

        match self.pipeline.deliver(&records, &mut self.bus) {
            Ok(report) => {
                self.scheduler.complete_pass(false);
                self.last_report = Some(report.clone());
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "delivery pass aborted, retrying next cycle");
                self.scheduler.complete_pass(true);
                None
            }
        }
    }

    /// One cycle step without waiting for the period: refresh if due, then deliver.
    pub async fn run_pass(&mut self) -> Option<CycleReport> {
        if self.scheduler.refresh_due() {
            self.refresh().await;
        }
        self.deliver_pass()
    }

    /// Run passes on the delivery period until `shutdown` resolves.
    ///
    /// Shutdown is checked between steps and also ends a pending scan.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> ShutdownReason {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.cadence.delivery_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sensors = self.registry.len(),
            channel = self.bus.channel(),
            period_ms = self.cadence.delivery_period_ms,
            "bridge running"
        );

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            if self.scheduler.refresh_due() {
                tokio::select! {
                    biased;
                    () = &mut shutdown => break,
                    _ = self.refresh() => {}
                }
            }

            self.deliver_pass();
        }

        let stats = self.scheduler.get_stats();
        info!(
            passes = stats.passes_completed,
            aborted = stats.passes_aborted,
            "interrupted, shutting down"
        );
        ShutdownReason::Interrupted
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &BusSupervisor<C> {
        &self.bus
    }

    pub fn get_scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.get_stats()
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use crate::discovery::{Advertisement, ReplaySource, TPMS_COMPANY_ID};
    use crate::pipeline::{SignalScale, BATTERY_SCALE, TEMPERATURE_SCALE};
    use crate::units;
    use std::time::Duration;

    const DRIVER_FRONT: &str = "80:EA:CA:50:2E:D8";
    // battery byte 0x64: 100 %
    const FULL_BATTERY: &str = "80eaca502ed8580903001c0700006400";

    struct StalledSource;

    impl AdvertisementSource for StalledSource {
        async fn discover(&mut self, _window: Duration) -> Result<ScanResults, DiscoveryError> {
            std::future::pending().await
        }
    }

    struct BrokenSource;

    impl AdvertisementSource for BrokenSource {
        async fn discover(&mut self, _window: Duration) -> Result<ScanResults, DiscoveryError> {
            Err(DiscoveryError::Backend("adapter powered off".to_string()))
        }
    }

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.bus.settle_ms = 0;
        config
    }

    fn advert(address: &str, payload: &str) -> Advertisement {
        Advertisement::new(address).with_manufacturer_data(TPMS_COMPANY_ID, units::hex_to_bytes(payload).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_updates_registered_sensor() {
        let source = ReplaySource::from_scans(vec![vec![
            advert(DRIVER_FRONT, FULL_BATTERY),
            advert("AA:BB:CC:DD:EE:FF", FULL_BATTERY),
        ]]);
        let mut bridge = TpmsBridge::new(&config(), source, MockBus::new()).unwrap();

        let outcome = bridge.refresh().await;
        assert_eq!(outcome, RefreshOutcome::Completed { devices: 2, accepted: 1 });
        assert_eq!(bridge.registry().get(DRIVER_FRONT).unwrap().raw_payload, FULL_BATTERY);
        assert!(!bridge.registry().contains("AA:BB:CC:DD:EE:FF"));
    }

    #[tokio::test]
    async fn test_zero_match_refresh_changes_nothing() {
        let source = ReplaySource::from_scans(vec![vec![advert("AA:BB:CC:DD:EE:FF", FULL_BATTERY)]]);
        let bus = MockBus::new();
        let mut bridge = TpmsBridge::new(&config(), source, bus.clone()).unwrap();

        let before = bridge.registry().snapshot();
        bridge.deliver_pass().unwrap();
        let frames_before = bus.sent_frames();
        bus.clear();

        bridge.refresh().await;
        assert_eq!(bridge.registry().snapshot(), before);
        bridge.deliver_pass().unwrap();
        assert_eq!(bus.sent_frames(), frames_before);
    }

    #[tokio::test]
    async fn test_other_company_id_ignored() {
        let adv = Advertisement::new(DRIVER_FRONT).with_manufacturer_data(0x004c, units::hex_to_bytes(FULL_BATTERY).unwrap());
        let mut bridge = TpmsBridge::new(&config(), ReplaySource::default(), MockBus::new()).unwrap();

        let accepted = bridge.apply_scan(&crate::discovery::scan_results([adv]));
        assert_eq!(accepted, 0);
    }

    #[tokio::test]
    async fn test_wrong_length_payload_keeps_previous() {
        let source = ReplaySource::from_scans(vec![vec![advert(DRIVER_FRONT, "80eaca502ed858")]]);
        let mut bridge = TpmsBridge::new(&config(), source, MockBus::new()).unwrap();
        let before = bridge.registry().get(DRIVER_FRONT).unwrap().raw_payload.clone();

        let outcome = bridge.refresh().await;
        assert_eq!(outcome, RefreshOutcome::Completed { devices: 1, accepted: 0 });
        assert_eq!(bridge.registry().get(DRIVER_FRONT).unwrap().raw_payload, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_scan_times_out() {
        let mut bridge = TpmsBridge::new(&config(), StalledSource, MockBus::new()).unwrap();
        let started = tokio::time::Instant::now();

        assert_eq!(bridge.refresh().await, RefreshOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(7000));
        assert_eq!(bridge.get_scheduler_stats().refreshes_timed_out, 1);
    }

    #[tokio::test]
    async fn test_failed_scan_still_delivers() {
        let bus = MockBus::new();
        let mut bridge = TpmsBridge::new(&config(), BrokenSource, bus.clone()).unwrap();

        let report = bridge.run_pass().await.unwrap();
        assert_eq!(report.frames_sent, 12);
        assert_eq!(bridge.get_scheduler_stats().refreshes_failed, 1);
    }

    #[tokio::test]
    async fn test_custom_scale_pipeline() {
        let bus = MockBus::new();
        let pipeline = DeliveryPipeline::with_scales(
            SignalScale::new((0.0, 100.0), (0.5, 4.5)),
            TEMPERATURE_SCALE,
            BATTERY_SCALE,
        );
        let mut bridge = TpmsBridge::new(&config(), ReplaySource::default(), bus.clone())
            .unwrap()
            .with_pipeline(pipeline);

        bridge.deliver_pass().unwrap();

        // 28.86 psi on a 0.5-4.5 V sender over 0-100 psi
        let pressure = bus.sent_frames()[0].as_float().unwrap();
        assert!((pressure - 1.6544).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_unrecoverable_bus_aborts_pass_only() {
        let bus = MockBus::new();
        let mut bridge = TpmsBridge::new(&config(), ReplaySource::default(), bus.clone()).unwrap();
        bus.fail_next_sends(1);
        bus.fail_next_opens(1);

        assert!(bridge.run_pass().await.is_none());
        assert_eq!(bridge.get_scheduler_stats().passes_aborted, 1);

        let report = bridge.run_pass().await.unwrap();
        assert_eq!(report.frames_sent, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_interrupt() {
        let bus = MockBus::new();
        let mut bridge = TpmsBridge::new(&config(), ReplaySource::default(), bus.clone()).unwrap();

        let reason = bridge.run(tokio::time::sleep(Duration::from_millis(5500))).await;
        assert_eq!(reason, ShutdownReason::Interrupted);
        assert_eq!(reason.exit_code(), INTERRUPT_EXIT_CODE);

        // passes at 0 s through 5 s, refreshes before the first and the sixth
        let stats = bridge.get_scheduler_stats();
        assert_eq!(stats.passes_completed, 6);
        assert_eq!(stats.refreshes, 2);
        assert_eq!(bus.sent_frames().len(), 72);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_ends_pending_scan() {
        let bus = MockBus::new();
        let mut bridge = TpmsBridge::new(&config(), StalledSource, bus.clone()).unwrap();

        let reason = bridge.run(tokio::time::sleep(Duration::from_secs(1))).await;
        assert_eq!(reason, ShutdownReason::Interrupted);
        assert!(bus.sent_frames().is_empty());
        assert_eq!(bridge.get_scheduler_stats().refreshes, 0);
    }
}
