//! Delivery pass: registry records in, CAN frames out.

use crate::bus::{BusConnector, OutboundFrame};
use crate::payload::{self, DecodedReading};
use crate::recovery::{BusSupervisor, DeliveryError};
use crate::registry::{SensorRecord, WheelPosition};
use crate::units;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Linear mapping of one physical quantity onto the ECU input voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalScale {
    pub domain: (f64, f64),
    pub range: (f64, f64),
}

impl SignalScale {
    pub const fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        Self { domain, range }
    }

    pub fn apply(&self, value: f64) -> Result<f64, units::UnitError> {
        units::remap(value, self.domain.0, self.domain.1, self.range.0, self.range.1)
    }
}

pub const PRESSURE_SCALE: SignalScale = SignalScale::new((0.0, 50.0), (0.0, 5.0));
pub const TEMPERATURE_SCALE: SignalScale = SignalScale::new((0.0, 212.0), (0.0, 5.0));
pub const BATTERY_SCALE: SignalScale = SignalScale::new((0.0, 100.0), (0.0, 5.0));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Pressure,
    Temperature,
    Battery,
}

/// What happened to one sensor during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDelivery {
    pub location: WheelPosition,
    pub reading: Option<DecodedReading>,
    pub frames_sent: u8,
    pub frames_failed: u8,
    pub frames_skipped: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub sensors: Vec<SensorDelivery>,
    pub frames_sent: u32,
    pub frames_failed: u32,
    pub frames_skipped: u32,
}

impl CycleReport {
    fn push(&mut self, delivery: SensorDelivery) {
        self.frames_sent += u32::from(delivery.frames_sent);
        self.frames_failed += u32::from(delivery.frames_failed);
        self.frames_skipped += u32::from(delivery.frames_skipped);
        self.sensors.push(delivery);
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryPipeline {
    pressure: SignalScale,
    temperature: SignalScale,
    battery: SignalScale,
}

impl DeliveryPipeline {
    pub fn new() -> Self {
        Self::with_scales(PRESSURE_SCALE, TEMPERATURE_SCALE, BATTERY_SCALE)
    }

    pub fn with_scales(pressure: SignalScale, temperature: SignalScale, battery: SignalScale) -> Self {
        Self {
            pressure,
            temperature,
            battery,
        }
    }

    /// Frames for one reading, in send order. A signal whose value cannot be
    /// encoded comes back as `None`; the others are unaffected.
    pub fn build_frames(&self, record: &SensorRecord, reading: &DecodedReading) -> [(Signal, Option<OutboundFrame>); 3] {
        let ids = &record.signals;
        [
            (
                Signal::Pressure,
                self.frame(record, Signal::Pressure, ids.pressure_id, &self.pressure, reading.pressure_psi),
            ),
            (
                Signal::Temperature,
                self.frame(
                    record,
                    Signal::Temperature,
                    ids.temperature_id,
                    &self.temperature,
                    reading.temperature_f,
                ),
            ),
            (
                Signal::Battery,
                self.frame(
                    record,
                    Signal::Battery,
                    ids.battery_id,
                    &self.battery,
                    f64::from(reading.battery_pct),
                ),
            ),
        ]
    }

    fn frame(
        &self,
        record: &SensorRecord,
        signal: Signal,
        id: u32,
        scale: &SignalScale,
        value: f64,
    ) -> Option<OutboundFrame> {
        let volts = match scale.apply(value) {
            Ok(volts) => volts,
            Err(e) => {
                warn!(location = %record.location, ?signal, error = %e, "cannot scale signal");
                return None;
            }
        };

        match OutboundFrame::float(id, volts as f32) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(location = %record.location, ?signal, error = %e, "cannot frame signal");
                None
            }
        }
    }

    /// Run one delivery pass over `records`.
    ///
    /// Per-sensor and per-frame failures are counted in the report. Only a
    /// failed bus recovery stops the pass early, and it is returned as the
    /// error.
    pub fn deliver<C: BusConnector>(
        &self,
        records: &[SensorRecord],
        bus: &mut BusSupervisor<C>,
    ) -> Result<CycleReport, DeliveryError> {
        let mut report = CycleReport::default();

        for record in records {
            let reading = match payload::decode_payload(&record.raw_payload, &record.profile) {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(location = %record.location, error = %e, "skipping sensor, payload does not decode");
                    report.push(SensorDelivery {
                        location: record.location,
                        reading: None,
                        frames_sent: 0,
                        frames_failed: 0,
                        frames_skipped: 3,
                    });
                    continue;
                }
            };

            info!(
                location = %record.location,
                pressure_psi = reading.pressure_psi,
                temperature_f = reading.temperature_f,
                battery_pct = reading.battery_pct,
                "sending"
            );

            let mut delivery = SensorDelivery {
                location: record.location,
                reading: Some(reading),
                frames_sent: 0,
                frames_failed: 0,
                frames_skipped: 0,
            };

            for (_, frame) in self.build_frames(record, &reading) {
                let Some(frame) = frame else {
                    delivery.frames_skipped += 1;
                    continue;
                };

                match bus.send(&frame) {
                    Ok(()) => delivery.frames_sent += 1,
                    Err(DeliveryError::TransportFault { .. }) => delivery.frames_failed += 1,
                    Err(e @ DeliveryError::RecoveryFailure { .. }) => {
                        delivery.frames_failed += 1;
                        report.push(delivery);
                        warn!(
                            sent = report.frames_sent,
                            failed = report.frames_failed,
                            "delivery pass abandoned"
                        );
                        return Err(e);
                    }
                }
            }

            report.push(delivery);
        }

        Ok(report)
    }
}

impl Default for DeliveryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use crate::config::BridgeConfig;
    use crate::recovery::SupervisorSettings;
    use crate::registry::SensorRegistry;
    use std::time::Duration;

    fn setup() -> (Vec<SensorRecord>, MockBus, BusSupervisor<MockBus>) {
        let registry = SensorRegistry::from_config(&BridgeConfig::default()).unwrap();
        let bus = MockBus::new();
        let supervisor = BusSupervisor::new(
            bus.clone(),
            SupervisorSettings {
                channel: "can0".to_string(),
                settle: Duration::ZERO,
            },
        );
        (registry.snapshot(), bus, supervisor)
    }

    #[test]
    fn test_scales() {
        assert!((PRESSURE_SCALE.apply(6.73).unwrap() - 0.673).abs() < 1e-9);
        assert!((TEMPERATURE_SCALE.apply(212.0).unwrap() - 5.0).abs() < 1e-12);
        assert!((BATTERY_SCALE.apply(95.0).unwrap() - 4.75).abs() < 1e-12);
    }

    #[test]
    fn test_frames_in_send_order() {
        let (records, _, _) = setup();
        let pipeline = DeliveryPipeline::new();
        let record = &records[0];
        let reading = payload::decode_payload(&record.raw_payload, &record.profile).unwrap();

        let frames = pipeline.build_frames(record, &reading);
        let ids: Vec<u32> = frames.iter().map(|(_, f)| f.as_ref().unwrap().id()).collect();
        assert_eq!(ids, [0x1E20_2627, 0x1E21_2627, 0x1E20_2628]);

        let battery = frames[2].1.as_ref().unwrap().as_float().unwrap();
        assert!((battery - 4.75).abs() < 1e-6);
        let pressure = frames[0].1.as_ref().unwrap().as_float().unwrap();
        assert!((pressure - 2.886).abs() < 1e-6);
    }

    #[test]
    fn test_deliver_all_sensors() {
        let (records, bus, mut supervisor) = setup();
        let report = DeliveryPipeline::new().deliver(&records, &mut supervisor).unwrap();

        assert_eq!(report.sensors.len(), 4);
        assert_eq!(report.frames_sent, 12);
        assert_eq!(report.frames_failed, 0);
        assert_eq!(bus.sent_frames().len(), 12);
        assert_eq!(report.sensors[3].location, WheelPosition::PassengerRear);
    }

    #[test]
    fn test_bad_payload_skips_only_that_sensor() {
        let (mut records, bus, mut supervisor) = setup();
        records[1].raw_payload = "80eaca".to_string();

        let report = DeliveryPipeline::new().deliver(&records, &mut supervisor).unwrap();
        assert_eq!(report.frames_sent, 9);
        assert_eq!(report.frames_skipped, 3);
        assert!(report.sensors[1].reading.is_none());
        assert_eq!(bus.sent_frames().len(), 9);
    }

    #[test]
    fn test_degenerate_scale_skips_only_that_signal() {
        let (records, bus, mut supervisor) = setup();
        let pipeline = DeliveryPipeline::with_scales(
            PRESSURE_SCALE,
            SignalScale::new((10.0, 10.0), (0.0, 5.0)),
            BATTERY_SCALE,
        );

        let report = pipeline.deliver(&records[..1], &mut supervisor).unwrap();
        assert_eq!(report.frames_sent, 2);
        assert_eq!(report.frames_skipped, 1);
        let ids: Vec<u32> = bus.sent_frames().iter().map(OutboundFrame::id).collect();
        assert_eq!(ids, [0x1E20_2627, 0x1E20_2628]);
    }

    #[test]
    fn test_transport_fault_does_not_stop_next_frame() {
        let (records, bus, mut supervisor) = setup();
        bus.fail_next_sends(1);

        let report = DeliveryPipeline::new().deliver(&records[..1], &mut supervisor).unwrap();
        assert_eq!(report.frames_failed, 1);
        assert_eq!(report.frames_sent, 2);
        assert_eq!(bus.bounce_count(), 1);

        let ids: Vec<u32> = bus.sent_frames().iter().map(OutboundFrame::id).collect();
        assert_eq!(ids, [0x1E21_2627, 0x1E20_2628]);
    }

    #[test]
    fn test_recovery_failure_abandons_pass() {
        let (records, bus, mut supervisor) = setup();
        bus.fail_next_sends(1);
        bus.fail_next_opens(1);

        let result = DeliveryPipeline::new().deliver(&records, &mut supervisor);
        assert!(matches!(result, Err(DeliveryError::RecoveryFailure { .. })));
        assert!(bus.sent_frames().is_empty());
        assert_eq!(bus.send_attempts(), 1);
    }
}
