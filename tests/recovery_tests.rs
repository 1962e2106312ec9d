use std::time::Duration;
use tpms_bridge::bus::{MockBus, OutboundFrame};
use tpms_bridge::config::BridgeConfig;
use tpms_bridge::discovery::ReplaySource;
use tpms_bridge::recovery::{BusSupervisor, DeliveryError, LinkState, SupervisorSettings};
use tpms_bridge::TpmsBridge;

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        channel: "can0".to_string(),
        settle: Duration::ZERO,
    }
}

#[test]
fn test_bus_missing_at_startup_comes_up_later() {
    let bus = MockBus::new();
    bus.fail_next_opens(3);
    let mut supervisor = BusSupervisor::new(bus.clone(), settings());
    assert_eq!(supervisor.state(), LinkState::Recovering);

    let frame = OutboundFrame::float(0x1E20_2627, 2.5).unwrap();
    for _ in 0..2 {
        let result = supervisor.send(&frame);
        assert!(matches!(result, Err(DeliveryError::RecoveryFailure { .. })));
    }
    supervisor.send(&frame).unwrap();

    assert_eq!(supervisor.state(), LinkState::Up);
    assert_eq!(bus.sent_frames(), vec![frame]);
    assert_eq!(supervisor.stats().recoveries_failed, 2);
    let outcomes: Vec<bool> = supervisor.history().iter().map(|r| r.succeeded).collect();
    assert_eq!(outcomes, [false, false, true]);
}

#[test]
fn test_settle_delay_applies_after_link_up() {
    let bus = MockBus::new();
    let mut supervisor = BusSupervisor::new(
        bus.clone(),
        SupervisorSettings {
            channel: "can0".to_string(),
            settle: Duration::from_millis(20),
        },
    );
    bus.fail_next_sends(1);

    let _ = supervisor.send(&OutboundFrame::float(1, 0.0).unwrap());
    assert!(supervisor.history()[0].duration_ms >= 20);
}

#[tokio::test]
async fn test_bridge_survives_a_dead_bus() {
    let mut config = BridgeConfig::default();
    config.bus.settle_ms = 0;
    let bus = MockBus::new();
    let mut bridge = TpmsBridge::new(&config, ReplaySource::default(), bus.clone()).unwrap();

    // every send and every reopen fails for two passes
    bus.fail_next_sends(1);
    bus.fail_next_opens(2);
    assert!(bridge.run_pass().await.is_none());
    assert!(bridge.run_pass().await.is_none());
    assert!(bus.sent_frames().is_empty());

    let report = bridge.run_pass().await.unwrap();
    assert_eq!(report.frames_sent, 12);

    let stats = bridge.get_scheduler_stats();
    assert_eq!(stats.passes_aborted, 2);
    assert_eq!(stats.passes_completed, 1);
    assert_eq!(bridge.bus().stats().transport_faults, 1);
}
