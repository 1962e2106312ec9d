use crate::bus::{BusConnector, CanTransport, OutboundFrame, TransportError};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

const MAX_RECOVERY_HISTORY: usize = 16;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The frame was lost, but the bus was recovered afterwards.
    #[error("frame {frame_id:#x} not delivered: {source}")]
    TransportFault {
        frame_id: u32,
        #[source]
        source: TransportError,
    },
    /// The bus could not be brought back; nothing more goes out this cycle.
    #[error("could not recover {channel}: {source}")]
    RecoveryFailure {
        channel: String,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Up,
    Recovering,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub id: u32,
    /// Milliseconds since the supervisor was created.
    pub timestamp_ms: u64,
    pub duration_ms: u32,
    pub cause: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub frames_sent: u64,
    pub transport_faults: u32,
    pub recoveries_attempted: u32,
    pub recoveries_succeeded: u32,
    pub recoveries_failed: u32,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub channel: String,
    /// Wait between bringing the link up and reopening the socket.
    pub settle: Duration,
}

/// Sole owner of the bus handle.
///
/// Every frame goes through [`BusSupervisor::send`]. A failed send bounces the
/// interface and rebuilds the handle before returning, so the next frame
/// finds a working bus when the hardware allows it.
pub struct BusSupervisor<C: BusConnector> {
    connector: C,
    settings: SupervisorSettings,
    transport: Option<C::Transport>,
    state: LinkState,
    stats: RecoveryStats,
    history: Vec<RecoveryRecord, MAX_RECOVERY_HISTORY>,
    next_record_id: u32,
    created_at: Instant,
}

impl<C: BusConnector> BusSupervisor<C> {
    /// Open the bus. If that fails the supervisor starts out recovering and
    /// the first send retries.
    pub fn new(mut connector: C, settings: SupervisorSettings) -> Self {
        let (transport, state) = match connector.open(&settings.channel) {
            Ok(transport) => {
                info!(channel = %settings.channel, "CAN bus open");
                (Some(transport), LinkState::Up)
            }
            Err(e) => {
                error!(channel = %settings.channel, error = %e, "cannot open CAN bus, will retry");
                (None, LinkState::Recovering)
            }
        };

        Self {
            connector,
            settings,
            transport,
            state,
            stats: RecoveryStats::default(),
            history: Vec::new(),
            next_record_id: 1,
            created_at: Instant::now(),
        }
    }

    pub fn send(&mut self, frame: &OutboundFrame) -> Result<(), DeliveryError> {
        if self.state == LinkState::Recovering {
            self.recover("previous recovery incomplete")?;
        }

        let result = match self.transport.as_mut() {
            Some(transport) => transport.send(frame),
            None => Err(TransportError::NotConnected),
        };

        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(())
            }
            Err(source) => {
                error!(frame_id = frame.id(), error = %source, "CAN send failed");
                self.stats.transport_faults += 1;
                self.state = LinkState::Recovering;
                self.recover(&source.to_string())?;
                Err(DeliveryError::TransportFault {
                    frame_id: frame.id(),
                    source,
                })
            }
        }
    }

    fn recover(&mut self, cause: &str) -> Result<(), DeliveryError> {
        let started = Instant::now();
        let channel = self.settings.channel.clone();

        self.state = LinkState::Recovering;
        self.stats.recoveries_attempted += 1;
        // close the old socket before the interface goes down
        self.transport = None;

        error!(%channel, cause, "bouncing CAN interface");
        if let Err(e) = self.connector.set_link(&channel, false) {
            warn!(%channel, error = %e, "link down failed");
        }
        if let Err(e) = self.connector.set_link(&channel, true) {
            warn!(%channel, error = %e, "link up failed");
        }
        // Blocks the caller, and with it the bridge loop and interrupt
        // handling, for at most the settle time (capped at load).
        if !self.settings.settle.is_zero() {
            std::thread::sleep(self.settings.settle);
        }

        let result = self.connector.open(&channel);
        let succeeded = result.is_ok();
        self.record(cause, started, succeeded);

        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = LinkState::Up;
                self.stats.recoveries_succeeded += 1;
                info!(%channel, "CAN bus recovered");
                Ok(())
            }
            Err(source) => {
                self.stats.recoveries_failed += 1;
                error!(%channel, error = %source, "CAN bus recovery failed");
                Err(DeliveryError::RecoveryFailure { channel, source })
            }
        }
    }

    fn record(&mut self, cause: &str, started: Instant, succeeded: bool) {
        let record = RecoveryRecord {
            id: self.next_record_id,
            timestamp_ms: started.duration_since(self.created_at).as_millis() as u64,
            duration_ms: started.elapsed().as_millis() as u32,
            cause: cause.to_string(),
            succeeded,
        };
        self.next_record_id = self.next_record_id.wrapping_add(1);

        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(record);
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    /// Recovery attempts, oldest first.
    pub fn history(&self) -> &[RecoveryRecord] {
        &self.history
    }

    pub fn channel(&self) -> &str {
        &self.settings.channel
    }
}
