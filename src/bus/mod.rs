//! CAN side of the bridge.
//!
//! The pipeline only ever sees [`OutboundFrame`]s and the two traits below;
//! which bus sits behind them is picked at startup.

pub mod mock;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan_link;

pub use mock::{MockBus, MockTransport};
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use socketcan_link::{SocketCanConnector, SocketCanTransport};

use crate::units::{self, WIRE_FLOAT_LEN};
use arrayvec::ArrayVec;
use static_assertions::const_assert;
use thiserror::Error;

/// Largest 29-bit extended identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Classic CAN data length limit.
pub const CAN_MAX_DLC: usize = 8;

const_assert!(WIRE_FLOAT_LEN <= CAN_MAX_DLC);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame {id:#x} rejected: {reason}")]
    InvalidFrame { id: u32, reason: &'static str },
    #[error("bus handle is not open")]
    NotConnected,
    #[error("bus i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link command {command:?} failed: {reason}")]
    Link { command: String, reason: String },
    #[error("transport rejected frame: {0}")]
    Rejected(String),
}

/// Extended-id data frame headed for the ECU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    id: u32,
    data: ArrayVec<u8, CAN_MAX_DLC>,
}

impl OutboundFrame {
    pub fn new(id: u32, data: &[u8]) -> Result<Self, TransportError> {
        if id > MAX_EXTENDED_ID {
            return Err(TransportError::InvalidFrame {
                id,
                reason: "identifier exceeds 29 bits",
            });
        }
        let data = ArrayVec::try_from(data).map_err(|_| TransportError::InvalidFrame {
            id,
            reason: "more than 8 data bytes",
        })?;
        Ok(Self { id, data })
    }

    /// Frame carrying one little-endian `f32`.
    pub fn float(id: u32, value: f32) -> Result<Self, TransportError> {
        Self::new(id, &units::float_to_wire_bytes(value))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The payload read back as the float it encodes, if it is one.
    pub fn as_float(&self) -> Option<f32> {
        let bytes: [u8; WIRE_FLOAT_LEN] = self.data.as_slice().try_into().ok()?;
        Some(units::frame_bytes_to_float(bytes))
    }
}

/// An open, send-only bus handle.
pub trait CanTransport {
    fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError>;
}

/// Opens bus handles and controls the network interface behind them.
pub trait BusConnector {
    type Transport: CanTransport;

    fn open(&mut self, channel: &str) -> Result<Self::Transport, TransportError>;

    /// Bring the interface administratively up or down.
    fn set_link(&mut self, channel: &str, up: bool) -> Result<(), TransportError>;
}
