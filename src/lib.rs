//! # TPMS to CAN bridge
//!
//! Reads tire pressure sensors over BLE advertisements and republishes their
//! pressure, temperature and battery level as CAN frames an engine ECU can
//! log as analog inputs.
//!
//! ## Features
//!
//! - **Payload decoding**: fixed-layout sensor payloads, with configurable layouts
//! - **Signal scaling**: each reading is remapped onto the ECU's 0-5 V input range
//! - **Bus recovery**: a failed send bounces the interface and reopens the socket
//! - **Replay**: recorded scans stand in for a radio on the bench
//!
//! ## Quick Start
//!
//! ```rust
//! use tpms_bridge::{BridgeConfig, DeliveryPipeline, MockBus, SensorRegistry};
//! use tpms_bridge::recovery::{BusSupervisor, SupervisorSettings};
//! use std::time::Duration;
//!
//! let config = BridgeConfig::default();
//! let registry = SensorRegistry::from_config(&config).unwrap();
//!
//! let bus = MockBus::new();
//! let mut supervisor = BusSupervisor::new(
//!     bus.clone(),
//!     SupervisorSettings { channel: "can0".to_string(), settle: Duration::ZERO },
//! );
//!
//! let report = DeliveryPipeline::new()
//!     .deliver(&registry.snapshot(), &mut supervisor)
//!     .unwrap();
//! assert_eq!(report.frames_sent, 12);
//! ```
//!
//! ## Architecture
//!
//! - [`units`] - hex and byte-order helpers, linear remap
//! - [`payload`] - payload profiles and decoding
//! - [`registry`] - known sensors and their last payload
//! - [`pipeline`] - one delivery pass over the registry
//! - [`recovery`] - bus ownership and interface bouncing
//! - [`bus`] - CAN frame type and transports
//! - [`discovery`] - advertisement sources
//! - [`scheduler`] - refresh cadence
//! - [`bridge`] - the main loop
//! - [`config`] - JSON configuration

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod payload;
pub mod pipeline;
pub mod recovery;
pub mod registry;
pub mod scheduler;
pub mod units;

pub use bridge::{BridgeError, ShutdownReason, TpmsBridge, INTERRUPT_EXIT_CODE};
pub use bus::{BusConnector, CanTransport, MockBus, OutboundFrame};
pub use config::BridgeConfig;
pub use discovery::{Advertisement, AdvertisementSource, ReplaySource};
pub use payload::{decode_payload, DecodedReading, PayloadProfile};
pub use pipeline::{CycleReport, DeliveryPipeline};
pub use registry::SensorRegistry;
