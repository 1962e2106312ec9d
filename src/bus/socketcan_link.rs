//! Raw SocketCAN transport.

use super::{BusConnector, CanTransport, OutboundFrame, TransportError};
use crate::config::BusSettings;
use ::socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Socket};
use std::process::Command;
use tracing::{debug, warn};

pub struct SocketCanTransport {
    socket: CanSocket,
}

impl CanTransport for SocketCanTransport {
    fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let id = ExtendedId::new(frame.id()).ok_or(TransportError::InvalidFrame {
            id: frame.id(),
            reason: "identifier exceeds 29 bits",
        })?;
        let can_frame = CanFrame::new(id, frame.data()).ok_or(TransportError::InvalidFrame {
            id: frame.id(),
            reason: "more than 8 data bytes",
        })?;

        self.socket.write_frame(&can_frame)?;
        Ok(())
    }
}

/// Opens SocketCAN sockets and bounces the interface with the configured
/// link commands.
#[derive(Debug, Clone)]
pub struct SocketCanConnector {
    settings: BusSettings,
}

impl SocketCanConnector {
    pub fn new(settings: BusSettings) -> Self {
        Self { settings }
    }
}

impl BusConnector for SocketCanConnector {
    type Transport = SocketCanTransport;

    fn open(&mut self, channel: &str) -> Result<Self::Transport, TransportError> {
        let socket = CanSocket::open(channel)?;
        debug!(channel, "opened CAN socket");
        Ok(SocketCanTransport { socket })
    }

    fn set_link(&mut self, channel: &str, up: bool) -> Result<(), TransportError> {
        let mut settings = self.settings.clone();
        settings.channel = channel.to_string();
        run_link_command(&settings.link_command(up))
    }
}

fn run_link_command(args: &[String]) -> Result<(), TransportError> {
    let Some((program, rest)) = args.split_first() else {
        return Ok(());
    };
    let command = args.join(" ");

    let status = Command::new(program)
        .args(rest)
        .status()
        .map_err(|e| TransportError::Link {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    if status.success() {
        Ok(())
    } else {
        warn!(%command, %status, "link command exited unsuccessfully");
        Err(TransportError::Link {
            command,
            reason: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_link_command_is_a_no_op() {
        assert!(run_link_command(&[]).is_ok());
    }

    #[test]
    fn test_link_command_status() {
        assert!(run_link_command(&["true".to_string()]).is_ok());
        assert!(matches!(
            run_link_command(&["false".to_string()]),
            Err(TransportError::Link { .. })
        ));
        assert!(matches!(
            run_link_command(&["/nonexistent/ifdown".to_string(), "can0".to_string()]),
            Err(TransportError::Link { .. })
        ));
    }
}
