//! In-memory bus for dry runs and tests.
//!
//! Clones share state, so a test can keep one handle while the supervisor
//! owns another, then inject failures and inspect what went out.

use super::{BusConnector, CanTransport, OutboundFrame, TransportError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct MockBusState {
    sent: Vec<OutboundFrame>,
    send_attempts: u32,
    fail_sends: u32,
    fail_opens: u32,
    opens: u32,
    link_events: Vec<(String, bool)>,
}

#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: u32) {
        self.lock().fail_sends = count;
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().fail_opens = count;
    }

    pub fn sent_frames(&self) -> Vec<OutboundFrame> {
        self.lock().sent.clone()
    }

    pub fn send_attempts(&self) -> u32 {
        self.lock().send_attempts
    }

    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    /// `(channel, up)` for every link change, oldest first.
    pub fn link_events(&self) -> Vec<(String, bool)> {
        self.lock().link_events.clone()
    }

    /// Number of times the interface was taken down.
    pub fn bounce_count(&self) -> usize {
        self.lock().link_events.iter().filter(|(_, up)| !up).count()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.sent.clear();
        state.send_attempts = 0;
    }

    fn lock(&self) -> MutexGuard<'_, MockBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockBusState>>,
}

impl CanTransport for MockTransport {
    fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.send_attempts += 1;

        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(TransportError::Rejected("injected send failure".to_string()));
        }

        debug!(frame_id = frame.id(), data = ?frame.data(), "mock bus frame");
        state.sent.push(frame.clone());
        Ok(())
    }
}

impl BusConnector for MockBus {
    type Transport = MockTransport;

    fn open(&mut self, channel: &str) -> Result<Self::Transport, TransportError> {
        let mut state = self.lock();
        state.opens += 1;

        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TransportError::Rejected(format!("cannot open {}", channel)));
        }

        Ok(MockTransport {
            state: Arc::clone(&self.state),
        })
    }

    fn set_link(&mut self, channel: &str, up: bool) -> Result<(), TransportError> {
        self.lock().link_events.push((channel.to_string(), up));
        Ok(())
    }
}
