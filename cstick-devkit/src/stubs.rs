//! Connectivity doubles for the agent's link and broker seams
//!
//! Both stubs are cheap clones around shared state, so a test can keep one
//! handle for scripting and assertions while the agent owns the other.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use cstick_agent::broker::{BrokerError, BrokerLink};
use cstick_agent::link::{LinkDriver, LinkSession};
use tracing::debug;

/// Link driver scripted from the outside: a switch plus call counters.
#[derive(Clone)]
pub struct MockLink {
    associated: Arc<AtomicBool>,
    requests: Arc<AtomicU32>,
    probes: Arc<AtomicU32>,
}

impl MockLink {
    pub fn new(associated: bool) -> Self {
        Self {
            associated: Arc::new(AtomicBool::new(associated)),
            requests: Arc::new(AtomicU32::new(0)),
            probes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Flip the simulated radio up or down.
    pub fn set_associated(&self, up: bool) {
        self.associated.store(up, Ordering::SeqCst);
    }

    pub fn association_requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

impl LinkDriver for MockLink {
    fn request_association(&mut self) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.associated.load(Ordering::SeqCst)
    }

    fn address(&mut self) -> Option<IpAddr> {
        self.associated
            .load(Ordering::SeqCst)
            .then(|| IpAddr::V4(Ipv4Addr::new(192, 168, 4, 2)))
    }
}

#[derive(Debug)]
struct MockBrokerState {
    connected: bool,
    refuse_connects: u32,
    publish_ok: bool,
    drop_after_pumps: Option<u32>,
    pumps: u32,
    published: Vec<String>,
    publishes_while_down: u32,
    link_lost_events: u32,
    ensure_calls: u32,
}

/// Broker session double that journals publishes instead of touching the
/// network. Scripting knobs cover the failure modes the loop must survive.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<Mutex<MockBrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockBrokerState {
                connected: false,
                refuse_connects: 0,
                publish_ok: true,
                drop_after_pumps: None,
                pumps: 0,
                published: Vec::new(),
                publishes_while_down: 0,
                link_lost_events: 0,
                ensure_calls: 0,
            })),
        }
    }

    /// Make the next `n` connect attempts fail.
    pub fn refuse_next_connects(&self, n: u32) {
        self.state.lock().unwrap().refuse_connects = n;
    }

    /// Whether delivery attempts succeed.
    pub fn set_publish_ok(&self, ok: bool) {
        self.state.lock().unwrap().publish_ok = ok;
    }

    /// Kill the session on the `n`-th pump from now.
    pub fn drop_session_after_pumps(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.drop_after_pumps = Some(state.pumps + n);
    }

    pub fn force_down(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// All payloads delivered so far, in order.
    pub fn published_payloads(&self) -> Vec<String> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    pub fn last_payload(&self) -> Option<String> {
        self.state.lock().unwrap().published.last().cloned()
    }

    /// Parse the latest payload as JSON, for assertions on numeric captures.
    pub fn last_payload_json(&self) -> Result<Option<serde_json::Value>> {
        match self.last_payload() {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Delivery attempts made while the session was down. The loop contract
    /// says this stays at zero.
    pub fn publishes_while_down(&self) -> u32 {
        self.state.lock().unwrap().publishes_while_down
    }

    pub fn link_lost_events(&self) -> u32 {
        self.state.lock().unwrap().link_lost_events
    }

    pub fn ensure_calls(&self) -> u32 {
        self.state.lock().unwrap().ensure_calls
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().published.clear();
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerLink for MockBroker {
    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn on_link_lost(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.link_lost_events += 1;
    }

    async fn ensure_connected(&mut self, link: &mut LinkSession) -> Result<(), BrokerError> {
        // Mirror the live session: the link comes first, every time.
        link.ensure_associated().await?;

        let mut state = self.state.lock().unwrap();
        state.ensure_calls += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BrokerError::RetriesExhausted { attempts: 1 });
        }
        state.connected = true;
        Ok(())
    }

    async fn pump(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.pumps += 1;
        if let Some(at) = state.drop_after_pumps {
            if state.pumps >= at {
                state.connected = false;
                state.drop_after_pumps = None;
            }
        }
    }

    async fn publish(&mut self, payload: String) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            state.publishes_while_down += 1;
            return false;
        }
        if !state.publish_ok {
            return false;
        }
        debug!("[MOCK] Published {} bytes", payload.len());
        state.published.push(payload);
        true
    }
}
