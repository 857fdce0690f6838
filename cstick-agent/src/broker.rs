//! Broker session over rumqttc
//!
//! The session owns both halves of the client: the handle used to enqueue
//! publishes and the eventloop that actually moves bytes. Nothing moves
//! unless the eventloop is polled, so every entry point here drives it for
//! as long as its job needs: `ensure_connected` until the broker acks the
//! session, `pump` for a short housekeeping slice each tick, `publish` until
//! the packet reaches the socket.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::BrokerConfig;
use crate::link::{LinkError, LinkSession};
use crate::retry::RetryPolicy;

/// Slice of each tick handed to the eventloop for keep-alive and inbound
/// housekeeping.
const PUMP_BUDGET: Duration = Duration::from_millis(50);

/// How long a publish may drive the eventloop before the attempt counts as
/// failed.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker-layer connectivity. Connecting happens synchronously inside
/// `ensure_connected`, so there is no intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connected,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The link underneath could not be brought up.
    #[error("link unavailable: {0}")]
    LinkUnavailable(#[from] LinkError),
    /// Only reachable under a bounded policy; the default retries forever.
    #[error("broker unreachable after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Broker seam for the poll loop, so tests can stand in for the MQTT session.
#[allow(async_fn_in_trait)]
pub trait BrokerLink {
    fn is_connected(&self) -> bool;

    /// Force the session down, used when the link underneath vanished.
    fn on_link_lost(&mut self);

    /// Block until a broker session exists. The link is re-verified before
    /// every broker attempt; a session is never built over a dead link.
    async fn ensure_connected(&mut self, link: &mut LinkSession) -> Result<(), BrokerError>;

    /// Per-tick housekeeping: keep-alives, inbound traffic, error detection.
    async fn pump(&mut self);

    /// One delivery attempt, at-most-once. True when the message was handed
    /// to the transport.
    async fn publish(&mut self, payload: String) -> bool;
}

/// Live MQTT session; all network housekeeping happens through the rumqttc
/// eventloop.
pub struct BrokerSession {
    client: AsyncClient,
    eventloop: EventLoop,
    options: MqttOptions,
    state: BrokerState,
    topic: String,
    policy: RetryPolicy,
}

impl BrokerSession {
    /// Build the client from configuration. No traffic flows until
    /// `ensure_connected` drives the eventloop.
    pub fn new(cfg: &BrokerConfig, policy: RetryPolicy) -> Self {
        let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options.clone(), 10);
        Self {
            client,
            eventloop,
            options,
            state: BrokerState::Disconnected,
            topic: cfg.topic.clone(),
            policy,
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    /// Drive the eventloop until the broker acknowledges the session. A
    /// refused session surfaces as a `ConnectionError` from `poll`.
    async fn await_connack(&mut self) -> Result<(), ConnectionError> {
        loop {
            let event = self.eventloop.poll().await?;
            if let Event::Incoming(Incoming::ConnAck(_)) = event {
                return Ok(());
            }
            trace!("Pre-session event: {:?}", event);
        }
    }
}

impl BrokerLink for BrokerSession {
    fn is_connected(&self) -> bool {
        self.state == BrokerState::Connected
    }

    fn on_link_lost(&mut self) {
        if self.state == BrokerState::Connected {
            warn!("Link lost, dropping broker session");
        }
        self.state = BrokerState::Disconnected;
        // The TCP session underneath may still be alive (a spurious link
        // probe failure, for one), and an established session never sends
        // another ConnAck. Tear it down so the reconnect path always starts
        // from a fresh handshake.
        let (client, eventloop) = AsyncClient::new(self.options.clone(), 10);
        self.client = client;
        self.eventloop = eventloop;
    }

    async fn ensure_connected(&mut self, link: &mut LinkSession) -> Result<(), BrokerError> {
        let mut attempt: u32 = 0;
        while self.state != BrokerState::Connected {
            attempt += 1;

            // The session rides on the link; re-establish that first, every
            // time, so a broker retry never runs over a dead radio.
            link.ensure_associated().await?;

            debug!("Connecting to broker, attempt {}", attempt);
            match self.await_connack().await {
                Ok(()) => {
                    self.state = BrokerState::Connected;
                    info!("Broker session up, publishing to '{}'", self.topic);
                }
                Err(e) => {
                    warn!("Broker connection failed: {}", e);
                    if !self.policy.allows(attempt + 1) {
                        return Err(BrokerError::RetriesExhausted { attempts: attempt });
                    }
                    tokio::time::sleep(self.policy.interval).await;
                }
            }
        }
        Ok(())
    }

    async fn pump(&mut self) {
        if self.state != BrokerState::Connected {
            return;
        }

        // Drain whatever is ready without holding the tick hostage.
        let deadline = Instant::now() + PUMP_BUDGET;
        loop {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(event)) => trace!("Broker event: {:?}", event),
                Ok(Err(e)) => {
                    warn!("Broker connection error: {}", e);
                    self.state = BrokerState::Disconnected;
                    return;
                }
                Err(_) => return,
            }
        }
    }

    async fn publish(&mut self, payload: String) -> bool {
        if self.state != BrokerState::Connected {
            return false;
        }

        if let Err(e) = self
            .client
            .publish(&self.topic, QoS::AtMostOnce, false, payload)
            .await
        {
            warn!("Publish enqueue failed: {}", e);
            return false;
        }

        // Drive the eventloop until the packet hits the socket; a QoS 0
        // publish has no ack beyond that.
        let deadline = Instant::now() + FLUSH_TIMEOUT;
        loop {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(Event::Outgoing(Outgoing::Publish(_)))) => return true,
                Ok(Ok(event)) => trace!("Broker event: {:?}", event),
                Ok(Err(e)) => {
                    warn!("Broker connection error during publish: {}", e);
                    self.state = BrokerState::Disconnected;
                    return false;
                }
                Err(_) => {
                    warn!("Publish flush timed out");
                    return false;
                }
            }
        }
    }
}
