//! The poll loop: one owned context driving store replay and connectivity
//!
//! Each tick does connectivity upkeep first, then advances the store by one
//! unit, then attempts at most one delivery. Recovery blocks the whole loop
//! on purpose; there is nothing else to run while the uplink is down.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::{BrokerError, BrokerLink};
use crate::link::{LinkSession, LinkState};
use crate::payload::encode_payload;
use crate::record::decode_line;
use crate::store::{LineOutcome, StreamCursor};

/// What a single tick accomplished, for logging and the replay tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Store header consumed; nothing to publish yet.
    HeaderSkipped,
    /// A record was handed to the transport.
    Published,
    /// A record was read but the delivery attempt failed; record dropped.
    PublishFailed,
    /// A record was read while the broker session was down; record dropped.
    Offline,
    /// A record could not be encoded; record dropped.
    RecordDropped,
    /// An empty line was consumed; nothing to publish.
    BlankLine,
    /// The store is exhausted; replay restarts on the next tick.
    EndOfStream,
    /// The store could not be opened or read this tick.
    StoreUnavailable,
}

/// Everything the loop owns: the store cursor, both connectivity sessions
/// and the pacing constants.
pub struct Agent<B: BrokerLink> {
    cursor: StreamCursor,
    link: LinkSession,
    broker: B,
    tick_interval: Duration,
    payload_cap: usize,
}

impl<B: BrokerLink> Agent<B> {
    pub fn new(
        cursor: StreamCursor,
        link: LinkSession,
        broker: B,
        tick_interval: Duration,
        payload_cap: usize,
    ) -> Self {
        Self {
            cursor,
            link,
            broker,
            tick_interval,
            payload_cap,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// One pass of the loop: connectivity upkeep, then at most one unit of
    /// store progress, then at most one delivery attempt.
    ///
    /// `Err` is only reachable under bounded retry policies; the defaults
    /// block inside the ensure calls until connectivity returns.
    pub async fn tick(&mut self) -> Result<TickOutcome, BrokerError> {
        // Link loss takes the broker session down with it.
        if self.link.refresh() != LinkState::Connected && self.broker.is_connected() {
            self.broker.on_link_lost();
        }
        if !self.broker.is_connected() {
            self.broker.ensure_connected(&mut self.link).await?;
        }
        self.broker.pump().await;

        let outcome = match self.cursor.poll().await {
            LineOutcome::HeaderSkipped => TickOutcome::HeaderSkipped,
            LineOutcome::EndOfStream => {
                info!("Record store exhausted, replaying from the top");
                TickOutcome::EndOfStream
            }
            LineOutcome::OpenFailed(e) => {
                warn!("Record store unavailable: {}", e);
                TickOutcome::StoreUnavailable
            }
            LineOutcome::Record(line) if line.is_empty() => TickOutcome::BlankLine,
            LineOutcome::Record(line) => self.deliver(&line).await,
        };
        Ok(outcome)
    }

    /// Encode one record and attempt delivery. The session may have died
    /// during this tick's pump; records read while it is down are dropped,
    /// never queued.
    async fn deliver(&mut self, line: &str) -> TickOutcome {
        let fields = decode_line(line);
        let payload = match encode_payload(&fields, self.payload_cap) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping record ({}): {}", e, line);
                return TickOutcome::RecordDropped;
            }
        };

        if !self.broker.is_connected() {
            warn!("Broker session down, dropping record");
            return TickOutcome::Offline;
        }

        debug!("Publishing: {}", payload);
        if self.broker.publish(payload).await {
            TickOutcome::Published
        } else {
            warn!("Delivery failed, record dropped");
            TickOutcome::PublishFailed
        }
    }

    /// Run forever: tick, then sleep the fixed inter-tick delay. Termination
    /// is external by design.
    pub async fn run(&mut self) {
        info!(
            "Starting uplink loop, one record every {:?}",
            self.tick_interval
        );
        loop {
            match self.tick().await {
                Ok(outcome) => debug!("Tick done: {:?}", outcome),
                Err(e) => warn!("Connectivity not restored: {}", e),
            }
            tokio::time::sleep(self.tick_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkDriver;
    use crate::retry::RetryPolicy;
    use std::io::Write;
    use std::net::IpAddr;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    struct StubBroker {
        connected: bool,
        refuse_connect: bool,
        publish_ok: bool,
        drop_on_pump: bool,
        published: Vec<String>,
        publishes_while_down: u32,
        link_lost_calls: u32,
    }

    impl StubBroker {
        fn new() -> Self {
            Self {
                connected: false,
                refuse_connect: false,
                publish_ok: true,
                drop_on_pump: false,
                published: Vec::new(),
                publishes_while_down: 0,
                link_lost_calls: 0,
            }
        }
    }

    impl BrokerLink for StubBroker {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn on_link_lost(&mut self) {
            self.connected = false;
            self.link_lost_calls += 1;
        }

        async fn ensure_connected(&mut self, link: &mut LinkSession) -> Result<(), BrokerError> {
            link.ensure_associated().await?;
            if self.refuse_connect {
                return Err(BrokerError::RetriesExhausted { attempts: 1 });
            }
            self.connected = true;
            Ok(())
        }

        async fn pump(&mut self) {
            if self.drop_on_pump {
                self.connected = false;
            }
        }

        async fn publish(&mut self, payload: String) -> bool {
            if !self.connected {
                self.publishes_while_down += 1;
                return false;
            }
            if !self.publish_ok {
                return false;
            }
            self.published.push(payload);
            true
        }
    }

    #[derive(Clone)]
    struct SwitchDriver {
        up: Arc<AtomicBool>,
    }

    impl LinkDriver for SwitchDriver {
        fn request_association(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_associated(&mut self) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        fn address(&mut self) -> Option<IpAddr> {
            None
        }
    }

    fn store_with(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn test_agent(
        store: &NamedTempFile,
        broker: StubBroker,
        link_up: bool,
    ) -> (Agent<StubBroker>, Arc<AtomicBool>) {
        let up = Arc::new(AtomicBool::new(link_up));
        let driver = SwitchDriver { up: up.clone() };
        let link = LinkSession::new(
            Box::new(driver),
            RetryPolicy::bounded(Duration::from_millis(1), NonZeroU32::new(2).unwrap()),
            "testnet",
        );
        let agent = Agent::new(
            StreamCursor::new(store.path()),
            link,
            broker,
            Duration::from_millis(1),
            512,
        );
        (agent, up)
    }

    #[tokio::test]
    async fn test_header_publish_wraparound_sequence() {
        let store = store_with(&["a,b,c,d,e,f,g", "1,2,3,4,5,6,7"]);
        let (mut agent, _up) = test_agent(&store, StubBroker::new(), true);

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Published);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::EndOfStream);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Published);

        assert_eq!(agent.broker().published.len(), 2);
        assert_eq!(
            agent.broker().published[0],
            "{\"distance_cm\": 1, \"pressure\": 2, \"hrv\": 3, \"sugar_level\": 4, \
             \"spo2\": 5, \"accelerometer\": 6, \"decision\": 7}"
        );
    }

    #[tokio::test]
    async fn test_blank_line_consumed_without_publish() {
        let store = store_with(&["header", "", "1,2,3,4,5,6,7"]);
        let (mut agent, _up) = test_agent(&store, StubBroker::new(), true);

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::BlankLine);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Published);
        assert_eq!(agent.broker().published.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_record_dropped() {
        let store = store_with(&["header", "1,2,3"]);
        let (mut agent, _up) = test_agent(&store, StubBroker::new(), true);

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::RecordDropped);
        assert!(agent.broker().published.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_drops_record() {
        let store = store_with(&["header", "1,2,3,4,5,6,7"]);
        let mut broker = StubBroker::new();
        broker.publish_ok = false;
        let (mut agent, _up) = test_agent(&store, broker, true);

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::PublishFailed);
        assert!(agent.broker().published.is_empty());
    }

    #[tokio::test]
    async fn test_never_publishes_while_broker_down() {
        let store = store_with(&["header", "1,2,3,4,5,6,7"]);
        let mut broker = StubBroker::new();
        broker.refuse_connect = true;
        let (mut agent, _up) = test_agent(&store, broker, true);

        // Connectivity cannot be restored; the tick aborts before the store.
        assert!(agent.tick().await.is_err());
        assert!(agent.broker().published.is_empty());
        assert_eq!(agent.broker().publishes_while_down, 0);

        // Once the broker accepts, the loop resumes at the header.
        agent.broker_mut().refuse_connect = false;
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
    }

    #[tokio::test]
    async fn test_session_death_during_pump_goes_offline() {
        let store = store_with(&["header", "1,2,3,4,5,6,7"]);
        let (mut agent, _up) = test_agent(&store, StubBroker::new(), true);

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        agent.broker_mut().drop_on_pump = true;
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Offline);
        assert!(agent.broker().published.is_empty());
        assert_eq!(agent.broker().publishes_while_down, 0);
    }

    #[tokio::test]
    async fn test_link_loss_takes_broker_down() {
        let store = store_with(&["header", "1,2,3,4,5,6,7", "8,9,10,11,12,13,14"]);
        let (mut agent, up) = test_agent(&store, StubBroker::new(), true);

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert!(agent.broker().is_connected());

        up.store(false, Ordering::SeqCst);
        let err = agent.tick().await.unwrap_err();
        assert!(matches!(err, BrokerError::LinkUnavailable(_)));
        assert_eq!(agent.broker().link_lost_calls, 1);
        assert!(!agent.broker().is_connected());

        // Link returns; the next tick reconnects and resumes the stream.
        up.store(true, Ordering::SeqCst);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Published);
    }

    #[tokio::test]
    async fn test_missing_store_does_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cStick.csv");
        let up = Arc::new(AtomicBool::new(true));
        let link = LinkSession::new(
            Box::new(SwitchDriver { up: up.clone() }),
            RetryPolicy::unbounded(Duration::from_millis(1)),
            "testnet",
        );
        let mut agent = Agent::new(
            StreamCursor::new(&path),
            link,
            StubBroker::new(),
            Duration::from_millis(1),
            512,
        );

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::StoreUnavailable);

        std::fs::write(&path, "header\n1,2,3,4,5,6,7\n").unwrap();
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::HeaderSkipped);
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Published);
    }
}
