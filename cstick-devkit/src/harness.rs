//! Replay harness: an agent wired to the devkit doubles
//!
//! Spins up the real poll loop over a temp store, with the link and broker
//! replaced by stubs. Tests script failures through the stub handles, run a
//! number of ticks and check expectations.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cstick_agent::agent::{Agent, TickOutcome};
use cstick_agent::link::LinkSession;
use cstick_agent::payload::DEFAULT_CAPACITY;
use cstick_agent::retry::RetryPolicy;
use cstick_agent::store::StreamCursor;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::store;
use crate::stubs::{MockBroker, MockLink};

/// How many link probes a stubbed ensure call may burn before giving up.
/// Bounded so a test with a dead link fails instead of hanging.
const LINK_ATTEMPTS: u32 = 5;

pub struct ReplayHarness {
    /// Scripting and assertion handle for the broker double.
    pub broker: MockBroker,
    /// Scripting handle for the link double.
    pub link: MockLink,
    agent: Agent<MockBroker>,
    _store: NamedTempFile,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
enum Expectation {
    PublishedTotal(usize),
    LastPayload(String),
}

impl ReplayHarness {
    /// Harness over the canonical sample capture.
    pub fn new() -> Result<Self> {
        Self::with_rows(store::SAMPLE_ROWS)
    }

    /// Harness over a capture with the canonical header and `rows`.
    pub fn with_rows(rows: &[&str]) -> Result<Self> {
        let file = store::csv_store(store::SAMPLE_HEADER, rows)
            .context("Failed to build the temp record store")?;

        let broker = MockBroker::new();
        let link = MockLink::new(true);
        let session = LinkSession::new(
            Box::new(link.clone()),
            RetryPolicy::bounded(
                Duration::from_millis(1),
                NonZeroU32::new(LINK_ATTEMPTS).unwrap(),
            ),
            "testnet",
        );
        let agent = Agent::new(
            StreamCursor::new(file.path()),
            session,
            broker.clone(),
            Duration::from_millis(1),
            DEFAULT_CAPACITY,
        );

        Ok(Self {
            broker,
            link,
            agent,
            _store: file,
            expectations: Vec::new(),
        })
    }

    /// Run `n` ticks, collecting each outcome. A connectivity failure under
    /// the harness's bounded policies is a test failure, not a hang.
    pub async fn run_ticks(&mut self, n: usize) -> Result<Vec<TickOutcome>> {
        let mut outcomes = Vec::with_capacity(n);
        for i in 0..n {
            let outcome = self
                .agent
                .tick()
                .await
                .with_context(|| format!("tick {} failed", i))?;
            debug!("Tick {}: {:?}", i, outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Run ticks until the store wraps around, returning the whole pass
    /// including the closing `EndOfStream`. Bails after `max` ticks.
    pub async fn run_one_pass(&mut self, max: usize) -> Result<Vec<TickOutcome>> {
        let mut outcomes = Vec::new();
        for _ in 0..max {
            let outcome = self.agent.tick().await.context("tick failed")?;
            outcomes.push(outcome);
            if outcome == TickOutcome::EndOfStream {
                return Ok(outcomes);
            }
        }
        bail!("store did not wrap within {} ticks", max);
    }

    /// Expect `count` publishes in total by the time `verify` runs.
    pub fn expect_published(&mut self, count: usize) -> &mut Self {
        self.expectations.push(Expectation::PublishedTotal(count));
        self
    }

    /// Expect the most recent payload to match exactly.
    pub fn expect_last_payload(&mut self, payload: &str) -> &mut Self {
        self.expectations
            .push(Expectation::LastPayload(payload.to_string()));
        self
    }

    /// Check every expectation against the broker journal.
    pub fn verify(&self) -> Result<()> {
        for expectation in &self.expectations {
            match expectation {
                Expectation::PublishedTotal(expected) => {
                    let actual = self.broker.publish_count();
                    if actual != *expected {
                        bail!("expected {} publishes, got {}", expected, actual);
                    }
                }
                Expectation::LastPayload(expected) => match self.broker.last_payload() {
                    Some(actual) if &actual == expected => {}
                    Some(actual) => bail!(
                        "last payload mismatch:\n  expected: {}\n  actual:   {}",
                        expected,
                        actual
                    ),
                    None => bail!("expected a payload, nothing was published"),
                },
            }
        }
        Ok(())
    }
}
