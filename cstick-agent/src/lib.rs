//! cStick Agent - sensor capture replay over MQTT
//!
//! Library surface of the uplink agent:
//! - Streaming cursor over the on-disk record store, wrapping around forever
//! - Record schema with fixed-key, bounded payload encoding
//! - Link and broker session state machines with injectable retry pacing
//! - The poll loop tying them together, one record per tick
//!
//! The binary wires these from configuration; the devkit builds test doubles
//! on the same seams.

pub mod agent;
pub mod broker;
pub mod config;
pub mod link;
pub mod payload;
pub mod record;
pub mod retry;
pub mod store;

pub use agent::{Agent, TickOutcome};
pub use broker::{BrokerError, BrokerLink, BrokerSession, BrokerState};
pub use config::AgentConfig;
pub use link::{IfaceLink, LinkDriver, LinkError, LinkSession, LinkState};
pub use payload::{encode_payload, EncodeError, PayloadBuffer};
pub use record::{decode_line, DELIMITER, FIELD_COUNT, SCHEMA_KEYS};
pub use retry::RetryPolicy;
pub use store::{LineOutcome, StreamCursor};
