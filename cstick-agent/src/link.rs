//! Link-layer session: association state and recovery pacing
//!
//! The agent treats radio association as a black box behind [`LinkDriver`].
//! The shipped driver considers the link up when a usable (non-loopback,
//! IPv4-bearing) interface exists, and can nudge the OS supplicant through a
//! configured command when association is requested. Credentials never pass
//! through the agent; they stay with the supplicant.

use std::net::IpAddr;
use std::process::Stdio;

use anyhow::Context;
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Link-layer connectivity as seen by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum LinkError {
    /// Only reachable under a bounded policy; the default retries forever.
    #[error("link not associated after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Driver seam for the association layer.
pub trait LinkDriver: Send {
    /// Ask the underlying layer to (re)associate. Fire and forget.
    fn request_association(&mut self) -> anyhow::Result<()>;

    /// Probe whether the link is currently associated.
    fn is_associated(&mut self) -> bool;

    /// Address acquired on the associated interface, for logging.
    fn address(&mut self) -> Option<IpAddr>;
}

/// Substitute the configured network name into a command template.
fn render_command(template: &str, network: &str) -> String {
    template.replace("{network}", network)
}

/// Driver backed by the host network stack.
///
/// Association is observed through interface enumeration, optionally
/// restricted to one interface name. The optional associate command (for
/// example an `nmcli` or `wpa_cli` wrapper, with `{network}` substituted)
/// runs detached; this driver only ever watches the result.
pub struct IfaceLink {
    network: String,
    interface: Option<String>,
    associate_command: Option<String>,
}

impl IfaceLink {
    pub fn new(
        network: impl Into<String>,
        interface: Option<String>,
        associate_command: Option<String>,
    ) -> Self {
        Self {
            network: network.into(),
            interface,
            associate_command,
        }
    }

    /// First usable interface: not loopback, matching the configured name if
    /// any, carrying an IPv4 address.
    fn usable_v4(&self) -> Option<(String, IpAddr)> {
        let addrs = match if_addrs::get_if_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Interface enumeration failed: {}", e);
                return None;
            }
        };

        for iface in addrs {
            if iface.is_loopback() {
                continue;
            }
            if let Some(wanted) = &self.interface {
                if &iface.name != wanted {
                    continue;
                }
            }
            if let if_addrs::IfAddr::V4(v4) = &iface.addr {
                return Some((iface.name.clone(), IpAddr::V4(v4.ip)));
            }
        }
        None
    }
}

impl LinkDriver for IfaceLink {
    fn request_association(&mut self) -> anyhow::Result<()> {
        let template = match &self.associate_command {
            Some(template) => template,
            None => {
                debug!("No associate command configured, waiting on the supplicant");
                return Ok(());
            }
        };

        let command = render_command(template, &self.network);
        debug!("Running associate command: {}", command);
        AsyncCommand::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn associate command")?;
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        self.usable_v4().is_some()
    }

    fn address(&mut self) -> Option<IpAddr> {
        self.usable_v4().map(|(_, addr)| addr)
    }
}

/// Association state machine driven by the poll loop.
pub struct LinkSession {
    driver: Box<dyn LinkDriver>,
    state: LinkState,
    policy: RetryPolicy,
    network: String,
}

impl LinkSession {
    pub fn new(driver: Box<dyn LinkDriver>, policy: RetryPolicy, network: impl Into<String>) -> Self {
        Self {
            driver,
            state: LinkState::Disconnected,
            policy,
            network: network.into(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// One probe; loss downgrades the state, a supplicant that associated on
    /// its own upgrades it.
    pub fn refresh(&mut self) -> LinkState {
        if self.driver.is_associated() {
            if self.state != LinkState::Connected {
                debug!("Link to '{}' is up", self.network);
            }
            self.state = LinkState::Connected;
        } else {
            if self.state == LinkState::Connected {
                warn!("Link to '{}' lost", self.network);
            }
            self.state = LinkState::Disconnected;
        }
        self.state
    }

    /// Block until associated, probing at the policy's fixed interval.
    ///
    /// The association request goes out once, after the first failed probe.
    /// Under the default unbounded policy this only ever returns `Ok`; a
    /// bounded policy gives up with [`LinkError::RetriesExhausted`].
    pub async fn ensure_associated(&mut self) -> Result<(), LinkError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.driver.is_associated() {
                if self.state != LinkState::Connected {
                    match self.driver.address() {
                        Some(addr) => info!("Link up on '{}', address {}", self.network, addr),
                        None => info!("Link up on '{}'", self.network),
                    }
                }
                self.state = LinkState::Connected;
                return Ok(());
            }

            if attempt == 1 {
                self.state = LinkState::Connecting;
                info!("Associating with '{}'", self.network);
                if let Err(e) = self.driver.request_association() {
                    warn!("Association request failed: {}", e);
                }
            }
            debug!("Link not ready, attempt {}", attempt);

            if !self.policy.allows(attempt + 1) {
                self.state = LinkState::Disconnected;
                warn!(
                    "Link to '{}' still down after {} attempts",
                    self.network, attempt
                );
                return Err(LinkError::RetriesExhausted { attempts: attempt });
            }
            tokio::time::sleep(self.policy.interval).await;
        }
    }
}
