//! Configuration for the SIP user agent
//!
//! All durations are plain integers in the unit their field name says, with
//! [`Duration`] accessors, so the structs deserialize straight from TOML or
//! environment overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DialogError, DialogResult};

/// RFC 3261 timer settings for INVITE client transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// T1, the first retransmission interval
    pub t1_ms: u64,
    /// T2, the cap the doubling interval never exceeds
    pub t2_ms: u64,
    /// Upper bound on INVITE transmissions, first send included
    pub max_invite_transmissions: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1_ms: 500,
            t2_ms: 4000,
            max_invite_transmissions: 7,
        }
    }
}

impl TimerSettings {
    pub fn t1(&self) -> Duration {
        Duration::from_millis(self.t1_ms)
    }

    pub fn t2(&self) -> Duration {
        Duration::from_millis(self.t2_ms)
    }
}

/// SIP account, transport and registration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    /// Account user name (also the Contact user part)
    pub username: String,
    /// Account password for digest authentication
    pub password: String,
    /// Registrar / PBX host name or address
    pub domain: String,
    /// Registrar port
    pub registrar_port: u16,
    /// Optional display name in From
    pub display_name: Option<String>,
    /// Local address to bind the SIP socket to
    pub bind_address: IpAddr,
    /// Local SIP port
    pub local_port: u16,
    /// Host to advertise in Via/Contact/SDP instead of the detected one
    pub advertised_host: Option<String>,
    /// Requested registration lifetime
    pub register_expires_secs: u32,
    /// Interval between refreshing registrations
    pub reregister_interval_secs: u64,
    /// How long to wait for a REGISTER response
    pub register_timeout_secs: u64,
    /// REGISTER attempts before reporting failure
    pub register_attempts: u32,
    /// Pause between failed REGISTER attempts
    pub register_retry_delay_secs: u64,
    /// OPTIONS keepalive interval
    pub keepalive_interval_secs: u64,
    /// Silent keepalive intervals before the connection counts as lost
    pub keepalive_miss_limit: u32,
    /// Whether to run STUN discovery at start
    pub stun_enabled: bool,
    /// STUN servers tried in order (`host:port`)
    pub stun_servers: Vec<String>,
    /// Per-server STUN response timeout
    pub stun_timeout_ms: u64,
    /// Header on inbound INVITEs naming the cellular number to forward to
    pub forward_header: String,
    /// `User-Agent` header value
    pub user_agent: String,
    /// INVITE retransmission timers
    pub timers: TimerSettings,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            domain: String::new(),
            registrar_port: 5060,
            display_name: None,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port: 5060,
            advertised_host: None,
            register_expires_secs: 3600,
            reregister_interval_secs: 50 * 60,
            register_timeout_secs: 10,
            register_attempts: 3,
            register_retry_delay_secs: 2,
            keepalive_interval_secs: 30,
            keepalive_miss_limit: 3,
            stun_enabled: true,
            stun_servers: vec![
                "stun.l.google.com:19302".to_string(),
                "stun1.l.google.com:19302".to_string(),
                "stun.cloudflare.com:3478".to_string(),
            ],
            stun_timeout_ms: 1500,
            forward_header: "X-Forward-To".to_string(),
            user_agent: format!("cellgate/{}", env!("CARGO_PKG_VERSION")),
            timers: TimerSettings::default(),
        }
    }
}

impl SipConfig {
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn register_retry_delay(&self) -> Duration {
        Duration::from_secs(self.register_retry_delay_secs)
    }

    pub fn reregister_interval(&self) -> Duration {
        Duration::from_secs(self.reregister_interval_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn stun_timeout(&self) -> Duration {
        Duration::from_millis(self.stun_timeout_ms)
    }

    /// `host:port` of the registrar
    pub fn registrar(&self) -> String {
        format!("{}:{}", self.domain, self.registrar_port)
    }

    /// Reject settings the user agent cannot run with
    pub fn validate(&self) -> DialogResult<()> {
        if self.username.trim().is_empty() {
            return Err(DialogError::Config("username must not be empty".into()));
        }
        if self.domain.trim().is_empty() {
            return Err(DialogError::Config("domain must not be empty".into()));
        }
        if self.register_attempts == 0 {
            return Err(DialogError::Config("register_attempts must be at least 1".into()));
        }
        if self.keepalive_interval_secs == 0 || self.keepalive_miss_limit == 0 {
            return Err(DialogError::Config("keepalive interval and miss limit must be positive".into()));
        }
        if self.timers.t1_ms == 0 || self.timers.t2_ms < self.timers.t1_ms {
            return Err(DialogError::Config("timers need 0 < t1 <= t2".into()));
        }
        if self.timers.max_invite_transmissions == 0 {
            return Err(DialogError::Config("max_invite_transmissions must be at least 1".into()));
        }
        if self.forward_header.trim().is_empty() {
            return Err(DialogError::Config("forward_header must not be empty".into()));
        }
        Ok(())
    }
}
