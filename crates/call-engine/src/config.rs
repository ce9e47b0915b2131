//! Bridge timing and routing settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Number or URI the gateway calls on the PBX when the cellular leg rings
    pub sip_target: String,
    /// How long a cellular dial (or an answer) may take to go active
    pub cellular_dial_timeout_secs: u64,
    /// How long an outbound SIP call may take to be answered
    pub sip_call_timeout_secs: u64,
    /// Age after which an unbridged call no longer blocks a new one
    pub stale_after_secs: u64,
    /// SIP placement retries while the cellular leg is still ringing
    pub sip_retry_limit: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sip_target: "gateway".to_string(),
            cellular_dial_timeout_secs: 45,
            sip_call_timeout_secs: 30,
            stale_after_secs: 60,
            sip_retry_limit: 2,
        }
    }
}

impl BridgeConfig {
    pub fn cellular_dial_timeout(&self) -> Duration {
        Duration::from_secs(self.cellular_dial_timeout_secs)
    }

    pub fn sip_call_timeout(&self) -> Duration {
        Duration::from_secs(self.sip_call_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sip_target.trim().is_empty() {
            return Err(BridgeError::Config("sip_target must not be empty".into()));
        }
        if self.cellular_dial_timeout_secs == 0 || self.sip_call_timeout_secs == 0 {
            return Err(BridgeError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}
