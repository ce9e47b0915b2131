//! Collaborators injected into the orchestrator

use std::sync::Arc;

use crate::adapters::{MediaControl, SipLeg};
use crate::cellular::CellularLeg;
use crate::config::BridgeConfig;
use crate::record::{CallRecordSink, LogRecordSink};

/// Everything the orchestrator talks to
#[derive(Clone)]
pub struct GatewayContext {
    pub config: BridgeConfig,
    pub sip: Arc<dyn SipLeg>,
    pub cellular: Arc<dyn CellularLeg>,
    pub media: Arc<dyn MediaControl>,
    pub records: Arc<dyn CallRecordSink>,
}

impl GatewayContext {
    /// Context that logs call records
    pub fn new(
        config: BridgeConfig,
        sip: Arc<dyn SipLeg>,
        cellular: Arc<dyn CellularLeg>,
        media: Arc<dyn MediaControl>,
    ) -> Self {
        Self {
            config,
            sip,
            cellular,
            media,
            records: Arc::new(LogRecordSink),
        }
    }

    pub fn with_records(mut self, records: Arc<dyn CallRecordSink>) -> Self {
        self.records = records;
        self
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
