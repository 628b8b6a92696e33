//! Connector seam between channels and the signaling fabric. A connector
//! dials one address and yields a pub/sub connection; the in-memory hub
//! serves tests and single-process setups, the WebSocket backend real
//! deployments.

use std::sync::Arc;

use async_trait::async_trait;
use signal_bus::{BusConnection, BusError, LocalHub};

pub mod ws;

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn BusConnection>, BusError>;
}

/// Connector over an in-memory hub. The address is accepted but unused:
/// every connection lands on the same hub.
pub struct LocalConnector {
    hub: Arc<LocalHub>,
}

impl LocalConnector {
    pub fn new(hub: Arc<LocalHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl SignalingConnector for LocalConnector {
    async fn connect(&self, _address: &str) -> Result<Arc<dyn BusConnection>, BusError> {
        Ok(self.hub.connect())
    }
}
