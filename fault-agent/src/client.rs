use crate::subscriber::{RuleSource, TransportError, UpdateStream};
use async_trait::async_trait;
use fault_core::pb::rule_distribution_client::RuleDistributionClient;
use fault_core::pb::SubscribeRequest;
use std::time::Duration;
use tokio_stream::StreamExt;
use tonic::metadata::MetadataValue;
use tonic::transport::Endpoint;
use tracing::info;

/// Subscribes to `faultline.v1.RuleDistribution` over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcRuleSource {
    endpoint: String,
    node_id: String,
    connect_timeout: Duration,
    keepalive: Option<Duration>,
}

impl GrpcRuleSource {
    pub fn new(endpoint: String, node_id: String, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            node_id,
            connect_timeout,
            keepalive: None,
        }
    }

    /// Ping the control plane over HTTP/2 so a dead peer is noticed while idle.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RuleSource for GrpcRuleSource {
    async fn subscribe(&self, last_version: Option<String>) -> Result<UpdateStream, TransportError> {
        info!(
            endpoint = %self.endpoint,
            node_id = %self.node_id,
            last_version = last_version.as_deref().unwrap_or(""),
            "Subscribing to rule distribution"
        );

        let mut endpoint = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| TransportError::Connect(format!("invalid endpoint {}: {}", self.endpoint, e)))?
            .connect_timeout(self.connect_timeout);
        if let Some(interval) = self.keepalive {
            endpoint = endpoint
                .http2_keep_alive_interval(interval)
                .keep_alive_timeout(interval)
                .keep_alive_while_idle(true);
        }
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut client = RuleDistributionClient::new(channel);

        let mut req = tonic::Request::new(SubscribeRequest {
            node_id: self.node_id.clone(),
            last_version: last_version.unwrap_or_default(),
        });
        if let Ok(value) = MetadataValue::try_from(self.node_id.as_str()) {
            req.metadata_mut().insert("x-node-id", value);
        }

        let response = client
            .subscribe(req)
            .await
            .map_err(|status| TransportError::Stream(status.to_string()))?;

        let updates = response
            .into_inner()
            .map(|item| item.map_err(|status| TransportError::Stream(status.to_string())));
        Ok(Box::pin(updates))
    }
}
