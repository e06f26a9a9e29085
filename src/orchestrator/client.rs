//! HTTP implementation of [`NodeAgent`]

use super::{LogStream, NodeAgent};
use crate::agent::api::{
    ErrorBody, RevokeRequest, RevokeResponse, StatusResponse, SyncRequest, SyncResponse, BASE_PATH,
    TOKEN_HEADER,
};
use crate::error::{ArmorError, Result};
use crate::models::{FirewallRule, Node, PeerSpec};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Talks to edge agents over HTTP
#[derive(Clone)]
pub struct HttpOrchestrator {
    client: Client,
    stream_client: Client,
    token: String,
    port: u16,
}

impl HttpOrchestrator {
    /// Create an orchestrator sending `token` to agents on `port`.
    ///
    /// `timeout` bounds every request except the log stream, which only
    /// bounds connection setup.
    pub fn new(token: impl Into<String>, port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArmorError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ArmorError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            token: token.into(),
            port,
        })
    }

    fn url(&self, node: &Node, path: &str) -> String {
        let host = node.public_ip.trim();
        let host = match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
            _ => host.to_string(),
        };
        format!("http://{}:{}{}{}", host, self.port, BASE_PATH, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(TOKEN_HEADER, &self.token)
    }

    async fn send(&self, node: &Node, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| unreachable_err(node, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(ArmorError::AgentError {
            node: node.name.clone(),
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(node: &Node, response: Response) -> Result<T> {
        let bytes = response.bytes().await.map_err(|e| unreachable_err(node, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ArmorError::AgentError {
            node: node.name.clone(),
            status: 0,
            message: format!("Malformed response body: {}", e),
        })
    }
}

fn unreachable_err(node: &Node, err: reqwest::Error) -> ArmorError {
    ArmorError::AgentUnreachable {
        node: node.name.clone(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl NodeAgent for HttpOrchestrator {
    async fn push_peers(&self, node: &Node, peers: &[PeerSpec]) -> Result<SyncResponse> {
        let body = SyncRequest {
            interface: node.interface_name.clone(),
            peers: peers.to_vec(),
        };
        let response = self
            .send(node, self.client.post(self.url(node, "/sync")).json(&body))
            .await?;
        let sync: SyncResponse = Self::decode(node, response).await?;
        info!(node = %node.name, count = sync.count, hash = %sync.hash, "Peers pushed to node");
        Ok(sync)
    }

    async fn push_firewall(&self, node: &Node, rules: &[FirewallRule]) -> Result<()> {
        let response = self
            .send(node, self.client.post(self.url(node, "/firewall")).json(rules))
            .await?;
        let _: crate::agent::api::StatusAck = Self::decode(node, response).await?;
        info!(node = %node.name, rules = rules.len(), "Firewall pushed to node");
        Ok(())
    }

    async fn get_status(&self, node: &Node) -> Result<StatusResponse> {
        let request = self
            .client
            .get(self.url(node, "/status"))
            .query(&[("interface", node.interface_name.as_str())]);
        let response = self.send(node, request).await?;
        let status: StatusResponse = Self::decode(node, response).await?;
        debug!(node = %node.name, peers = status.peers.len(), hash = %status.last_sync_hash, "Node status");
        Ok(status)
    }

    async fn revoke_peer(&self, node: &Node, public_key: &str, address: IpAddr) -> Result<RevokeResponse> {
        let body = RevokeRequest {
            interface: node.interface_name.clone(),
            public_key: public_key.to_string(),
            assigned_ip: address,
        };
        let response = self
            .send(node, self.client.post(self.url(node, "/revoke")).json(&body))
            .await?;
        Self::decode(node, response).await
    }

    async fn stream_logs(&self, node: &Node, cancel: CancellationToken) -> Result<LogStream> {
        let request = self
            .stream_client
            .get(self.url(node, "/logs"))
            .header("accept", "text/event-stream");

        let response = tokio::select! {
            response = self.send(node, request) => response?,
            _ = cancel.cancelled() => {
                return Ok(futures::stream::empty().boxed());
            }
        };

        let name = node.name.clone();
        let stream = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| ArmorError::AgentUnreachable {
                    node: name.clone(),
                    reason: e.to_string(),
                })
            })
            .take_until(cancel.cancelled_owned())
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let orchestrator = HttpOrchestrator::new("t", 5000, Duration::from_secs(10)).unwrap();
        let node = Node::new(2, "edge", "198.51.100.4");
        assert_eq!(orchestrator.url(&node, "/status"), "http://198.51.100.4:5000/agent/v1/status");

        let node = Node::new(3, "edge6", "2001:db8::4");
        assert_eq!(orchestrator.url(&node, "/sync"), "http://[2001:db8::4]:5000/agent/v1/sync");
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let orchestrator = HttpOrchestrator::new("t", 1, Duration::from_millis(500)).unwrap();
        let node = Node::new(2, "edge", "127.0.0.1");
        let err = orchestrator.get_status(&node).await.unwrap_err();
        assert!(err.is_unreachable(), "unexpected error: {}", err);
    }
}
