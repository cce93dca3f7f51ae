use std::collections::HashMap;
use std::sync::RwLock;

use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Message, RpcError};
use crate::metrics;
use crate::spi::NodeId;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A JSON encoded message and the CRC-32 of its bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Vec<u8>,
    pub crc: u32,
}

impl Envelope {
    pub fn seal(message: &Message) -> Result<Self, RpcError> {
        let payload = serde_json::to_vec(message)?;
        let crc = CASTAGNOLI.checksum(&payload);
        Ok(Self { payload, crc })
    }

    /// Verifies the checksum and decodes the message
    pub fn open(&self) -> Result<Message, RpcError> {
        let mut digest = CASTAGNOLI.digest();
        digest.update(&self.payload);
        let actual = digest.finalize();
        if actual != self.crc {
            return Err(RpcError::Checksum {
                expected: self.crc,
                actual,
            });
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Delivers messages to nodes by id
pub trait Transport: Send + Sync {
    /// Sends without waiting for the receiver to handle the message
    fn send(&self, node: &str, message: &Message) -> Result<(), RpcError>;
}

/// Transport between nodes living in one process: one inbox per registered node
#[derive(Debug, Default)]
pub struct InProcessTransport {
    inboxes: RwLock<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the inbox of `node`, replacing any earlier one
    pub fn register(&self, node: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        match self.inboxes.write() {
            Ok(mut inboxes) => {
                if inboxes.insert(node.to_string(), sender).is_some() {
                    warn!("Replaced inbox of node {}", node);
                }
            }
            Err(e) => warn!("Failed to register node {}: {}", node, e),
        }
        debug!("Registered inbox of node {}", node);
        receiver
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .inboxes
            .read()
            .map(|inboxes| inboxes.keys().cloned().collect())
            .unwrap_or_default();
        nodes.sort();
        nodes
    }
}

impl Transport for InProcessTransport {
    fn send(&self, node: &str, message: &Message) -> Result<(), RpcError> {
        let envelope = Envelope::seal(message)?;
        let bytes = envelope.len();
        let inboxes = self
            .inboxes
            .read()
            .map_err(|_| RpcError::UnknownNode(node.to_string()))?;
        let inbox = inboxes
            .get(node)
            .ok_or_else(|| RpcError::UnknownNode(node.to_string()))?;
        inbox
            .send(envelope)
            .map_err(|_| RpcError::Closed(node.to_string()))?;
        metrics::record_rpc_bytes(bytes);
        debug!("Sent {} ({} bytes) to {}", message.kind(), bytes, node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ColumnMetadata, DataType, Page, Value};
    use crate::query::plan::PlanNodeId;
    use crate::rpc::{Command, TaskResultSet};
    use crate::task::{RequestId, TaskId};

    fn result_set() -> Message {
        let page = Page::from_rows(
            vec![ColumnMetadata::new("host", DataType::Varchar)],
            vec![vec![Value::Varchar("web-1".into())]],
        )
        .unwrap();
        Message::ResultSet(TaskResultSet::page(
            TaskId::new(RequestId::new(), 3),
            "node-2".to_string(),
            PlanNodeId(5),
            page,
        ))
    }

    #[test]
    fn test_envelope_detects_corruption() {
        let message = result_set();
        let mut envelope = Envelope::seal(&message).unwrap();
        assert_eq!(envelope.open().unwrap(), message);

        envelope.payload[0] ^= 0xff;
        assert!(matches!(envelope.open(), Err(RpcError::Checksum { .. })));
    }

    #[tokio::test]
    async fn test_send_reaches_the_registered_inbox() {
        let transport = InProcessTransport::new();
        let mut inbox = transport.register("node-1");
        let cleanup = Message::Command(Command::Cleanup {
            request_id: RequestId::new(),
        });
        transport.send("node-1", &cleanup).unwrap();
        let received = inbox.recv().await.unwrap().open().unwrap();
        assert_eq!(received, cleanup);
        assert_eq!(transport.nodes(), vec!["node-1".to_string()]);
    }

    #[test]
    fn test_unknown_and_closed_nodes() {
        let transport = InProcessTransport::new();
        assert!(matches!(
            transport.send("node-9", &result_set()),
            Err(RpcError::UnknownNode(node)) if node == "node-9"
        ));
        drop(transport.register("node-1"));
        assert!(matches!(transport.send("node-1", &result_set()), Err(RpcError::Closed(_))));
    }
}
