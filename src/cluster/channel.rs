use crate::cluster::{MiningNode, NodeStatusUpdate};
use crate::error::ClusterError;
use crate::optimizer::WorkSegment;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// 下发到节点的命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum NodeCommand {
    AssignWork {
        algorithm: String,
        pool: String,
        work_segments: Vec<WorkSegment>,
    },
    StopMining,
    SwitchAlgorithm { algorithm: String },
    SwitchPool { pool: String },
    ReduceIntensity { intensity: u32 },
    GetStatus,
}

impl NodeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::AssignWork { .. } => "assign_work",
            NodeCommand::StopMining => "stop_mining",
            NodeCommand::SwitchAlgorithm { .. } => "switch_algorithm",
            NodeCommand::SwitchPool { .. } => "switch_pool",
            NodeCommand::ReduceIntensity { .. } => "reduce_intensity",
            NodeCommand::GetStatus => "get_status",
        }
    }

    pub fn params(&self) -> serde_json::Value {
        match self {
            NodeCommand::AssignWork { algorithm, pool, work_segments } => json!({
                "algorithm": algorithm,
                "pool": pool,
                "work_segments": work_segments,
            }),
            NodeCommand::StopMining | NodeCommand::GetStatus => json!({}),
            NodeCommand::SwitchAlgorithm { algorithm } => json!({ "algorithm": algorithm }),
            NodeCommand::SwitchPool { pool } => json!({ "pool": pool }),
            NodeCommand::ReduceIntensity { intensity } => json!({ "intensity": intensity }),
        }
    }
}

/// 节点命令请求（线缆格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRequest {
    pub command: String,
    pub params: serde_json::Value,
    pub cluster_id: String,
    pub timestamp: DateTime<Utc>,
}

impl NodeRequest {
    pub fn new(command: &NodeCommand, cluster_id: &str) -> Self {
        Self {
            command: command.name().to_string(),
            params: command.params(),
            cluster_id: cluster_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// 节点命令响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl NodeResponse {
    pub fn ok() -> Self {
        Self { success: true, message: None }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }
}

/// 心跳探测应答，可附带节点指标
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingReply {
    pub metrics: Option<NodeStatusUpdate>,
}

/// 节点命令通道，传输实现由外部注入
#[async_trait]
pub trait NodeChannel: Send + Sync {
    /// 发送命令到节点并等待应答
    async fn send_command(
        &self,
        node: &MiningNode,
        request: NodeRequest,
    ) -> Result<NodeResponse, ClusterError>;

    /// 轻量心跳探测
    async fn ping(&self, node: &MiningNode) -> Result<PingReply, ClusterError>;
}

/// 空实现，未接入传输层时使用
pub struct NullNodeChannel;

#[async_trait]
impl NodeChannel for NullNodeChannel {
    async fn send_command(
        &self,
        node: &MiningNode,
        request: NodeRequest,
    ) -> Result<NodeResponse, ClusterError> {
        debug!("NullNodeChannel: dropping {} for node {}", request.command, node.node_id);
        Ok(NodeResponse::ok())
    }

    async fn ping(&self, node: &MiningNode) -> Result<PingReply, ClusterError> {
        debug!("NullNodeChannel: ping {}", node.node_id);
        Ok(PingReply::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let command = NodeCommand::ReduceIntensity { intensity: 70 };
        let request = NodeRequest::new(&command, "cluster-1");

        assert_eq!(request.command, "reduce_intensity");
        assert_eq!(request.params["intensity"], 70);
        assert_eq!(request.cluster_id, "cluster-1");

        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: NodeRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.command, "reduce_intensity");
    }

    #[test]
    fn test_assign_work_params() {
        let command = NodeCommand::AssignWork {
            algorithm: "SHA256".to_string(),
            pool: "example".to_string(),
            work_segments: Vec::new(),
        };
        let params = command.params();
        assert_eq!(params["algorithm"], "SHA256");
        assert_eq!(params["pool"], "example");
        assert!(params["work_segments"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_null_channel_accepts_everything() {
        let node = crate::cluster::MiningNode::from_registration(
            "n".to_string(),
            &crate::cluster::NodeRegistration::default(),
        );
        let channel = NullNodeChannel;

        let response = tokio_test::block_on(
            channel.send_command(&node, NodeRequest::new(&NodeCommand::StopMining, "c")),
        )
        .unwrap();
        assert!(response.success);
    }
}
