pub mod channel;
pub mod manager;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

pub use channel::{NodeChannel, NodeCommand, NodeRequest, NodeResponse, NullNodeChannel, PingReply};
pub use manager::{
    ClusterManager, ClusterStatus, OptimizationRecommendation, PerformanceAnalysis,
    RecommendationAction, RecommendationPriority,
};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// 未激活
    Inactive,
    /// 已注册在线
    Active,
    /// 挖矿中
    Mining,
    /// 异常
    Error,
}

/// 集群中的挖矿节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningNode {
    pub node_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    pub status: NodeStatus,
    pub last_seen: SystemTime,

    // 硬件规格
    pub cpu_cores: u32,
    pub cpu_threads: u32,
    pub gpu_count: u32,
    /// GPU显存总量（字节）
    pub gpu_memory: u64,
    /// 内存总量（字节）
    pub total_memory: u64,

    // 运行时指标
    pub hashrate: f64,
    /// 各传感器温度（摄氏度）
    pub temperature: HashMap<String, f64>,
    pub power_usage: f64,
    pub uptime: f64,

    // 工作分配
    pub assigned_algorithm: Option<String>,
    pub assigned_pool: Option<String>,
    pub work_segments: Vec<String>,
}

/// 节点注册请求，缺省字段在边界处显式补全
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub cpu_cores: Option<u32>,
    pub cpu_threads: Option<u32>,
    pub gpu_count: Option<u32>,
    pub gpu_memory: Option<u64>,
    pub total_memory: Option<u64>,
}

/// 节点状态上报
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatusUpdate {
    #[serde(default)]
    pub hashrate: f64,
    #[serde(default)]
    pub temperature: HashMap<String, f64>,
    #[serde(default)]
    pub power_usage: f64,
    #[serde(default)]
    pub uptime: f64,
    pub status: Option<NodeStatus>,
    pub algorithm: Option<String>,
    pub pool: Option<String>,
}

impl MiningNode {
    /// 从注册请求创建节点，缺省硬件按最小配置补全
    pub fn from_registration(node_id: String, registration: &NodeRegistration) -> Self {
        Self {
            node_id,
            hostname: registration.hostname.clone().unwrap_or_else(|| "unknown".to_string()),
            ip_address: registration.ip_address.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
            port: registration.port.unwrap_or(8080),
            status: NodeStatus::Active,
            last_seen: SystemTime::now(),
            cpu_cores: registration.cpu_cores.unwrap_or(1),
            cpu_threads: registration.cpu_threads.unwrap_or(1),
            gpu_count: registration.gpu_count.unwrap_or(0),
            gpu_memory: registration.gpu_memory.unwrap_or(0),
            total_memory: registration.total_memory.unwrap_or(0),
            hashrate: 0.0,
            temperature: HashMap::new(),
            power_usage: 0.0,
            uptime: 0.0,
            assigned_algorithm: None,
            assigned_pool: None,
            work_segments: Vec::new(),
        }
    }

    /// 重新注册时覆盖硬件字段，保留运行时指标
    pub fn update_hardware(&mut self, registration: &NodeRegistration) {
        if let Some(hostname) = &registration.hostname {
            self.hostname = hostname.clone();
        }
        if let Some(ip) = &registration.ip_address {
            self.ip_address = ip.clone();
        }
        if let Some(port) = registration.port {
            self.port = port;
        }
        self.cpu_cores = registration.cpu_cores.unwrap_or(self.cpu_cores);
        self.cpu_threads = registration.cpu_threads.unwrap_or(self.cpu_threads);
        self.gpu_count = registration.gpu_count.unwrap_or(self.gpu_count);
        self.gpu_memory = registration.gpu_memory.unwrap_or(self.gpu_memory);
        self.total_memory = registration.total_memory.unwrap_or(self.total_memory);
        self.last_seen = SystemTime::now();
        self.status = NodeStatus::Active;
    }

    /// 应用状态上报
    pub fn apply_status_update(&mut self, update: &NodeStatusUpdate) {
        self.last_seen = SystemTime::now();
        self.hashrate = update.hashrate;
        self.temperature = update.temperature.clone();
        self.power_usage = update.power_usage;
        self.uptime = update.uptime;
        self.status = update.status.unwrap_or(NodeStatus::Active);

        if let Some(algorithm) = &update.algorithm {
            self.assigned_algorithm = Some(algorithm.clone());
        }
        if let Some(pool) = &update.pool {
            self.assigned_pool = Some(pool.clone());
        }
    }

    /// 停止挖矿后回到空闲状态
    pub fn mark_idle(&mut self) {
        self.status = NodeStatus::Inactive;
        self.assigned_algorithm = None;
        self.assigned_pool = None;
        self.work_segments.clear();
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, NodeStatus::Active | NodeStatus::Mining)
    }

    pub fn is_mining(&self) -> bool {
        self.status == NodeStatus::Mining
    }

    pub fn gpu_memory_gb(&self) -> f64 {
        self.gpu_memory as f64 / BYTES_PER_GB
    }

    pub fn total_memory_gb(&self) -> f64 {
        self.total_memory as f64 / BYTES_PER_GB
    }

    pub fn max_temperature(&self) -> f64 {
        self.temperature.values().cloned().fold(0.0, f64::max)
    }

    /// 硬件性能评分
    pub fn hardware_score(&self) -> f64 {
        let cpu_score = self.cpu_cores as f64 * 10.0 + self.cpu_threads as f64 * 5.0;
        let gpu_score = self.gpu_count as f64 * 50.0 + self.gpu_memory_gb() * 20.0;
        let memory_score = self.total_memory_gb() * 2.0;

        cpu_score + gpu_score + memory_score
    }

    /// 基于硬件与算法系数估算的期望算力
    pub fn expected_hashrate(&self) -> f64 {
        let multiplier = self
            .assigned_algorithm
            .as_deref()
            .map(algorithm_multiplier)
            .unwrap_or(1.0);

        self.hardware_score() * multiplier * 1000.0
    }

    /// 节点对指定算法的适配度评分
    pub fn algorithm_suitability(&self, algorithm: &str) -> f64 {
        let base_score = self.hardware_score();

        match algorithm {
            "RandomX" => {
                let cpu_bonus = self.cpu_threads as f64 * 5.0;
                let memory_bonus = self.total_memory_gb() * 10.0;
                base_score + cpu_bonus + memory_bonus
            }
            "Ethash" => {
                let gpu_bonus = self.gpu_count as f64 * 30.0 + self.gpu_memory_gb() * 20.0;
                base_score + gpu_bonus
            }
            _ => base_score,
        }
    }
}

/// 算法相对SHA256的算力系数
pub fn algorithm_multiplier(algorithm: &str) -> f64 {
    match algorithm {
        "SHA256" => 1.0,
        "Ethash" => 1.2,
        "RandomX" => 0.8,
        "Scrypt" => 0.6,
        _ => 1.0,
    }
}

/// 集群统计信息，由当前节点集合派生
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub total_hashrate: f64,
    pub total_power: f64,
    pub algorithms_running: BTreeSet<String>,
    pub pools_connected: BTreeSet<String>,
    pub efficiency_score: f64,
}

impl ClusterStats {
    /// 重新计算统计信息，纯函数
    pub fn compute(nodes: &HashMap<String, MiningNode>) -> Self {
        let mining: Vec<&MiningNode> = nodes.values().filter(|n| n.is_mining()).collect();

        let total_expected: f64 = mining.iter().map(|n| n.expected_hashrate()).sum();
        let total_actual: f64 = mining.iter().map(|n| n.hashrate).sum();

        let efficiency_score = if mining.is_empty() {
            0.0
        } else {
            (total_actual / total_expected.max(1.0) * 100.0).max(0.0)
        };

        Self {
            total_nodes: nodes.len(),
            active_nodes: nodes.values().filter(|n| n.is_active()).count(),
            total_hashrate: total_actual,
            total_power: mining.iter().map(|n| n.power_usage).sum(),
            algorithms_running: mining
                .iter()
                .filter_map(|n| n.assigned_algorithm.clone())
                .collect(),
            pools_connected: mining
                .iter()
                .filter_map(|n| n.assigned_pool.clone())
                .collect(),
            efficiency_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(cores: u32, threads: u32, gpus: u32, gpu_mem_gb: u64, mem_gb: u64) -> MiningNode {
        let registration = NodeRegistration {
            cpu_cores: Some(cores),
            cpu_threads: Some(threads),
            gpu_count: Some(gpus),
            gpu_memory: Some(gpu_mem_gb * 1024 * 1024 * 1024),
            total_memory: Some(mem_gb * 1024 * 1024 * 1024),
            ..Default::default()
        };
        MiningNode::from_registration("node-1".to_string(), &registration)
    }

    #[test]
    fn test_hardware_score() {
        let node = test_node(8, 16, 2, 24, 64);
        // 8*10 + 16*5 + 2*50 + 24*20 + 64*2 = 868
        assert!((node.hardware_score() - 868.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expected_hashrate_uses_algorithm_multiplier() {
        let mut node = test_node(4, 8, 0, 0, 16);
        node.assigned_algorithm = Some("Ethash".to_string());
        let ethash = node.expected_hashrate();

        node.assigned_algorithm = Some("Scrypt".to_string());
        let scrypt = node.expected_hashrate();

        assert!(ethash > scrypt);
        assert!((ethash / 1.2 - scrypt / 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_registration_defaults() {
        let node = MiningNode::from_registration("id".to_string(), &NodeRegistration::default());
        assert_eq!(node.cpu_cores, 1);
        assert_eq!(node.cpu_threads, 1);
        assert_eq!(node.gpu_count, 0);
        assert_eq!(node.port, 8080);
        assert_eq!(node.hostname, "unknown");
        assert_eq!(node.status, NodeStatus::Active);
    }

    #[test]
    fn test_suitability_prefers_matching_hardware() {
        let gpu_node = test_node(4, 8, 4, 48, 32);
        let cpu_node = test_node(32, 64, 0, 0, 128);

        assert!(gpu_node.algorithm_suitability("Ethash") > gpu_node.algorithm_suitability("RandomX"));
        assert!(cpu_node.algorithm_suitability("RandomX") > cpu_node.algorithm_suitability("Ethash"));
    }

    #[test]
    fn test_cluster_stats_counts() {
        let mut nodes = HashMap::new();
        let mut mining = test_node(4, 8, 0, 0, 16);
        mining.status = NodeStatus::Mining;
        mining.assigned_algorithm = Some("SHA256".to_string());
        mining.assigned_pool = Some("example".to_string());
        mining.hashrate = 1000.0;
        nodes.insert(mining.node_id.clone(), mining);

        let mut idle = test_node(2, 4, 0, 0, 8);
        idle.node_id = "node-2".to_string();
        nodes.insert(idle.node_id.clone(), idle);

        let stats = ClusterStats::compute(&nodes);
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.active_nodes, 2);
        assert!(stats.algorithms_running.contains("SHA256"));
        assert!(stats.pools_connected.contains("example"));
        assert!((stats.total_hashrate - 1000.0).abs() < f64::EPSILON);
    }
}
