use crate::cluster::{
    ClusterStats, MiningNode, NodeChannel, NodeCommand, NodeRegistration, NodeRequest,
    NodeResponse, NodeStatus, NodeStatusUpdate,
};
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::optimizer::{CpuSpec, GpuSpec, HardwareProfile, MemorySpec, WorkOptimizer, WorkSegment};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 建议优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

/// 再平衡动作
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecommendationAction {
    AlgorithmSwitch { current_algorithm: String },
    PoolRebalance { from_pool: String, to_pool: String, nodes_to_move: usize },
    ReduceIntensity { intensity: u32 },
}

impl RecommendationAction {
    pub fn name(&self) -> &'static str {
        match self {
            RecommendationAction::AlgorithmSwitch { .. } => "algorithm_switch",
            RecommendationAction::PoolRebalance { .. } => "pool_rebalance",
            RecommendationAction::ReduceIntensity { .. } => "reduce_intensity",
        }
    }
}

/// 一条再平衡建议，产出后立即消费，保留有限历史供审计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub action: RecommendationAction,
    pub nodes: Vec<String>,
    pub priority: RecommendationPriority,
    pub reason: String,
}

/// 性能瓶颈标记
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeBottleneck {
    Overheating { node_id: String, temperature: f64 },
    Underperforming { node_id: String, hashrate: f64, expected: f64 },
}

/// 算法分组内的节点采样
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmNodeSample {
    pub node_id: String,
    pub hashrate: f64,
    pub hardware_score: f64,
}

/// 一次再平衡周期的性能分析
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub total_hashrate: f64,
    pub algorithm_distribution: HashMap<String, Vec<AlgorithmNodeSample>>,
    pub pool_distribution: HashMap<String, Vec<String>>,
    pub bottlenecks: Vec<NodeBottleneck>,
}

/// 集群状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub stats: ClusterStats,
    pub nodes: HashMap<String, MiningNode>,
    pub recent_recommendations: Vec<OptimizationRecommendation>,
    pub timestamp: DateTime<Utc>,
}

/// 保留的建议历史条数
const RECOMMENDATION_HISTORY_LIMIT: usize = 10;

/// 集群管理器
///
/// 持有节点注册表与派生统计，周期性健康检查与再平衡作为独立任务
/// 运行；对节点的出站RPC全部带超时并独立扇出，单个不可达节点不会
/// 阻塞其它节点。
#[derive(Clone)]
pub struct ClusterManager {
    cluster_id: String,
    config: ClusterConfig,
    /// 节点注册表
    nodes: Arc<RwLock<HashMap<String, MiningNode>>>,
    /// 派生统计，每次注册表变更后重算
    stats: Arc<RwLock<ClusterStats>>,
    /// 节点命令通道
    channel: Arc<dyn NodeChannel>,
    /// 工作/策略优化器
    optimizer: Arc<WorkOptimizer>,
    /// 等待重新分配的工作段（无存活节点时暂存）
    orphaned_segments: Arc<RwLock<Vec<String>>>,
    /// 建议历史（环形）
    recommendation_history: Arc<RwLock<VecDeque<OptimizationRecommendation>>>,
    /// 再平衡互斥：进行中时新触发的直接跳过
    rebalance_guard: Arc<Mutex<()>>,
    health_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    rebalance_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    running: Arc<RwLock<bool>>,
}

impl ClusterManager {
    pub fn new(
        config: ClusterConfig,
        cluster_id: Option<String>,
        channel: Arc<dyn NodeChannel>,
        optimizer: Arc<WorkOptimizer>,
    ) -> Self {
        let cluster_id = cluster_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        info!("Cluster manager initialized with ID: {}", cluster_id);

        Self {
            cluster_id,
            config,
            nodes: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ClusterStats::default())),
            channel,
            optimizer,
            orphaned_segments: Arc::new(RwLock::new(Vec::new())),
            recommendation_history: Arc::new(RwLock::new(VecDeque::new())),
            rebalance_guard: Arc::new(Mutex::new(())),
            health_handle: Arc::new(Mutex::new(None)),
            rebalance_handle: Arc::new(Mutex::new(None)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// 启动健康检查与再平衡后台任务
    pub async fn start(&self) {
        if *self.running.read().await {
            warn!("Cluster manager is already running");
            return;
        }
        *self.running.write().await = true;

        let manager = self.clone();
        let health_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(manager.config.health_check_interval));
            loop {
                ticker.tick().await;
                if !*manager.running.read().await {
                    break;
                }
                manager.health_check_cycle().await;
            }
        });
        *self.health_handle.lock().await = Some(health_handle);

        let manager = self.clone();
        let rebalance_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(manager.config.rebalance_interval));
            // 首个tick立即完成，先消费掉再进入周期
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !*manager.running.read().await {
                    break;
                }
                manager.run_rebalance().await;
            }
        });
        *self.rebalance_handle.lock().await = Some(rebalance_handle);

        info!("Cluster manager started");
    }

    /// 停止管理器：先尽力广播停机命令，再取消后台任务
    pub async fn stop(&self) {
        *self.running.write().await = false;

        self.stop_all_nodes().await;

        if let Some(handle) = self.health_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.rebalance_handle.lock().await.take() {
            handle.abort();
        }

        info!("Cluster manager stopped");
    }

    /// 注册节点；重复注册覆盖硬件字段但保留运行时指标
    pub async fn register_node(&self, registration: NodeRegistration) -> Result<String, ClusterError> {
        let node_id = match &registration.node_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => Uuid::new_v4().simple().to_string(),
        };

        {
            let mut nodes = self.nodes.write().await;
            match nodes.get_mut(&node_id) {
                Some(existing) => {
                    existing.update_hardware(&registration);
                    info!("Re-registered node: {} ({})", node_id, existing.hostname);
                }
                None => {
                    let mut node = MiningNode::from_registration(node_id.clone(), &registration);

                    // 新节点吸收此前无处安放的孤儿段
                    let mut orphaned = self.orphaned_segments.write().await;
                    if !orphaned.is_empty() {
                        info!(
                            "Node {} adopting {} orphaned work segments",
                            node_id,
                            orphaned.len()
                        );
                        node.work_segments.append(&mut orphaned);
                    }

                    info!("Registered node: {} ({})", node_id, node.hostname);
                    nodes.insert(node_id.clone(), node);
                }
            }
        }

        self.recompute_stats().await;
        self.trigger_rebalance();

        Ok(node_id)
    }

    /// 注销节点：尽力停机、释放其工作段并重新分配
    pub async fn unregister_node(&self, node_id: &str) -> Result<(), ClusterError> {
        let node = {
            let mut nodes = self.nodes.write().await;
            nodes
                .remove(node_id)
                .ok_or_else(|| ClusterError::NodeNotFound { node_id: node_id.to_string() })?
        };

        // 停机失败可以忽略，节点可能已经失联
        if let Err(e) = self
            .send_command(&node, NodeCommand::StopMining, self.config.command_timeout)
            .await
        {
            debug!("Stop-mining command for {} failed: {}", node_id, e);
        }

        let released = node.work_segments.clone();
        if !released.is_empty() {
            info!(
                "Redistributing {} work segments after node {} removal",
                released.len(),
                node_id
            );
            self.redistribute_segments(released).await;
        }

        self.recompute_stats().await;
        self.trigger_rebalance();

        info!("Unregistered node: {}", node_id);
        Ok(())
    }

    /// 更新节点状态；未知节点（可能刚被驱逐）记录后忽略
    pub async fn update_node_status(&self, node_id: &str, update: &NodeStatusUpdate) -> bool {
        let applied = {
            let mut nodes = self.nodes.write().await;
            match nodes.get_mut(node_id) {
                Some(node) => {
                    node.apply_status_update(update);
                    true
                }
                None => {
                    warn!("Unknown node status update: {}", node_id);
                    false
                }
            }
        };

        if applied {
            self.recompute_stats().await;
        }
        applied
    }

    /// 向节点下发工作分配；失败时节点保持原状
    pub async fn assign_work(
        &self,
        node_id: &str,
        algorithm: &str,
        pool: &str,
        segments: Vec<WorkSegment>,
    ) -> Result<bool, ClusterError> {
        let node = self
            .node(node_id)
            .await
            .ok_or_else(|| ClusterError::NodeNotFound { node_id: node_id.to_string() })?;

        let segment_ids: Vec<String> = segments.iter().map(|s| s.segment_id.clone()).collect();
        let command = NodeCommand::AssignWork {
            algorithm: algorithm.to_string(),
            pool: pool.to_string(),
            work_segments: segments,
        };

        match self.send_command(&node, command, self.config.command_timeout).await {
            Ok(response) if response.success => {
                {
                    let mut nodes = self.nodes.write().await;
                    if let Some(node) = nodes.get_mut(node_id) {
                        node.assigned_algorithm = Some(algorithm.to_string());
                        node.assigned_pool = Some(pool.to_string());
                        node.work_segments = segment_ids;
                        node.status = NodeStatus::Mining;
                    }
                }
                self.recompute_stats().await;

                info!("Assigned work to node {}: {} on {}", node_id, algorithm, pool);
                Ok(true)
            }
            Ok(response) => {
                warn!(
                    "Node {} rejected work assignment: {}",
                    node_id,
                    response.message.unwrap_or_default()
                );
                Ok(false)
            }
            Err(e) => {
                warn!("Work assignment to node {} failed: {}", node_id, e);
                Ok(false)
            }
        }
    }

    /// 为指定算法挑选最合适的节点
    pub async fn get_optimal_node_assignment(&self, algorithm: &str) -> Option<String> {
        let nodes = self.nodes.read().await;

        nodes
            .values()
            .filter(|n| {
                n.status == NodeStatus::Active
                    || (n.status == NodeStatus::Mining
                        && n.assigned_algorithm.as_deref() == Some(algorithm))
            })
            .max_by(|a, b| {
                a.algorithm_suitability(algorithm)
                    .partial_cmp(&b.algorithm_suitability(algorithm))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|n| n.node_id.clone())
    }

    pub async fn node(&self, node_id: &str) -> Option<MiningNode> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn cluster_stats(&self) -> ClusterStats {
        self.stats.read().await.clone()
    }

    /// 完整状态快照
    pub async fn get_cluster_status(&self) -> ClusterStatus {
        ClusterStatus {
            cluster_id: self.cluster_id.clone(),
            stats: self.stats.read().await.clone(),
            nodes: self.nodes.read().await.clone(),
            recent_recommendations: self
                .recommendation_history
                .read()
                .await
                .iter()
                .cloned()
                .collect(),
            timestamp: Utc::now(),
        }
    }

    /// 单轮健康检查：驱逐失联节点，其余节点并发探活
    pub async fn health_check_cycle(&self) {
        let node_timeout = Duration::from_secs(self.config.node_timeout);
        let snapshot: Vec<MiningNode> = self.nodes.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        let mut reachable = Vec::new();
        for node in snapshot {
            let stale = node
                .last_seen
                .elapsed()
                .map(|age| age > node_timeout)
                .unwrap_or(false);
            if stale {
                expired.push(node.node_id);
            } else {
                reachable.push(node);
            }
        }

        for node_id in expired {
            warn!("Node {} is unresponsive", node_id);
            {
                let mut nodes = self.nodes.write().await;
                if let Some(node) = nodes.get_mut(&node_id) {
                    node.status = NodeStatus::Error;
                }
            }
            if let Err(e) = self.unregister_node(&node_id).await {
                debug!("Eviction of {} skipped: {}", node_id, e);
            }
        }

        // 独立扇出探活，单个不可达节点不拖慢其它节点
        let ping_timeout = Duration::from_secs(self.config.ping_timeout);
        let pings = reachable.into_iter().map(|node| {
            let channel = self.channel.clone();
            async move {
                let node_id = node.node_id.clone();
                let reply = timeout(ping_timeout, channel.ping(&node)).await;
                (node_id, reply)
            }
        });

        for (node_id, reply) in join_all(pings).await {
            match reply {
                Ok(Ok(reply)) => {
                    if let Some(metrics) = reply.metrics {
                        self.update_node_status(&node_id, &metrics).await;
                    } else {
                        let mut nodes = self.nodes.write().await;
                        if let Some(node) = nodes.get_mut(&node_id) {
                            node.last_seen = std::time::SystemTime::now();
                        }
                    }
                }
                Ok(Err(e)) => {
                    debug!("Ping failed for node {}: {}", node_id, e);
                }
                Err(_) => {
                    debug!("Ping timeout for node {}", node_id);
                }
            }
        }

        self.recompute_stats().await;
    }

    /// 触发一次立即再平衡；已有再平衡进行中时会被跳过
    pub fn trigger_rebalance(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_rebalance().await;
        });
    }

    /// 执行一轮再平衡，互斥不排队
    pub async fn run_rebalance(&self) {
        let _guard = match self.rebalance_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Rebalance already in progress, skipping");
                return;
            }
        };

        if self.nodes.read().await.len() < 2 {
            debug!("Not enough nodes for rebalancing");
            return;
        }

        info!("Running cluster rebalancing...");

        let analysis = self.analyze_performance().await;
        debug!(
            "Cluster mining hashrate: {}",
            crate::utils::format_hashrate(analysis.total_hashrate)
        );
        let recommendations = self.generate_recommendations(&analysis);

        if recommendations.is_empty() {
            debug!("No optimization recommendations this cycle");
            return;
        }

        {
            let mut history = self.recommendation_history.write().await;
            for recommendation in &recommendations {
                history.push_back(recommendation.clone());
            }
            while history.len() > RECOMMENDATION_HISTORY_LIMIT {
                history.pop_front();
            }
        }

        self.apply_recommendations(recommendations).await;
    }

    /// 汇总挖矿中节点的性能分析
    pub async fn analyze_performance(&self) -> PerformanceAnalysis {
        let nodes = self.nodes.read().await;
        let mut analysis = PerformanceAnalysis::default();

        for node in nodes.values().filter(|n| n.is_mining()) {
            analysis.total_hashrate += node.hashrate;

            if let Some(algorithm) = &node.assigned_algorithm {
                analysis
                    .algorithm_distribution
                    .entry(algorithm.clone())
                    .or_default()
                    .push(AlgorithmNodeSample {
                        node_id: node.node_id.clone(),
                        hashrate: node.hashrate,
                        hardware_score: node.hardware_score(),
                    });
            }

            if let Some(pool) = &node.assigned_pool {
                analysis
                    .pool_distribution
                    .entry(pool.clone())
                    .or_default()
                    .push(node.node_id.clone());
            }

            let max_temp = node.max_temperature();
            if max_temp > 85.0 {
                analysis.bottlenecks.push(NodeBottleneck::Overheating {
                    node_id: node.node_id.clone(),
                    temperature: max_temp,
                });
            }

            let expected = node.expected_hashrate();
            if node.hashrate < expected * 0.7 {
                analysis.bottlenecks.push(NodeBottleneck::Underperforming {
                    node_id: node.node_id.clone(),
                    hashrate: node.hashrate,
                    expected,
                });
            }
        }

        analysis
    }

    /// 从性能分析生成再平衡建议
    pub fn generate_recommendations(
        &self,
        analysis: &PerformanceAnalysis,
    ) -> Vec<OptimizationRecommendation> {
        let mut recommendations = Vec::new();

        // 算法组内明显低于平均算力的节点
        for (algorithm, samples) in &analysis.algorithm_distribution {
            if samples.is_empty() {
                continue;
            }
            let avg = samples.iter().map(|s| s.hashrate).sum::<f64>() / samples.len() as f64;
            let underperforming: Vec<String> = samples
                .iter()
                .filter(|s| s.hashrate < avg * 0.7)
                .map(|s| s.node_id.clone())
                .collect();

            if !underperforming.is_empty() {
                recommendations.push(OptimizationRecommendation {
                    action: RecommendationAction::AlgorithmSwitch {
                        current_algorithm: algorithm.clone(),
                    },
                    nodes: underperforming,
                    priority: RecommendationPriority::Medium,
                    reason: "Low performance detected".to_string(),
                });
            }
        }

        // 矿池负载失衡
        let pool_loads: HashMap<&String, usize> = analysis
            .pool_distribution
            .iter()
            .map(|(pool, nodes)| (pool, nodes.len()))
            .collect();
        if !pool_loads.is_empty() {
            let max_load = pool_loads.values().max().cloned().unwrap_or(0);
            let min_load = pool_loads.values().min().cloned().unwrap_or(0);

            if max_load > min_load * 2 {
                let overloaded = pool_loads
                    .iter()
                    .max_by_key(|(_, load)| **load)
                    .map(|(pool, _)| (*pool).clone());
                let underloaded = pool_loads
                    .iter()
                    .min_by_key(|(_, load)| **load)
                    .map(|(pool, _)| (*pool).clone());

                if let (Some(from_pool), Some(to_pool)) = (overloaded, underloaded) {
                    if from_pool != to_pool {
                        recommendations.push(OptimizationRecommendation {
                            action: RecommendationAction::PoolRebalance {
                                from_pool,
                                to_pool,
                                nodes_to_move: 1,
                            },
                            nodes: Vec::new(),
                            priority: RecommendationPriority::Low,
                            reason: "Load balancing".to_string(),
                        });
                    }
                }
            }
        }

        // 过热节点降低强度
        for bottleneck in &analysis.bottlenecks {
            if let NodeBottleneck::Overheating { node_id, .. } = bottleneck {
                recommendations.push(OptimizationRecommendation {
                    action: RecommendationAction::ReduceIntensity { intensity: 70 },
                    nodes: vec![node_id.clone()],
                    priority: RecommendationPriority::High,
                    reason: "Temperature control".to_string(),
                });
            }
        }

        recommendations
    }

    /// 顺序应用建议，单条失败记录后继续
    async fn apply_recommendations(&self, recommendations: Vec<OptimizationRecommendation>) {
        for recommendation in recommendations {
            match &recommendation.action {
                RecommendationAction::AlgorithmSwitch { current_algorithm } => {
                    self.switch_node_algorithms(&recommendation.nodes, current_algorithm)
                        .await;
                }
                RecommendationAction::PoolRebalance { from_pool, to_pool, nodes_to_move } => {
                    self.rebalance_pools(from_pool, to_pool, *nodes_to_move).await;
                }
                RecommendationAction::ReduceIntensity { intensity } => {
                    self.reduce_node_intensity(&recommendation.nodes, *intensity).await;
                }
            }

            info!(
                "Applied optimization: {} - {}",
                recommendation.action.name(),
                recommendation.reason
            );
        }
    }

    /// 为低效节点换用更匹配硬件的算法
    async fn switch_node_algorithms(&self, node_ids: &[String], current_algorithm: &str) {
        for node_id in node_ids {
            let node = match self.node(node_id).await {
                Some(node) => node,
                None => continue,
            };

            let best = match self.best_algorithm_for(&node).await {
                Some(algorithm) => algorithm,
                None => continue,
            };

            if best == current_algorithm {
                debug!("Node {} already on best algorithm {}", node_id, best);
                continue;
            }

            let command = NodeCommand::SwitchAlgorithm { algorithm: best.clone() };
            if let Err(e) = self
                .send_command(&node, command, self.config.command_timeout)
                .await
            {
                error!("Algorithm switch for node {} failed: {}", node_id, e);
            }
        }
    }

    /// 将过载矿池上算力最低的节点迁往低载矿池
    async fn rebalance_pools(&self, from_pool: &str, to_pool: &str, count: usize) {
        let mut candidates: Vec<MiningNode> = {
            let nodes = self.nodes.read().await;
            nodes
                .values()
                .filter(|n| n.is_mining() && n.assigned_pool.as_deref() == Some(from_pool))
                .cloned()
                .collect()
        };

        candidates.sort_by(|a, b| {
            a.hashrate.partial_cmp(&b.hashrate).unwrap_or(std::cmp::Ordering::Equal)
        });

        for node in candidates.into_iter().take(count) {
            let command = NodeCommand::SwitchPool { pool: to_pool.to_string() };
            if let Err(e) = self
                .send_command(&node, command, self.config.command_timeout)
                .await
            {
                error!("Pool rebalance for node {} failed: {}", node.node_id, e);
            }
        }
    }

    /// 对过热节点降低挖矿强度
    async fn reduce_node_intensity(&self, node_ids: &[String], intensity: u32) {
        for node_id in node_ids {
            let node = match self.node(node_id).await {
                Some(node) => node,
                None => continue,
            };

            let command = NodeCommand::ReduceIntensity { intensity };
            if let Err(e) = self
                .send_command(&node, command, self.config.command_timeout)
                .await
            {
                error!("Intensity reduction for node {} failed: {}", node_id, e);
            }
        }
    }

    /// 依据节点硬件向优化器询问最优算法
    async fn best_algorithm_for(&self, node: &MiningNode) -> Option<String> {
        let gpus = if node.gpu_count > 0 {
            let per_gpu = node.gpu_memory / node.gpu_count as u64;
            (0..node.gpu_count)
                .map(|_| GpuSpec { name: String::new(), memory_total: per_gpu })
                .collect()
        } else {
            Vec::new()
        };

        let profile = HardwareProfile {
            cpu: CpuSpec {
                cores: node.cpu_cores,
                threads: node.cpu_threads,
                ..Default::default()
            },
            gpus,
            memory: MemorySpec { total: node.total_memory, used_percent: 0.0 },
        };

        self.optimizer.select_algorithm(&profile).await.ok()
    }

    /// 把释放的工作段分给负载最轻的存活节点；无存活节点时暂存
    async fn redistribute_segments(&self, segments: Vec<String>) {
        if segments.is_empty() {
            return;
        }

        let mut nodes = self.nodes.write().await;
        let mut targets: Vec<&mut MiningNode> =
            nodes.values_mut().filter(|n| n.is_active()).collect();

        if targets.is_empty() {
            warn!(
                "No active nodes available, holding {} segments for redistribution",
                segments.len()
            );
            self.orphaned_segments.write().await.extend(segments);
            return;
        }

        targets.sort_by_key(|n| (n.work_segments.len(), n.node_id.clone()));

        let target_count = targets.len();
        for (index, segment) in segments.into_iter().enumerate() {
            targets[index % target_count].work_segments.push(segment);
        }
    }

    /// 带超时的命令下发
    async fn send_command(
        &self,
        node: &MiningNode,
        command: NodeCommand,
        timeout_secs: u64,
    ) -> Result<NodeResponse, ClusterError> {
        let request = NodeRequest::new(&command, &self.cluster_id);

        match timeout(
            Duration::from_secs(timeout_secs),
            self.channel.send_command(node, request),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClusterError::CommandTimeout { node_id: node.node_id.clone() }),
        }
    }

    /// 尽力广播停机命令，并行扇出且忽略失败
    async fn stop_all_nodes(&self) {
        let snapshot: Vec<MiningNode> = self.nodes.read().await.values().cloned().collect();

        let stops = snapshot.into_iter().map(|node| {
            let manager = self.clone();
            async move {
                let node_id = node.node_id.clone();
                if let Err(e) = manager
                    .send_command(&node, NodeCommand::StopMining, manager.config.command_timeout)
                    .await
                {
                    debug!("Stop-mining for node {} failed: {}", node_id, e);
                }
                node_id
            }
        });

        let stopped = join_all(stops).await;

        {
            let mut nodes = self.nodes.write().await;
            for node_id in stopped {
                if let Some(node) = nodes.get_mut(&node_id) {
                    node.mark_idle();
                }
            }
        }
        self.recompute_stats().await;
    }

    /// 注册表变更后重算派生统计
    async fn recompute_stats(&self) {
        let stats = {
            let nodes = self.nodes.read().await;
            ClusterStats::compute(&nodes)
        };
        *self.stats.write().await = stats;
    }
}
