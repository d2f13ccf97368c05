pub mod engine;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

pub use engine::WorkOptimizer;

/// CPU硬件描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuSpec {
    pub cores: u32,
    pub threads: u32,
    /// 最大主频（MHz）
    pub max_frequency_mhz: u32,
    /// 指令集特性，如 AES / AVX2
    pub features: Vec<String>,
}

impl Default for CpuSpec {
    fn default() -> Self {
        Self {
            cores: 1,
            threads: 1,
            max_frequency_mhz: 2000,
            features: Vec::new(),
        }
    }
}

/// GPU硬件描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSpec {
    pub name: String,
    /// 显存总量（字节）
    pub memory_total: u64,
}

/// 内存描述
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySpec {
    /// 内存总量（字节）
    pub total: u64,
    /// 已用百分比（0 - 100）
    pub used_percent: f64,
}

/// 节点硬件概况，由外部探测器提供
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub cpu: CpuSpec,
    pub gpus: Vec<GpuSpec>,
    pub memory: MemorySpec,
}

impl MemorySpec {
    pub fn total_gb(&self) -> f64 {
        self.total as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// 可用内存（GB）
    pub fn available_gb(&self) -> f64 {
        self.total_gb() * (100.0 - self.used_percent).max(0.0) / 100.0
    }
}

/// 候选矿池属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCandidate {
    pub name: String,
    pub url: String,
    /// 手续费（0.0 - 1.0）
    pub fee: f64,
    /// 估计延迟（毫秒）
    pub latency_ms: u64,
}

/// 初始配置决策结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerSetup {
    pub algorithm: String,
    pub pool_name: String,
    pub pool_url: String,
    pub cpu_threads: u32,
    pub gpu_intensity: u32,
}

/// 工作线程配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub cpu_threads: u32,
    pub gpu_intensity: u32,
}

/// 性能采样点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: SystemTime,
    pub hashrate: f64,
    /// 拒绝率（0.0 - 1.0）
    pub rejection_rate: f64,
    pub temperature: HashMap<String, f64>,
    pub power_usage: f64,
    pub algorithm: String,
    pub pool: String,
    pub worker_id: String,
}

impl PerformanceSample {
    pub fn max_temperature(&self) -> f64 {
        self.temperature.values().cloned().fold(0.0, f64::max)
    }
}

/// 份额拒绝记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub timestamp: SystemTime,
    pub worker_id: String,
    pub algorithm: String,
    pub reason: String,
}

/// 分配给单个工作者的nonce子区间，区间半开 [start, end)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSegment {
    pub segment_id: String,
    pub job_id: String,
    pub nonce_start: u64,
    pub nonce_end: u64,
    pub assigned_worker: String,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub result: Option<serde_json::Value>,
}

impl WorkSegment {
    pub fn nonce_count(&self) -> u64 {
        self.nonce_end.saturating_sub(self.nonce_start)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// 工作者再分配建议
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedistributionPlan {
    pub underperforming_workers: Vec<String>,
    pub efficiency_threshold: f64,
}

/// 滚动分析的输出，所有触发项都为空时不产生建议
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerRecommendations {
    pub performance_declining: bool,
    pub switch_pool: Option<String>,
    pub switch_algorithm: Option<String>,
    pub redistribute_workers: Option<RedistributionPlan>,
    pub reduce_intensity: bool,
    pub temperature_warning: Option<f64>,
}

impl OptimizerRecommendations {
    pub fn is_empty(&self) -> bool {
        !self.performance_declining
            && self.switch_pool.is_none()
            && self.switch_algorithm.is_none()
            && self.redistribute_workers.is_none()
            && !self.reduce_intensity
    }
}

/// 优化器状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationStats {
    pub total_performance_points: usize,
    pub total_rejections: usize,
    pub active_segments: usize,
    pub completed_segments: usize,
    pub worker_efficiency: HashMap<String, f64>,
    pub algorithm_performance: HashMap<String, f64>,
    pub pool_performance: HashMap<String, f64>,
}
