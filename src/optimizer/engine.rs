use crate::config::OptimizerConfig;
use crate::error::OptimizerError;
use crate::optimizer::{
    CpuSpec, GpuSpec, HardwareProfile, MemorySpec, MinerSetup, OptimizationStats,
    OptimizerRecommendations, PerformanceSample, PoolCandidate, RedistributionPlan,
    RejectionRecord, WorkSegment, WorkerConfig,
};
use crate::pool::WorkUnit;

use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// 各算法的基础段长（nonce个数）
fn base_segment_size(algorithm: &str) -> u64 {
    match algorithm {
        "SHA256" => 1_000_000,
        "Ethash" => 500_000,
        "Kawpow" => 300_000,
        "X11" => 400_000,
        "Scrypt" => 200_000,
        "Yescrypt" => 150_000,
        "RandomX" => 100_000,
        _ => 500_000,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn trailing_mean(values: &[f64], count: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let start = values.len().saturating_sub(count);
    Some(mean(&values[start..]))
}

/// 工作与策略优化器
///
/// 维护滚动性能历史、工作者效率以及分段记录，为集群管理器提供
/// 算法/矿池选择、工作分段和纠偏建议。
pub struct WorkOptimizer {
    config: OptimizerConfig,
    /// 候选矿池属性
    pools: Vec<PoolCandidate>,
    /// 性能历史（环形）
    performance_history: Mutex<VecDeque<PerformanceSample>>,
    /// 拒绝历史（环形）
    rejection_history: Mutex<VecDeque<RejectionRecord>>,
    /// 每算法的历史算力
    algorithm_performance: Mutex<HashMap<String, Vec<f64>>>,
    /// 每矿池的历史评分
    pool_performance: Mutex<HashMap<String, Vec<f64>>>,
    /// 工作者效率系数（0.1 - 2.0）
    worker_efficiency: Mutex<HashMap<String, f64>>,
    /// 进行中的工作段
    active_segments: Mutex<HashMap<String, WorkSegment>>,
    /// 已完成的工作段（环形）
    completed_segments: Mutex<VecDeque<WorkSegment>>,
}

impl WorkOptimizer {
    pub fn new(config: OptimizerConfig, pools: Vec<PoolCandidate>) -> Self {
        info!("Work optimizer initialized with {} candidate algorithms", config.algorithms.len());

        Self {
            config,
            pools,
            performance_history: Mutex::new(VecDeque::new()),
            rejection_history: Mutex::new(VecDeque::new()),
            algorithm_performance: Mutex::new(HashMap::new()),
            pool_performance: Mutex::new(HashMap::new()),
            worker_efficiency: Mutex::new(HashMap::new()),
            active_segments: Mutex::new(HashMap::new()),
            completed_segments: Mutex::new(VecDeque::new()),
        }
    }

    /// CPU挖矿性能评分，上限100
    pub fn cpu_score(cpu: &CpuSpec) -> f64 {
        let mut score = cpu.cores as f64 * 10.0
            + cpu.threads as f64 * 5.0
            + (cpu.max_frequency_mhz as f64 / 1000.0) * 2.0;

        if cpu.features.iter().any(|f| f == "AES") {
            score *= 1.2;
        }
        if cpu.features.iter().any(|f| f == "AVX2") {
            score *= 1.1;
        }

        score.min(100.0)
    }

    /// GPU挖矿性能评分，上限100
    pub fn gpu_score(gpus: &[GpuSpec]) -> f64 {
        let mut total = 0.0;

        for gpu in gpus {
            let memory_gb = gpu.memory_total as f64 / (1024.0 * 1024.0 * 1024.0);
            let name = gpu.name.to_uppercase();

            let multiplier = if name.contains("H200") {
                3.5
            } else if name.contains("H100") {
                3.0
            } else if name.contains("MI300") {
                2.8
            } else if name.contains("RTX") {
                1.5
            } else {
                1.0
            };

            total += memory_gb * 10.0 * multiplier;
        }

        total.min(100.0)
    }

    /// 内存性能评分，上限100
    pub fn memory_score(memory: &MemorySpec) -> f64 {
        let score = memory.total_gb() * 2.0 + (100.0 - memory.used_percent) * 0.5;
        score.min(100.0)
    }

    /// 根据硬件与历史表现选择最优算法
    pub async fn select_algorithm(&self, profile: &HardwareProfile) -> Result<String, OptimizerError> {
        if self.config.algorithms.is_empty() {
            return Err(OptimizerError::NoAlgorithmsAvailable);
        }

        let cpu = Self::cpu_score(&profile.cpu);
        let gpu = Self::gpu_score(&profile.gpus);
        let memory = Self::memory_score(&profile.memory);

        let history = self.algorithm_performance.lock().await;
        let mut best: Option<(&str, f64)> = None;

        for algorithm in &self.config.algorithms {
            let mut score = match algorithm.as_str() {
                "RandomX" => cpu * 0.7 + memory * 0.3,
                "Ethash" => gpu * 0.8 + memory * 0.2,
                "SHA256" => cpu.max(gpu) * 0.6 + cpu.min(gpu) * 0.4,
                "Scrypt" | "Yescrypt" => memory * 0.5 + cpu * 0.3 + gpu * 0.2,
                "Kawpow" | "X11" => gpu * 0.7 + cpu * 0.3,
                _ => 0.0,
            };

            // 有历史数据时与近10次均值按 70/30 混合
            if let Some(historical) = history.get(algorithm.as_str()).and_then(|v| trailing_mean(v, 10)) {
                score = score * 0.7 + historical * 0.3;
            }

            debug!("Algorithm {} scored {:.2}", algorithm, score);

            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((algorithm, score));
            }
        }

        let (algorithm, score) = best.ok_or(OptimizerError::NoAlgorithmsAvailable)?;
        info!("Selected algorithm {} (score {:.2})", algorithm, score);
        Ok(algorithm.to_string())
    }

    /// 根据费率、延迟与历史表现选择最优矿池
    pub async fn select_pool(&self) -> Result<PoolCandidate, OptimizerError> {
        if self.pools.is_empty() {
            return Err(OptimizerError::NoPoolsAvailable);
        }

        let history = self.pool_performance.lock().await;
        let mut best: Option<(&PoolCandidate, f64)> = None;

        for pool in &self.pools {
            let latency_score = (100.0 - pool.latency_ms as f64).max(0.0);
            let fee_score = (1.0 - pool.fee) * 100.0;
            let historical = history
                .get(pool.name.as_str())
                .and_then(|v| trailing_mean(v, 5))
                .unwrap_or(50.0);

            let score = latency_score * 0.3 + fee_score * 0.4 + historical * 0.3;
            debug!("Pool {} scored {:.2}", pool.name, score);

            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((pool, score));
            }
        }

        let (pool, score) = best.ok_or(OptimizerError::NoPoolsAvailable)?;
        info!("Selected pool {} (score {:.2})", pool.name, score);
        Ok(pool.clone())
    }

    /// 基于硬件与算法的线程/强度配置
    pub fn worker_configuration(profile: &HardwareProfile, algorithm: &str) -> WorkerConfig {
        let mut config = WorkerConfig {
            cpu_threads: profile.cpu.cores.saturating_sub(1).max(1),
            gpu_intensity: 80,
        };

        match algorithm {
            "RandomX" => {
                // RandomX 每线程约需2GB内存
                let max_threads_by_memory = (profile.memory.available_gb() / 2.0) as u32;
                config.cpu_threads = config.cpu_threads.min(max_threads_by_memory);
                config.gpu_intensity = 0;
            }
            "Ethash" => {
                config.cpu_threads = 1;
                config.gpu_intensity = 100;
            }
            "SHA256" => {
                if !profile.gpus.is_empty() {
                    config.gpu_intensity = 90;
                    config.cpu_threads = (profile.cpu.cores / 2).max(1);
                }
            }
            _ => {}
        }

        config
    }

    /// 完整的初始配置决策：算法 + 矿池 + 工作者配置
    pub async fn optimize_setup(&self, profile: &HardwareProfile) -> Result<MinerSetup, OptimizerError> {
        let algorithm = self.select_algorithm(profile).await?;
        let pool = self.select_pool().await?;
        let worker = Self::worker_configuration(profile, &algorithm);

        let setup = MinerSetup {
            algorithm,
            pool_name: pool.name,
            pool_url: pool.url,
            cpu_threads: worker.cpu_threads,
            gpu_intensity: worker.gpu_intensity,
        };

        info!(
            "Optimized setup: {} on {} ({} threads, intensity {})",
            setup.algorithm, setup.pool_name, setup.cpu_threads, setup.gpu_intensity
        );
        Ok(setup)
    }

    /// 将一个工作单元按工作者效率切分为连续不重叠的段
    ///
    /// 段长 = 基础段长 × clamp(目标/难度1目标, 0.1, 2.0) × 工作者效率；
    /// 输出段的并集恰好还原输入区间。
    pub async fn segment_work(
        &self,
        work: &WorkUnit,
        worker_id: &str,
    ) -> Result<Vec<WorkSegment>, OptimizerError> {
        if work.nonce_start >= work.nonce_end {
            return Err(OptimizerError::InvalidNonceRange {
                start: work.nonce_start,
                end: work.nonce_end,
            });
        }

        let efficiency = self.worker_efficiency(worker_id).await;

        // target / diff1 == 1 / difficulty
        let difficulty_factor = if work.difficulty > 0.0 {
            (1.0 / work.difficulty).clamp(0.1, 2.0)
        } else {
            2.0
        };

        let base_size = base_segment_size(&work.algorithm);
        let adjusted_size = ((base_size as f64 * difficulty_factor * efficiency) as u64).max(1);

        let mut segments = Vec::new();
        let mut current = work.nonce_start;

        while current < work.nonce_end {
            let segment_end = (current + adjusted_size).min(work.nonce_end);

            segments.push(WorkSegment {
                segment_id: Uuid::new_v4().simple().to_string(),
                job_id: work.job_id.clone(),
                nonce_start: current,
                nonce_end: segment_end,
                assigned_worker: worker_id.to_string(),
                created_at: SystemTime::now(),
                completed_at: None,
                result: None,
            });

            current = segment_end;
        }

        let mut active = self.active_segments.lock().await;
        for segment in &segments {
            active.insert(segment.segment_id.clone(), segment.clone());
        }

        debug!("Created {} work segments for worker {}", segments.len(), worker_id);
        Ok(segments)
    }

    /// 记录份额拒绝，相应工作者效率 ×0.98（下限0.1）
    pub async fn record_rejection(&self, worker_id: &str, algorithm: &str, reason: &str) {
        {
            let mut history = self.rejection_history.lock().await;
            history.push_back(RejectionRecord {
                timestamp: SystemTime::now(),
                worker_id: worker_id.to_string(),
                algorithm: algorithm.to_string(),
                reason: reason.to_string(),
            });
            while history.len() > self.config.rejection_history_size {
                history.pop_front();
            }
        }

        let mut efficiency = self.worker_efficiency.lock().await;
        let current = efficiency.entry(worker_id.to_string()).or_insert(1.0);
        *current = (*current * 0.98).max(0.1);

        debug!("Recorded rejection from worker {}, new efficiency: {:.3}", worker_id, current);
    }

    /// 记录性能采样，低拒绝率时工作者效率 ×1.01（上限2.0）
    pub async fn record_performance(&self, sample: PerformanceSample) {
        {
            let mut history = self.performance_history.lock().await;
            history.push_back(sample.clone());
            while history.len() > self.config.performance_history_size {
                history.pop_front();
            }
        }

        if !sample.algorithm.is_empty() {
            let mut algorithms = self.algorithm_performance.lock().await;
            algorithms.entry(sample.algorithm.clone()).or_default().push(sample.hashrate);
        }

        if !sample.pool.is_empty() {
            let pool_score = sample.hashrate * (1.0 - sample.rejection_rate);
            let mut pools = self.pool_performance.lock().await;
            pools.entry(sample.pool.clone()).or_default().push(pool_score);
        }

        if !sample.worker_id.is_empty() && sample.rejection_rate < 0.02 {
            let mut efficiency = self.worker_efficiency.lock().await;
            let current = efficiency.entry(sample.worker_id.clone()).or_insert(1.0);
            *current = (*current * 1.01).min(2.0);
        }
    }

    /// 滚动分析并产出纠偏建议，样本不足10个时不产出
    pub async fn get_recommendations(
        &self,
        current: &PerformanceSample,
    ) -> Option<OptimizerRecommendations> {
        let recent: Vec<PerformanceSample> = {
            let history = self.performance_history.lock().await;
            if history.len() < 10 {
                return None;
            }
            history.iter().rev().take(10).cloned().collect()
        };

        let recent_hashrates: Vec<f64> = recent.iter().map(|m| m.hashrate).collect();
        let recent_avg = mean(&recent_hashrates);

        let mut recommendations = OptimizerRecommendations::default();

        if current.hashrate < recent_avg * 0.9 {
            recommendations.performance_declining = true;

            if current.rejection_rate > 0.05 {
                recommendations.switch_pool = self.recommend_pool_switch(&current.pool).await;
            }

            let low_samples = recent
                .iter()
                .filter(|m| m.hashrate < recent_avg * 0.8)
                .count();
            if low_samples > 5 {
                recommendations.switch_algorithm =
                    self.recommend_algorithm_switch(&current.algorithm).await;
            }
        }

        recommendations.redistribute_workers = self.recommend_redistribution().await;

        let max_temp = current.max_temperature();
        if max_temp > 85.0 {
            recommendations.reduce_intensity = true;
            recommendations.temperature_warning = Some(max_temp);
        }

        if recommendations.is_empty() {
            None
        } else {
            Some(recommendations)
        }
    }

    async fn recommend_pool_switch(&self, current_pool: &str) -> Option<String> {
        let history = self.pool_performance.lock().await;
        let mut best: Option<(String, f64)> = None;

        for (name, scores) in history.iter() {
            if name == current_pool {
                continue;
            }
            if let Some(avg) = trailing_mean(scores, 5) {
                if best.as_ref().map(|(_, s)| avg > *s).unwrap_or(avg > 0.0) {
                    best = Some((name.clone(), avg));
                }
            }
        }

        best.map(|(name, _)| name)
    }

    async fn recommend_algorithm_switch(&self, current_algorithm: &str) -> Option<String> {
        let history = self.algorithm_performance.lock().await;
        let mut best: Option<(String, f64)> = None;

        for (name, performances) in history.iter() {
            if name == current_algorithm {
                continue;
            }
            if let Some(avg) = trailing_mean(performances, 5) {
                if best.as_ref().map(|(_, s)| avg > *s).unwrap_or(avg > 0.0) {
                    best = Some((name.clone(), avg));
                }
            }
        }

        best.map(|(name, _)| name)
    }

    async fn recommend_redistribution(&self) -> Option<RedistributionPlan> {
        let efficiency = self.worker_efficiency.lock().await;
        if efficiency.is_empty() {
            return None;
        }

        let values: Vec<f64> = efficiency.values().cloned().collect();
        let avg = mean(&values);
        let threshold = avg * 0.8;

        let underperforming: Vec<String> = efficiency
            .iter()
            .filter(|(_, e)| **e < threshold)
            .map(|(id, _)| id.clone())
            .collect();

        if underperforming.is_empty() {
            None
        } else {
            Some(RedistributionPlan {
                underperforming_workers: underperforming,
                efficiency_threshold: threshold,
            })
        }
    }

    /// 查询工作者效率，未知工作者为1.0
    pub async fn worker_efficiency(&self, worker_id: &str) -> f64 {
        self.worker_efficiency
            .lock()
            .await
            .get(worker_id)
            .cloned()
            .unwrap_or(1.0)
    }

    /// 上报段完成，段从进行中转入已完成历史
    pub async fn complete_segment(&self, segment_id: &str, result: Option<serde_json::Value>) -> bool {
        let segment = {
            let mut active = self.active_segments.lock().await;
            active.remove(segment_id)
        };

        match segment {
            Some(mut segment) => {
                segment.completed_at = Some(SystemTime::now());
                segment.result = result;

                let mut completed = self.completed_segments.lock().await;
                completed.push_back(segment);
                while completed.len() > 100 {
                    completed.pop_front();
                }
                true
            }
            None => {
                debug!("Completion reported for unknown segment {}", segment_id);
                false
            }
        }
    }

    /// 回收被驱逐工作者的未完成段，供重新分配
    pub async fn abandon_worker_segments(&self, worker_id: &str) -> Vec<WorkSegment> {
        let mut active = self.active_segments.lock().await;
        let ids: Vec<String> = active
            .iter()
            .filter(|(_, s)| s.assigned_worker == worker_id)
            .map(|(id, _)| id.clone())
            .collect();

        ids.iter().filter_map(|id| active.remove(id)).collect()
    }

    /// 优化器状态快照
    pub async fn optimization_stats(&self) -> OptimizationStats {
        let algorithm_performance = self
            .algorithm_performance
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), trailing_mean(v, 10).unwrap_or(0.0)))
            .collect();

        let pool_performance = self
            .pool_performance
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), trailing_mean(v, 10).unwrap_or(0.0)))
            .collect();

        OptimizationStats {
            total_performance_points: self.performance_history.lock().await.len(),
            total_rejections: self.rejection_history.lock().await.len(),
            active_segments: self.active_segments.lock().await.len(),
            completed_segments: self.completed_segments.lock().await.len(),
            worker_efficiency: self.worker_efficiency.lock().await.clone(),
            algorithm_performance,
            pool_performance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    fn optimizer_with_pools(pools: Vec<PoolCandidate>) -> WorkOptimizer {
        let mut config = Config::default().optimizer;
        config.algorithms = vec![
            "SHA256".to_string(),
            "RandomX".to_string(),
            "Ethash".to_string(),
            "Scrypt".to_string(),
        ];
        WorkOptimizer::new(config, pools)
    }

    fn sample(hashrate: f64, rejection_rate: f64) -> PerformanceSample {
        PerformanceSample {
            timestamp: SystemTime::now(),
            hashrate,
            rejection_rate,
            temperature: HashMap::new(),
            power_usage: 100.0,
            algorithm: "SHA256".to_string(),
            pool: "example".to_string(),
            worker_id: "worker-1".to_string(),
        }
    }

    fn gpu_profile() -> HardwareProfile {
        HardwareProfile {
            cpu: CpuSpec { cores: 4, threads: 8, max_frequency_mhz: 2400, features: Vec::new() },
            gpus: vec![GpuSpec {
                name: "NVIDIA H100".to_string(),
                memory_total: 80 * 1024 * 1024 * 1024,
            }],
            memory: MemorySpec { total: 64 * 1024 * 1024 * 1024, used_percent: 20.0 },
        }
    }

    fn cpu_profile() -> HardwareProfile {
        HardwareProfile {
            cpu: CpuSpec {
                cores: 32,
                threads: 64,
                max_frequency_mhz: 3600,
                features: vec!["AES".to_string(), "AVX2".to_string()],
            },
            gpus: Vec::new(),
            memory: MemorySpec { total: 128 * 1024 * 1024 * 1024, used_percent: 10.0 },
        }
    }

    #[test]
    fn test_cpu_score_feature_bonus() {
        let mut cpu = CpuSpec { cores: 4, threads: 8, max_frequency_mhz: 3000, features: Vec::new() };
        let plain = WorkOptimizer::cpu_score(&cpu);

        cpu.features.push("AES".to_string());
        let with_aes = WorkOptimizer::cpu_score(&cpu);

        assert!(with_aes > plain);
        assert!(with_aes <= 100.0);
    }

    #[test]
    fn test_gpu_score_model_multiplier() {
        let h100 = vec![GpuSpec { name: "H100".to_string(), memory_total: 2 * 1024 * 1024 * 1024 }];
        let generic = vec![GpuSpec { name: "Unknown".to_string(), memory_total: 2 * 1024 * 1024 * 1024 }];

        assert!(WorkOptimizer::gpu_score(&h100) > WorkOptimizer::gpu_score(&generic));
        assert!((WorkOptimizer::gpu_score(&generic) - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_algorithm_selection_matches_hardware() {
        let optimizer = optimizer_with_pools(Vec::new());

        let gpu_choice = optimizer.select_algorithm(&gpu_profile()).await.unwrap();
        assert_eq!(gpu_choice, "Ethash");

        let cpu_choice = optimizer.select_algorithm(&cpu_profile()).await.unwrap();
        assert_eq!(cpu_choice, "RandomX");
    }

    #[tokio::test]
    async fn test_pool_selection_prefers_low_fee_low_latency() {
        let optimizer = optimizer_with_pools(vec![
            PoolCandidate {
                name: "pool-a".to_string(),
                url: "stratum+tcp://a.example.com:4444".to_string(),
                fee: 0.01,
                latency_ms: 40,
            },
            PoolCandidate {
                name: "pool-b".to_string(),
                url: "stratum+tcp://b.example.com:4444".to_string(),
                fee: 0.02,
                latency_ms: 80,
            },
        ]);

        let selected = optimizer.select_pool().await.unwrap();
        assert_eq!(selected.name, "pool-a");
    }

    #[test]
    fn test_worker_configuration_per_algorithm() {
        let profile = cpu_profile();

        let randomx = WorkOptimizer::worker_configuration(&profile, "RandomX");
        assert_eq!(randomx.gpu_intensity, 0);
        assert!(randomx.cpu_threads <= 31);

        let ethash = WorkOptimizer::worker_configuration(&gpu_profile(), "Ethash");
        assert_eq!(ethash.cpu_threads, 1);
        assert_eq!(ethash.gpu_intensity, 100);

        let sha = WorkOptimizer::worker_configuration(&gpu_profile(), "SHA256");
        assert_eq!(sha.gpu_intensity, 90);
        assert_eq!(sha.cpu_threads, 2);
    }

    #[tokio::test]
    async fn test_segmentation_tiles_range_exactly() {
        let optimizer = optimizer_with_pools(Vec::new());
        let work = WorkUnit::test_unit("job-1", "SHA256", 1.0, 0, 3_456_789);

        let segments = optimizer.segment_work(&work, "worker-1").await.unwrap();
        assert!(!segments.is_empty());

        assert_eq!(segments.first().unwrap().nonce_start, 0);
        assert_eq!(segments.last().unwrap().nonce_end, 3_456_789);

        for window in segments.windows(2) {
            assert_eq!(window[0].nonce_end, window[1].nonce_start);
        }

        let total: u64 = segments.iter().map(|s| s.nonce_count()).sum();
        assert_eq!(total, 3_456_789);
    }

    #[tokio::test]
    async fn test_segmentation_rejects_empty_range() {
        let optimizer = optimizer_with_pools(Vec::new());
        let work = WorkUnit::test_unit("job-1", "SHA256", 1.0, 100, 100);

        assert!(optimizer.segment_work(&work, "worker-1").await.is_err());
    }

    #[tokio::test]
    async fn test_efficiency_bounds_and_monotonicity() {
        let optimizer = optimizer_with_pools(Vec::new());

        let mut previous = optimizer.worker_efficiency("worker-1").await;
        assert!((previous - 1.0).abs() < f64::EPSILON);

        for _ in 0..200 {
            optimizer.record_rejection("worker-1", "SHA256", "low difficulty").await;
            let current = optimizer.worker_efficiency("worker-1").await;
            assert!(current <= previous);
            assert!(current >= 0.1);
            previous = current;
        }
        assert!((previous - 0.1).abs() < 1e-9);

        for _ in 0..2000 {
            optimizer.record_performance(sample(1000.0, 0.0)).await;
            let current = optimizer.worker_efficiency("worker-1").await;
            assert!(current >= previous);
            assert!(current <= 2.0);
            previous = current;
        }
        assert!((previous - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_recommendations_with_few_samples() {
        let optimizer = optimizer_with_pools(Vec::new());
        for _ in 0..5 {
            optimizer.record_performance(sample(1000.0, 0.0)).await;
        }

        let current = sample(100.0, 0.2);
        assert!(optimizer.get_recommendations(&current).await.is_none());
    }

    #[tokio::test]
    async fn test_declining_performance_detected() {
        let optimizer = optimizer_with_pools(Vec::new());
        for _ in 0..10 {
            optimizer.record_performance(sample(1000.0, 0.0)).await;
        }

        let current = sample(500.0, 0.0);
        let recommendations = optimizer.get_recommendations(&current).await.unwrap();
        assert!(recommendations.performance_declining);
        assert!(!recommendations.reduce_intensity);
    }

    #[tokio::test]
    async fn test_overheating_triggers_reduce_intensity() {
        let optimizer = optimizer_with_pools(Vec::new());
        for _ in 0..10 {
            optimizer.record_performance(sample(1000.0, 0.0)).await;
        }

        let mut current = sample(1000.0, 0.0);
        current.temperature.insert("gpu0".to_string(), 92.0);

        let recommendations = optimizer.get_recommendations(&current).await.unwrap();
        assert!(recommendations.reduce_intensity);
        assert_eq!(recommendations.temperature_warning, Some(92.0));
    }

    #[tokio::test]
    async fn test_switch_pool_recommended_on_high_rejection() {
        let optimizer = optimizer_with_pools(Vec::new());

        for _ in 0..10 {
            optimizer.record_performance(sample(1000.0, 0.0)).await;
        }
        // 另一矿池积累更好的历史评分
        for _ in 0..5 {
            let mut other = sample(2000.0, 0.0);
            other.pool = "backup".to_string();
            optimizer.record_performance(other).await;
        }

        let current = sample(100.0, 0.1);
        let recommendations = optimizer.get_recommendations(&current).await.unwrap();
        assert!(recommendations.performance_declining);
        assert_eq!(recommendations.switch_pool.as_deref(), Some("backup"));
    }

    #[tokio::test]
    async fn test_segment_completion_lifecycle() {
        let optimizer = optimizer_with_pools(Vec::new());
        let work = WorkUnit::test_unit("job-1", "RandomX", 1.0, 0, 250_000);

        let segments = optimizer.segment_work(&work, "worker-1").await.unwrap();
        let stats = optimizer.optimization_stats().await;
        assert_eq!(stats.active_segments, segments.len());

        assert!(optimizer.complete_segment(&segments[0].segment_id, None).await);
        assert!(!optimizer.complete_segment(&segments[0].segment_id, None).await);

        let abandoned = optimizer.abandon_worker_segments("worker-1").await;
        assert_eq!(abandoned.len(), segments.len() - 1);

        let stats = optimizer.optimization_stats().await;
        assert_eq!(stats.active_segments, 0);
        assert_eq!(stats.completed_segments, 1);
    }
}
