//! HPCMiner-RS - 分布式挖矿集群编排器
//!
//! HPCMiner-RS 用Rust编写，负责把外部矿池下发的工作切分并调度到
//! 一组异构挖矿节点上：
//! - 集群管理器（节点注册、健康检查、故障驱逐、负载再平衡）
//! - 矿池协议客户端（行分隔JSON-RPC的Stratum方言）
//! - 工作/策略优化器（算法与矿池选择、nonce区间分段、滚动建议）
//!
//! ## 架构特点
//!
//! ### 集群编排
//! - 节点按硬件评分与算法系数估算期望算力
//! - 失联节点驱逐后其工作段被重新分配，不会丢失
//! - 再平衡互斥执行，触发与周期共用同一把锁
//!
//! ### 明确边界
//! - 真实哈希计算、硬件探测与HTTP展示层均为外部协作者
//! - 节点命令通道是注入的trait实现，便于替换传输层

pub mod cluster;
pub mod config;
pub mod error;
pub mod optimizer;
pub mod pool;
pub mod utils;

pub use cluster::ClusterManager;
pub use config::Config;
pub use error::MinerError;
pub use optimizer::WorkOptimizer;
pub use pool::PoolManager;

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "hpcminer-rs";

/// 初始化HPCMiner-RS
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志系统
    tracing_subscriber::fmt::init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "hpcminer-rs");
    }

    #[test]
    fn test_init() {
        // This test might fail if logger is already initialized
        // but that's okay for testing purposes
        let _ = init();
    }
}
