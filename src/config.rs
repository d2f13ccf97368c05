use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "hpcminer.toml")]
    pub config: String,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub cluster: ClusterConfig,
    pub pools: PoolConfig,
    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// 集群ID，缺省时随机生成
    pub cluster_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// 节点失联超时（秒）
    pub node_timeout: u64,
    /// 健康检查周期（秒）
    pub health_check_interval: u64,
    /// 负载再平衡周期（秒）
    pub rebalance_interval: u64,
    /// 节点命令超时（秒）
    pub command_timeout: u64,
    /// 节点心跳探测超时（秒）
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pools: Vec<PoolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
    /// 矿池手续费（0.0 - 1.0），用于矿池评分
    pub fee: Option<f64>,
    /// 估计延迟（毫秒），用于矿池评分
    pub latency_ms: Option<u64>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// 候选算法列表
    pub algorithms: Vec<String>,
    /// 性能历史容量
    pub performance_history_size: usize,
    /// 拒绝历史容量
    pub rejection_history_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                log_level: "info".to_string(),
                log_file: None,
                cluster_id: None,
            },
            cluster: ClusterConfig {
                node_timeout: 300,
                health_check_interval: 30,
                rebalance_interval: 600,
                command_timeout: 10,
                ping_timeout: 5,
            },
            pools: PoolConfig {
                pools: vec![PoolInfo {
                    name: "example".to_string(),
                    url: "stratum+tcp://pool.example.com:4444".to_string(),
                    username: "worker".to_string(),
                    password: "x".to_string(),
                    fee: Some(0.01),
                    latency_ms: Some(50),
                    enabled: true,
                }],
            },
            optimizer: OptimizerConfig {
                algorithms: vec![
                    "SHA256".to_string(),
                    "RandomX".to_string(),
                    "Ethash".to_string(),
                    "Scrypt".to_string(),
                ],
                performance_history_size: 1000,
                rejection_history_size: 500,
            },
        }
    }
}

impl Config {
    /// 从TOML文件加载配置
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// 保存配置到TOML文件
    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        match self.general.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            level => anyhow::bail!("Invalid log level: {}", level),
        }

        if self.cluster.node_timeout == 0 {
            anyhow::bail!("cluster.node_timeout must be greater than zero");
        }
        if self.cluster.health_check_interval == 0 {
            anyhow::bail!("cluster.health_check_interval must be greater than zero");
        }
        if self.cluster.rebalance_interval == 0 {
            anyhow::bail!("cluster.rebalance_interval must be greater than zero");
        }

        if self.pools.pools.is_empty() {
            anyhow::bail!("At least one pool must be configured");
        }

        for pool in &self.pools.pools {
            if pool.name.is_empty() {
                anyhow::bail!("Pool name cannot be empty");
            }
            if pool.url.is_empty() {
                anyhow::bail!("Pool URL cannot be empty: {}", pool.name);
            }
            if pool.username.is_empty() {
                anyhow::bail!("Pool username cannot be empty: {}", pool.name);
            }
            if let Some(fee) = pool.fee {
                if !(0.0..=1.0).contains(&fee) {
                    anyhow::bail!("Pool fee out of range for {}: {}", pool.name, fee);
                }
            }
        }

        if self.optimizer.algorithms.is_empty() {
            anyhow::bail!("At least one candidate algorithm must be configured");
        }
        if self.optimizer.performance_history_size == 0 {
            anyhow::bail!("optimizer.performance_history_size must be greater than zero");
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.is_valid());
    }

    #[test]
    fn test_validate_rejects_empty_pools() {
        let mut config = Config::default();
        config.pools.pools.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fee() {
        let mut config = Config::default();
        config.pools.pools[0].fee = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let temp_file = std::env::temp_dir().join("hpcminer_test_config.toml");
        config.save(temp_file.to_str().unwrap()).expect("Failed to save config");

        let loaded = Config::load(temp_file.to_str().unwrap()).expect("Failed to load config");
        assert_eq!(loaded.cluster.node_timeout, config.cluster.node_timeout);
        assert_eq!(loaded.pools.pools.len(), config.pools.pools.len());
        assert_eq!(loaded.optimizer.algorithms, config.optimizer.algorithms);

        let _ = std::fs::remove_file(temp_file);
    }
}
