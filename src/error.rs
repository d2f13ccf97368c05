use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("System error: {0}")]
    System(String),
}

#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Node command failed: {node_id}, error: {error}")]
    CommandFailed { node_id: String, error: String },

    #[error("Node command timeout: {node_id}")]
    CommandTimeout { node_id: String },

    #[error("Node command rejected: {node_id}, message: {message}")]
    CommandRejected { node_id: String, message: String },

    #[error("Invalid node registration: {reason}")]
    InvalidRegistration { reason: String },

    #[error("Cluster manager not running")]
    NotRunning,
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Connection failed: {url}, error: {error}")]
    ConnectionFailed { url: String, error: String },

    #[error("Authentication failed: {url}")]
    AuthenticationFailed { url: String },

    #[error("Protocol error: {url}, error: {error}")]
    Protocol { url: String, error: String },

    #[error("Pool not found: {name}")]
    NotFound { name: String },

    #[error("Pool not connected: {name}")]
    NotConnected { name: String },

    #[error("Pool timeout: {url}")]
    Timeout { url: String },

    #[error("Invalid pool URL: {url}")]
    InvalidUrl { url: String },
}

#[derive(Error, Debug, Clone)]
pub enum OptimizerError {
    #[error("No candidate algorithms available")]
    NoAlgorithmsAvailable,

    #[error("No candidate pools available")]
    NoPoolsAvailable,

    #[error("Invalid nonce range: start={start}, end={end}")]
    InvalidNonceRange { start: u64, end: u64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Parse error: {error}")]
    ParseError { error: String },

    #[error("Validation error: {field}, reason: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value: {field}, value: {value}, reason: {reason}")]
    InvalidValue { field: String, value: String, reason: String },
}

// 错误恢复策略
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// 重试操作
    Retry { max_attempts: u32, delay_ms: u64 },
    /// 重新连接矿池
    Reconnect,
    /// 驱逐节点
    EvictNode { node_id: String },
    /// 丢弃消息继续运行
    DropMessage,
    /// 优雅关闭
    GracefulShutdown,
    /// 忽略错误
    Ignore,
}

impl ClusterError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            ClusterError::CommandFailed { node_id, .. } => {
                RecoveryStrategy::EvictNode { node_id: node_id.clone() }
            }
            ClusterError::CommandTimeout { node_id } => {
                RecoveryStrategy::EvictNode { node_id: node_id.clone() }
            }
            ClusterError::NodeNotFound { .. } => RecoveryStrategy::Ignore,
            _ => RecoveryStrategy::Ignore,
        }
    }
}

impl PoolError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            PoolError::ConnectionFailed { .. } => {
                RecoveryStrategy::Retry { max_attempts: 3, delay_ms: 5000 }
            }
            PoolError::Timeout { .. } => RecoveryStrategy::Reconnect,
            PoolError::AuthenticationFailed { .. } => RecoveryStrategy::GracefulShutdown,
            PoolError::Protocol { .. } => RecoveryStrategy::DropMessage,
            _ => RecoveryStrategy::Ignore,
        }
    }
}

// 错误统计
#[derive(Debug, Default)]
pub struct ErrorStats {
    pub cluster_errors: u64,
    pub pool_errors: u64,
    pub optimizer_errors: u64,
    pub config_errors: u64,
    pub total_errors: u64,
}

impl ErrorStats {
    pub fn record_error(&mut self, error: &MinerError) {
        self.total_errors += 1;

        match error {
            MinerError::Cluster(_) => self.cluster_errors += 1,
            MinerError::Pool(_) => self.pool_errors += 1,
            MinerError::Optimizer(_) => self.optimizer_errors += 1,
            MinerError::Config(_) => self.config_errors += 1,
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_recovery() {
        let error = PoolError::Protocol {
            url: "stratum.example.com:4444".to_string(),
            error: "bad json".to_string(),
        };
        assert_eq!(error.recovery_strategy(), RecoveryStrategy::DropMessage);

        let error = PoolError::Timeout { url: "stratum.example.com:4444".to_string() };
        assert_eq!(error.recovery_strategy(), RecoveryStrategy::Reconnect);
    }

    #[test]
    fn test_error_stats() {
        let mut stats = ErrorStats::default();
        stats.record_error(&MinerError::Cluster(ClusterError::NotRunning));
        stats.record_error(&MinerError::Pool(PoolError::NotFound { name: "p".into() }));

        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.cluster_errors, 1);
        assert_eq!(stats.pool_errors, 1);

        stats.reset();
        assert_eq!(stats.total_errors, 0);
    }
}
