pub mod manager;
pub mod stratum;

use crate::error::PoolError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

pub use manager::PoolManager;
pub use stratum::{difficulty_to_target, StratumClient};

/// 矿池连接状态机
///
/// Disconnected → Connecting → Subscribed → Authorized → Active，
/// 任意套接字错误回到 Disconnected。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    Disconnected,
    Connecting,
    Subscribed,
    Authorized,
    Active,
}

/// 来自矿池的一个可分配工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub job_id: String,
    pub algorithm: String,
    /// 拼接后的区块头字段，对本系统不透明
    pub data: String,
    /// 64位十六进制目标值
    pub target: String,
    pub difficulty: f64,
    pub pool_name: String,
    pub timestamp: SystemTime,
    /// false 时允许在途段继续完成
    pub clean_jobs: bool,
    pub nonce_start: u64,
    pub nonce_end: u64,
    /// 本地生成，提交份额时回传
    pub extranonce2: String,
}

impl WorkUnit {
    #[cfg(test)]
    pub fn test_unit(job_id: &str, algorithm: &str, difficulty: f64, nonce_start: u64, nonce_end: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            algorithm: algorithm.to_string(),
            data: String::new(),
            target: stratum::difficulty_to_target(difficulty),
            difficulty,
            pool_name: "test".to_string(),
            timestamp: SystemTime::now(),
            clean_jobs: true,
            nonce_start,
            nonce_end,
            extranonce2: String::new(),
        }
    }
}

/// 待提交的挖矿结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareResult {
    pub job_id: String,
    /// 十六进制
    pub extranonce2: String,
    /// 十六进制
    pub ntime: String,
    /// 十六进制
    pub nonce: String,
}

/// 单个矿池的份额计数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolCounters {
    pub shares_submitted: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
}

impl PoolCounters {
    pub fn accept_rate(&self) -> f64 {
        let total = self.shares_accepted + self.shares_rejected;
        if total == 0 {
            0.0
        } else {
            self.shares_accepted as f64 / total as f64 * 100.0
        }
    }
}

/// 矿池管理器聚合统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolManagerStats {
    pub pools_connected: usize,
    pub total_pools: usize,
    pub shares_submitted: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub acceptance_rate: f64,
    pub pool_details: HashMap<String, PoolDetail>,
}

/// 单矿池明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDetail {
    pub connected: bool,
    pub state: PoolState,
    pub difficulty: f64,
    pub shares: u64,
    pub url: String,
}

/// Stratum 消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl StratumMessage {
    pub fn request(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }
}

/// 解析矿池URL，scheme 可省略，端口缺省 4444
pub fn parse_pool_url(url: &str) -> Result<(String, u16), PoolError> {
    let address = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str.parse::<u16>().map_err(|_| PoolError::InvalidUrl {
                url: url.to_string(),
            })?;
            (host, port)
        }
        None => (address, 4444),
    };

    if host.is_empty() {
        return Err(PoolError::InvalidUrl { url: url.to_string() });
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool_url_variants() {
        assert_eq!(
            parse_pool_url("stratum+tcp://pool.example.com:3333").unwrap(),
            ("pool.example.com".to_string(), 3333)
        );
        assert_eq!(
            parse_pool_url("pool.example.com:4445").unwrap(),
            ("pool.example.com".to_string(), 4445)
        );
        assert_eq!(
            parse_pool_url("pool.example.com").unwrap(),
            ("pool.example.com".to_string(), 4444)
        );
        assert!(parse_pool_url("stratum+tcp://pool.example.com:notaport").is_err());
        assert!(parse_pool_url("").is_err());
    }

    #[test]
    fn test_pool_counters_accept_rate() {
        let mut counters = PoolCounters::default();
        assert_eq!(counters.accept_rate(), 0.0);

        counters.shares_accepted = 9;
        counters.shares_rejected = 1;
        assert!((counters.accept_rate() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_stratum_message_skips_empty_fields() {
        let message = StratumMessage::request(1, "mining.subscribe", serde_json::json!(["agent"]));
        let encoded = serde_json::to_string(&message).unwrap();

        assert!(encoded.contains("mining.subscribe"));
        assert!(!encoded.contains("result"));
        assert!(!encoded.contains("error"));
    }
}
