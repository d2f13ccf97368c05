use crate::config::{PoolConfig, PoolInfo};
use crate::error::PoolError;
use crate::optimizer::PoolCandidate;
use crate::pool::{PoolDetail, PoolManagerStats, PoolState, ShareResult, StratumClient, WorkUnit};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 多矿池管理器
///
/// 每个命名矿池持有一个 Stratum 客户端；单个矿池的故障不影响其它矿池。
pub struct PoolManager {
    /// 矿池客户端
    clients: Arc<RwLock<HashMap<String, Arc<StratumClient>>>>,
    /// 矿池配置，保持加入顺序供评分使用
    infos: Arc<RwLock<Vec<PoolInfo>>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            infos: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 从配置创建，仅加入启用的矿池
    pub async fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        let manager = Self::new();

        for info in config.pools.iter().filter(|p| p.enabled) {
            manager.add_pool(info).await?;
        }

        Ok(manager)
    }

    /// 添加矿池配置，重名时替换旧配置
    pub async fn add_pool(&self, info: &PoolInfo) -> Result<(), PoolError> {
        let client = Arc::new(StratumClient::new(info)?);

        let mut clients = self.clients.write().await;
        if clients.contains_key(&info.name) {
            warn!("Pool {} already configured, replacing", info.name);
        }
        clients.insert(info.name.clone(), client);

        let mut infos = self.infos.write().await;
        infos.retain(|existing| existing.name != info.name);
        infos.push(info.clone());

        info!("Added pool: {} ({})", info.name, info.url);
        Ok(())
    }

    /// 连接指定矿池
    pub async fn connect_pool(&self, name: &str) -> Result<(), PoolError> {
        let client = self.client(name).await?;
        client.connect().await
    }

    /// 连接所有矿池，单池失败记录后继续，返回成功数
    pub async fn connect_all(&self) -> usize {
        let clients: Vec<Arc<StratumClient>> =
            self.clients.read().await.values().cloned().collect();

        let mut connected = 0;
        for client in clients {
            match client.connect().await {
                Ok(()) => connected += 1,
                Err(e) => warn!("Failed to connect to pool {}: {}", client.name(), e),
            }
        }

        connected
    }

    /// 获取指定矿池的最新工作；未连接或尚无工作时为 None
    pub async fn get_work(&self, name: &str) -> Result<Option<WorkUnit>, PoolError> {
        let client = self.client(name).await?;
        Ok(client.get_work().await)
    }

    /// 向指定矿池提交份额，true 表示消息已发出
    pub async fn submit_share(&self, name: &str, result: &ShareResult) -> Result<bool, PoolError> {
        let client = self.client(name).await?;

        match client.submit_share(result).await {
            Ok(sent) => Ok(sent),
            Err(e) => {
                warn!("Share submission to pool {} failed: {}", name, e);
                Ok(false)
            }
        }
    }

    pub async fn pool_state(&self, name: &str) -> Result<PoolState, PoolError> {
        let client = self.client(name).await?;
        Ok(client.state().await)
    }

    /// 连接中的矿池数
    pub async fn connected_count(&self) -> usize {
        let clients: Vec<Arc<StratumClient>> =
            self.clients.read().await.values().cloned().collect();

        let mut count = 0;
        for client in clients {
            if client.is_connected().await {
                count += 1;
            }
        }
        count
    }

    /// 聚合统计
    pub async fn statistics(&self) -> PoolManagerStats {
        let clients: Vec<(String, Arc<StratumClient>)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(name, client)| (name.clone(), client.clone()))
            .collect();

        let mut stats = PoolManagerStats {
            total_pools: clients.len(),
            ..Default::default()
        };

        for (name, client) in clients {
            let counters = client.counters().await;
            let state = client.state().await;
            let connected = state != PoolState::Disconnected;

            if connected {
                stats.pools_connected += 1;
            }
            stats.shares_submitted += counters.shares_submitted;
            stats.shares_accepted += counters.shares_accepted;
            stats.shares_rejected += counters.shares_rejected;

            stats.pool_details.insert(
                name,
                PoolDetail {
                    connected,
                    state,
                    difficulty: client.current_difficulty().await,
                    shares: counters.shares_submitted,
                    url: client.url(),
                },
            );
        }

        stats.acceptance_rate =
            stats.shares_accepted as f64 / (stats.shares_submitted.max(1)) as f64;

        stats
    }

    /// 导出矿池候选属性供优化器评分
    pub async fn candidates(&self) -> Vec<PoolCandidate> {
        self.infos
            .read()
            .await
            .iter()
            .map(|info| PoolCandidate {
                name: info.name.clone(),
                url: info.url.clone(),
                fee: info.fee.unwrap_or(0.02),
                latency_ms: info.latency_ms.unwrap_or(50),
            })
            .collect()
    }

    /// 断开所有矿池；关闭套接字是接收循环的正常终止
    pub async fn disconnect_all(&self) {
        let clients: Vec<Arc<StratumClient>> =
            self.clients.read().await.values().cloned().collect();

        for client in clients {
            client.disconnect().await;
        }

        info!("All pools disconnected");
    }

    async fn client(&self, name: &str) -> Result<Arc<StratumClient>, PoolError> {
        self.clients
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::NotFound { name: name.to_string() })
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_info(name: &str, url: &str) -> PoolInfo {
        PoolInfo {
            name: name.to_string(),
            url: url.to_string(),
            username: "worker".to_string(),
            password: "x".to_string(),
            fee: Some(0.01),
            latency_ms: Some(40),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_add_pool_and_statistics() {
        let manager = PoolManager::new();
        manager.add_pool(&pool_info("a", "a.example.com:3333")).await.unwrap();
        manager.add_pool(&pool_info("b", "stratum+tcp://b.example.com")).await.unwrap();

        let stats = manager.statistics().await;
        assert_eq!(stats.total_pools, 2);
        assert_eq!(stats.pools_connected, 0);
        assert_eq!(stats.pool_details["a"].url, "a.example.com:3333");
        assert_eq!(stats.pool_details["b"].url, "b.example.com:4444");
    }

    #[tokio::test]
    async fn test_add_pool_rejects_bad_url() {
        let manager = PoolManager::new();
        let result = manager.add_pool(&pool_info("bad", "host:nope")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_pool_is_an_error() {
        let manager = PoolManager::new();
        assert!(manager.get_work("ghost").await.is_err());
        assert!(manager.connect_pool("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_get_work_none_when_disconnected() {
        let manager = PoolManager::new();
        manager.add_pool(&pool_info("a", "a.example.com:3333")).await.unwrap();

        let work = manager.get_work("a").await.unwrap();
        assert!(work.is_none());
    }

    #[tokio::test]
    async fn test_candidates_reflect_config() {
        let manager = PoolManager::new();
        manager.add_pool(&pool_info("a", "a.example.com:3333")).await.unwrap();

        let mut no_hints = pool_info("b", "b.example.com:3333");
        no_hints.fee = None;
        no_hints.latency_ms = None;
        manager.add_pool(&no_hints).await.unwrap();

        let candidates = manager.candidates().await;
        assert_eq!(candidates.len(), 2);
        assert!((candidates[0].fee - 0.01).abs() < 1e-9);
        assert!((candidates[1].fee - 0.02).abs() < 1e-9);
        assert_eq!(candidates[1].latency_ms, 50);
    }

    #[tokio::test]
    async fn test_replacing_pool_keeps_single_entry() {
        let manager = PoolManager::new();
        manager.add_pool(&pool_info("a", "a.example.com:3333")).await.unwrap();
        manager.add_pool(&pool_info("a", "a2.example.com:3333")).await.unwrap();

        let stats = manager.statistics().await;
        assert_eq!(stats.total_pools, 1);
        assert_eq!(manager.candidates().await.len(), 1);
        assert_eq!(stats.pool_details["a"].url, "a2.example.com:3333");
    }
}
