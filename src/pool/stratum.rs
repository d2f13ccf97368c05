use crate::config::PoolInfo;
use crate::error::PoolError;
use crate::pool::{parse_pool_url, PoolCounters, PoolState, ShareResult, StratumMessage, WorkUnit};

use rand::Rng;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 连接建立超时
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// 接收循环单次读超时，超时路径上检查保活
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// 无流量超过该时长则发送 mining.ping
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// 难度1的基准目标值：0xFFFF × 2^208
///
/// target = diff1 / difficulty，输出64位十六进制零填充字符串。
pub fn difficulty_to_target(difficulty: f64) -> String {
    if difficulty <= 0.0 || !difficulty.is_finite() {
        return "f".repeat(64);
    }

    // 0xFFFF / d 先放大 2^48，再整体左移 160 位（40个十六进制零）
    let scaled = (65535.0 / difficulty) * 281_474_976_710_656.0;
    if !scaled.is_finite() || scaled >= u128::MAX as f64 {
        return "f".repeat(64);
    }

    let scaled = scaled as u128;
    if scaled == 0 {
        return "0".repeat(64);
    }

    let body = format!("{:x}{}", scaled, "0".repeat(40));
    if body.len() > 64 {
        // 难度过小，目标饱和到最大值
        "f".repeat(64)
    } else {
        format!("{:0>64}", body)
    }
}

/// 单矿池的 Stratum 客户端
///
/// 每个连接恰好一个接收循环，所有写操作经由同一把写锁串行化。
/// 任何套接字错误终止接收循环并回到 Disconnected，重连由调用方负责。
pub struct StratumClient {
    /// 矿池名称
    name: String,
    host: String,
    port: u16,
    username: String,
    password: String,
    /// 连接状态
    state: Arc<RwLock<PoolState>>,
    /// TCP写半部
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    /// 当前难度
    difficulty: Arc<RwLock<f64>>,
    /// 最近收到的工作
    current_work: Arc<RwLock<Option<WorkUnit>>>,
    /// 份额计数
    counters: Arc<RwLock<PoolCounters>>,
    /// 在途的提交请求ID
    pending_submits: Arc<RwLock<HashSet<u64>>>,
    /// 消息ID计数器，1/2保留给订阅和认证
    message_id: Arc<RwLock<u64>>,
    /// 最近一次收发时刻
    last_activity: Arc<RwLock<Instant>>,
}

impl StratumClient {
    pub fn new(info: &PoolInfo) -> Result<Self, PoolError> {
        let (host, port) = parse_pool_url(&info.url)?;

        Ok(Self {
            name: info.name.clone(),
            host,
            port,
            username: info.username.clone(),
            password: info.password.clone(),
            state: Arc::new(RwLock::new(PoolState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            difficulty: Arc::new(RwLock::new(1.0)),
            current_work: Arc::new(RwLock::new(None)),
            counters: Arc::new(RwLock::new(PoolCounters::default())),
            pending_submits: Arc::new(RwLock::new(HashSet::new())),
            message_id: Arc::new(RwLock::new(2)),
            last_activity: Arc::new(RwLock::new(Instant::now())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn state(&self) -> PoolState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await != PoolState::Disconnected
    }

    pub async fn current_difficulty(&self) -> f64 {
        *self.difficulty.read().await
    }

    pub async fn counters(&self) -> PoolCounters {
        self.counters.read().await.clone()
    }

    /// 连接矿池并完成订阅与认证握手
    pub async fn connect(&self) -> Result<(), PoolError> {
        if self.is_connected().await {
            warn!("Pool {} is already connected", self.name);
            return Ok(());
        }

        info!("Connecting to pool {} ({})", self.name, self.url());
        *self.state.write().await = PoolState::Connecting;

        let stream = match timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                *self.state.write().await = PoolState::Disconnected;
                warn!("Pool {} connection failed: {}", self.name, e);
                return Err(PoolError::ConnectionFailed {
                    url: self.url(),
                    error: e.to_string(),
                });
            }
            Err(_) => {
                *self.state.write().await = PoolState::Disconnected;
                warn!("Pool {} connection timeout", self.name);
                return Err(PoolError::Timeout { url: self.url() });
            }
        };

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.last_activity.write().await = Instant::now();

        self.spawn_receive_loop(read_half);

        // 订阅（id=1）与认证（id=2）
        self.send_message(StratumMessage::request(
            1,
            "mining.subscribe",
            json!([format!("hpcminer-rs/{}", env!("CARGO_PKG_VERSION"))]),
        ))
        .await?;

        self.send_message(StratumMessage::request(
            2,
            "mining.authorize",
            json!([self.username, self.password]),
        ))
        .await?;

        info!("Pool {} handshake sent", self.name);
        Ok(())
    }

    /// 断开连接，接收循环随之正常退出
    pub async fn disconnect(&self) {
        *self.state.write().await = PoolState::Disconnected;
        self.writer.lock().await.take();
        self.pending_submits.write().await.clear();
        *self.current_work.write().await = None;

        info!("Pool {} disconnected", self.name);
    }

    /// 返回最近的工作单元，附带完整32位nonce区间和新生成的extranonce2
    pub async fn get_work(&self) -> Option<WorkUnit> {
        if !self.is_connected().await {
            return None;
        }

        self.current_work.read().await.clone().map(|mut work| {
            work.extranonce2 = generate_extranonce2(4);
            work
        })
    }

    /// 提交份额，返回true表示消息已发出；接受与否由异步响应计数
    pub async fn submit_share(&self, result: &ShareResult) -> Result<bool, PoolError> {
        if !self.is_connected().await {
            return Err(PoolError::NotConnected { name: self.name.clone() });
        }

        let id = self.next_message_id().await;
        self.pending_submits.write().await.insert(id);

        let message = StratumMessage::request(
            id,
            "mining.submit",
            json!([
                self.username,
                result.job_id,
                result.extranonce2,
                result.ntime,
                result.nonce,
            ]),
        );

        if let Err(e) = self.send_message(message).await {
            self.pending_submits.write().await.remove(&id);
            return Err(e);
        }

        self.counters.write().await.shares_submitted += 1;
        debug!("Submitted share to pool {} (id {})", self.name, id);
        Ok(true)
    }

    /// 发送保活心跳
    pub async fn ping(&self) -> Result<(), PoolError> {
        let id = self.next_message_id().await;
        self.send_message(StratumMessage::request(id, "mining.ping", json!([])))
            .await
    }

    async fn next_message_id(&self) -> u64 {
        let mut id = self.message_id.write().await;
        *id += 1;
        *id
    }

    async fn send_message(&self, message: StratumMessage) -> Result<(), PoolError> {
        let result = write_message(&self.writer, &self.url(), &message).await;

        match result {
            Ok(()) => {
                *self.last_activity.write().await = Instant::now();
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = PoolState::Disconnected;
                Err(e)
            }
        }
    }

    fn spawn_receive_loop(&self, read_half: OwnedReadHalf) {
        let name = self.name.clone();
        let url = self.url();
        let state = self.state.clone();
        let writer = self.writer.clone();
        let difficulty = self.difficulty.clone();
        let current_work = self.current_work.clone();
        let counters = self.counters.clone();
        let pending_submits = self.pending_submits.clone();
        let message_id = self.message_id.clone();
        let last_activity = self.last_activity.clone();

        tokio::spawn(async move {
            let mut stream = read_half;
            let mut buffer: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 4096];

            loop {
                if *state.read().await == PoolState::Disconnected {
                    break;
                }

                match timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
                    // 读超时：空闲过久则从这里发送保活，与其它写共用写锁
                    Err(_) => {
                        let idle = last_activity.read().await.elapsed();
                        if idle >= KEEPALIVE_IDLE {
                            let id = {
                                let mut id = message_id.write().await;
                                *id += 1;
                                *id
                            };
                            let ping = StratumMessage::request(id, "mining.ping", json!([]));
                            if write_message(&writer, &url, &ping).await.is_err() {
                                warn!("Pool {} keepalive failed", name);
                                break;
                            }
                            *last_activity.write().await = Instant::now();
                            debug!("Pool {} keepalive sent", name);
                        }
                        continue;
                    }
                    Ok(Ok(0)) => {
                        debug!("Pool {} connection closed (EOF)", name);
                        break;
                    }
                    Ok(Ok(n)) => {
                        *last_activity.write().await = Instant::now();
                        buffer.extend_from_slice(&chunk[..n]);

                        // 缓冲后按换行切分，成帧与消息内容无关
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line_bytes);
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            handle_line(
                                trimmed,
                                &name,
                                &state,
                                &difficulty,
                                &current_work,
                                &counters,
                                &pending_submits,
                            )
                            .await;
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Pool {} read error: {}", name, e);
                        break;
                    }
                }
            }

            *state.write().await = PoolState::Disconnected;
            writer.lock().await.take();
            info!("Pool {} receive loop terminated", name);
        });
    }
}

async fn write_message(
    writer: &Mutex<Option<OwnedWriteHalf>>,
    url: &str,
    message: &StratumMessage,
) -> Result<(), PoolError> {
    let json_str = serde_json::to_string(message).map_err(|e| PoolError::Protocol {
        url: url.to_string(),
        error: format!("JSON serialization error: {}", e),
    })?;

    let mut guard = writer.lock().await;
    let stream = match guard.as_mut() {
        Some(stream) => stream,
        None => {
            return Err(PoolError::ConnectionFailed {
                url: url.to_string(),
                error: "Not connected".to_string(),
            })
        }
    };

    let write_result = async {
        stream.write_all(json_str.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await
    }
    .await;

    if let Err(e) = write_result {
        guard.take();
        return Err(PoolError::ConnectionFailed {
            url: url.to_string(),
            error: e.to_string(),
        });
    }

    debug!("📤 Sent to {}: {}", url, json_str);
    Ok(())
}

/// 处理一行入站消息；坏行记录后丢弃，按换行成帧不受内容影响
async fn handle_line(
    line: &str,
    name: &str,
    state: &RwLock<PoolState>,
    difficulty: &RwLock<f64>,
    current_work: &RwLock<Option<WorkUnit>>,
    counters: &RwLock<PoolCounters>,
    pending_submits: &RwLock<HashSet<u64>>,
) {
    let message: StratumMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(_) => {
            warn!("Invalid JSON from pool {}: {}", name, line);
            return;
        }
    };

    if let Some(method) = &message.method {
        match method.as_str() {
            "mining.notify" => {
                let params = match &message.params {
                    Some(params) => params,
                    None => {
                        warn!("mining.notify without params from pool {}", name);
                        return;
                    }
                };

                let pool_difficulty = *difficulty.read().await;
                match parse_notify(params, pool_difficulty, name) {
                    Some(work) => {
                        info!("Pool {} new job: {}", name, work.job_id);
                        *current_work.write().await = Some(work);

                        let mut state_guard = state.write().await;
                        if *state_guard == PoolState::Authorized {
                            *state_guard = PoolState::Active;
                        }
                    }
                    None => {
                        warn!("Malformed mining.notify from pool {}", name);
                    }
                }
            }
            "mining.set_difficulty" => {
                let value = message
                    .params
                    .as_ref()
                    .and_then(|p| p.as_array())
                    .and_then(|a| a.first())
                    .and_then(|v| v.as_f64());

                match value {
                    Some(new_difficulty) if new_difficulty > 0.0 && new_difficulty.is_finite() => {
                        let old = {
                            let mut guard = difficulty.write().await;
                            let old = *guard;
                            *guard = new_difficulty;
                            old
                        };
                        if (old - new_difficulty).abs() > f64::EPSILON {
                            info!(
                                "Pool {} difficulty changed from {} to {}",
                                name, old, new_difficulty
                            );
                        }
                    }
                    _ => {
                        warn!("Invalid mining.set_difficulty from pool {}", name);
                    }
                }
            }
            other => {
                debug!("Unknown method {} from pool {}", other, name);
            }
        }
        return;
    }

    if let Some(id) = message.id {
        // 订阅与认证使用保留ID
        if id == 1 {
            if message.error.is_some() {
                warn!("Pool {} subscribe rejected: {:?}", name, message.error);
                return;
            }
            let mut state_guard = state.write().await;
            if *state_guard == PoolState::Connecting {
                *state_guard = PoolState::Subscribed;
            }
            debug!("Pool {} subscribed", name);
            return;
        }

        if id == 2 {
            if message.result.as_ref().and_then(|r| r.as_bool()) == Some(true) {
                let mut state_guard = state.write().await;
                if *state_guard == PoolState::Subscribed {
                    *state_guard = PoolState::Authorized;
                }
                info!("Pool {} authorized", name);
            } else {
                warn!("Pool {} authorization failed: {:?}", name, message.error);
            }
            return;
        }

        let was_pending = pending_submits.write().await.remove(&id);
        if was_pending {
            let accepted = message.result.as_ref().and_then(|r| r.as_bool()) == Some(true);
            let mut counters_guard = counters.write().await;
            if accepted {
                counters_guard.shares_accepted += 1;
                info!("Share accepted by pool {}", name);
            } else {
                counters_guard.shares_rejected += 1;
                warn!("Share rejected by pool {}: {:?}", name, message.error);
            }
        } else {
            debug!("Pool {} response for unknown id {}", name, id);
        }
        return;
    }

    if let Some(error) = &message.error {
        warn!("Pool {} error: {}", name, error);
    }
}

/// 解析 mining.notify 参数为工作单元
///
/// 参数顺序：[job_id, prevhash, coinb1, coinb2, merkle_branch,
/// version, nbits, (ntime), (clean_jobs)]
fn parse_notify(params: &serde_json::Value, difficulty: f64, pool_name: &str) -> Option<WorkUnit> {
    let array = params.as_array()?;
    if array.len() < 7 {
        return None;
    }

    let job_id = array[0].as_str()?;
    let prevhash = array[1].as_str()?;
    let coinb1 = array[2].as_str()?;
    let coinb2 = array[3].as_str()?;
    array[4].as_array()?;
    let version = array[5].as_str()?;
    let nbits = array[6].as_str()?;

    if hex::decode(prevhash).is_err() {
        return None;
    }

    let ntime = match array.get(7).and_then(|v| v.as_str()) {
        Some(ntime) => ntime.to_string(),
        None => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("{:x}", now)
        }
    };
    let clean_jobs = array.get(8).and_then(|v| v.as_bool()).unwrap_or(true);

    Some(WorkUnit {
        job_id: job_id.to_string(),
        // 算法由工作分配方确定，协议本身不携带
        algorithm: "SHA256".to_string(),
        data: format!("{}{}{}{}{}{}", version, prevhash, coinb1, coinb2, ntime, nbits),
        target: difficulty_to_target(difficulty),
        difficulty,
        pool_name: pool_name.to_string(),
        timestamp: SystemTime::now(),
        clean_jobs,
        nonce_start: 0,
        nonce_end: 0xFFFF_FFFF,
        extranonce2: String::new(),
    })
}

fn generate_extranonce2(size: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..size).map(|_| rng.gen::<u8>()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF1_TARGET: &str =
        "00000000ffff0000000000000000000000000000000000000000000000000000";

    #[test]
    fn test_difficulty_one_target() {
        assert_eq!(difficulty_to_target(1.0), DIFF1_TARGET);
    }

    #[test]
    fn test_difficulty_two_is_exactly_half() {
        let target = difficulty_to_target(2.0);
        assert_eq!(
            target,
            "000000007fff8000000000000000000000000000000000000000000000000000"
        );

        // 整数意义上恰为难度1目标的一半
        let diff1_high = u128::from_str_radix(&DIFF1_TARGET[..32], 16).unwrap();
        let half_high = u128::from_str_radix(&target[..32], 16).unwrap();
        assert_eq!(diff1_high, half_high * 2);
        assert_eq!(&target[32..], &DIFF1_TARGET[32..]);
    }

    #[test]
    fn test_degenerate_difficulty_saturates() {
        assert_eq!(difficulty_to_target(0.0), "f".repeat(64));
        assert_eq!(difficulty_to_target(-1.0), "f".repeat(64));
        assert_eq!(difficulty_to_target(f64::NAN), "f".repeat(64));
    }

    #[test]
    fn test_target_length_is_always_64() {
        for difficulty in [0.001, 0.5, 1.0, 7.3, 65536.0, 1e12] {
            assert_eq!(difficulty_to_target(difficulty).len(), 64);
        }
    }

    fn notify_params() -> serde_json::Value {
        json!([
            "job-42",
            "00000000000000000002a7b3",
            "c1c1c1",
            "c2c2c2",
            [],
            "20000000",
            "17034219",
            "64a00000",
            true
        ])
    }

    #[test]
    fn test_parse_notify_full_params() {
        let work = parse_notify(&notify_params(), 1.0, "example").unwrap();

        assert_eq!(work.job_id, "job-42");
        assert_eq!(work.pool_name, "example");
        assert_eq!(work.nonce_start, 0);
        assert_eq!(work.nonce_end, 0xFFFF_FFFF);
        assert!(work.clean_jobs);
        assert_eq!(work.target, DIFF1_TARGET);
        assert!(work.data.starts_with("20000000"));
        assert!(work.data.contains("64a00000"));
    }

    #[test]
    fn test_parse_notify_rejects_short_params() {
        let params = json!(["job-42", "aa", "bb"]);
        assert!(parse_notify(&params, 1.0, "example").is_none());
    }

    #[test]
    fn test_parse_notify_rejects_bad_prevhash() {
        let mut params = notify_params();
        params[1] = json!("not-hex!");
        assert!(parse_notify(&params, 1.0, "example").is_none());
    }

    #[test]
    fn test_parse_notify_defaults_optional_fields() {
        let params = json!([
            "job-7",
            "00aa00bb",
            "c1",
            "c2",
            [],
            "20000000",
            "17034219"
        ]);
        let work = parse_notify(&params, 2.0, "example").unwrap();
        assert!(work.clean_jobs);
        assert!(!work.data.is_empty());
    }

    #[test]
    fn test_generate_extranonce2_length() {
        let extranonce2 = generate_extranonce2(4);
        assert_eq!(extranonce2.len(), 8);
        assert!(hex::decode(&extranonce2).is_ok());
    }

    #[tokio::test]
    async fn test_handle_line_drops_malformed_json() {
        let state = RwLock::new(PoolState::Active);
        let difficulty = RwLock::new(1.0);
        let current_work = RwLock::new(None);
        let counters = RwLock::new(PoolCounters::default());
        let pending = RwLock::new(HashSet::new());

        handle_line(
            "{not json",
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;

        // 坏行不影响连接状态，后续消息照常处理
        assert_eq!(*state.read().await, PoolState::Active);

        handle_line(
            r#"{"id":null,"method":"mining.set_difficulty","params":[8.0]}"#,
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;

        assert!((*difficulty.read().await - 8.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_handle_line_counts_submit_responses() {
        let state = RwLock::new(PoolState::Active);
        let difficulty = RwLock::new(1.0);
        let current_work = RwLock::new(None);
        let counters = RwLock::new(PoolCounters::default());
        let pending = RwLock::new(HashSet::from([5u64, 6u64]));

        handle_line(
            r#"{"id":5,"result":true,"error":null}"#,
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;

        handle_line(
            r#"{"id":6,"result":false,"error":[23,"low difficulty",null]}"#,
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;

        let counters = counters.read().await;
        assert_eq!(counters.shares_accepted, 1);
        assert_eq!(counters.shares_rejected, 1);
        assert!(pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_line_state_transitions() {
        let state = RwLock::new(PoolState::Connecting);
        let difficulty = RwLock::new(1.0);
        let current_work = RwLock::new(None);
        let counters = RwLock::new(PoolCounters::default());
        let pending = RwLock::new(HashSet::new());

        handle_line(
            r#"{"id":1,"result":[[],"08000002",4],"error":null}"#,
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;
        assert_eq!(*state.read().await, PoolState::Subscribed);

        handle_line(
            r#"{"id":2,"result":true,"error":null}"#,
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;
        assert_eq!(*state.read().await, PoolState::Authorized);

        let notify = format!(
            r#"{{"id":null,"method":"mining.notify","params":{}}}"#,
            notify_params()
        );
        handle_line(
            &notify,
            "example",
            &state,
            &difficulty,
            &current_work,
            &counters,
            &pending,
        )
        .await;

        assert_eq!(*state.read().await, PoolState::Active);
        assert!(current_work.read().await.is_some());
    }
}
