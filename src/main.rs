use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hpcminer_rs::cluster::{ClusterManager, NullNodeChannel};
use hpcminer_rs::config::{Args, Config};
use hpcminer_rs::optimizer::{CpuSpec, HardwareProfile, MemorySpec, WorkOptimizer};
use hpcminer_rs::pool::PoolManager;

#[tokio::main]
async fn main() {
    // 初始化日志系统
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return;
    }

    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config: {}", e);
            return;
        }
    };

    info!("🚀 Starting HPCMiner-RS v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from: {}", args.config);

    // 创建矿池管理器
    let pool_manager = match PoolManager::from_config(&config.pools).await {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            error!("❌ Failed to create pool manager: {}", e);
            return;
        }
    };

    // 创建优化器与集群管理器
    let optimizer = Arc::new(WorkOptimizer::new(
        config.optimizer.clone(),
        pool_manager.candidates().await,
    ));

    // 节点命令传输由部署环境注入，缺省为空实现
    let cluster_manager = Arc::new(ClusterManager::new(
        config.cluster.clone(),
        config.general.cluster_id.clone(),
        Arc::new(NullNodeChannel),
        optimizer.clone(),
    ));

    // 设置信号处理
    if let Err(e) = setup_signal_handlers(cluster_manager.clone(), pool_manager.clone()).await {
        error!("❌ Failed to setup signal handlers: {}", e);
        return;
    }

    // 连接矿池
    let connected = pool_manager.connect_all().await;
    info!("Connected to {} pool(s)", connected);

    // 基于本机硬件给出初始配置建议；真实硬件探测由外部协作者提供
    match optimizer.optimize_setup(&local_hardware_profile()).await {
        Ok(setup) => {
            info!(
                "✅ Initial setup: {} on {} ({} threads, intensity {})",
                setup.algorithm, setup.pool_name, setup.cpu_threads, setup.gpu_intensity
            );
        }
        Err(e) => {
            error!("❌ Initial optimization failed: {}", e);
        }
    }

    // 启动集群管理
    cluster_manager.start().await;
    info!("✅ Cluster manager running");

    // 保持程序运行
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Error waiting for signal: {}", e);
        return;
    }
    info!("🛑 Received shutdown signal");

    // 优雅关闭
    cluster_manager.stop().await;
    pool_manager.disconnect_all().await;
    info!("👋 Cluster stopped gracefully");
}

fn init_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hpcminer_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// 无外部硬件探测器时的兜底硬件概况
fn local_hardware_profile() -> HardwareProfile {
    HardwareProfile {
        cpu: CpuSpec {
            cores: num_cpus::get_physical() as u32,
            threads: num_cpus::get() as u32,
            ..Default::default()
        },
        gpus: Vec::new(),
        memory: MemorySpec::default(),
    }
}

async fn setup_signal_handlers(
    cluster_manager: Arc<ClusterManager>,
    pool_manager: Arc<PoolManager>,
) -> Result<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to create SIGTERM handler: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    cluster_manager.stop().await;
                    pool_manager.disconnect_all().await;
                    std::process::exit(0);
                }
            }
        }
        #[cfg(not(unix))]
        {
            // Windows 或其他平台的处理
            let _ = (cluster_manager, pool_manager);
            info!("Signal handling not implemented for this platform");
        }
    });

    Ok(())
}
