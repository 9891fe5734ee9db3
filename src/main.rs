use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yuanjing_gate::{
    api, cache::IdempotencyCache, config::Config, registry::HashRegistry, ProvenanceGate,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yuanjing_gate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    tracing::info!(
        "⚙️  配置加载完成: Host={}:{}, DB={}, 阈值 pHash={}%, 语义={}%",
        config.host,
        config.port,
        config.db_path,
        config.perceptual_threshold,
        config.semantic_threshold
    );

    // ----------------------------------------------------------------
    // 1. 打开白名单
    // ----------------------------------------------------------------
    tracing::info!("🛡️ [原镜 Yuanjing] 内容来源闸门启动中...");
    let registry = HashRegistry::open(&config.db_path)?;
    tracing::info!("📚 白名单已打开: {} 条记录", registry.len());

    // 外部 Embedding / 视觉服务在这里挂接；不挂接时对应信号视为缺失
    let gate = ProvenanceGate::from_config(registry, &config);

    // ----------------------------------------------------------------
    // 2. 状态共享容器
    // ----------------------------------------------------------------
    let shared_state = Arc::new(api::AppState {
        gate,
        idempotency: IdempotencyCache::new(config.idempotency_ttl, config.idempotency_capacity),
    });

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("🚀 API 服务已运行在: http://{}", addr);
    tracing::info!("   - POST /check     : 查重 (exact -> pHash -> 语义)");
    tracing::info!("   - POST /evaluate  : 完整登记决策");
    tracing::info!("   - POST /watermark/embed | /watermark/extract : 隐形水印");

    axum::serve(listener, app).await?;

    Ok(())
}
