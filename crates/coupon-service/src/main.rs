//! 轮转发券服务
//!
//! 提供 `POST /api/claim` 与 `GET /api/cooldown` REST API。

use std::net::SocketAddr;
use std::sync::Arc;

use coupon_service::{
    AppState, ClaimStoreTrait, CouponDispenser, MemoryClaimStore, PgClaimStore, routes,
};
use coupon_shared::{
    cache::Cache,
    config::{AppConfig, StoreBackend},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("coupon-service")?;
    let _guard = observability::init(&config.observability, &config.service_name).await?;

    info!(
        environment = %config.environment,
        "Starting coupon-service on {}",
        config.server_addr()
    );

    // 初始化存储：生产使用 PostgreSQL，本地开发可切换为内存存储
    let mut db: Option<Database> = None;
    let store: Arc<dyn ClaimStoreTrait> = match config.store.backend {
        StoreBackend::Postgres => {
            let database = Database::connect(&config.database).await?;
            if config.database.run_migrations {
                database.run_migrations().await?;
            }
            let store = PgClaimStore::new(database.pool().clone());
            db = Some(database);
            Arc::new(store)
        }
        StoreBackend::Memory => {
            if config.is_production() {
                warn!("生产环境使用内存存储，重启后领取记录将丢失");
            }
            let store = MemoryClaimStore::with_codes(config.store.seed_codes.iter().cloned());
            info!(coupons = config.store.seed_codes.len(), "内存存储已初始化");
            Arc::new(store)
        }
    };

    let dispenser = Arc::new(CouponDispenser::from_config(store, &config.claim));
    let mut state = AppState::new(dispenser);

    if config.http.rate_limit_enabled {
        let cache = Arc::new(Cache::new(&config.redis)?);
        if let Err(e) = cache.health_check().await {
            // Redis 不可用不阻止启动，限流中间件会放行
            warn!(error = %e, "Redis 暂不可用，限流将在恢复前失效");
        }
        state = state.with_rate_limit(cache, config.http.rate_limit_per_minute);
        info!(
            per_minute = config.http.rate_limit_per_minute,
            "Rate limiting enabled"
        );
    }

    let app = routes::build_router(state, &config.http);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 需要对端地址作为 X-Forwarded-For 缺失时的身份来源
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(db) = db {
        db.close().await;
    }
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
