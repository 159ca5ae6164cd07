//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use coupon_shared::cache::Cache;

use crate::service::CouponDispenser;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub dispenser: Arc<CouponDispenser>,
    /// 限流计数用的 Redis 客户端，未启用限流时为 None
    pub cache: Option<Arc<Cache>>,
    /// 每个客户端每分钟允许的请求数
    pub rate_limit_per_minute: i64,
}

impl AppState {
    pub fn new(dispenser: Arc<CouponDispenser>) -> Self {
        Self {
            dispenser,
            cache: None,
            rate_limit_per_minute: 0,
        }
    }

    /// 启用基于 Redis 的限流
    pub fn with_rate_limit(mut self, cache: Arc<Cache>, per_minute: i64) -> Self {
        self.cache = Some(cache);
        self.rate_limit_per_minute = per_minute;
        self
    }
}
