//! Redis 客户端模块
//!
//! 提供 Redis 连接管理和限流所需的计数操作封装。

use crate::config::RedisConfig;
use crate::error::{Result, SharedError};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{info, instrument};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    ///
    /// 仅解析地址，不会立即建立连接。
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SharedError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }

    /// 增量操作
    #[instrument(skip(self))]
    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.get_conn().await?;
        let result: i64 = conn.incr(key, delta).await?;
        Ok(result)
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    /// 固定窗口计数：自增并在窗口首个请求时设置过期
    ///
    /// 返回当前窗口内的累计次数。
    pub async fn incr_window(&self, key: &str, window: Duration) -> Result<i64> {
        let count = self.incr(key, 1).await?;
        if count == 1 {
            self.expire(key, window).await?;
        }
        Ok(count)
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 领券限流计数键，按客户端身份和窗口序号隔离
    pub fn claim_rate_limit(client: &str, window: u64) -> String {
        format!("rl:claim:{}:{}", client, window)
    }
}
