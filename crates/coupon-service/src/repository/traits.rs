//! 存储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，便于 mock 测试和替换存储后端

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::identity::IdentityQuery;
use crate::models::{ClaimRecord, Coupon, RotationCursor};

/// 一次成功提交的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedClaim {
    pub record: ClaimRecord,
    pub coupon: Coupon,
    /// 本次发放使用的序号（提交前的游标值对池大小取模）
    pub slot_index: i64,
    /// 推进后的游标
    pub cursor: RotationCursor,
}

/// 领券存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClaimStoreTrait: Send + Sync {
    /// 匹配任一候选令牌的最新领取记录
    async fn latest_claim(&self, query: &IdentityQuery) -> Result<Option<ClaimRecord>>;

    async fn count_coupons(&self) -> Result<i64>;

    /// 原子地完成：冷却复核 -> 读游标 -> 选券 -> 写领取记录 -> 推进游标
    ///
    /// 要么全部生效，要么全部不生效。领取记录写入 `query.primary`。
    /// 同一身份的并发提交串行化，复核发现 `cooldown` 内已有记录时返回 `Cooldown`；
    /// 游标在读取后被他人推进时返回 `ConcurrencyConflict`；
    /// 提交时券池为空或选中位置无券返回 `NoInventory`。
    async fn commit_claim(
        &self,
        query: &IdentityQuery,
        claimed_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<CommittedClaim>;

    async fn health_check(&self) -> Result<()>;
}
