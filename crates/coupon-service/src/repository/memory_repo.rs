//! 内存领券存储
//!
//! 没有事务的环境下用一把互斥锁串行化提交，读游标、选券、写记录、推进游标
//! 在同一临界区内完成。适用于本地开发和测试。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::traits::{ClaimStoreTrait, CommittedClaim};
use crate::error::{CouponError, Result};
use crate::identity::IdentityQuery;
use crate::models::{ClaimRecord, Coupon, RotationCursor, ceil_minutes};

#[derive(Debug, Default)]
struct MemoryState {
    /// 按 id 升序保存
    coupons: Vec<Coupon>,
    claims: Vec<ClaimRecord>,
    cursor: Option<RotationCursor>,
    next_coupon_id: i64,
    next_claim_id: i64,
}

impl MemoryState {
    fn latest_claim(&self, query: &IdentityQuery) -> Option<&ClaimRecord> {
        self.claims
            .iter()
            .filter(|c| query.matches(&c.claimed_by))
            .max_by_key(|c| (c.claimed_at, c.id))
    }
}

/// 内存领券存储
#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    state: Mutex<MemoryState>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按给定顺序预置券码
    pub fn with_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for code in codes {
            store.add_coupon(code);
        }
        store
    }

    /// 追加一张券，id 自增
    pub fn add_coupon(&self, code: impl Into<String>) -> Coupon {
        let mut state = self.state.lock();
        state.next_coupon_id += 1;
        let coupon = Coupon::new(state.next_coupon_id, code);
        state.coupons.push(coupon.clone());
        coupon
    }

    /// 移除一张券，返回是否存在
    pub fn remove_coupon(&self, id: i64) -> bool {
        let mut state = self.state.lock();
        let before = state.coupons.len();
        state.coupons.retain(|c| c.id != id);
        state.coupons.len() != before
    }

    /// 领取记录快照（按写入顺序）
    pub fn claims(&self) -> Vec<ClaimRecord> {
        self.state.lock().claims.clone()
    }

    /// 当前游标，尚未创建时为 None
    pub fn cursor(&self) -> Option<RotationCursor> {
        self.state.lock().cursor
    }
}

#[async_trait]
impl ClaimStoreTrait for MemoryClaimStore {
    async fn latest_claim(&self, query: &IdentityQuery) -> Result<Option<ClaimRecord>> {
        Ok(self.state.lock().latest_claim(query).cloned())
    }

    async fn count_coupons(&self) -> Result<i64> {
        Ok(self.state.lock().coupons.len() as i64)
    }

    async fn commit_claim(
        &self,
        query: &IdentityQuery,
        claimed_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<CommittedClaim> {
        let mut state = self.state.lock();

        if let Some(remaining) = state
            .latest_claim(query)
            .and_then(|c| c.remaining_cooldown(claimed_at, cooldown))
        {
            return Err(CouponError::Cooldown {
                remaining_minutes: ceil_minutes(remaining),
            });
        }

        // 失败的提交不留下游标
        let cursor = state.cursor.unwrap_or_else(RotationCursor::initial);
        let total = state.coupons.len() as i64;

        let slot_index = cursor.slot_index(total).ok_or(CouponError::NoInventory)?;
        let coupon = state
            .coupons
            .get(slot_index as usize)
            .cloned()
            .ok_or(CouponError::NoInventory)?;

        let next = cursor.advanced(total);

        state.next_claim_id += 1;
        let record = ClaimRecord {
            id: state.next_claim_id,
            coupon_id: coupon.id,
            claimed_by: query.primary.as_str().to_string(),
            claimed_at,
        };
        state.claims.push(record.clone());
        state.cursor = Some(next);

        Ok(CommittedClaim {
            record,
            coupon,
            slot_index,
            cursor: next,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
