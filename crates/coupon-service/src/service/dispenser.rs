//! 轮转发券服务
//!
//! ## 核心流程
//!
//! 1. 冷却检查（地址哈希 OR Cookie 的最新领取记录）
//! 2. 库存检查
//! 3. 读游标 -> 4. 按 id 升序取第 `value mod 总数` 张 -> 5. 写领取记录并推进游标
//!
//! 3~5 由存储在一个原子单元内完成，存储在其中对同一身份复核冷却期。
//! 游标被并发推进时存储返回 `ConcurrencyConflict`，这里按退避策略有限次重试，
//! 用尽后作为存储故障返回。

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use coupon_shared::config::ClaimConfig;
use coupon_shared::observability::metrics;
use coupon_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{debug, info, instrument, warn};

use super::dto::{CLAIM_SUCCESS_MESSAGE, ClaimOutcome, ClaimPhase};
use crate::error::{CouponError, Result};
use crate::identity::{IdentityQuery, IdentityToken};
use crate::models::ceil_minutes;
use crate::repository::ClaimStoreTrait;

/// 轮转发券服务
pub struct CouponDispenser {
    store: Arc<dyn ClaimStoreTrait>,
    cooldown: Duration,
    retry_policy: RetryPolicy,
}

impl CouponDispenser {
    pub fn new(store: Arc<dyn ClaimStoreTrait>, cooldown: Duration, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            cooldown,
            retry_policy,
        }
    }

    pub fn from_config(store: Arc<dyn ClaimStoreTrait>, config: &ClaimConfig) -> Self {
        Self::new(
            store,
            Duration::minutes(config.cooldown_minutes),
            RetryPolicy::with_millis(
                config.max_commit_retries,
                config.retry_initial_delay_ms,
                config.retry_max_delay_ms,
            ),
        )
    }

    /// 冷却窗口（分钟）
    pub fn cooldown_minutes(&self) -> i64 {
        self.cooldown.num_minutes()
    }

    /// 领取一张券
    pub async fn claim(&self, query: &IdentityQuery) -> Result<ClaimOutcome> {
        self.claim_at(query, Utc::now()).await
    }

    /// 以指定时间领取一张券
    #[instrument(skip(self, query), fields(identity = %query.primary.short()))]
    pub async fn claim_at(&self, query: &IdentityQuery, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let started = Instant::now();
        let result = self.run_claim(query, now).await;

        let outcome = match &result {
            Ok(_) => "fulfilled",
            Err(e) => e.outcome_label(),
        };
        metrics::record_claim(outcome, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(phase = ClaimPhase::Rejected.as_str(), error = %e, "领取被拒绝");
        }
        result
    }

    async fn run_claim(&self, query: &IdentityQuery, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        debug!(phase = ClaimPhase::Checking.as_str());
        if let Some(remaining) = self.active_cooldown(query, now).await? {
            let remaining_minutes = ceil_minutes(remaining);
            info!(remaining_minutes, "冷却期内，拒绝领取");
            return Err(CouponError::Cooldown { remaining_minutes });
        }

        let total = self.store.count_coupons().await?;
        if total == 0 {
            warn!("券池为空，无法发放");
            return Err(CouponError::NoInventory);
        }

        debug!(phase = ClaimPhase::Selecting.as_str(), pool_size = total);
        let store = &self.store;
        let cooldown = self.cooldown;
        let committed = retry_with_policy(
            &self.retry_policy,
            "commit_claim",
            CouponError::is_retryable,
            || async move {
                debug!(phase = ClaimPhase::Committing.as_str());
                let result = store.commit_claim(query, now, cooldown).await;
                if matches!(result, Err(CouponError::ConcurrencyConflict)) {
                    metrics::record_commit_conflict();
                }
                result
            },
        )
        .await?;

        info!(
            phase = ClaimPhase::Fulfilled.as_str(),
            coupon_id = committed.coupon.id,
            slot_index = committed.slot_index,
            cursor_version = committed.cursor.version,
            "优惠券已发放"
        );

        Ok(ClaimOutcome {
            coupon_code: committed.coupon.code,
            message: CLAIM_SUCCESS_MESSAGE.to_string(),
            cooldown_minutes: self.cooldown_minutes(),
            coupon_id: committed.coupon.id,
            claim_id: committed.record.id,
            slot_index: committed.slot_index,
        })
    }

    /// 查询冷却剩余分钟数（只看地址哈希），无冷却返回 None
    pub async fn query_cooldown(&self, token: &IdentityToken) -> Result<Option<i64>> {
        self.query_cooldown_at(token, Utc::now()).await
    }

    #[instrument(skip(self, token), fields(identity = %token.short()))]
    pub async fn query_cooldown_at(
        &self,
        token: &IdentityToken,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let query = IdentityQuery::primary_only(token.clone());
        let remaining = self.active_cooldown(&query, now).await?;
        Ok(remaining.map(ceil_minutes))
    }

    /// 领券与冷却查询共用的判定
    async fn active_cooldown(
        &self,
        query: &IdentityQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>> {
        let latest = self.store.latest_claim(query).await?;
        Ok(latest.and_then(|record| record.remaining_cooldown(now, self.cooldown)))
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClaimRecord, Coupon, RotationCursor};
    use crate::repository::{CommittedClaim, MockClaimStoreTrait};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::with_millis(max_retries, 1, 2)
    }

    fn dispenser(mock: MockClaimStoreTrait, max_retries: u32) -> CouponDispenser {
        CouponDispenser::new(Arc::new(mock), Duration::minutes(60), fast_policy(max_retries))
    }

    fn query() -> IdentityQuery {
        IdentityQuery::new(
            IdentityToken::from_address(Some("203.0.113.9")),
            Some("cookie-token".to_string()),
        )
    }

    fn committed(query: &IdentityQuery, at: DateTime<Utc>) -> CommittedClaim {
        CommittedClaim {
            record: ClaimRecord {
                id: 7,
                coupon_id: 3,
                claimed_by: query.primary.to_string(),
                claimed_at: at,
            },
            coupon: Coupon::new(3, "SAVE20"),
            slot_index: 2,
            cursor: RotationCursor {
                id: 1,
                value: 0,
                version: 9,
            },
        }
    }

    #[tokio::test]
    async fn test_claim_success() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().times(1).returning(|_| Ok(None));
        mock.expect_count_coupons().times(1).returning(|| Ok(3));
        mock.expect_commit_claim()
            .times(1)
            .returning(|q, at, _| Ok(committed(q, at)));

        let outcome = dispenser(mock, 3).claim(&query()).await.unwrap();

        assert_eq!(outcome.coupon_code, "SAVE20");
        assert_eq!(outcome.message, "Coupon claimed successfully!");
        assert_eq!(outcome.cooldown_minutes, 60);
        assert_eq!(outcome.slot_index, 2);
        assert_eq!(outcome.claim_id, 7);
    }

    #[tokio::test]
    async fn test_commit_receives_query_and_window() {
        let q = query();
        let expected = q.clone();

        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(1));
        mock.expect_commit_claim()
            .withf(move |q, _, cooldown| {
                q.primary == expected.primary
                    && q.secondary == expected.secondary
                    && *cooldown == Duration::minutes(60)
            })
            .times(1)
            .returning(|q, at, _| Ok(committed(q, at)));

        dispenser(mock, 0).claim(&q).await.unwrap();
    }

    #[tokio::test]
    async fn test_cooldown_rejects_without_touching_inventory() {
        let now = Utc::now();
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(move |_| {
            Ok(Some(ClaimRecord {
                id: 1,
                coupon_id: 1,
                claimed_by: "cookie-token".to_string(),
                claimed_at: now - Duration::minutes(15),
            }))
        });
        mock.expect_count_coupons().never();
        mock.expect_commit_claim().never();

        let err = dispenser(mock, 3).claim_at(&query(), now).await.unwrap_err();
        assert!(matches!(
            err,
            CouponError::Cooldown {
                remaining_minutes: 45
            }
        ));
    }

    #[tokio::test]
    async fn test_cooldown_lookup_passes_both_tokens() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim()
            .withf(|q| q.secondary.as_deref() == Some("cookie-token"))
            .times(1)
            .returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(0));

        let err = dispenser(mock, 3).claim(&query()).await.unwrap_err();
        assert!(matches!(err, CouponError::NoInventory));
    }

    #[tokio::test]
    async fn test_empty_pool_skips_commit() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(0));
        mock.expect_commit_claim().never();

        let err = dispenser(mock, 3).claim(&query()).await.unwrap_err();
        assert!(matches!(err, CouponError::NoInventory));
    }

    #[tokio::test]
    async fn test_conflict_is_retried_until_success() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(2));

        let mut calls = 0;
        mock.expect_commit_claim().times(3).returning(move |q, at, _| {
            calls += 1;
            if calls < 3 {
                Err(CouponError::ConcurrencyConflict)
            } else {
                Ok(committed(q, at))
            }
        });

        let outcome = dispenser(mock, 5).claim(&query()).await.unwrap();
        assert_eq!(outcome.coupon_code, "SAVE20");
    }

    #[tokio::test]
    async fn test_conflict_retries_exhausted_is_store_failure() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(2));
        // 首次 + 2 次重试
        mock.expect_commit_claim()
            .times(3)
            .returning(|_, _, _| Err(CouponError::ConcurrencyConflict));

        let err = dispenser(mock, 2).claim(&query()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StoreFailure);
    }

    #[tokio::test]
    async fn test_inventory_shrink_during_commit() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(1));
        mock.expect_commit_claim()
            .times(1)
            .returning(|_, _, _| Err(CouponError::NoInventory));

        let err = dispenser(mock, 5).claim(&query()).await.unwrap_err();
        assert!(matches!(err, CouponError::NoInventory));
    }

    #[tokio::test]
    async fn test_cooldown_found_at_commit_is_not_retried() {
        // 并行请求在事务外都通过了冷却检查，提交时才发现已有记录
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(2));
        mock.expect_commit_claim()
            .times(1)
            .returning(|_, _, _| Err(CouponError::Cooldown { remaining_minutes: 60 }));

        let err = dispenser(mock, 5).claim(&query()).await.unwrap_err();
        assert!(matches!(
            err,
            CouponError::Cooldown {
                remaining_minutes: 60
            }
        ));
    }

    #[tokio::test]
    async fn test_cooldown_near_window_end_reports_one_minute() {
        let now = Utc::now();
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(move |q| {
            Ok(Some(ClaimRecord {
                id: 1,
                coupon_id: 1,
                claimed_by: q.primary.to_string(),
                claimed_at: now - Duration::minutes(60) + Duration::microseconds(500),
            }))
        });
        mock.expect_commit_claim().never();

        let d = dispenser(mock, 0);
        let token = IdentityToken::from_address(Some("203.0.113.9"));
        assert_eq!(d.query_cooldown_at(&token, now).await.unwrap(), Some(1));

        let err = d.claim_at(&query(), now).await.unwrap_err();
        assert!(matches!(
            err,
            CouponError::Cooldown {
                remaining_minutes: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_database_error_not_retried() {
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(|_| Ok(None));
        mock.expect_count_coupons().returning(|| Ok(1));
        mock.expect_commit_claim()
            .times(1)
            .returning(|_, _, _| Err(CouponError::Database(sqlx::Error::PoolTimedOut)));

        let err = dispenser(mock, 5).claim(&query()).await.unwrap_err();
        assert!(matches!(err, CouponError::Database(_)));
    }

    #[tokio::test]
    async fn test_query_cooldown_uses_primary_only() {
        let now = Utc::now();
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim()
            .withf(|q| q.secondary.is_none())
            .returning(move |q| {
                Ok(Some(ClaimRecord {
                    id: 1,
                    coupon_id: 1,
                    claimed_by: q.primary.to_string(),
                    claimed_at: now - Duration::seconds(90),
                }))
            });

        let token = IdentityToken::from_address(Some("203.0.113.9"));
        let remaining = dispenser(mock, 0)
            .query_cooldown_at(&token, now)
            .await
            .unwrap();
        // 58.5 分钟向上取整
        assert_eq!(remaining, Some(59));
    }

    #[tokio::test]
    async fn test_query_cooldown_expired() {
        let now = Utc::now();
        let mut mock = MockClaimStoreTrait::new();
        mock.expect_latest_claim().returning(move |q| {
            Ok(Some(ClaimRecord {
                id: 1,
                coupon_id: 1,
                claimed_by: q.primary.to_string(),
                claimed_at: now - Duration::minutes(61),
            }))
        });

        let token = IdentityToken::from_address(None);
        let remaining = dispenser(mock, 0)
            .query_cooldown_at(&token, now)
            .await
            .unwrap();
        assert_eq!(remaining, None);
    }

    #[test]
    fn test_from_config() {
        let config = ClaimConfig {
            cooldown_minutes: 30,
            ..ClaimConfig::default()
        };
        let dispenser = CouponDispenser::from_config(Arc::new(MockClaimStoreTrait::new()), &config);
        assert_eq!(dispenser.cooldown_minutes(), 30);
        assert_eq!(dispenser.retry_policy.max_retries, 5);
    }
}
