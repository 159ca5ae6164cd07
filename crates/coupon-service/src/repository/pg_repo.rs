//! PostgreSQL 领券存储
//!
//! 提交阶段在单个事务内完成，游标更新以读取到的 version 为条件
//! （乐观并发）：更新行数为 0 说明游标已被其他请求推进，整个事务回滚。
//!
//! 同一身份的并发提交通过事务级 advisory lock 串行化，拿到锁后在事务内
//! 复核冷却期，避免两个并行请求都通过事务外的冷却检查。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::traits::{ClaimStoreTrait, CommittedClaim};
use crate::error::{CouponError, Result};
use crate::identity::IdentityQuery;
use crate::models::{ClaimRecord, Coupon, RotationCursor, ceil_minutes};

const LATEST_CLAIM_SQL: &str = r#"
    SELECT id, coupon_id, claimed_by, claimed_at
    FROM claim_history
    WHERE claimed_by = ANY($1)
    ORDER BY claimed_at DESC, id DESC
    LIMIT 1
"#;

/// PostgreSQL 领券存储
#[derive(Clone)]
pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 读取当前游标（不存在时返回 None）
    pub async fn get_cursor(&self) -> Result<Option<RotationCursor>> {
        let cursor = sqlx::query_as::<_, RotationCursor>(
            r#"
            SELECT id, value, version
            FROM rotation_cursor
            WHERE id = $1
            "#,
        )
        .bind(RotationCursor::SINGLETON_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }
}

#[async_trait]
impl ClaimStoreTrait for PgClaimStore {
    async fn latest_claim(&self, query: &IdentityQuery) -> Result<Option<ClaimRecord>> {
        let record = sqlx::query_as::<_, ClaimRecord>(LATEST_CLAIM_SQL)
            .bind(query.tokens())
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn count_coupons(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    #[instrument(skip(self, query), fields(identity = %query.primary.short()))]
    async fn commit_claim(
        &self,
        query: &IdentityQuery,
        claimed_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<CommittedClaim> {
        let mut tx = self.pool.begin().await.map_err(CouponError::from_db)?;

        // 按固定顺序加锁，事务结束时自动释放
        let mut tokens = query.tokens();
        tokens.sort();
        for token in &tokens {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(token)
                .execute(&mut *tx)
                .await
                .map_err(CouponError::from_db)?;
        }

        let latest = sqlx::query_as::<_, ClaimRecord>(LATEST_CLAIM_SQL)
            .bind(tokens.as_slice())
            .fetch_optional(&mut *tx)
            .await
            .map_err(CouponError::from_db)?;
        if let Some(remaining) = latest.and_then(|c| c.remaining_cooldown(claimed_at, cooldown)) {
            tx.rollback().await?;
            return Err(CouponError::Cooldown {
                remaining_minutes: ceil_minutes(remaining),
            });
        }

        // 并发的首次创建收敛为同一行
        sqlx::query(
            r#"
            INSERT INTO rotation_cursor (id, value, version)
            VALUES ($1, 0, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(RotationCursor::SINGLETON_ID)
        .execute(&mut *tx)
        .await
        .map_err(CouponError::from_db)?;

        let cursor = sqlx::query_as::<_, RotationCursor>(
            "SELECT id, value, version FROM rotation_cursor WHERE id = $1",
        )
        .bind(RotationCursor::SINGLETON_ID)
        .fetch_one(&mut *tx)
        .await
        .map_err(CouponError::from_db)?;

        // 券池大小在事务内只读一次，选券和推进游标共用
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons")
            .fetch_one(&mut *tx)
            .await
            .map_err(CouponError::from_db)?;

        let Some(slot_index) = cursor.slot_index(total) else {
            tx.rollback().await?;
            return Err(CouponError::NoInventory);
        };

        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT id, code
            FROM coupons
            ORDER BY id ASC
            OFFSET $1
            LIMIT 1
            "#,
        )
        .bind(slot_index)
        .fetch_optional(&mut *tx)
        .await
        .map_err(CouponError::from_db)?;

        let Some(coupon) = coupon else {
            tx.rollback().await?;
            return Err(CouponError::NoInventory);
        };

        let next = cursor.advanced(total);
        let updated = sqlx::query(
            r#"
            UPDATE rotation_cursor
            SET value = $1, version = $2, updated_at = NOW()
            WHERE id = $3 AND version = $4
            "#,
        )
        .bind(next.value)
        .bind(next.version)
        .bind(cursor.id)
        .bind(cursor.version)
        .execute(&mut *tx)
        .await
        .map_err(CouponError::from_db)?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            debug!(observed_version = cursor.version, "游标已被并发推进");
            return Err(CouponError::ConcurrencyConflict);
        }

        let record = sqlx::query_as::<_, ClaimRecord>(
            r#"
            INSERT INTO claim_history (coupon_id, claimed_by, claimed_at)
            VALUES ($1, $2, $3)
            RETURNING id, coupon_id, claimed_by, claimed_at
            "#,
        )
        .bind(coupon.id)
        .bind(query.primary.as_str())
        .bind(claimed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(CouponError::from_db)?;

        tx.commit().await.map_err(CouponError::from_db)?;

        Ok(CommittedClaim {
            record,
            coupon,
            slot_index,
            cursor: next,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
