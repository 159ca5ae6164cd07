//! 领取记录
//!
//! 只追加的历史表，既是审计记录，也是冷却期判断的数据来源。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 领取记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub id: i64,
    pub coupon_id: i64,
    /// 领取者身份令牌（地址哈希）
    pub claimed_by: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// 距冷却结束的剩余时长，冷却已过返回 None
    ///
    /// 时间戳晚于 now（时钟漂移）时视为刚刚领取，剩余时长不超过窗口。
    pub fn remaining_cooldown(&self, now: DateTime<Utc>, window: Duration) -> Option<Duration> {
        let elapsed = now - self.claimed_at;
        if elapsed >= window {
            return None;
        }
        Some((window - elapsed).min(window))
    }
}

/// 时长向上取整到分钟
///
/// 任何正时长（包括不足 1 毫秒）至少为 1 分钟。
pub fn ceil_minutes(duration: Duration) -> i64 {
    if duration <= Duration::zero() {
        return 0;
    }
    let millis = duration.num_milliseconds();
    ((millis + 59_999) / 60_000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(claimed_at: DateTime<Utc>) -> ClaimRecord {
        ClaimRecord {
            id: 1,
            coupon_id: 1,
            claimed_by: "token".to_string(),
            claimed_at,
        }
    }

    #[test]
    fn test_remaining_within_window() {
        let now = Utc::now();
        let record = record_at(now - Duration::minutes(10));
        let remaining = record.remaining_cooldown(now, Duration::minutes(60)).unwrap();
        assert_eq!(remaining, Duration::minutes(50));
    }

    #[test]
    fn test_remaining_after_window() {
        let now = Utc::now();
        let record = record_at(now - Duration::minutes(60));
        assert!(record.remaining_cooldown(now, Duration::minutes(60)).is_none());
    }

    #[test]
    fn test_future_claim_capped_at_window() {
        let now = Utc::now();
        let record = record_at(now + Duration::minutes(5));
        let remaining = record.remaining_cooldown(now, Duration::minutes(60)).unwrap();
        assert_eq!(remaining, Duration::minutes(60));
    }

    #[test]
    fn test_ceil_minutes() {
        assert_eq!(ceil_minutes(Duration::minutes(60)), 60);
        assert_eq!(ceil_minutes(Duration::seconds(61)), 2);
        assert_eq!(ceil_minutes(Duration::milliseconds(1)), 1);
        assert_eq!(ceil_minutes(Duration::zero()), 0);
    }

    #[test]
    fn test_sub_millisecond_remaining_is_one_minute() {
        let now = Utc::now();
        let window = Duration::minutes(60);
        let record = record_at(now - window + Duration::microseconds(500));

        let remaining = record.remaining_cooldown(now, window).unwrap();
        assert_eq!(ceil_minutes(remaining), 1);
        assert_eq!(ceil_minutes(Duration::nanoseconds(1)), 1);
    }
}
