use serde::{Deserialize, Serialize};

/// 优惠券
///
/// 由外部流程写入，本服务只读。`id` 单调递增，决定轮转顺序。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
}

impl Coupon {
    pub fn new(id: i64, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
        }
    }
}
