//! 服务层数据传输对象

use serde::Serialize;

/// 领取成功的提示文案
pub const CLAIM_SUCCESS_MESSAGE: &str = "Coupon claimed successfully!";

/// 领取成功结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub coupon_code: String,
    pub message: String,
    /// 冷却窗口（分钟），供客户端展示
    pub cooldown_minutes: i64,
    pub coupon_id: i64,
    pub claim_id: i64,
    /// 本次使用的轮转序号
    pub slot_index: i64,
}

/// 领券流程阶段，用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPhase {
    Checking,
    Selecting,
    Committing,
    Fulfilled,
    Rejected,
}

impl ClaimPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Selecting => "selecting",
            Self::Committing => "committing",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
        }
    }
}
