//! 领券接口
//!
//! `POST /api/claim`：成功时返回券码并下发 `claimed` Cookie，
//! 其值为本次领取记录的身份令牌，有效期与冷却窗口一致。

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::info;

use crate::{
    error::{CouponError, Result},
    identity::{CLAIM_COOKIE, ClientIdentity},
    service::ClaimOutcome,
    state::AppState,
};

/// 领券成功响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub coupon: String,
    pub message: String,
    /// 下次可领取前需等待的分钟数
    pub time_remaining: i64,
}

impl From<ClaimOutcome> for ClaimResponse {
    fn from(outcome: ClaimOutcome) -> Self {
        Self {
            coupon: outcome.coupon_code,
            message: outcome.message,
            time_remaining: outcome.cooldown_minutes,
        }
    }
}

/// 生成 `claimed` Cookie
pub fn claim_cookie_header(token: &str, max_age_secs: i64) -> String {
    format!("{CLAIM_COOKIE}={token}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Lax")
}

/// 领取一张优惠券
///
/// POST /api/claim
pub async fn claim_coupon(
    State(state): State<AppState>,
    identity: ClientIdentity,
) -> Result<Response> {
    let outcome = state.dispenser.claim(&identity.claim_query()).await?;

    info!(
        identity = %identity.token.short(),
        coupon_id = outcome.coupon_id,
        "领券成功"
    );

    let cookie = claim_cookie_header(identity.token.as_str(), outcome.cooldown_minutes * 60);
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|e| CouponError::Internal(format!("Cookie 头构造失败: {}", e)))?;

    let mut response = Json(ClaimResponse::from(outcome)).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}
