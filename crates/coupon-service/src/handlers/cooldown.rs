//! 冷却查询接口

use axum::{Json, extract::State};
use serde::Serialize;

use crate::{error::Result, identity::ClientIdentity, state::AppState};

/// 冷却查询响应，无冷却时 `timeRemaining` 为 null
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownResponse {
    pub time_remaining: Option<i64>,
}

/// 查询当前来源地址的冷却剩余分钟数
///
/// GET /api/cooldown
///
/// 只按地址哈希查询，不读取 Cookie。
pub async fn get_cooldown(
    State(state): State<AppState>,
    identity: ClientIdentity,
) -> Result<Json<CooldownResponse>> {
    let time_remaining = state.dispenser.query_cooldown(&identity.token).await?;
    Ok(Json(CooldownResponse { time_remaining }))
}
