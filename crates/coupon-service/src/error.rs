//! 领券服务错误类型
//!
//! 三类对外语义：冷却中（429）、无库存（404）、存储故障（500）。
//! 存储故障的细节只记录日志，不返回给客户端。

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 领券服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    // === 业务错误 ===
    #[error("冷却期内不可重复领取: 剩余 {remaining_minutes} 分钟")]
    Cooldown { remaining_minutes: i64 },

    #[error("券池为空")]
    NoInventory,

    // === 存储故障 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("轮转游标并发冲突，请重试")]
    ConcurrencyConflict,

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 领券服务 Result 类型别名
pub type Result<T> = std::result::Result<T, CouponError>;

/// 对外错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cooldown,
    NoInventory,
    StoreFailure,
}

impl CouponError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cooldown { .. } => ErrorKind::Cooldown,
            Self::NoInventory => ErrorKind::NoInventory,
            Self::Database(_) | Self::ConcurrencyConflict | Self::Internal(_) => {
                ErrorKind::StoreFailure
            }
        }
    }

    /// 只有提交阶段的乐观锁冲突会在服务内部重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict)
    }

    /// 将数据库错误归类：序列化失败和死锁视为并发冲突
    pub fn from_db(err: sqlx::Error) -> Self {
        let conflict = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "40001" || code == "40P01");
        if conflict {
            Self::ConcurrencyConflict
        } else {
            Self::Database(err)
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Cooldown => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NoInventory => StatusCode::NOT_FOUND,
            ErrorKind::StoreFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cooldown { .. } => "COOLDOWN",
            Self::NoInventory => "NO_INVENTORY",
            Self::Database(_) => "DATABASE_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 指标标签
    pub fn outcome_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Cooldown => "cooldown",
            ErrorKind::NoInventory => "no_inventory",
            ErrorKind::StoreFailure => "store_failure",
        }
    }

    /// 返回给客户端的提示文案
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Cooldown => "Please wait before claiming another coupon.",
            ErrorKind::NoInventory => "No coupons available.",
            ErrorKind::StoreFailure => "Internal Server Error",
        }
    }
}

impl IntoResponse for CouponError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::Cooldown { remaining_minutes } => {
                let body = json!({
                    "message": self.public_message(),
                    "timeRemaining": remaining_minutes,
                });
                let mut response = (status, axum::Json(body)).into_response();
                if let Ok(val) = HeaderValue::from_str(&(remaining_minutes * 60).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, val);
                }
                response
            }
            Self::NoInventory => {
                (status, axum::Json(json!({ "message": self.public_message() }))).into_response()
            }
            other => {
                tracing::error!(error = %other, code = other.error_code(), "领券存储操作失败");
                (status, axum::Json(json!({ "message": self.public_message() }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_error_status_codes() {
        let cases = vec![
            (
                CouponError::Cooldown {
                    remaining_minutes: 12,
                },
                StatusCode::TOO_MANY_REQUESTS,
                "COOLDOWN",
            ),
            (CouponError::NoInventory, StatusCode::NOT_FOUND, "NO_INVENTORY"),
            (
                CouponError::Database(sqlx::Error::PoolTimedOut),
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
            ),
            (
                CouponError::ConcurrencyConflict,
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONCURRENCY_CONFLICT",
            ),
            (
                CouponError::Internal("bad".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "{:?}", err);
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(CouponError::ConcurrencyConflict.is_retryable());
        assert!(!CouponError::NoInventory.is_retryable());
        assert!(!CouponError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_from_db_keeps_non_conflict_errors() {
        let err = CouponError::from_db(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
        assert!(matches!(err, CouponError::Database(_)));
    }

    #[tokio::test]
    async fn test_cooldown_response_body() {
        let response = CouponError::Cooldown {
            remaining_minutes: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2520");
        let body = body_json(response).await;
        assert_eq!(body["timeRemaining"], 42);
        assert_eq!(body["message"], "Please wait before claiming another coupon.");
    }

    #[tokio::test]
    async fn test_store_failure_hides_details() {
        let response = CouponError::Internal("connection string leaked".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal Server Error");
    }
}
