//! 领域模型定义
//!
//! 券池、轮转游标和领取记录三类持久化实体。

mod claim;
mod coupon;
mod cursor;

pub use claim::{ClaimRecord, ceil_minutes};
pub use coupon::Coupon;
pub use cursor::RotationCursor;
