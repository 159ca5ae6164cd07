//! 业务服务层

pub mod dispenser;
pub mod dto;

pub use dispenser::CouponDispenser;
pub use dto::ClaimOutcome;
