//! HTTP 请求处理器

pub mod claim;
pub mod cooldown;
pub mod health;
