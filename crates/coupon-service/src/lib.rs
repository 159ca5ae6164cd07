//! 轮转发券服务
//!
//! 每个来源地址在冷却窗口内只能领取一张优惠券，券按 id 升序轮转发放。
//!
//! ## 模块结构
//!
//! - `identity`: 地址哈希与 `claimed` Cookie 解析
//! - `models`: 券、领取记录、轮转游标
//! - `repository`: 存储抽象及 PostgreSQL / 内存实现
//! - `service`: 领券与冷却查询
//! - `handlers` / `routes` / `middleware`: HTTP 层
//! - `error`: 错误类型及 HTTP 映射
//!
//! ## 技术栈
//!
//! - Web 框架：Axum
//! - 存储：sqlx (PostgreSQL)
//! - 限流：Redis
//! - 序列化：serde (camelCase)

pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;

pub use error::{CouponError, ErrorKind, Result};
pub use identity::{ClientIdentity, IdentityQuery, IdentityToken};
pub use models::{ClaimRecord, Coupon, RotationCursor};
pub use repository::{ClaimStoreTrait, MemoryClaimStore, PgClaimStore};
pub use service::{ClaimOutcome, CouponDispenser};
pub use state::AppState;
