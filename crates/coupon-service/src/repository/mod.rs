//! 存储层
//!
//! - `traits`: 领券核心依赖的存储接口
//! - `pg_repo`: PostgreSQL 实现（生产）
//! - `memory_repo`: 进程内实现（本地开发与测试）

mod memory_repo;
mod pg_repo;
mod traits;

pub use memory_repo::MemoryClaimStore;
pub use pg_repo::PgClaimStore;
pub use traits::{ClaimStoreTrait, CommittedClaim};

#[cfg(test)]
pub use traits::MockClaimStoreTrait;
