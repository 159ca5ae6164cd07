//! 轮转游标
//!
//! 全局唯一的一行记录，`value` 表示下一张要发放的券在券池中的序号（对池大小取模）。
//! `version` 每次推进加一，作为条件更新的栅栏值：即使 `value` 绕回到相同数值，
//! 过期的读取也无法通过版本校验。

use serde::{Deserialize, Serialize};

/// 轮转游标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RotationCursor {
    pub id: i32,
    pub value: i64,
    pub version: i64,
}

impl RotationCursor {
    /// 单例行的主键
    pub const SINGLETON_ID: i32 = 1;

    /// 首次创建时的游标
    pub fn initial() -> Self {
        Self {
            id: Self::SINGLETON_ID,
            value: 0,
            version: 0,
        }
    }

    /// 在给定池大小下本次应发放的序号
    ///
    /// 池为空时返回 None。
    pub fn slot_index(&self, pool_size: i64) -> Option<i64> {
        if pool_size <= 0 {
            return None;
        }
        Some(self.value.rem_euclid(pool_size))
    }

    /// 推进一格后的游标：`value = (value + 1) mod pool_size`，`version + 1`
    ///
    /// 调用方需保证 `pool_size > 0`。
    pub fn advanced(&self, pool_size: i64) -> Self {
        Self {
            id: self.id,
            value: (self.value + 1).rem_euclid(pool_size.max(1)),
            version: self.version + 1,
        }
    }
}

impl Default for RotationCursor {
    fn default() -> Self {
        Self::initial()
    }
}
