//! 中间件模块
//!
//! 提供按客户端的限流中间件

mod rate_limit;

pub use rate_limit::rate_limit_middleware;
