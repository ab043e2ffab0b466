//! OpenClaw Agent - 多智能体委派
//!
//! 编排 Agent 把任务交给专职 Agent：
//! - 委派前对描述和上下文做隐私脱敏
//! - 按建议、@mention、关键词路由到目标 Agent
//! - 任务落库后由目标 Agent 认领

pub mod delegation;
pub mod router;

pub use delegation::*;
pub use router::*;
