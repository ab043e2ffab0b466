//! OpenClaw Security - 安全模块
//!
//! 跨 Agent 委派前的隐私脱敏

pub mod sanitizer;

pub use sanitizer::*;
