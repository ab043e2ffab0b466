//! OpenClaw Core - 核心类型和抽象
//!
//! 提供协调层共用的错误类型、配置、时钟与 ID 生成。

pub mod clock;
pub mod config;
pub mod error;

pub use clock::*;
pub use config::*;
pub use error::*;
