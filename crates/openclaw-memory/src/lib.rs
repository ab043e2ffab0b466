//! OpenClaw Memory - 多 Agent 协调存储
//!
//! 多个 Agent 进程通过同一个图存储协作：
//! - 任务委派与认领 (pending → in_progress → completed | failed)
//! - 共享记忆文件的版本记录与冲突检测
//! - 冲突升级与任务完成通知
//!
//! 存储不可用时可进入降级模式，所有操作退化为空操作并返回占位 ID。

pub mod file_consistency;
pub mod file_tracker;
pub mod monitor;
pub mod notification;
pub mod query;
pub mod retry;
pub mod sqlite_store;
pub mod store;
pub mod task_store;
pub mod types;

pub use file_consistency::*;
pub use file_tracker::*;
pub use monitor::*;
pub use notification::*;
pub use query::*;
pub use retry::*;
pub use sqlite_store::*;
pub use store::*;
pub use task_store::*;
pub use types::*;
