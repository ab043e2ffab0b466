//! 协调层实体定义
//!
//! 存储层返回的原始记录在 [`crate::store`] 边界处转换为这里的强类型结构。
//! 时间戳以毫秒整数持久化，便于存储端做范围比较。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use openclaw_core::CoordinationError;

pub const TASK_LABEL: &str = "Task";
pub const FILE_VERSION_LABEL: &str = "FileVersion";
pub const FILE_CONFLICT_LABEL: &str = "FileConflict";
pub const NOTIFICATION_LABEL: &str = "Notification";

pub type AgentId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn all() -> [TaskStatus; 4] {
        [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoordinationError::Validation(format!(
                "未知的任务状态: {}",
                other
            ))),
        }
    }
}

/// 任务优先级
///
/// 从存储读回无法识别的值时落到 `Unknown`，排序权重为 0。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
    Unknown,
}

impl TaskPriority {
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 4,
            TaskPriority::High => 3,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 1,
            TaskPriority::Unknown => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
            TaskPriority::Unknown => "unknown",
        }
    }
}

impl From<String> for TaskPriority {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(TaskPriority::Unknown)
    }
}

impl From<TaskPriority> for String {
    fn from(value: TaskPriority) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            other => Err(CoordinationError::Validation(format!(
                "未知的任务优先级: {}",
                other
            ))),
        }
    }
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub description: String,
    pub status: TaskStatus,
    pub delegated_by: AgentId,
    /// `None` 表示任意 Agent 可认领
    pub assigned_to: Option<AgentId>,
    pub priority: TaskPriority,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claimed_by: Option<AgentId>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// 调用方附加数据
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 创建任务的输入
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_type: String,
    pub description: String,
    pub delegated_by: AgentId,
    pub assigned_to: Option<AgentId>,
    pub priority: TaskPriority,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NewTask {
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        delegated_by: impl Into<String>,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            description: description.into(),
            delegated_by: delegated_by.into(),
            ..Default::default()
        }
    }

    pub fn assigned_to(mut self, agent: impl Into<String>) -> Self {
        self.assigned_to = Some(agent.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// 各状态任务数
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

/// 文件版本, 只追加
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileVersion {
    pub id: String,
    pub file_path: String,
    pub agent: AgentId,
    pub checksum: String,
    pub content_preview: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
            ConflictSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictSeverity {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ConflictSeverity::Low),
            "medium" => Ok(ConflictSeverity::Medium),
            "high" => Ok(ConflictSeverity::High),
            "critical" => Ok(ConflictSeverity::Critical),
            other => Err(CoordinationError::Validation(format!(
                "未知的冲突等级: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Detected,
    Escalated,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Detected => "detected",
            ConflictStatus::Escalated => "escalated",
            ConflictStatus::Resolved => "resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, ConflictStatus::Resolved)
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStatus {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "detected" => Ok(ConflictStatus::Detected),
            "escalated" => Ok(ConflictStatus::Escalated),
            "resolved" => Ok(ConflictStatus::Resolved),
            other => Err(CoordinationError::Validation(format!(
                "未知的冲突状态: {}",
                other
            ))),
        }
    }
}

/// 文件冲突记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileConflict {
    pub id: String,
    pub file_path: String,
    pub agents_involved: Vec<AgentId>,
    pub severity: ConflictSeverity,
    pub status: ConflictStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalation_reason: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<AgentId>,
    #[serde(default)]
    pub resolution_notes: Option<String>,
}

/// 通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub agent: AgentId,
    pub notification_type: String,
    pub summary: String,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}
