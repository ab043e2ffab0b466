//! 统一错误处理

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinationError {
    /// 条件写入输给了另一个认领者
    #[error("竞争条件: {0}")]
    RaceCondition(String),

    #[error("冲突不存在: {0}")]
    ConflictNotFound(String),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordinationError {
    pub fn is_race_condition(&self) -> bool {
        matches!(self, CoordinationError::RaceCondition(_))
    }
}

impl From<config::ConfigError> for CoordinationError {
    fn from(err: config::ConfigError) -> Self {
        CoordinationError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
