//! 配置管理
//!
//! 加载顺序: 内置默认值 → 可选配置文件 (JSON/TOML) → `OPENCLAW__` 前缀的环境变量。
//! 例如 `OPENCLAW__CLAIM__MAX_RETRIES=5`、
//! `OPENCLAW__CONSISTENCY__MONITORED_FILES=memory/*.md,MEMORY.md`。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{CoordinationError, Result};

pub const ENV_PREFIX: &str = "OPENCLAW";

/// 主配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoordinationConfig {
    /// 存储配置
    #[serde(default)]
    pub store: StoreConfig,
    /// 任务认领配置
    #[serde(default)]
    pub claim: ClaimConfig,
    /// 文件一致性配置
    #[serde(default)]
    pub consistency: ConsistencyConfig,
    /// 委派配置
    #[serde(default)]
    pub delegation: DelegationConfig,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// 存储地址, `memory://` 或 `sqlite://<path>`
    pub uri: String,
    /// 存储不可用时是否降级运行
    pub fallback_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "memory://".to_string(),
            fallback_mode: true,
        }
    }
}

/// 认领重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// 总尝试次数
    pub max_retries: u32,
    /// 退避基准 (毫秒)
    pub base_delay_ms: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
        }
    }
}

impl ClaimConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// 文件一致性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// 触发阈值升级的冲突数
    pub escalation_threshold: usize,
    /// 阈值统计的滑动窗口 (秒)
    pub escalation_window_secs: i64,
    /// 一致性检查读取的最近版本数
    pub recent_versions_limit: usize,
    /// 视为"快速连续编辑"的时间窗口 (秒)
    pub rapid_edit_window_secs: i64,
    /// 版本内容预览的最大字符数
    pub preview_chars: usize,
    /// 监控的文件, 支持通配符
    pub monitored_files: Vec<String>,
    /// 接收升级通知的主管 Agent
    pub supervisor_agent: String,
    /// 后台扫描间隔 (秒)
    pub scan_interval_secs: u64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 3,
            escalation_window_secs: 300,
            recent_versions_limit: 20,
            rapid_edit_window_secs: 60,
            preview_chars: 500,
            monitored_files: vec![
                "MEMORY.md".to_string(),
                "AGENTS.md".to_string(),
                "memory/*.md".to_string(),
            ],
            supervisor_agent: "main".to_string(),
            scan_interval_secs: 60,
        }
    }
}

/// 委派配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// 无路由信号时的默认 Agent
    pub orchestrator_agent: String,
    /// 当前进程的 Agent 身份, 委派给自己时不投递
    pub self_agent: String,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            orchestrator_agent: "main".to_string(),
            self_agent: "main".to_string(),
        }
    }
}

impl CoordinationConfig {
    /// 从默认值、可选文件和环境变量加载
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&CoordinationConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: CoordinationConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("consistency.monitored_files"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoordinationError::Config(format!("读取配置文件失败: {}", e)))?;

        let config: CoordinationConfig = serde_json::from_str(&content)
            .map_err(|e| CoordinationError::Config(format!("解析配置文件失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CoordinationError::Config(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| CoordinationError::Config(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.consistency.escalation_threshold == 0 {
            return Err(CoordinationError::Config(
                "escalation_threshold 必须大于 0".to_string(),
            ));
        }
        if self.consistency.escalation_window_secs <= 0 {
            return Err(CoordinationError::Config(
                "escalation_window_secs 必须大于 0".to_string(),
            ));
        }
        if self.consistency.recent_versions_limit == 0 {
            return Err(CoordinationError::Config(
                "recent_versions_limit 必须大于 0".to_string(),
            ));
        }
        if self.store.uri.trim().is_empty() {
            return Err(CoordinationError::Config("store.uri 不能为空".to_string()));
        }
        Ok(())
    }
}
