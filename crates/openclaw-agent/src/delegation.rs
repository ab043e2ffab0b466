//! 任务委派
//!
//! 脱敏 → 关联上下文 → 路由 → 落库 → 投递。
//! `delegate_task` 位于用户请求路径上，任何错误都转成失败的 [`DelegationResult`]，
//! 已落库的任务保持 pending，等待人工或重试认领。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use openclaw_core::{DelegationConfig, Result};
use openclaw_memory::{AgentId, NewTask, TaskPriority, TaskStore};
use openclaw_security::{PiiCategory, sanitize};

use crate::router::DelegationRouter;

/// 交给目标 Agent 的委派内容 (已脱敏)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub task_id: String,
    pub target: AgentId,
    pub delegated_by: AgentId,
    pub task_type: String,
    pub description: String,
    pub context: Vec<String>,
    pub priority: TaskPriority,
}

/// 投递通道, 例如网关或消息队列
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DelegationTransport: Send + Sync {
    async fn deliver(&self, handoff: &Handoff) -> Result<()>;
}

/// 关联上下文来源
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn related_context(&self, description: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelegationRequest {
    pub description: String,
    pub context: Option<String>,
    pub suggested_agent: Option<AgentId>,
    pub priority: TaskPriority,
    pub delegated_by: AgentId,
    pub task_type: String,
}

impl DelegationRequest {
    pub fn new(description: impl Into<String>, delegated_by: impl Into<AgentId>) -> Self {
        Self {
            description: description.into(),
            context: None,
            suggested_agent: None,
            priority: TaskPriority::Normal,
            delegated_by: delegated_by.into(),
            task_type: "delegated".to_string(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn suggest(mut self, agent: impl Into<AgentId>) -> Self {
        self.suggested_agent = Some(agent.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegationResult {
    pub success: bool,
    pub task_id: Option<String>,
    pub target_agent: Option<AgentId>,
    pub message: Option<String>,
    pub delivered: bool,
    /// 各类敏感信息的替换次数
    pub redactions: BTreeMap<String, usize>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct DelegationProtocol {
    tasks: Arc<TaskStore>,
    router: DelegationRouter,
    transport: Option<Arc<dyn DelegationTransport>>,
    context_source: Option<Arc<dyn ContextSource>>,
    /// 本进程的 Agent 身份, 未设置时以委派方为准
    self_agent: Option<AgentId>,
}

impl DelegationProtocol {
    pub fn new(tasks: Arc<TaskStore>, router: DelegationRouter) -> Self {
        Self {
            tasks,
            router,
            transport: None,
            context_source: None,
            self_agent: None,
        }
    }

    pub fn from_config(tasks: Arc<TaskStore>, config: &DelegationConfig) -> Self {
        Self::new(tasks, DelegationRouter::from_config(config))
            .with_self_agent(config.self_agent.clone())
    }

    pub fn with_self_agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.self_agent = Some(agent.into());
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn DelegationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_context_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context_source = Some(source);
        self
    }

    pub fn router(&self) -> &DelegationRouter {
        &self.router
    }

    pub async fn delegate_task(&self, request: DelegationRequest) -> DelegationResult {
        let started = Instant::now();
        let mut result = DelegationResult {
            started_at: Utc::now(),
            ..Default::default()
        };

        match self.run(&request, &mut result).await {
            Ok(()) => {
                result.success = true;
                result.message = Some(summarize(&result));
            }
            Err(e) => {
                warn!(
                    delegated_by = %request.delegated_by,
                    task_id = ?result.task_id,
                    "委派失败: {}", e
                );
                result.error = Some(e.to_string());
            }
        }

        result.completed_at = Utc::now();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn run(&self, request: &DelegationRequest, result: &mut DelegationResult) -> Result<()> {
        let mut redactions: BTreeMap<String, usize> = BTreeMap::new();
        let mut tally = |counts: &BTreeMap<PiiCategory, usize>| {
            for (category, n) in counts {
                *redactions.entry(category.as_str().to_string()).or_insert(0) += n;
            }
        };

        let description = sanitize(&request.description);
        tally(&description.counts);

        let mut context = Vec::new();
        if let Some(raw) = request.context.as_deref() {
            let cleaned = sanitize(raw);
            tally(&cleaned.counts);
            context.push(cleaned.text);
        }
        if let Some(source) = &self.context_source {
            for snippet in source.related_context(&description.text).await? {
                let cleaned = sanitize(&snippet);
                tally(&cleaned.counts);
                context.push(cleaned.text);
            }
        }
        result.redactions = redactions;

        let target = self
            .router
            .determine_target_agent(&description.text, request.suggested_agent.as_deref());
        result.target_agent = Some(target.clone());

        let new_task = NewTask::new(
            request.task_type.clone(),
            description.text.clone(),
            request.delegated_by.clone(),
        )
        .assigned_to(target.clone())
        .with_priority(request.priority)
        .with_extra("original_description", json!(request.description))
        .with_extra("context", json!(context))
        .with_extra("redactions", json!(result.redactions));

        let task_id = self.tasks.create_task(new_task).await?;
        result.task_id = Some(task_id.clone());
        info!(task_id = %task_id, target = %target, "任务已委派");

        let Some(transport) = &self.transport else {
            return Ok(());
        };
        let this_agent = self.self_agent.as_ref().unwrap_or(&request.delegated_by);
        if &target == this_agent {
            return Ok(());
        }

        let handoff = Handoff {
            task_id,
            target,
            delegated_by: request.delegated_by.clone(),
            task_type: request.task_type.clone(),
            description: description.text,
            context,
            priority: request.priority,
        };
        transport.deliver(&handoff).await?;
        result.delivered = true;
        Ok(())
    }
}

fn summarize(result: &DelegationResult) -> String {
    let task_id = result.task_id.as_deref().unwrap_or("-");
    let target = result.target_agent.as_deref().unwrap_or("-");
    if result.delivered {
        format!("任务 {} 已委派给 {} 并完成投递", task_id, target)
    } else {
        format!("任务 {} 已委派给 {}, 等待认领", task_id, target)
    }
}
