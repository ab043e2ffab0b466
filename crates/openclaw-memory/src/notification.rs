//! 通知
//!
//! 任务完成/失败和冲突升级都会给相关 Agent 留一条通知。
//! 投递本身不在这里处理，调用方只拿到通知 ID。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use openclaw_core::{Clock, IdGenerator, Result, SystemClock};

use crate::query::{QuerySpec, Record};
use crate::store::StoreAdapter;
use crate::types::{NOTIFICATION_LABEL, Notification};

pub const TASK_COMPLETED: &str = "task_completed";
pub const TASK_FAILED: &str = "task_failed";
pub const CONFLICT_ESCALATED: &str = "conflict_escalated";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_notification(
        &self,
        agent: &str,
        notification_type: &str,
        summary: &str,
        related_id: Option<&str>,
    ) -> Result<String>;
}

/// 持久化到图存储的通知收件箱
pub struct StoreNotificationSink {
    adapter: StoreAdapter,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
}

impl StoreNotificationSink {
    pub fn new(adapter: StoreAdapter) -> Self {
        Self::with_clock(adapter, Arc::new(SystemClock))
    }

    pub fn with_clock(adapter: StoreAdapter, clock: Arc<dyn Clock>) -> Self {
        Self {
            adapter,
            clock,
            ids: IdGenerator::with_prefix("notif"),
        }
    }

    /// 未读通知, 最新在前
    pub async fn list_unread(&self, agent: &str) -> Result<Vec<Notification>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        session
            .fetch(
                &QuerySpec::label(NOTIFICATION_LABEL)
                    .where_eq("agent", agent)
                    .where_eq("read", false)
                    .order_desc("created_at"),
            )
            .await
    }

    pub async fn list_for_agent(&self, agent: &str, limit: usize) -> Result<Vec<Notification>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        session
            .fetch(
                &QuerySpec::label(NOTIFICATION_LABEL)
                    .where_eq("agent", agent)
                    .order_desc("created_at")
                    .limit(limit),
            )
            .await
    }

    pub async fn mark_read(&self, notification_id: &str) -> Result<bool> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(false);
        };
        let updated = session
            .update_where(
                &QuerySpec::label(NOTIFICATION_LABEL)
                    .where_eq("id", notification_id)
                    .where_eq("read", false),
                Record::new().set("read", true),
            )
            .await?;
        Ok(updated.is_some())
    }

    pub async fn mark_all_read(&self, agent: &str) -> Result<usize> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(0);
        };
        let query = QuerySpec::label(NOTIFICATION_LABEL)
            .where_eq("agent", agent)
            .where_eq("read", false);

        let mut marked = 0;
        while session
            .update_where(&query, Record::new().set("read", true))
            .await?
            .is_some()
        {
            marked += 1;
        }
        Ok(marked)
    }
}

#[async_trait]
impl NotificationSink for StoreNotificationSink {
    async fn create_notification(
        &self,
        agent: &str,
        notification_type: &str,
        summary: &str,
        related_id: Option<&str>,
    ) -> Result<String> {
        let id = self.ids.generate();
        let Some(session) = self.adapter.session().await? else {
            warn!(agent, notification_type, "降级模式下通知未持久化");
            return Ok(format!("fallback-{}", id));
        };

        let notification = Notification {
            id: id.clone(),
            agent: agent.to_string(),
            notification_type: notification_type.to_string(),
            summary: summary.to_string(),
            related_id: related_id.map(str::to_string),
            read: false,
            created_at: self.clock.now(),
        };
        session.insert(NOTIFICATION_LABEL, &notification).await?;
        debug!(agent, notification_type, id = %id, "notification created");
        Ok(id)
    }
}
