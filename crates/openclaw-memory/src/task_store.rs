//! 任务存储
//!
//! 任务生命周期: pending → in_progress → completed | failed，只进不退。
//! 认领通过单记录条件写入完成，同一任务并发认领只有一个赢家，
//! 输家得到 [`CoordinationError::RaceCondition`]。

use std::sync::Arc;
use tracing::{debug, info, warn};

use openclaw_core::{
    Clock, CoordinationConfig, CoordinationError, IdGenerator, Result, SystemClock,
};

use crate::notification::{NotificationSink, TASK_COMPLETED, TASK_FAILED};
use crate::query::{QuerySpec, Record};
use crate::retry::{RetryPolicy, retry_on_race};
use crate::store::StoreAdapter;
use crate::types::{NewTask, TASK_LABEL, Task, TaskCounts, TaskStatus};

pub struct TaskStore {
    adapter: StoreAdapter,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    retry: RetryPolicy,
}

impl TaskStore {
    pub fn new(adapter: StoreAdapter, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            adapter,
            notifier,
            clock: Arc::new(SystemClock),
            ids: IdGenerator::with_prefix("task"),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(
        adapter: StoreAdapter,
        notifier: Arc<dyn NotificationSink>,
        config: &CoordinationConfig,
    ) -> Self {
        Self::new(adapter, notifier).with_retry_policy(RetryPolicy::from(&config.claim))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 创建任务, 返回任务 ID
    ///
    /// `assigned_to` 为 `"any"` 时视为未指派。降级模式下返回不落库的合成 ID。
    pub async fn create_task(&self, new: NewTask) -> Result<String> {
        if new.task_type.trim().is_empty() {
            return Err(CoordinationError::Validation("任务类型不能为空".to_string()));
        }
        if new.description.trim().is_empty() {
            return Err(CoordinationError::Validation("任务描述不能为空".to_string()));
        }
        if new.delegated_by.trim().is_empty() {
            return Err(CoordinationError::Validation("委派方不能为空".to_string()));
        }

        let id = self.ids.generate();
        let Some(session) = self.adapter.session().await? else {
            warn!(task_type = %new.task_type, "降级模式: 任务未持久化");
            return Ok(format!("fallback-{}", id));
        };

        let task = Task {
            id: id.clone(),
            task_type: new.task_type,
            description: new.description,
            status: TaskStatus::Pending,
            delegated_by: new.delegated_by,
            assigned_to: normalize_assignee(new.assigned_to),
            priority: new.priority,
            created_at: self.clock.now(),
            claimed_at: None,
            claimed_by: None,
            completed_at: None,
            results: None,
            error_message: None,
            extra: new.extra,
        };

        session.insert(TASK_LABEL, &task).await?;
        info!(
            task_id = %id,
            task_type = %task.task_type,
            assigned_to = ?task.assigned_to,
            priority = %task.priority,
            "任务已创建"
        );
        Ok(id)
    }

    /// 认领一个任务
    ///
    /// 选出优先级最高、创建最早的可认领任务并原子地置为 in_progress。
    /// 没有可认领任务时返回 `Ok(None)`。
    pub async fn claim_task(&self, agent: &str) -> Result<Option<Task>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(None);
        };

        let candidates: Vec<Task> = session.fetch(&pending_for(Some(agent))).await?;
        let Some(candidate) = sort_by_priority(candidates).into_iter().next() else {
            debug!(agent, "没有可认领的任务");
            return Ok(None);
        };

        let now = self.clock.now();
        let claimed: Option<Task> = session
            .update(
                &QuerySpec::label(TASK_LABEL)
                    .where_eq("id", candidate.id.as_str())
                    .where_eq("status", TaskStatus::Pending.as_str()),
                Record::new()
                    .set("status", TaskStatus::InProgress.as_str())
                    .set("claimed_by", agent)
                    .set("claimed_at", now.timestamp_millis()),
            )
            .await?;

        match claimed {
            Some(task) => {
                info!(task_id = %task.id, agent, priority = %task.priority, "任务已认领");
                Ok(Some(task))
            }
            None => {
                debug!(task_id = %candidate.id, agent, "认领竞争失败");
                Err(CoordinationError::RaceCondition(format!(
                    "任务 {} 已被其他 Agent 认领",
                    candidate.id
                )))
            }
        }
    }

    /// 带竞争重试的认领
    pub async fn claim_task_with_retry(&self, agent: &str) -> Result<Option<Task>> {
        retry_on_race(&self.retry, || self.claim_task(agent)).await
    }

    /// 完成任务
    ///
    /// 只有 in_progress 的任务可以完成；任务不存在或状态不符时返回 `false`。
    pub async fn complete_task(
        &self,
        task_id: &str,
        results: serde_json::Value,
        notify_delegator: bool,
    ) -> Result<bool> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(false);
        };

        let completed: Option<Task> = session
            .update(
                &in_progress(task_id),
                Record::new()
                    .set("status", TaskStatus::Completed.as_str())
                    .set("completed_at", self.clock.now().timestamp_millis())
                    .set("results", results),
            )
            .await?;
        drop(session);

        let Some(task) = completed else {
            debug!(task_id, "任务不存在或不在进行中, 无法完成");
            return Ok(false);
        };

        info!(task_id, claimed_by = ?task.claimed_by, "任务已完成");
        if notify_delegator {
            let summary = format!(
                "任务 {} ({}) 已由 {} 完成",
                task.id,
                task.task_type,
                task.claimed_by.as_deref().unwrap_or("unknown")
            );
            self.notify(&task, TASK_COMPLETED, &summary).await;
        }
        Ok(true)
    }

    /// 标记任务失败, 总是通知委派方
    pub async fn fail_task(&self, task_id: &str, error_message: &str) -> Result<bool> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(false);
        };

        let failed: Option<Task> = session
            .update(
                &in_progress(task_id),
                Record::new()
                    .set("status", TaskStatus::Failed.as_str())
                    .set("completed_at", self.clock.now().timestamp_millis())
                    .set("error_message", error_message),
            )
            .await?;
        drop(session);

        let Some(task) = failed else {
            debug!(task_id, "任务不存在或不在进行中, 无法标记失败");
            return Ok(false);
        };

        warn!(task_id, error = error_message, "任务失败");
        let summary = format!(
            "任务 {} ({}) 执行失败: {}",
            task.id, task.task_type, error_message
        );
        self.notify(&task, TASK_FAILED, &summary).await;
        Ok(true)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(None);
        };
        session
            .fetch_one(&QuerySpec::label(TASK_LABEL).where_eq("id", task_id))
            .await
    }

    /// 待处理任务; 指定 Agent 时只返回指派给它或未指派的任务
    pub async fn list_pending_tasks(&self, agent: Option<&str>) -> Result<Vec<Task>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        let tasks = session.fetch(&pending_for(agent)).await?;
        Ok(sort_by_priority(tasks))
    }

    /// 按状态列出任务
    ///
    /// 指定 Agent 时: pending 按可认领过滤，其余状态按 `claimed_by` 过滤。
    pub async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        agent: Option<&str>,
    ) -> Result<Vec<Task>> {
        if status == TaskStatus::Pending {
            return self.list_pending_tasks(agent).await;
        }

        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        let query = QuerySpec::label(TASK_LABEL)
            .where_eq("status", status.as_str())
            .where_eq_opt("claimed_by", agent);
        let tasks = session.fetch(&query).await?;
        Ok(sort_by_priority(tasks))
    }

    pub async fn task_counts(&self) -> Result<TaskCounts> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(TaskCounts::default());
        };

        let mut counts = TaskCounts::default();
        for status in TaskStatus::all() {
            let n = session
                .count(&QuerySpec::label(TASK_LABEL).where_eq("status", status.as_str()))
                .await?;
            match status {
                TaskStatus::Pending => counts.pending = n,
                TaskStatus::InProgress => counts.in_progress = n,
                TaskStatus::Completed => counts.completed = n,
                TaskStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    async fn notify(&self, task: &Task, notification_type: &str, summary: &str) {
        if let Err(e) = self
            .notifier
            .create_notification(&task.delegated_by, notification_type, summary, Some(&task.id))
            .await
        {
            warn!(task_id = %task.id, "通知委派方失败: {}", e);
        }
    }
}

fn normalize_assignee(assigned_to: Option<String>) -> Option<String> {
    assigned_to
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("any"))
}

fn pending_for(agent: Option<&str>) -> QuerySpec {
    let query = QuerySpec::label(TASK_LABEL).where_eq("status", TaskStatus::Pending.as_str());
    match agent {
        Some(agent) => query.where_eq_or_null("assigned_to", agent),
        None => query,
    }
}

fn in_progress(task_id: &str) -> QuerySpec {
    QuerySpec::label(TASK_LABEL)
        .where_eq("id", task_id)
        .where_eq("status", TaskStatus::InProgress.as_str())
}

/// 优先级从高到低, 同优先级创建早的在前
pub fn sort_by_priority(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use openclaw_core::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::notification::StoreNotificationSink;
    use crate::store::{GraphStore, InMemoryGraphStore};
    use crate::types::TaskPriority;

    struct Fixture {
        store: TaskStore,
        inbox: Arc<StoreNotificationSink>,
        clock: ManualClock,
    }

    fn fixture_with(adapter: StoreAdapter) -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let inbox = Arc::new(StoreNotificationSink::new(adapter.clone()));
        let store = TaskStore::new(adapter, inbox.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_retry_policy(RetryPolicy::new(3, std::time::Duration::from_millis(1)));
        Fixture { store, inbox, clock }
    }

    fn fixture() -> Fixture {
        fixture_with(StoreAdapter::in_memory())
    }

    async fn create(f: &Fixture, priority: TaskPriority, assigned_to: Option<&str>) -> String {
        let mut new = NewTask::new("research", "look into it", "main").with_priority(priority);
        if let Some(agent) = assigned_to {
            new = new.assigned_to(agent);
        }
        let id = f.store.create_task(new).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        id
    }

    #[tokio::test]
    async fn test_end_to_end_claim_and_complete() {
        let f = fixture();
        let id = f
            .store
            .create_task(
                NewTask::new("research", "compare vector stores", "main")
                    .assigned_to("researcher")
                    .with_priority(TaskPriority::High),
            )
            .await
            .unwrap();

        let claimed = f.store.claim_task("researcher").await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.claimed_by.as_deref(), Some("researcher"));
        assert!(claimed.claimed_at.is_some());

        let done = f
            .store
            .complete_task(&id, serde_json::json!({"summary": "done"}), true)
            .await
            .unwrap();
        assert!(done);

        let notifications = f.inbox.list_unread("main").await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_type, TASK_COMPLETED);
        assert_eq!(notifications[0].related_id.as_deref(), Some(id.as_str()));

        let task = f.store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.results, Some(serde_json::json!({"summary": "done"})));
    }

    #[tokio::test]
    async fn test_priority_then_age_ordering() {
        let f = fixture();
        let low = create(&f, TaskPriority::Low, None).await;
        let high_old = create(&f, TaskPriority::High, None).await;
        let critical = create(&f, TaskPriority::Critical, None).await;
        let high_new = create(&f, TaskPriority::High, None).await;
        let normal = create(&f, TaskPriority::Normal, None).await;

        let mut order = Vec::new();
        while let Some(task) = f.store.claim_task("worker").await.unwrap() {
            order.push(task.id);
        }
        assert_eq!(order, vec![critical, high_old, high_new, normal, low]);
    }

    #[tokio::test]
    async fn test_claim_respects_assignment() {
        let f = fixture();
        let for_dev = create(&f, TaskPriority::Critical, Some("developer")).await;
        let pooled = create(&f, TaskPriority::Low, Some("any")).await;

        let task = f.store.claim_task("researcher").await.unwrap().unwrap();
        assert_eq!(task.id, pooled);
        assert!(task.assigned_to.is_none());
        assert!(f.store.claim_task("researcher").await.unwrap().is_none());

        let task = f.store.claim_task("developer").await.unwrap().unwrap();
        assert_eq!(task.id, for_dev);
    }

    #[tokio::test]
    async fn test_state_is_monotonic() {
        let f = fixture();
        let id = create(&f, TaskPriority::Normal, None).await;

        // 未认领的任务不能完成或失败
        assert!(!f.store.complete_task(&id, serde_json::json!({}), true).await.unwrap());
        assert!(!f.store.fail_task(&id, "nope").await.unwrap());
        assert_eq!(
            f.store.get_task(&id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );

        f.store.claim_task("worker").await.unwrap().unwrap();
        assert!(f.store.fail_task(&id, "timeout").await.unwrap());

        assert!(!f.store.complete_task(&id, serde_json::json!({}), true).await.unwrap());
        assert!(!f.store.fail_task(&id, "again").await.unwrap());
        let task = f.store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("timeout"));

        let notifications = f.inbox.list_unread("main").await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_type, TASK_FAILED);
    }

    #[tokio::test]
    async fn test_missing_task_returns_false() {
        let f = fixture();
        assert!(!f.store.complete_task("task-missing", serde_json::json!({}), true).await.unwrap());
        assert!(!f.store.fail_task("task-missing", "x").await.unwrap());
        assert!(f.store.get_task("task-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_without_notification() {
        let f = fixture();
        let id = create(&f, TaskPriority::Normal, None).await;
        f.store.claim_task("worker").await.unwrap();
        assert!(f.store.complete_task(&id, serde_json::json!(null), false).await.unwrap());
        assert!(f.inbox.list_unread("main").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let f = fixture();
        let id = create(&f, TaskPriority::Normal, None).await;
        let store = Arc::new(f.store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_task(&format!("agent-{}", i)).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(Some(task)) => {
                    assert_eq!(task.id, id);
                    winners += 1;
                }
                Ok(None) | Err(CoordinationError::RaceCondition(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
    }

    /// 读取候选后抢先认领第一条任务, 模拟另一个 Agent 赢得竞争
    struct InterleavingStore {
        inner: InMemoryGraphStore,
        hijack: AtomicBool,
    }

    #[async_trait]
    impl GraphStore for InterleavingStore {
        fn name(&self) -> &str {
            "interleaving"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, query: &QuerySpec) -> Result<Vec<Record>> {
            let records = self.inner.run(query).await?;
            if query.label == TASK_LABEL && self.hijack.swap(false, Ordering::SeqCst) {
                let mut tasks: Vec<Task> = records
                    .iter()
                    .cloned()
                    .map(Record::into_entity)
                    .collect::<Result<_>>()?;
                tasks = sort_by_priority(tasks);
                if let Some(first) = tasks.first() {
                    self.inner
                        .update_where(
                            &QuerySpec::label(TASK_LABEL).where_eq("id", first.id.as_str()),
                            Record::new()
                                .set("status", "in_progress")
                                .set("claimed_by", "intruder"),
                        )
                        .await?;
                }
            }
            Ok(records)
        }

        async fn count(&self, query: &QuerySpec) -> Result<usize> {
            self.inner.count(query).await
        }

        async fn create(&self, label: &str, record: Record) -> Result<()> {
            self.inner.create(label, record).await
        }

        async fn update_where(&self, query: &QuerySpec, changes: Record) -> Result<Option<Record>> {
            self.inner.update_where(query, changes).await
        }
    }

    fn interleaving_fixture() -> (Fixture, Arc<InterleavingStore>) {
        let store = Arc::new(InterleavingStore {
            inner: InMemoryGraphStore::new(),
            hijack: AtomicBool::new(false),
        });
        let f = fixture_with(StoreAdapter::new(store.clone(), true));
        (f, store)
    }

    #[tokio::test]
    async fn test_lost_race_signals_race_condition() {
        let (f, store) = interleaving_fixture();
        create(&f, TaskPriority::High, None).await;
        store.hijack.store(true, Ordering::SeqCst);

        let result = f.store.claim_task("worker").await;
        assert!(matches!(result, Err(CoordinationError::RaceCondition(_))));
    }

    #[tokio::test]
    async fn test_retry_claims_next_task_after_lost_race() {
        let (f, store) = interleaving_fixture();
        create(&f, TaskPriority::High, None).await;
        let second = create(&f, TaskPriority::Low, None).await;
        store.hijack.store(true, Ordering::SeqCst);

        let task = f.store.claim_task_with_retry("worker").await.unwrap().unwrap();
        assert_eq!(task.id, second);
        assert_eq!(task.claimed_by.as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn test_fallback_mode_returns_synthetic_id() {
        let inner = Arc::new(InMemoryGraphStore::new());
        inner.set_available(false);
        let f = fixture_with(StoreAdapter::new(inner.clone(), true));

        let id = f
            .store
            .create_task(NewTask::new("research", "offline", "main"))
            .await
            .unwrap();
        assert!(id.starts_with("fallback-"));
        assert!(f.store.claim_task("worker").await.unwrap().is_none());
        assert!(f.store.list_pending_tasks(None).await.unwrap().is_empty());
        assert!(!f.store.complete_task(&id, serde_json::json!({}), true).await.unwrap());

        let strict = fixture_with(StoreAdapter::new(inner, false));
        assert!(matches!(
            strict.store.create_task(NewTask::new("research", "offline", "main")).await,
            Err(CoordinationError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_validation_fails_fast() {
        let f = fixture();
        let result = f.store.create_task(NewTask::new("research", "  ", "main")).await;
        assert!(matches!(result, Err(CoordinationError::Validation(_))));
        assert_eq!(f.store.task_counts().await.unwrap(), TaskCounts::default());
    }

    #[tokio::test]
    async fn test_listing_and_counts() {
        let f = fixture();
        let a = create(&f, TaskPriority::Low, Some("researcher")).await;
        let b = create(&f, TaskPriority::Critical, None).await;
        create(&f, TaskPriority::High, Some("developer")).await;

        let pending: Vec<String> = f
            .store
            .list_pending_tasks(Some("researcher"))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(pending, vec![b.clone(), a]);

        f.store.claim_task("researcher").await.unwrap();
        let mine = f
            .store
            .list_tasks_by_status(TaskStatus::InProgress, Some("researcher"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, b);

        let counts = f.store.task_counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.in_progress, 1);
    }
}
