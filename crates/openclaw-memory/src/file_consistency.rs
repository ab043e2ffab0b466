//! 文件一致性检查
//!
//! 多个 Agent 共享同一组记忆文件 (MEMORY.md、memory/*.md 等)。每次写入后记录一个
//! FileVersion；同一文件最近的版本里，不同 Agent 的最新指纹不一致时即视为冲突。
//!
//! 冲突状态: detected → escalated → resolved，升级可以跳过。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use openclaw_core::{
    Clock, ConsistencyConfig, CoordinationError, IdGenerator, Result, SystemClock,
};

use crate::file_tracker::{ChecksumCache, compute_checksum, fingerprint};
use crate::notification::{CONFLICT_ESCALATED, NotificationSink};
use crate::query::{QuerySpec, Record};
use crate::store::StoreAdapter;
use crate::types::{
    AgentId, ConflictSeverity, ConflictStatus, FILE_CONFLICT_LABEL, FILE_VERSION_LABEL,
    FileConflict, FileVersion,
};

/// 一次一致性检查发现的分歧
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictDescriptor {
    pub file_path: String,
    pub agents_involved: Vec<AgentId>,
    pub checksums: Vec<String>,
    pub version_count: usize,
    pub recent_versions: usize,
    pub severity: ConflictSeverity,
}

/// 冲突等级
///
/// 参与 Agent 越多、编辑越密集，等级越高。
pub fn assess_severity(agent_count: usize, recent_versions: usize) -> ConflictSeverity {
    if agent_count >= 4 || recent_versions >= 3 {
        ConflictSeverity::Critical
    } else if agent_count == 3 || recent_versions >= 2 {
        ConflictSeverity::High
    } else if agent_count == 2 {
        ConflictSeverity::Medium
    } else {
        ConflictSeverity::Low
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConflictFilter {
    pub status: Option<ConflictStatus>,
    pub severity: Option<ConflictSeverity>,
    pub file_path: Option<String>,
    pub limit: Option<usize>,
}

impl ConflictFilter {
    pub fn status(mut self, status: ConflictStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn severity(mut self, severity: ConflictSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_query(&self) -> QuerySpec {
        let mut query = QuerySpec::label(FILE_CONFLICT_LABEL)
            .where_eq_opt("status", self.status.map(|s| s.as_str()))
            .where_eq_opt("severity", self.severity.map(|s| s.as_str()))
            .where_eq_opt("file_path", self.file_path.as_deref())
            .order_desc("created_at");
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConflictSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    /// 存在未解决冲突的文件
    pub open_files: Vec<String>,
}

pub struct FileConsistencyChecker {
    adapter: StoreAdapter,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: ConsistencyConfig,
    cache: ChecksumCache,
    monitored: Arc<RwLock<Vec<String>>>,
    workspace: Option<PathBuf>,
    version_ids: IdGenerator,
    conflict_ids: IdGenerator,
}

impl FileConsistencyChecker {
    pub fn new(
        adapter: StoreAdapter,
        notifier: Arc<dyn NotificationSink>,
        settings: ConsistencyConfig,
    ) -> Self {
        let monitored = settings.monitored_files.clone();
        Self {
            adapter,
            notifier,
            clock: Arc::new(SystemClock),
            settings,
            cache: ChecksumCache::new(),
            monitored: Arc::new(RwLock::new(monitored)),
            workspace: None,
            version_ids: IdGenerator::with_prefix("fv"),
            conflict_ids: IdGenerator::with_prefix("conflict"),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 相对路径以该目录为根解析
    pub fn with_workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace = Some(root.into());
        self
    }

    pub fn settings(&self) -> &ConsistencyConfig {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn cache(&self) -> &ChecksumCache {
        &self.cache
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn path_key(&self, path: &Path) -> String {
        self.resolve(path).to_string_lossy().to_string()
    }

    pub fn compute_checksum(&self, path: &Path) -> Option<String> {
        compute_checksum(&self.resolve(path))
    }

    /// 记录一个文件版本, 文件不存在时返回 `None`
    pub async fn record_version(&self, path: &Path, agent: &str) -> Result<Option<String>> {
        let resolved = self.resolve(path);
        let Some((checksum, preview)) = fingerprint(&resolved, self.settings.preview_chars) else {
            debug!(path = %resolved.display(), "文件不可读, 跳过版本记录");
            return Ok(None);
        };
        let key = resolved.to_string_lossy().to_string();
        let id = self.version_ids.generate();

        let Some(session) = self.adapter.session().await? else {
            self.cache.record(&key, agent, &checksum);
            warn!(path = %key, agent, "降级模式: 文件版本未持久化");
            return Ok(Some(format!("fallback-{}", id)));
        };

        let version = FileVersion {
            id: id.clone(),
            file_path: key.clone(),
            agent: agent.to_string(),
            checksum: checksum.clone(),
            content_preview: preview,
            created_at: self.clock.now(),
        };
        session.insert(FILE_VERSION_LABEL, &version).await?;
        self.cache.record(&key, agent, &checksum);

        debug!(path = %key, agent, checksum = %checksum, "文件版本已记录");
        Ok(Some(id))
    }

    /// 检查单个文件的最近版本是否存在分歧
    pub async fn check_consistency(&self, path: &Path) -> Result<Option<ConflictDescriptor>> {
        let key = self.path_key(path);
        let Some(session) = self.adapter.session().await? else {
            return Ok(None);
        };
        let versions: Vec<FileVersion> = session
            .fetch(
                &QuerySpec::label(FILE_VERSION_LABEL)
                    .where_eq("file_path", key.as_str())
                    .order_desc("created_at")
                    .limit(self.settings.recent_versions_limit),
            )
            .await?;
        drop(session);

        Ok(self.assess(&key, &versions, self.clock.now()))
    }

    fn assess(
        &self,
        key: &str,
        versions: &[FileVersion],
        now: DateTime<Utc>,
    ) -> Option<ConflictDescriptor> {
        // versions 已按时间倒序, 每个 Agent 取最新指纹
        let mut latest: BTreeMap<&str, &str> = BTreeMap::new();
        for version in versions {
            latest
                .entry(version.agent.as_str())
                .or_insert(version.checksum.as_str());
        }

        let checksums: BTreeSet<&str> = latest.values().copied().collect();
        if checksums.len() <= 1 {
            return None;
        }

        let rapid_window = Duration::seconds(self.settings.rapid_edit_window_secs);
        let recent_versions = versions
            .iter()
            .filter(|v| now - v.created_at <= rapid_window)
            .count();
        let agents: Vec<AgentId> = latest.keys().map(|a| a.to_string()).collect();

        Some(ConflictDescriptor {
            file_path: key.to_string(),
            severity: assess_severity(agents.len(), recent_versions),
            agents_involved: agents,
            checksums: checksums.into_iter().map(str::to_string).collect(),
            version_count: versions.len(),
            recent_versions,
        })
    }

    /// 展开监控列表中的通配符
    pub async fn expand_monitored_paths(&self) -> Vec<PathBuf> {
        let entries = self.monitored.read().await.clone();
        let mut paths = Vec::new();

        for entry in entries {
            let resolved = self.resolve(Path::new(&entry));
            if !is_glob(&entry) {
                paths.push(resolved);
                continue;
            }
            match glob::glob(&resolved.to_string_lossy()) {
                Ok(matches) => paths.extend(matches.flatten().filter(|p| p.is_file())),
                Err(e) => warn!("无效的监控模式 {}: {}", entry, e),
            }
        }

        paths.sort();
        paths.dedup();
        paths
    }

    /// 扫描所有监控文件并记录发现的冲突
    pub async fn detect_conflicts(&self) -> Result<Vec<FileConflict>> {
        let mut conflicts = Vec::new();
        for path in self.expand_monitored_paths().await {
            if let Some(descriptor) = self.check_consistency(&path).await? {
                conflicts.push(self.record_conflict(&descriptor).await?);
            }
        }

        if !conflicts.is_empty() {
            info!("检测到 {} 个文件冲突", conflicts.len());
        }
        Ok(conflicts)
    }

    /// 持久化冲突
    ///
    /// 同一文件已有未解决冲突时合并参与者并取更高等级，不重复创建。
    pub async fn record_conflict(&self, descriptor: &ConflictDescriptor) -> Result<FileConflict> {
        let now = self.clock.now();
        let Some(session) = self.adapter.session().await? else {
            return Ok(FileConflict {
                id: format!("fallback-{}", self.conflict_ids.generate()),
                file_path: descriptor.file_path.clone(),
                agents_involved: descriptor.agents_involved.clone(),
                severity: descriptor.severity,
                status: ConflictStatus::Detected,
                created_at: now,
                escalated_at: None,
                escalation_reason: None,
                resolved_at: None,
                resolved_by: None,
                resolution_notes: None,
            });
        };

        let open_query = QuerySpec::label(FILE_CONFLICT_LABEL)
            .where_eq("file_path", descriptor.file_path.as_str())
            .where_in("status", open_statuses());

        if let Some(existing) = session.fetch_one::<FileConflict>(&open_query).await? {
            let agents: BTreeSet<AgentId> = existing
                .agents_involved
                .iter()
                .chain(descriptor.agents_involved.iter())
                .cloned()
                .collect();
            let severity = existing.severity.max(descriptor.severity);
            let changes = Record::new()
                .set("agents_involved", serde_json::to_value(&agents)?)
                .set("severity", severity.as_str());
            let updated: Option<FileConflict> = session
                .update(&open_query.clone().where_eq("id", existing.id.as_str()), changes)
                .await?;
            debug!(conflict_id = %existing.id, "合并到已有冲突");
            return Ok(updated.unwrap_or(existing));
        }

        let conflict = FileConflict {
            id: self.conflict_ids.generate(),
            file_path: descriptor.file_path.clone(),
            agents_involved: descriptor.agents_involved.clone(),
            severity: descriptor.severity,
            status: ConflictStatus::Detected,
            created_at: now,
            escalated_at: None,
            escalation_reason: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        };
        session.insert(FILE_CONFLICT_LABEL, &conflict).await?;

        warn!(
            conflict_id = %conflict.id,
            path = %conflict.file_path,
            severity = %conflict.severity,
            agents = ?conflict.agents_involved,
            "文件冲突"
        );
        Ok(conflict)
    }

    /// 升级冲突并通知主管 Agent
    ///
    /// 冲突不存在时返回 `ConflictNotFound`；已解决的冲突不再升级，返回 `false`。
    pub async fn escalate_conflict(&self, conflict_id: &str, reason: &str) -> Result<bool> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(false);
        };

        let escalated: Option<FileConflict> = session
            .update(
                &QuerySpec::label(FILE_CONFLICT_LABEL)
                    .where_eq("id", conflict_id)
                    .where_in("status", open_statuses()),
                Record::new()
                    .set("status", ConflictStatus::Escalated.as_str())
                    .set("escalation_reason", reason)
                    .set("escalated_at", self.clock.now().timestamp_millis()),
            )
            .await?;

        let Some(conflict) = escalated else {
            let exists = session
                .count(&QuerySpec::label(FILE_CONFLICT_LABEL).where_eq("id", conflict_id))
                .await?
                > 0;
            if exists {
                debug!(conflict_id, "冲突已解决, 不再升级");
                return Ok(false);
            }
            return Err(CoordinationError::ConflictNotFound(conflict_id.to_string()));
        };
        drop(session);

        warn!(conflict_id, path = %conflict.file_path, reason, "冲突已升级");
        let summary = format!(
            "文件 {} 冲突已升级 ({}): {}; 涉及 Agent: {}",
            conflict.file_path,
            conflict.severity,
            reason,
            conflict.agents_involved.join(", ")
        );
        if let Err(e) = self
            .notifier
            .create_notification(
                &self.settings.supervisor_agent,
                CONFLICT_ESCALATED,
                &summary,
                Some(conflict_id),
            )
            .await
        {
            warn!(conflict_id, "升级通知失败: {}", e);
        }
        Ok(true)
    }

    /// 窗口内冲突数达到阈值时, 升级窗口内所有 detected 冲突
    pub async fn check_and_escalate_threshold(&self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let window_start = now - Duration::seconds(self.settings.escalation_window_secs);

        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        let in_window: Vec<FileConflict> = session
            .fetch(
                &QuerySpec::label(FILE_CONFLICT_LABEL)
                    .where_gte("created_at", window_start.timestamp_millis())
                    .order_asc("created_at"),
            )
            .await?;
        drop(session);

        if in_window.len() < self.settings.escalation_threshold {
            return Ok(Vec::new());
        }

        let reason = format!(
            "threshold exceeded: {} conflicts within {}s (threshold {})",
            in_window.len(),
            self.settings.escalation_window_secs,
            self.settings.escalation_threshold
        );

        let mut escalated = Vec::new();
        for conflict in in_window
            .iter()
            .filter(|c| c.status == ConflictStatus::Detected)
        {
            if self.escalate_conflict(&conflict.id, &reason).await? {
                escalated.push(conflict.id.clone());
            }
        }

        if !escalated.is_empty() {
            warn!("阈值升级: {} 个冲突", escalated.len());
        }
        Ok(escalated)
    }

    /// 解决冲突
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<bool> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(false);
        };

        let mut changes = Record::new()
            .set("status", ConflictStatus::Resolved.as_str())
            .set("resolved_by", resolved_by)
            .set("resolved_at", self.clock.now().timestamp_millis());
        if let Some(notes) = notes {
            changes = changes.set("resolution_notes", notes);
        }

        let resolved: Option<FileConflict> = session
            .update(
                &QuerySpec::label(FILE_CONFLICT_LABEL)
                    .where_eq("id", conflict_id)
                    .where_in("status", open_statuses()),
                changes,
            )
            .await?;

        match resolved {
            Some(conflict) => {
                info!(conflict_id, path = %conflict.file_path, resolved_by, "冲突已解决");
                Ok(true)
            }
            None => Err(CoordinationError::ConflictNotFound(conflict_id.to_string())),
        }
    }

    /// 文件版本历史, 最新在前
    pub async fn get_file_history(&self, path: &Path, limit: usize) -> Result<Vec<FileVersion>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        session
            .fetch(
                &QuerySpec::label(FILE_VERSION_LABEL)
                    .where_eq("file_path", self.path_key(path).as_str())
                    .order_desc("created_at")
                    .limit(limit),
            )
            .await
    }

    pub async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<FileConflict>> {
        let Some(session) = self.adapter.session().await? else {
            return Ok(Vec::new());
        };
        session.fetch(&filter.to_query()).await
    }

    pub async fn get_conflict_summary(&self) -> Result<ConflictSummary> {
        let conflicts = self.list_conflicts(&ConflictFilter::default()).await?;

        let mut summary = ConflictSummary {
            total: conflicts.len(),
            ..Default::default()
        };
        let mut open_files = BTreeSet::new();
        for conflict in &conflicts {
            *summary
                .by_status
                .entry(conflict.status.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_severity
                .entry(conflict.severity.as_str().to_string())
                .or_default() += 1;
            if conflict.status.is_open() {
                open_files.insert(conflict.file_path.clone());
            }
        }
        summary.open_files = open_files.into_iter().collect();
        Ok(summary)
    }

    pub async fn add_monitored_path(&self, entry: impl Into<String>) {
        let entry = entry.into();
        let mut monitored = self.monitored.write().await;
        if !monitored.contains(&entry) {
            debug!("添加监控路径: {}", entry);
            monitored.push(entry);
        }
    }

    pub async fn remove_monitored_path(&self, entry: &str) -> bool {
        let mut monitored = self.monitored.write().await;
        let before = monitored.len();
        monitored.retain(|e| e != entry);
        before != monitored.len()
    }

    pub async fn monitored_paths(&self) -> Vec<String> {
        self.monitored.read().await.clone()
    }
}

fn open_statuses() -> [&'static str; 2] {
    [
        ConflictStatus::Detected.as_str(),
        ConflictStatus::Escalated.as_str(),
    ]
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;
    use openclaw_core::ManualClock;

    use crate::notification::StoreNotificationSink;

    struct Fixture {
        checker: FileConsistencyChecker,
        inbox: Arc<StoreNotificationSink>,
        clock: ManualClock,
        dir: tempfile::TempDir,
    }

    fn fixture(settings: ConsistencyConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let adapter = StoreAdapter::in_memory();
        let clock = ManualClock::new(Utc::now());
        let inbox = Arc::new(StoreNotificationSink::with_clock(
            adapter.clone(),
            Arc::new(clock.clone()),
        ));
        let checker = FileConsistencyChecker::new(adapter, inbox.clone(), settings)
            .with_clock(Arc::new(clock.clone()))
            .with_workspace(dir.path());
        Fixture {
            checker,
            inbox,
            clock,
            dir,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(ConsistencyConfig {
            monitored_files: vec!["MEMORY.md".to_string(), "memory/*.md".to_string()],
            ..Default::default()
        })
    }

    impl Fixture {
        async fn write_as(&self, rel: &str, content: &str, agent: &str) -> String {
            let path = self.dir.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            self.checker
                .record_version(Path::new(rel), agent)
                .await
                .unwrap()
                .unwrap()
        }

        async fn conflict_on(&self, rel: &str) -> FileConflict {
            self.write_as(rel, "version a", "main").await;
            self.write_as(rel, "version b", "researcher").await;
            let descriptor = self
                .checker
                .check_consistency(Path::new(rel))
                .await
                .unwrap()
                .unwrap();
            self.checker.record_conflict(&descriptor).await.unwrap()
        }
    }

    #[test]
    fn test_severity_policy() {
        assert_eq!(assess_severity(4, 0), ConflictSeverity::Critical);
        assert_eq!(assess_severity(2, 3), ConflictSeverity::Critical);
        assert_eq!(assess_severity(3, 0), ConflictSeverity::High);
        assert_eq!(assess_severity(2, 2), ConflictSeverity::High);
        assert_eq!(assess_severity(2, 1), ConflictSeverity::Medium);
        assert_eq!(assess_severity(1, 0), ConflictSeverity::Low);
    }

    #[tokio::test]
    async fn test_divergent_versions_conflict() {
        let f = default_fixture();
        f.write_as("MEMORY.md", "main's notes", "main").await;
        f.write_as("MEMORY.md", "researcher's notes", "researcher").await;
        f.clock.advance(Duration::seconds(120));

        let descriptor = f
            .checker
            .check_consistency(Path::new("MEMORY.md"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            descriptor.agents_involved,
            vec!["main".to_string(), "researcher".to_string()]
        );
        assert_eq!(descriptor.checksums.len(), 2);
        assert_eq!(descriptor.severity, ConflictSeverity::Medium);
    }

    #[tokio::test]
    async fn test_identical_versions_do_not_conflict() {
        let f = default_fixture();
        f.write_as("MEMORY.md", "same", "main").await;
        f.write_as("MEMORY.md", "same", "researcher").await;

        assert!(f
            .checker
            .check_consistency(Path::new("MEMORY.md"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_single_agent_rewrites_are_not_conflicts() {
        let f = default_fixture();
        f.write_as("MEMORY.md", "draft 1", "main").await;
        f.write_as("MEMORY.md", "draft 2", "main").await;

        assert!(f
            .checker
            .check_consistency(Path::new("MEMORY.md"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rapid_edits_raise_severity() {
        let f = default_fixture();
        f.write_as("MEMORY.md", "a", "main").await;
        f.write_as("MEMORY.md", "b", "researcher").await;
        f.write_as("MEMORY.md", "c", "main").await;

        let descriptor = f
            .checker
            .check_consistency(Path::new("MEMORY.md"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.recent_versions, 3);
        assert_eq!(descriptor.severity, ConflictSeverity::Critical);
    }

    #[tokio::test]
    async fn test_record_version_missing_file() {
        let f = default_fixture();
        let id = f
            .checker
            .record_version(Path::new("missing.md"), "main")
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn test_record_version_updates_cache_and_history() {
        let f = default_fixture();
        f.write_as("MEMORY.md", "one", "main").await;
        f.clock.advance(Duration::seconds(1));
        f.write_as("MEMORY.md", "two", "developer").await;

        let key = f.dir.path().join("MEMORY.md").to_string_lossy().to_string();
        assert!(f.checker.cache().is_divergent(&key));

        let history = f
            .checker
            .get_file_history(Path::new("MEMORY.md"), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].agent, "developer");
        assert_eq!(history[0].content_preview, "two");
    }

    #[tokio::test]
    async fn test_detect_expands_globs_and_deduplicates() {
        let f = default_fixture();
        f.write_as("memory/2024-06-01.md", "a", "main").await;
        f.write_as("memory/2024-06-01.md", "b", "developer").await;
        f.write_as("memory/2024-06-02.md", "same", "main").await;
        f.write_as("memory/2024-06-02.md", "same", "developer").await;

        let first = f.checker.detect_conflicts().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].file_path.ends_with("2024-06-01.md"));
        assert_eq!(first[0].status, ConflictStatus::Detected);

        let second = f.checker.detect_conflicts().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(
            f.checker.list_conflicts(&ConflictFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_monitored_paths_can_change_at_runtime() {
        let f = default_fixture();
        f.write_as("notes/todo.md", "a", "main").await;
        f.write_as("notes/todo.md", "b", "ops").await;
        assert!(f.checker.detect_conflicts().await.unwrap().is_empty());

        f.checker.add_monitored_path("notes/*.md").await;
        f.checker.add_monitored_path("notes/*.md").await;
        assert_eq!(f.checker.monitored_paths().await.len(), 3);
        assert_eq!(f.checker.detect_conflicts().await.unwrap().len(), 1);

        assert!(f.checker.remove_monitored_path("notes/*.md").await);
        assert!(!f.checker.remove_monitored_path("notes/*.md").await);
    }

    #[tokio::test]
    async fn test_escalate_and_resolve_lifecycle() {
        let f = default_fixture();
        let conflict = f.conflict_on("MEMORY.md").await;

        assert!(matches!(
            f.checker.escalate_conflict("conflict-missing", "why").await,
            Err(CoordinationError::ConflictNotFound(_))
        ));

        assert!(f.checker.escalate_conflict(&conflict.id, "manual").await.unwrap());
        assert!(f.checker.escalate_conflict(&conflict.id, "still broken").await.unwrap());

        let stored = f
            .checker
            .list_conflicts(&ConflictFilter::default().status(ConflictStatus::Escalated))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].escalation_reason.as_deref(), Some("still broken"));

        let notifications = f.inbox.list_unread("main").await.unwrap();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].notification_type, CONFLICT_ESCALATED);

        assert!(f
            .checker
            .resolve_conflict(&conflict.id, "main", Some("merged by hand"))
            .await
            .unwrap());
        assert!(!f.checker.escalate_conflict(&conflict.id, "late").await.unwrap());
        assert!(matches!(
            f.checker.resolve_conflict(&conflict.id, "main", None).await,
            Err(CoordinationError::ConflictNotFound(_))
        ));

        let resolved = f
            .checker
            .list_conflicts(&ConflictFilter::default().status(ConflictStatus::Resolved))
            .await
            .unwrap();
        assert_eq!(resolved[0].resolved_by.as_deref(), Some("main"));
        assert_eq!(resolved[0].resolution_notes.as_deref(), Some("merged by hand"));
    }

    #[tokio::test]
    async fn test_resolve_directly_from_detected() {
        let f = default_fixture();
        let conflict = f.conflict_on("MEMORY.md").await;
        assert!(f.checker.resolve_conflict(&conflict.id, "ops", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_threshold_escalation_respects_window() {
        let f = fixture(ConsistencyConfig {
            escalation_threshold: 2,
            escalation_window_secs: 300,
            ..Default::default()
        });

        let old = f.conflict_on("memory/old.md").await;
        f.clock.advance(Duration::seconds(600));

        let mut fresh = Vec::new();
        for name in ["memory/a.md", "memory/b.md", "memory/c.md"] {
            fresh.push(f.conflict_on(name).await.id);
            f.clock.advance(Duration::seconds(10));
        }

        let mut escalated = f.checker.check_and_escalate_threshold().await.unwrap();
        escalated.sort();
        fresh.sort();
        assert_eq!(escalated, fresh);
        assert!(!escalated.contains(&old.id));

        let old_now = f
            .checker
            .list_conflicts(&ConflictFilter::default().file_path(old.file_path.clone()))
            .await
            .unwrap();
        assert_eq!(old_now[0].status, ConflictStatus::Detected);

        // 已升级的冲突不会被重复升级
        assert!(f.checker.check_and_escalate_threshold().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolved_conflicts_count_but_stay_resolved() {
        let f = fixture(ConsistencyConfig {
            escalation_threshold: 3,
            ..Default::default()
        });
        let done = f.conflict_on("memory/a.md").await;
        let b = f.conflict_on("memory/b.md").await;
        let c = f.conflict_on("memory/c.md").await;
        f.checker.resolve_conflict(&done.id, "main", None).await.unwrap();

        let mut escalated = f.checker.check_and_escalate_threshold().await.unwrap();
        escalated.sort();
        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(escalated, expected);

        let still_resolved = f
            .checker
            .list_conflicts(&ConflictFilter::default().status(ConflictStatus::Resolved))
            .await
            .unwrap();
        assert_eq!(still_resolved.len(), 1);
        assert_eq!(still_resolved[0].id, done.id);
        assert!(still_resolved[0].escalated_at.is_none());
    }

    #[tokio::test]
    async fn test_threshold_not_reached() {
        let f = fixture(ConsistencyConfig {
            escalation_threshold: 3,
            ..Default::default()
        });
        f.conflict_on("memory/a.md").await;
        f.conflict_on("memory/b.md").await;
        assert!(f.checker.check_and_escalate_threshold().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_summary() {
        let f = default_fixture();
        let a = f.conflict_on("memory/a.md").await;
        f.conflict_on("memory/b.md").await;
        f.checker.resolve_conflict(&a.id, "main", None).await.unwrap();

        let summary = f.checker.get_conflict_summary().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_status.get("resolved"), Some(&1));
        assert_eq!(summary.by_status.get("detected"), Some(&1));
        assert_eq!(summary.open_files.len(), 1);
        assert!(summary.open_files[0].ends_with("b.md"));
    }
}
