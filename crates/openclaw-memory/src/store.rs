//! 图存储适配层
//!
//! 核心逻辑只依赖 [`GraphStore`] 提供的几个原语: 查询、计数、创建和单记录条件写入。
//! [`StoreAdapter`] 负责降级模式判断与会话生命周期，原始记录在
//! [`StoreSession`] 边界处转换为强类型实体。

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use openclaw_core::{CoordinationError, Result, StoreConfig};

use crate::query::{QuerySpec, Record};
use crate::sqlite_store::SqliteGraphStore;

#[async_trait]
pub trait GraphStore: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    /// 按查询返回记录
    async fn run(&self, query: &QuerySpec) -> Result<Vec<Record>>;

    async fn count(&self, query: &QuerySpec) -> Result<usize>;

    async fn create(&self, label: &str, record: Record) -> Result<()>;

    /// 条件写入: 原子地找到第一条满足查询的记录并合并 `changes`，
    /// 没有记录满足条件时返回 `None`
    async fn update_where(&self, query: &QuerySpec, changes: Record) -> Result<Option<Record>>;
}

/// 进程内存储
pub struct InMemoryGraphStore {
    nodes: RwLock<HashMap<String, Vec<Record>>>,
    available: AtomicBool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// 模拟存储宕机/恢复
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn select<'a>(records: &'a [Record], query: &QuerySpec) -> Vec<&'a Record> {
        let mut matched: Vec<&Record> = records.iter().filter(|r| query.matches(r)).collect();
        matched.sort_by(|a, b| query.compare(a, b));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        matched
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn run(&self, query: &QuerySpec) -> Result<Vec<Record>> {
        query.validate()?;
        let nodes = self.nodes.read().await;
        Ok(nodes
            .get(&query.label)
            .map(|records| Self::select(records, query).into_iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, query: &QuerySpec) -> Result<usize> {
        Ok(self.run(query).await?.len())
    }

    async fn create(&self, label: &str, record: Record) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| CoordinationError::Store("记录缺少 id".to_string()))?
            .to_string();
        let mut nodes = self.nodes.write().await;
        let records = nodes.entry(label.to_string()).or_default();
        if records.iter().any(|r| r.id() == Some(id.as_str())) {
            return Err(CoordinationError::Store(format!("记录已存在: {}", id)));
        }
        records.push(record);
        Ok(())
    }

    async fn update_where(&self, query: &QuerySpec, changes: Record) -> Result<Option<Record>> {
        query.validate()?;
        // 写锁覆盖匹配与修改两步, 保证单记录原子性
        let mut nodes = self.nodes.write().await;
        let Some(records) = nodes.get_mut(&query.label) else {
            return Ok(None);
        };

        let target_id = match Self::select(records, query).first() {
            Some(record) => record.id().map(str::to_string),
            None => return Ok(None),
        };

        let Some(record) = records
            .iter_mut()
            .find(|r| r.id().map(str::to_string) == target_id)
        else {
            return Ok(None);
        };
        record.merge(&changes);
        Ok(Some(record.clone()))
    }
}

/// 存储后端
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    SQLite { path: PathBuf },
}

impl StoreBackend {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri == "memory://" || uri == "memory" {
            return Ok(StoreBackend::Memory);
        }
        if let Some(path) = uri.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(CoordinationError::Config("sqlite 路径不能为空".to_string()));
            }
            return Ok(StoreBackend::SQLite {
                path: PathBuf::from(path),
            });
        }
        Err(CoordinationError::Config(format!("不支持的存储地址: {}", uri)))
    }
}

/// 存储适配器
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn GraphStore>,
    fallback_mode: bool,
    active_sessions: Arc<AtomicUsize>,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn GraphStore>, fallback_mode: bool) -> Self {
        Self {
            store,
            fallback_mode,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryGraphStore::new()), true)
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let store: Arc<dyn GraphStore> = match StoreBackend::from_uri(&config.uri)? {
            StoreBackend::Memory => Arc::new(InMemoryGraphStore::new()),
            StoreBackend::SQLite { path } => Arc::new(SqliteGraphStore::open(&path)?),
        };
        debug!("使用存储后端: {}", store.name());
        Ok(Self::new(store, config.fallback_mode))
    }

    pub fn fallback_mode(&self) -> bool {
        self.fallback_mode
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// 获取会话
    ///
    /// 存储不可用时: 降级模式返回 `Ok(None)`，否则返回 `StoreUnavailable`。
    pub async fn session(&self) -> Result<Option<StoreSession>> {
        if !self.store.is_available().await {
            if self.fallback_mode {
                warn!("存储 {} 不可用, 进入降级模式", self.store.name());
                return Ok(None);
            }
            return Err(CoordinationError::StoreUnavailable(
                self.store.name().to_string(),
            ));
        }

        let active = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(active, "store session acquired");
        Ok(Some(StoreSession {
            store: self.store.clone(),
            active_sessions: self.active_sessions.clone(),
        }))
    }
}

/// 存储会话, 在所有退出路径上随 drop 释放
pub struct StoreSession {
    store: Arc<dyn GraphStore>,
    active_sessions: Arc<AtomicUsize>,
}

impl StoreSession {
    pub async fn run(&self, query: &QuerySpec) -> Result<Vec<Record>> {
        self.store.run(query).await
    }

    pub async fn count(&self, query: &QuerySpec) -> Result<usize> {
        self.store.count(query).await
    }

    pub async fn update_where(&self, query: &QuerySpec, changes: Record) -> Result<Option<Record>> {
        self.store.update_where(query, changes).await
    }

    pub async fn fetch<T: DeserializeOwned>(&self, query: &QuerySpec) -> Result<Vec<T>> {
        self.store
            .run(query)
            .await?
            .into_iter()
            .map(Record::into_entity)
            .collect()
    }

    pub async fn fetch_one<T: DeserializeOwned>(&self, query: &QuerySpec) -> Result<Option<T>> {
        let query = query.clone().limit(1);
        Ok(self.fetch(&query).await?.into_iter().next())
    }

    pub async fn insert<T: Serialize>(&self, label: &str, entity: &T) -> Result<()> {
        self.store.create(label, Record::from_entity(entity)?).await
    }

    pub async fn update<T: DeserializeOwned>(
        &self,
        query: &QuerySpec,
        changes: Record,
    ) -> Result<Option<T>> {
        self.store
            .update_where(query, changes)
            .await?
            .map(Record::into_entity)
            .transpose()
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        let remaining = self.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(remaining, "store session released");
    }
}
