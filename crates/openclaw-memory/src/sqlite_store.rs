//! SQLite 图存储实现
//!
//! 每个节点以 JSON 文档存放在 `nodes` 表中，谓词通过 `json_extract` 求值。
//! 多个 Agent 进程共享同一个数据库文件时，条件写入在 IMMEDIATE 事务内完成，
//! 同一时刻只有一个写者能成功。

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use openclaw_core::{CoordinationError, Result};

use crate::query::{Predicate, QuerySpec, Record};
use crate::store::GraphStore;

fn store_err(e: impl std::fmt::Display) -> CoordinationError {
    CoordinationError::Store(e.to_string())
}

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(store_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                label TEXT NOT NULL,
                id TEXT NOT NULL,
                props TEXT NOT NULL,
                PRIMARY KEY (label, id)
            );
            CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes (label);",
        )
        .map_err(store_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(store_err)
    }
}

/// 将查询编译为 `WHERE`/`ORDER BY`/`LIMIT` 子句及绑定参数
fn compile(query: &QuerySpec) -> Result<(String, Vec<SqlValue>)> {
    query.validate()?;

    let mut clauses = vec!["label = ?1".to_string()];
    let mut params = vec![SqlValue::Text(query.label.clone())];

    for predicate in &query.predicates {
        let column = format!("json_extract(props, '$.{}')", predicate.field());
        let clause = match predicate {
            Predicate::Eq(_, value) => {
                params.push(to_sql(value));
                format!("{} = ?{}", column, params.len())
            }
            Predicate::In(_, values) => {
                if values.is_empty() {
                    "0".to_string()
                } else {
                    let mut slots = Vec::with_capacity(values.len());
                    for value in values {
                        params.push(to_sql(value));
                        slots.push(format!("?{}", params.len()));
                    }
                    format!("{} IN ({})", column, slots.join(", "))
                }
            }
            Predicate::IsNull(_) => format!("{} IS NULL", column),
            Predicate::EqOrNull(_, value) => {
                params.push(to_sql(value));
                format!("({0} = ?{1} OR {0} IS NULL)", column, params.len())
            }
            Predicate::Gte(_, value) => {
                params.push(to_sql(value));
                format!("{} >= ?{}", column, params.len())
            }
            Predicate::Lt(_, value) => {
                params.push(to_sql(value));
                format!("{} < ?{}", column, params.len())
            }
        };
        clauses.push(clause);
    }

    let mut sql = format!(" WHERE {}", clauses.join(" AND "));

    if !query.order_by.is_empty() {
        let orders: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                format!(
                    "json_extract(props, '$.{}') {}",
                    o.field,
                    if o.descending { "DESC" } else { "ASC" }
                )
            })
            .collect();
        sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
    }

    if let Some(limit) = query.limit {
        params.push(SqlValue::Integer(limit as i64));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));
    }

    Ok((sql, params))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn parse_record(props: &str) -> Result<Record> {
    match serde_json::from_str::<Value>(props)? {
        Value::Object(map) => Ok(Record(map)),
        _ => Err(CoordinationError::Store("节点属性不是 JSON 对象".to_string())),
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn is_available(&self) -> bool {
        match self.lock() {
            Ok(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            Err(_) => false,
        }
    }

    async fn run(&self, query: &QuerySpec) -> Result<Vec<Record>> {
        let (clause, params) = compile(query)?;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT props FROM nodes{}", clause))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))
            .map_err(store_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(parse_record(&row.map_err(store_err)?)?);
        }
        Ok(records)
    }

    async fn count(&self, query: &QuerySpec) -> Result<usize> {
        let mut query = query.clone();
        query.order_by.clear();
        query.limit = None;
        let (clause, params) = compile(&query)?;
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM nodes{}", clause),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count as usize)
    }

    async fn create(&self, label: &str, record: Record) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| CoordinationError::Store("记录缺少 id".to_string()))?
            .to_string();
        let props = serde_json::to_string(&Value::Object(record.0))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO nodes (label, id, props) VALUES (?1, ?2, ?3)",
            params![label, id, props],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_where(&self, query: &QuerySpec, changes: Record) -> Result<Option<Record>> {
        let mut single = query.clone();
        single.limit = Some(1);
        let (clause, params) = compile(&single)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;

        let found: Option<(String, String)> = tx
            .query_row(
                &format!("SELECT id, props FROM nodes{}", clause),
                params_from_iter(params.iter()),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(store_err)?;

        let Some((id, props)) = found else {
            return Ok(None);
        };

        let mut record = parse_record(&props)?;
        record.merge(&changes);
        let updated = serde_json::to_string(&Value::Object(record.0.clone()))?;

        let affected = tx
            .execute(
                "UPDATE nodes SET props = ?1 WHERE label = ?2 AND id = ?3",
                params![updated, query.label, id],
            )
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        Ok((affected == 1).then_some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn node(id: &str, status: &str, created_at: i64) -> Record {
        Record::new()
            .set("id", id)
            .set("status", status)
            .set("assigned_to", Value::Null)
            .set("created_at", created_at)
    }

    #[tokio::test]
    async fn test_predicates_and_ordering() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.create("Task", node("a", "pending", 30)).await.unwrap();
        store.create("Task", node("b", "pending", 10)).await.unwrap();
        store.create("Task", node("c", "failed", 20)).await.unwrap();

        let query = QuerySpec::label("Task")
            .where_in("status", ["pending", "failed"])
            .where_eq_or_null("assigned_to", "researcher")
            .where_gte("created_at", 15)
            .order_asc("created_at");
        let ids: Vec<String> = store
            .run(&query)
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.id().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["c".to_string(), "a".to_string()]);

        let count = store
            .count(&QuerySpec::label("Task").where_eq("status", "pending"))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_values_are_bound_not_interpolated() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.create("Task", node("a", "pending", 1)).await.unwrap();

        let hostile = QuerySpec::label("Task").where_eq("status", "x' OR '1'='1");
        assert!(store.run(&hostile).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conditional_update_single_winner_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.db");
        let first = Arc::new(SqliteGraphStore::open(&path).unwrap());
        let second = Arc::new(SqliteGraphStore::open(&path).unwrap());
        first.create("Task", node("a", "pending", 1)).await.unwrap();

        let query = QuerySpec::label("Task")
            .where_eq("id", "a")
            .where_eq("status", "pending");
        let won_first = first
            .update_where(&query, Record::new().set("status", "in_progress"))
            .await
            .unwrap();
        let won_second = second
            .update_where(&query, Record::new().set("status", "in_progress"))
            .await
            .unwrap();

        assert!(won_first.is_some());
        assert!(won_second.is_none());
    }
}
