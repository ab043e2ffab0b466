//! 查询描述
//!
//! 查询由一组具名、参数化的谓词组成，值永远以参数形式传给后端，
//! 不拼接进查询文本。

use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use openclaw_core::{CoordinationError, Result};

/// 存储返回的原始记录 (JSON 对象)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_entity<T: Serialize>(entity: &T) -> Result<Self> {
        match serde_json::to_value(entity)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoordinationError::Store(format!(
                "实体必须序列化为对象, 实际为: {}",
                other
            ))),
        }
    }

    pub fn into_entity<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0))?)
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(|v| v.as_str())
    }

    pub fn merge(&mut self, changes: &Record) {
        for (key, value) in changes.0.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

/// 谓词
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    /// `field = value OR field IS NULL`
    EqOrNull(String, Value),
    Gte(String, Value),
    Lt(String, Value),
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Eq(f, _)
            | Predicate::In(f, _)
            | Predicate::IsNull(f)
            | Predicate::EqOrNull(f, _)
            | Predicate::Gte(f, _)
            | Predicate::Lt(f, _) => f,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Predicate::Eq(_, expected) => values_equal(actual, expected),
            Predicate::In(_, options) => options.iter().any(|o| values_equal(actual, o)),
            Predicate::IsNull(_) => actual.is_null(),
            Predicate::EqOrNull(_, expected) => {
                actual.is_null() || values_equal(actual, expected)
            }
            Predicate::Gte(_, bound) => matches!(
                compare_values(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt(_, bound) => {
                matches!(compare_values(actual, bound), Some(Ordering::Less))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// 查询描述
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub label: String,
    pub predicates: Vec<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_null() {
            self.predicates.push(Predicate::IsNull(field.to_string()));
        } else {
            self.predicates.push(Predicate::Eq(field.to_string(), value));
        }
        self
    }

    pub fn where_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.predicates.push(Predicate::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn where_null(mut self, field: &str) -> Self {
        self.predicates.push(Predicate::IsNull(field.to_string()));
        self
    }

    pub fn where_eq_or_null(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.predicates
            .push(Predicate::EqOrNull(field.to_string(), value.into()));
        self
    }

    pub fn where_gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Gte(field.to_string(), value.into()));
        self
    }

    pub fn where_lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Lt(field.to_string(), value.into()));
        self
    }

    /// 可选过滤条件, `None` 时不添加谓词
    pub fn where_eq_opt(self, field: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.where_eq(field, v),
            None => self,
        }
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }

    /// 按 `order_by` 比较两条记录, 缺失字段排在最前
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for order in &self.order_by {
            let left = a.get(&order.field).unwrap_or(&Value::Null);
            let right = b.get(&order.field).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// 所有字段名必须是普通标识符
    pub fn validate(&self) -> Result<()> {
        let fields = self
            .predicates
            .iter()
            .map(|p| p.field())
            .chain(self.order_by.iter().map(|o| o.field.as_str()));
        for field in std::iter::once(self.label.as_str()).chain(fields) {
            if !is_identifier(field) {
                return Err(CoordinationError::Validation(format!(
                    "非法的字段名: {}",
                    field
                )));
            }
        }
        Ok(())
    }
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
