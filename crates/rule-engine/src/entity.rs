//! 实体模型
//!
//! 实体是规则引擎中的事实：由类型名、标识属性和任意属性组成。
//! 同一类型下标识属性取值相同的实体拥有相同的 key，属性变化只会修改已有实体。

use crate::error::{Result, RuleError};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// 内置的时钟实体类型
pub const UTC_ENTITY: &str = "utc";

/// 聚合实体类型（由引擎合成，不可直接触发）
pub const AGGREGATION_ENTITY: &str = "aggregation";

/// 实体类型定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySchema {
    name: String,
    /// 标识属性，按注册顺序
    identity: Vec<String>,
    /// 元数据字段，既不参与标识也不算作属性
    meta: Vec<String>,
}

impl EntitySchema {
    pub fn new<I, S>(name: impl Into<String>, identity: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            identity: identity.into_iter().map(Into::into).collect(),
            meta: Vec::new(),
        }
    }

    pub fn with_meta<I, S>(mut self, meta: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta = meta.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &[String] {
        &self.identity
    }

    fn is_identity(&self, field: &str) -> bool {
        self.identity.iter().any(|f| f == field)
    }

    fn is_meta(&self, field: &str) -> bool {
        self.meta.iter().any(|f| f == field)
    }
}

/// 实体类型注册表
///
/// 每个引擎实例持有自己的注册表，互不影响。
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    registered: HashMap<String, Arc<EntitySchema>>,
    basic: HashMap<String, Arc<EntitySchema>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        let mut basic = HashMap::new();
        basic.insert(
            UTC_ENTITY.to_string(),
            Arc::new(EntitySchema::new(UTC_ENTITY, Vec::<String>::new())),
        );
        Self {
            registered: HashMap::new(),
            basic,
        }
    }

    /// 注册实体类型，同名类型会被覆盖
    pub fn register<I, S>(&mut self, name: &str, identity: I) -> Arc<EntitySchema>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let schema = Arc::new(EntitySchema::new(name, identity));
        self.registered.insert(name.to_string(), schema.clone());
        schema
    }

    /// 查找实体类型，已注册类型优先于内置类型
    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.registered
            .get(name)
            .or_else(|| self.basic.get(name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 按类型名创建实体
    pub fn create(&self, name: &str, fields: Map<String, Value>) -> Result<Entity> {
        let schema = self
            .get(name)
            .ok_or_else(|| RuleError::UnknownEntityType(name.to_string()))?;
        Ok(Entity::new(schema, fields))
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 实体（事实）
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    key: String,
    fields: Map<String, Value>,
}

impl Entity {
    /// 创建实体，key 由标识属性计算
    pub fn new(schema: Arc<EntitySchema>, fields: Map<String, Value>) -> Self {
        let key = identity_key(&schema, &fields);
        Self {
            schema,
            key,
            fields,
        }
    }

    /// 使用给定 key 创建实体（用于合成实体）
    pub(crate) fn with_key(
        schema: Arc<EntitySchema>,
        key: String,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            schema,
            key,
            fields,
        }
    }

    pub fn class_name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// 读取任意字段（标识属性或普通属性）
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// 标识属性（不含元数据字段）
    pub fn attributes(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| self.schema.is_identity(k) && !self.schema.is_meta(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 普通属性（标识属性和元数据以外的字段）
    pub fn properties(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| !self.schema.is_identity(k) && !self.schema.is_meta(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 将新到达的同 key 实体合并到当前实体
    ///
    /// 只比较新实体携带的属性：有任一属性值不同则覆盖写入并返回 `true`，
    /// 否则不做任何修改。未携带的属性保留原值，标识属性保持不变。
    pub fn diff_and_merge(&mut self, incoming: &Entity) -> bool {
        let properties = incoming.properties();
        let changed = properties
            .iter()
            .any(|(k, v)| self.fields.get(k) != Some(v));
        if !changed {
            return false;
        }
        self.apply(&properties);
        true
    }

    /// 写入属性更新，忽略标识属性
    pub fn apply(&mut self, updates: &Map<String, Value>) {
        for (k, v) in updates {
            if self.schema.is_identity(k) {
                continue;
            }
            self.fields.insert(k.clone(), v.clone());
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attributes = self.attributes();
        write!(f, "{}", self.class_name())?;
        if !attributes.is_empty() {
            let rendered: Vec<String> = attributes
                .iter()
                .map(|(k, v)| format!("{}={}", k, value_text(v)))
                .collect();
            write!(f, "({})", rendered.join(","))?;
        }
        write!(f, " => {}", Value::Object(self.properties()))
    }
}

/// 计算实体 key：以类型名哈希为盐，对排序后的标识属性取 SHA-256
fn identity_key(schema: &EntitySchema, fields: &Map<String, Value>) -> String {
    let pairs: BTreeMap<&str, &Value> = fields
        .iter()
        .filter(|(k, _)| schema.is_identity(k) && !schema.is_meta(k))
        .map(|(k, v)| (k.as_str(), v))
        .collect();

    let body: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}:{}", k, value_text(v)))
        .collect();

    let salt = sha256_hex(schema.name());
    sha256_hex(&format!("{}:{}", salt, body.join("-")))
}

/// 对一组 key 计算集合哈希（与顺序无关）
pub(crate) fn set_key(salt: &str, keys: &[String]) -> String {
    let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sha256_hex(&format!("{}:{}", salt, sorted.join("-")))
}

pub(crate) fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// 字符串按原文输出，其余值按 JSON 输出
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
