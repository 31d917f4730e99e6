//! 聚合实体
//!
//! 聚合实体是对一组实体某个属性的归约结果（如求和），由引擎在成员实体更新时重新计算。

use crate::entity::{AGGREGATION_ENTITY, Entity, EntitySchema, set_key};
use crate::error::{Result, RuleError};
use serde::Serialize;
use serde_json::{Map, Number, Value, json};
use std::sync::Arc;
use tracing::warn;

const AGGREGATION_SALT: &str = "AggregationEntity";

/// 聚合实体的 key 字段
pub const KEY_FIELD: &str = "key";
/// 聚合实体的成员 key 列表字段（元数据）
pub const ENTITY_KEYS_FIELD: &str = "entity_keys";
/// 聚合结果字段
pub const RESULT_FIELD: &str = "result";

/// 可用的归约/过滤函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationCallable {
    Sum,
    Not,
}

impl AggregationCallable {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sum" => Ok(Self::Sum),
            "not" => Ok(Self::Not),
            other => Err(RuleError::UnknownFunction(other.to_string())),
        }
    }

    /// 作为过滤器：逐个变换值
    fn transform(&self, value: Value) -> Value {
        match self {
            Self::Not => Value::Bool(!truthy(&value)),
            Self::Sum => match value {
                Value::Array(items) => sum(items),
                other => other,
            },
        }
    }

    /// 作为归约器：作用于整个列表
    fn reduce(&self, values: Vec<Value>) -> Value {
        match self {
            Self::Sum => sum(values),
            Self::Not => Value::Bool(values.is_empty()),
        }
    }
}

/// 聚合函数：(函数名, 属性名, 可选过滤器)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationFunction {
    name: String,
    property: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    #[serde(skip)]
    reducer: AggregationCallable,
    #[serde(skip)]
    filter_fn: Option<AggregationCallable>,
}

impl AggregationFunction {
    pub fn new(name: &str, property: &str, filter: Option<&str>) -> Result<Self> {
        let reducer = AggregationCallable::from_name(name)?;
        let filter_fn = filter.map(AggregationCallable::from_name).transpose()?;
        Ok(Self {
            name: name.to_string(),
            property: property.to_string(),
            filter: filter.map(str::to_string),
            reducer,
            filter_fn,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// 函数签名，参与聚合 key 的计算
    fn signature(&self) -> String {
        format!(
            "{}({}|{})",
            self.name,
            self.property,
            self.filter.as_deref().unwrap_or_default()
        )
    }

    /// 从每组属性中取出目标属性，过滤后归约
    ///
    /// 缺少该属性（或为 null）的成员被跳过。
    pub fn apply(&self, properties: &[Map<String, Value>]) -> Value {
        let values: Vec<Value> = properties
            .iter()
            .filter_map(|p| p.get(&self.property))
            .filter(|v| !v.is_null())
            .cloned()
            .map(|v| match self.filter_fn {
                Some(filter) => filter.transform(v),
                None => v,
            })
            .collect();

        self.reducer.reduce(values)
    }
}

/// 聚合实体定义
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationEntity {
    key: String,
    entity_keys: Vec<String>,
    function: AggregationFunction,
}

impl AggregationEntity {
    /// 由成员 key 集合和聚合函数构造聚合实体，key 与成员顺序无关
    pub fn aggregate(entity_keys: Vec<String>, function: AggregationFunction) -> Self {
        let salt = format!("{}:{}", AGGREGATION_SALT, function.signature());
        let key = set_key(&salt, &entity_keys);
        Self {
            key,
            entity_keys,
            function,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entity_keys(&self) -> &[String] {
        &self.entity_keys
    }

    pub fn function(&self) -> &AggregationFunction {
        &self.function
    }

    pub fn contains(&self, entity_key: &str) -> bool {
        self.entity_keys.iter().any(|k| k == entity_key)
    }

    /// 聚合实体类型定义
    pub fn schema() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::new(AGGREGATION_ENTITY, [KEY_FIELD, ENTITY_KEYS_FIELD])
                .with_meta([ENTITY_KEYS_FIELD]),
        )
    }

    /// 生成携带聚合结果的事实
    pub fn generate_event(&self, result: Value) -> Entity {
        let mut fields = Map::new();
        fields.insert(KEY_FIELD.to_string(), json!(self.key));
        fields.insert(ENTITY_KEYS_FIELD.to_string(), json!(self.entity_keys));
        fields.insert(RESULT_FIELD.to_string(), result);
        Entity::with_key(Self::schema(), self.key.clone(), fields)
    }
}

/// 数值求和，布尔值按 0/1 计算
///
/// 全部为整数且不溢出时返回整数，否则返回浮点数。
fn sum(values: Vec<Value>) -> Value {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut integral = true;

    for value in values {
        match value {
            Value::Bool(b) => {
                integral &= checked_accumulate(&mut int_total, b as i64);
                float_total += b as i64 as f64;
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    integral &= checked_accumulate(&mut int_total, i);
                    float_total += i as f64;
                } else if let Some(f) = n.as_f64() {
                    integral = false;
                    float_total += f;
                }
            }
            other => warn!(value = %other, "聚合求和忽略非数值"),
        }
    }

    if integral {
        Value::from(int_total)
    } else {
        Number::from_f64(float_total).map_or(Value::Null, Value::Number)
    }
}

/// 整数累加，溢出时保持原值并返回 `false`
fn checked_accumulate(total: &mut i64, value: i64) -> bool {
    match total.checked_add(value) {
        Some(sum) => {
            *total = sum;
            true
        }
        None => false,
    }
}

/// 值的真假判断
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
