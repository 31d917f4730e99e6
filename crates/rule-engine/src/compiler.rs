//! 条件编译器
//!
//! 将 JSON 条件解析并编译成表达式树，同时建立规则的别名表。
//!
//! 支持两种条件：
//! - 聚合条件：`{"$aggregation": {"$function", "$entities", "$property"}}`
//! - 逻辑表达式：`$and` / `$or` 连接、`$any->Entity||alias` 别名绑定、
//!   以及 `{"Entity": {..., "$properties": {...}}}` 实体匹配

use crate::aggregation::{AggregationEntity, AggregationFunction, KEY_FIELD, RESULT_FIELD};
use crate::entity::{AGGREGATION_ENTITY, EntityRegistry};
use crate::error::{Result, RuleError};
use crate::models::{
    Comparison, Condition, ConditionFamily, EntityPattern, Expression, LogicalGroup,
};
use crate::operators::{LogicalOperator, Operator};
use serde_json::{Map, Value};

const AGGREGATION_KEY: &str = "$aggregation";
const FUNCTION_KEY: &str = "$function";
const FILTER_KEY: &str = "$filter";
const ENTITIES_KEY: &str = "$entities";
const PROPERTY_KEY: &str = "$property";
const PROPERTIES_KEY: &str = "$properties";

/// 条件编译器
///
/// 编译依赖实体类型注册表来校验条件中引用的实体。
pub struct ConditionCompiler<'a> {
    registry: &'a EntityRegistry,
}

impl<'a> ConditionCompiler<'a> {
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self { registry }
    }

    /// 编译条件 JSON
    pub fn compile(&self, payload: &Value) -> Result<Condition> {
        let object = as_object(payload, "条件")?;
        let mut family = ConditionFamily::new();

        if let Some(aggregation_payload) = object.get(AGGREGATION_KEY) {
            let (expression, aggregation) = self.compile_aggregation(aggregation_payload)?;
            return Ok(Condition {
                expression,
                payload: payload.clone(),
                is_aggregation: true,
                family,
                aggregation: Some(aggregation),
            });
        }

        let expression = self.compile_expression(payload, &mut family)?;
        Ok(Condition {
            expression,
            payload: payload.clone(),
            is_aggregation: false,
            family,
            aggregation: None,
        })
    }

    /// 编译聚合条件
    fn compile_aggregation(&self, payload: &Value) -> Result<(Expression, AggregationEntity)> {
        let object = as_object(payload, AGGREGATION_KEY)?;

        let function_name = object
            .get(FUNCTION_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(AGGREGATION_KEY, FUNCTION_KEY))?;
        let filter_name = match object.get(FILTER_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                return Err(RuleError::ParseError(format!("{} 必须是字符串", FILTER_KEY)));
            }
        };

        let entities = object
            .get(ENTITIES_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| missing(AGGREGATION_KEY, ENTITIES_KEY))?;
        if entities.is_empty() {
            return Err(RuleError::ParseError(format!("{} 不能为空", ENTITIES_KEY)));
        }

        let mut entity_keys = Vec::with_capacity(entities.len());
        for entity_data in entities {
            let (entity_name, fields) = single_entry(entity_data, ENTITIES_KEY)?;
            let fields = as_object(fields, entity_name)?;
            let entity = self.registry.create(entity_name, fields.clone())?;
            entity_keys.push(entity.key().to_string());
        }

        let property = object
            .get(PROPERTY_KEY)
            .ok_or_else(|| missing(AGGREGATION_KEY, PROPERTY_KEY))?;
        let (property_name, comparisons) = single_entry(property, PROPERTY_KEY)?;
        let result_comparisons = self.compile_comparisons(comparisons)?;

        let function = AggregationFunction::new(function_name, property_name, filter_name)?;
        let aggregation = AggregationEntity::aggregate(entity_keys, function);

        let pattern = EntityPattern::new(AGGREGATION_ENTITY)
            .with_literal(KEY_FIELD, aggregation.key())
            .with_comparisons(RESULT_FIELD, result_comparisons);

        Ok((Expression::and(vec![Expression::Pattern(pattern)]), aggregation))
    }

    /// 递归编译逻辑表达式
    ///
    /// 同一对象中识别出的多个表达式之间是 AND 关系。
    fn compile_expression(&self, payload: &Value, family: &mut ConditionFamily) -> Result<Expression> {
        let object = as_object(payload, "表达式")?;
        let mut parts = Vec::new();

        for (key, value) in object {
            if key.starts_with('$') {
                if ConditionFamily::is_member_token(key) {
                    let member = family.parse_add_member(key, self.registry)?;
                    parts.push(self.compile_entity(&member.class_name, value)?);
                    continue;
                }

                let operator = LogicalOperator::from_keyword(key)?;
                let items = value.as_array().ok_or_else(|| {
                    RuleError::ParseError(format!("连接符 '{}' 的值必须是表达式列表", key))
                })?;
                if items.is_empty() {
                    return Err(RuleError::ParseError(format!("连接符 '{}' 不能为空", key)));
                }

                let children = items
                    .iter()
                    .map(|item| self.compile_expression(item, family))
                    .collect::<Result<Vec<_>>>()?;
                parts.push(Expression::Group(LogicalGroup::new(operator, children)));
            } else if value.get(PROPERTIES_KEY).is_some() {
                parts.push(self.compile_entity(key, value)?);
            }
        }

        match parts.len() {
            0 => Err(RuleError::ParseError(format!("无效的表达式: {}", payload))),
            1 => Ok(parts.remove(0)),
            _ => Ok(Expression::and(parts)),
        }
    }

    /// 编译实体匹配节点
    fn compile_entity(&self, class_name: &str, payload: &Value) -> Result<Expression> {
        if !self.registry.contains(class_name) {
            return Err(RuleError::UnknownEntityType(class_name.to_string()));
        }

        let object = as_object(payload, class_name)?;
        let mut pattern = EntityPattern::new(class_name);

        for (field, value) in object {
            if field == PROPERTIES_KEY {
                let properties = as_object(value, PROPERTIES_KEY)?;
                for (name, comparisons) in properties {
                    let compiled = self.compile_comparisons(comparisons)?;
                    pattern.properties.insert(name.clone(), compiled);
                }
            } else {
                pattern.literals.insert(field.clone(), value.clone());
            }
        }

        Ok(Expression::Pattern(pattern))
    }

    /// 编译比较列表：`[{">": 0}, {"<=": 10}]`
    fn compile_comparisons(&self, payload: &Value) -> Result<Vec<Comparison>> {
        let items = payload
            .as_array()
            .ok_or_else(|| RuleError::ParseError(format!("比较条件必须是列表: {}", payload)))?;

        let mut comparisons = Vec::with_capacity(items.len());
        for item in items {
            let object = as_object(item, "比较条件")?;
            for (symbol, operand) in object {
                let operator = Operator::from_symbol(symbol)?;
                let operand = self.normalize_operand(operator, operand)?;
                comparisons.push(Comparison::compiled(operator, operand)?);
            }
        }
        Ok(comparisons)
    }

    /// 校验并规整操作数
    fn normalize_operand(&self, operator: Operator, operand: &Value) -> Result<Value> {
        match operator {
            Operator::Between => match operand.as_array() {
                Some(arr) if arr.len() == 2 => Ok(operand.clone()),
                _ => Err(RuleError::ParseError(format!(
                    "between 操作符需要 [min, max] 数组，实际为 {}",
                    operand
                ))),
            },
            _ => {
                // 单元素列表按标量处理
                let operand = match operand.as_array() {
                    Some(arr) if arr.len() == 1 => arr[0].clone(),
                    _ => operand.clone(),
                };
                Ok(operand)
            }
        }
    }
}

fn as_object<'v>(value: &'v Value, context: &str) -> Result<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| RuleError::ParseError(format!("'{}' 必须是对象，实际为 {}", context, value)))
}

/// 取只有一个键的对象的唯一条目
fn single_entry<'v>(value: &'v Value, context: &str) -> Result<(&'v str, &'v Value)> {
    let object = as_object(value, context)?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((k, v)), None) => Ok((k.as_str(), v)),
        _ => Err(RuleError::ParseError(format!(
            "'{}' 的元素必须只有一个键: {}",
            context, value
        ))),
    }
}

fn missing(context: &str, key: &str) -> RuleError {
    RuleError::ParseError(format!("'{}' 缺少 '{}'", context, key))
}
