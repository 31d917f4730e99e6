//! 动作模板解析
//!
//! 将动作数据中的 `"$alias.property"` 占位符替换为触发激活的事实中的字段值。
//! 解析在 JSON 树上递归进行，被替换的值保留原始类型。

use crate::entity::Entity;
use crate::error::{Result, RuleError};
use crate::models::ConditionFamily;
use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::warn;

/// 模板解析器
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    /// 匹配完整的 `$alias.property` 字符串
    token_regex: Regex,
    /// 把纯数字字符串作为数值代入（兼容旧的文本替换行为）
    numeric_string_coercion: bool,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {
            token_regex: Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_-]*)$")
                .expect("token regex is valid"),
            numeric_string_coercion: false,
        }
    }

    pub fn with_numeric_string_coercion(mut self, enabled: bool) -> Self {
        self.numeric_string_coercion = enabled;
        self
    }

    /// 递归替换模板中的占位符
    ///
    /// 别名必须在规则的别名表中定义，否则返回 `UndefinedMember`。
    /// 找不到对应事实或字段时代入 `null`。
    pub fn resolve(
        &self,
        template: &Value,
        family: &ConditionFamily,
        facts: &[Entity],
    ) -> Result<Value> {
        match template {
            Value::String(s) => match self.token_regex.captures(s) {
                Some(caps) => self.resolve_token(&caps[1], &caps[2], family, facts),
                None => Ok(template.clone()),
            },
            Value::Array(arr) => {
                let resolved: Result<Vec<Value>> = arr
                    .iter()
                    .map(|v| self.resolve(v, family, facts))
                    .collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(obj) => {
                let mut resolved = Map::new();
                for (k, v) in obj {
                    resolved.insert(k.clone(), self.resolve(v, family, facts)?);
                }
                Ok(Value::Object(resolved))
            }
            _ => Ok(template.clone()),
        }
    }

    fn resolve_token(
        &self,
        alias: &str,
        property: &str,
        family: &ConditionFamily,
        facts: &[Entity],
    ) -> Result<Value> {
        let member = family
            .get_member(alias)
            .ok_or_else(|| RuleError::UndefinedMember(alias.to_string()))?;

        let value = facts
            .iter()
            .find(|fact| fact.class_name() == member.class_name)
            .and_then(|fact| fact.get(property))
            .cloned();

        match value {
            Some(value) => Ok(self.coerce(value)),
            None => {
                warn!(alias, property, class = %member.class_name, "模板字段未找到，代入 null");
                Ok(Value::Null)
            }
        }
    }

    fn coerce(&self, value: Value) -> Value {
        if !self.numeric_string_coercion {
            return value;
        }
        match &value {
            Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
                .parse::<u64>()
                .map(|n| Value::Number(Number::from(n)))
                .unwrap_or(value),
            _ => value,
        }
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}
