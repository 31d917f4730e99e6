//! 条件评估器
//!
//! 实现各种操作符的评估逻辑，支持多种数据类型的比较。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use regex::Regex;
use serde_json::Value;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// # Arguments
    /// * `field_value` - 事实中的字段值
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的操作数
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: &Value,
    ) -> Result<bool> {
        // 字段不存在时，所有操作都不匹配
        let field_value = match field_value {
            Some(v) => v,
            None => return Ok(false),
        };

        match operator {
            Operator::Eq => Ok(Self::eq(field_value, expected_value)),
            Operator::Neq => Ok(!Self::eq(field_value, expected_value)),
            Operator::Gt => Self::compare(field_value, expected_value, |a, b| a > b),
            Operator::Gte => Self::compare(field_value, expected_value, |a, b| a >= b),
            Operator::Lt => Self::compare(field_value, expected_value, |a, b| a < b),
            Operator::Lte => Self::compare(field_value, expected_value, |a, b| a <= b),
            Operator::Between => Self::between(field_value, expected_value),
            Operator::Contains => Self::contains(field_value, expected_value),
            Operator::Regex => Self::regex_match(field_value, expected_value),
        }
    }

    /// 相等比较
    pub(crate) fn eq(field: &Value, expected: &Value) -> bool {
        // 数值统一转为浮点数比较，避免 1 和 1.0 不相等
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (f1 - f2).abs() < f64::EPSILON;
        }

        field == expected
    }

    /// 数值比较（字符串按字典序比较）
    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        if let (Value::String(a), Value::String(b)) = (field, expected) {
            let ordering = a.cmp(b) as i8 as f64;
            return Ok(cmp(ordering, 0.0));
        }

        let field_num = Self::as_f64(field).ok_or_else(|| Self::type_mismatch("number", field))?;
        let expected_num =
            Self::as_f64(expected).ok_or_else(|| Self::type_mismatch("number", expected))?;

        Ok(cmp(field_num, expected_num))
    }

    /// 范围比较 (between)，expected 应为 [min, max] 数组，两端闭区间
    fn between(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array [min, max]", expected))?;

        if arr.len() != 2 {
            return Err(RuleError::ParseError(
                "between 操作符需要 [min, max] 数组".to_string(),
            ));
        }

        let lower = Self::compare(field, &arr[0], |a, b| a >= b)?;
        let upper = Self::compare(field, &arr[1], |a, b| a <= b)?;
        Ok(lower && upper)
    }

    /// 字符串/数组包含检查
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected
                    .as_str()
                    .ok_or_else(|| Self::type_mismatch("string", expected))?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected))),
            Value::Object(obj) => Ok(expected.as_str().is_some_and(|k| obj.contains_key(k))),
            _ => Err(Self::type_mismatch("string or array", field)),
        }
    }

    /// 正则表达式匹配，从字符串开头锚定
    fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let s = field
            .as_str()
            .ok_or_else(|| Self::type_mismatch("string", field))?;

        let pattern = expected
            .as_str()
            .ok_or_else(|| Self::type_mismatch("string (regex pattern)", expected))?;

        let regex = Self::compile_regex(pattern)?;

        Ok(Self::anchored_match(&regex, s))
    }

    /// 使用预编译的正则匹配字段值
    pub fn regex_is_match(field: &Value, regex: &Regex) -> Result<bool> {
        let s = field
            .as_str()
            .ok_or_else(|| Self::type_mismatch("string", field))?;
        Ok(Self::anchored_match(regex, s))
    }

    fn anchored_match(regex: &Regex, s: &str) -> bool {
        regex.find(s).is_some_and(|m| m.start() == 0)
    }

    /// 编译正则表达式，编译期校验也复用这里
    pub fn compile_regex(pattern: &str) -> Result<Regex> {
        Regex::new(pattern).map_err(|e| RuleError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    }

    /// 尝试将 Value 转换为 f64
    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn type_mismatch(expected: &str, actual: &Value) -> RuleError {
        RuleError::ParseError(format!(
            "类型不匹配: 期望 {}, 实际 {}",
            expected,
            type_name(actual)
        ))
    }
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_numbers() {
        assert!(ConditionEvaluator::evaluate(Some(&json!(100)), Operator::Eq, &json!(100)).unwrap());
        assert!(
            ConditionEvaluator::evaluate(Some(&json!(100.0)), Operator::Eq, &json!(100)).unwrap()
        );
    }

    #[test]
    fn test_eq_does_not_coerce_strings() {
        assert!(!ConditionEvaluator::evaluate(Some(&json!("2")), Operator::Eq, &json!(2)).unwrap());
        assert!(ConditionEvaluator::evaluate(Some(&json!("2")), Operator::Neq, &json!(2)).unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(ConditionEvaluator::evaluate(Some(&json!(100)), Operator::Gt, &json!(50)).unwrap());
        assert!(
            ConditionEvaluator::evaluate(Some(&json!(100)), Operator::Gte, &json!(100)).unwrap()
        );
        assert!(ConditionEvaluator::evaluate(Some(&json!(50)), Operator::Lt, &json!(100)).unwrap());
        assert!(
            ConditionEvaluator::evaluate(Some(&json!(100)), Operator::Lte, &json!(100)).unwrap()
        );
        assert!(!ConditionEvaluator::evaluate(Some(&json!(0)), Operator::Gt, &json!(0)).unwrap());
    }

    #[test]
    fn test_string_ordering() {
        assert!(ConditionEvaluator::evaluate(Some(&json!("b")), Operator::Gt, &json!("a")).unwrap());
        assert!(!ConditionEvaluator::evaluate(Some(&json!("a")), Operator::Gt, &json!("a")).unwrap());
        assert!(ConditionEvaluator::evaluate(Some(&json!("a")), Operator::Gte, &json!("a")).unwrap());
    }

    #[test]
    fn test_compare_type_mismatch() {
        assert!(ConditionEvaluator::evaluate(Some(&json!("x")), Operator::Gt, &json!(1)).is_err());
    }

    #[test]
    fn test_between() {
        assert!(
            ConditionEvaluator::evaluate(Some(&json!(50)), Operator::Between, &json!([0, 100]))
                .unwrap()
        );
        assert!(
            ConditionEvaluator::evaluate(Some(&json!(100)), Operator::Between, &json!([0, 100]))
                .unwrap()
        );
        assert!(
            !ConditionEvaluator::evaluate(Some(&json!(150)), Operator::Between, &json!([0, 100]))
                .unwrap()
        );
    }

    #[test]
    fn test_contains_string() {
        assert!(ConditionEvaluator::evaluate(
            Some(&json!("people_counter")),
            Operator::Contains,
            &json!("counter")
        )
        .unwrap());
    }

    #[test]
    fn test_contains_array() {
        assert!(ConditionEvaluator::evaluate(
            Some(&json!(["a", "b", "c"])),
            Operator::Contains,
            &json!("b")
        )
        .unwrap());
        assert!(!ConditionEvaluator::evaluate(
            Some(&json!([1, 2])),
            Operator::Contains,
            &json!(3)
        )
        .unwrap());
    }

    #[test]
    fn test_regex_anchored_at_start() {
        assert!(ConditionEvaluator::evaluate(
            Some(&json!("light.kitchen")),
            Operator::Regex,
            &json!(r"light\.")
        )
        .unwrap());
        assert!(!ConditionEvaluator::evaluate(
            Some(&json!("the light.kitchen")),
            Operator::Regex,
            &json!(r"light\.")
        )
        .unwrap());
    }

    #[test]
    fn test_invalid_regex() {
        let err =
            ConditionEvaluator::evaluate(Some(&json!("x")), Operator::Regex, &json!("[invalid"))
                .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRegex { .. }));
    }

    #[test]
    fn test_missing_field() {
        assert!(!ConditionEvaluator::evaluate(None, Operator::Eq, &json!("test")).unwrap());
        assert!(!ConditionEvaluator::evaluate(None, Operator::Neq, &json!("test")).unwrap());
    }
}
