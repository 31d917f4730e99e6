//! 规则操作符定义

use crate::error::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 通用比较
    Eq,
    Neq,

    // 数值比较
    Gt,
    Gte,
    Lt,
    Lte,
    Between,

    // 包含检查
    Contains,

    // 字符串操作
    Regex,
}

impl Operator {
    /// 从规则 JSON 中的操作符写法解析（如 ">="、"between"）
    pub fn from_symbol(symbol: &str) -> Result<Self> {
        let operator = match symbol {
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "=" => Self::Eq,
            "!=" => Self::Neq,
            "between" => Self::Between,
            "contains" => Self::Contains,
            "regex" => Self::Regex,
            other => return Err(RuleError::UnknownOperator(other.to_string())),
        };
        Ok(operator)
    }

    /// 规则 JSON 中的写法
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Between => "between",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::Contains => "contains",
            Self::Regex => "regex",
        };
        write!(f, "{}", s)
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    /// 解析 `$and` / `$or` 连接符
    pub fn from_keyword(keyword: &str) -> Result<Self> {
        match keyword {
            "$and" => Ok(Self::And),
            "$or" => Ok(Self::Or),
            other => Err(RuleError::UnknownConjunction(other.to_string())),
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_parse_back() {
        for op in [
            Operator::Eq,
            Operator::Neq,
            Operator::Gt,
            Operator::Gte,
            Operator::Lt,
            Operator::Lte,
            Operator::Between,
            Operator::Contains,
            Operator::Regex,
        ] {
            assert_eq!(Operator::from_symbol(op.symbol()).unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_operator() {
        let err = Operator::from_symbol("=~").unwrap_err();
        assert!(matches!(err, RuleError::UnknownOperator(ref s) if s == "=~"));
    }

    #[test]
    fn test_conjunction_keywords() {
        assert_eq!(LogicalOperator::from_keyword("$and").unwrap(), LogicalOperator::And);
        assert_eq!(LogicalOperator::from_keyword("$or").unwrap(), LogicalOperator::Or);
        assert!(matches!(
            LogicalOperator::from_keyword("$xor"),
            Err(RuleError::UnknownConjunction(_))
        ));
    }
}
