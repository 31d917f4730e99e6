//! 规则引擎领域模型
//!
//! 条件编译后的表达式树、实体匹配模式以及规则的别名表（family）。

use crate::aggregation::AggregationEntity;
use crate::entity::{Entity, EntityRegistry};
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::operators::{LogicalOperator, Operator};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::trace;

/// 表达式节点（实体匹配或逻辑组）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    Pattern(EntityPattern),
    Group(LogicalGroup),
}

impl Expression {
    pub fn and(children: Vec<Expression>) -> Self {
        Expression::Group(LogicalGroup::and(children))
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Group(LogicalGroup::or(children))
    }

    /// 展开为析取范式：每个分支是一组需要同时匹配的实体模式
    ///
    /// AND 对子节点分支做笛卡尔积，OR 直接拼接子节点分支。
    pub fn branches(&self) -> Vec<Vec<EntityPattern>> {
        match self {
            Expression::Pattern(pattern) => vec![vec![pattern.clone()]],
            Expression::Group(group) => match group.operator {
                LogicalOperator::Or => group.children.iter().flat_map(|c| c.branches()).collect(),
                LogicalOperator::And => {
                    let mut acc: Vec<Vec<EntityPattern>> = vec![Vec::new()];
                    for child in &group.children {
                        let child_branches = child.branches();
                        let mut next = Vec::with_capacity(acc.len() * child_branches.len());
                        for prefix in &acc {
                            for branch in &child_branches {
                                let mut combined = prefix.clone();
                                combined.extend(branch.iter().cloned());
                                next.push(combined);
                            }
                        }
                        acc = next;
                    }
                    acc
                }
            },
        }
    }

    /// 表达式中引用的实体类型
    pub fn classes(&self) -> Vec<&str> {
        match self {
            Expression::Pattern(p) => vec![p.class_name.as_str()],
            Expression::Group(g) => g.children.iter().flat_map(|c| c.classes()).collect(),
        }
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalGroup {
    pub operator: LogicalOperator,
    pub children: Vec<Expression>,
}

impl LogicalGroup {
    pub fn new(operator: LogicalOperator, children: Vec<Expression>) -> Self {
        Self { operator, children }
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Self::new(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Self::new(LogicalOperator::Or, children)
    }
}

/// 单个比较：操作符 + 操作数
///
/// `regex` 操作符的模式在构造时编译一次，评估时直接复用。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub operator: Operator,
    pub operand: Value,
    #[serde(skip)]
    pattern: Option<CompiledPattern>,
}

/// 预编译的正则，按模式文本判等
#[derive(Debug, Clone)]
struct CompiledPattern(Regex);

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Comparison {
    /// 构造比较；无效的正则留到评估时按不匹配处理
    pub fn new(operator: Operator, operand: impl Into<Value>) -> Self {
        let operand = operand.into();
        let pattern = Self::compile_pattern(operator, &operand).ok().flatten();
        Self {
            operator,
            operand,
            pattern,
        }
    }

    /// 构造比较并校验正则
    pub fn compiled(operator: Operator, operand: impl Into<Value>) -> Result<Self> {
        let operand = operand.into();
        let pattern = Self::compile_pattern(operator, &operand)?;
        Ok(Self {
            operator,
            operand,
            pattern,
        })
    }

    fn compile_pattern(operator: Operator, operand: &Value) -> Result<Option<CompiledPattern>> {
        if operator != Operator::Regex {
            return Ok(None);
        }
        let pattern = operand
            .as_str()
            .ok_or_else(|| RuleError::ParseError("regex 操作符需要字符串值".to_string()))?;
        ConditionEvaluator::compile_regex(pattern).map(|regex| Some(CompiledPattern(regex)))
    }

    /// 预编译的正则
    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref().map(|p| &p.0)
    }

    /// 评估字段值；类型不匹配视为不匹配
    pub fn test(&self, value: Option<&Value>) -> bool {
        let result = match (self.pattern(), value) {
            (Some(regex), Some(field)) => ConditionEvaluator::regex_is_match(field, regex),
            _ => ConditionEvaluator::evaluate(value, self.operator, &self.operand),
        };
        match result {
            Ok(matched) => matched,
            Err(e) => {
                trace!(operator = %self.operator, error = %e, "比较失败，视为不匹配");
                false
            }
        }
    }
}

/// 实体匹配模式
///
/// `literals` 为精确相等约束（通常是标识属性），`properties` 为属性比较约束，
/// 同一属性上的多个比较之间是 AND 关系。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPattern {
    pub class_name: String,
    pub literals: Map<String, Value>,
    pub properties: BTreeMap<String, Vec<Comparison>>,
}

impl EntityPattern {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            literals: Map::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_literal(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.literals.insert(field.into(), value.into());
        self
    }

    pub fn with_comparisons(mut self, field: impl Into<String>, comparisons: Vec<Comparison>) -> Self {
        self.properties.insert(field.into(), comparisons);
        self
    }

    /// 判断事实是否满足该模式
    pub fn matches(&self, fact: &Entity) -> bool {
        if fact.class_name() != self.class_name {
            return false;
        }

        let literals_ok = self
            .literals
            .iter()
            .all(|(field, expected)| fact.get(field).is_some_and(|v| ConditionEvaluator::eq(v, expected)));
        if !literals_ok {
            return false;
        }

        self.properties.iter().all(|(field, comparisons)| {
            let value = fact.get(field);
            comparisons.iter().all(|c| c.test(value))
        })
    }
}

/// 别名表成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionFamilyMember {
    /// 绑定关键字（目前只有 `$any`）
    pub key: String,
    pub class_name: String,
    pub alias: String,
}

/// 规则别名表：别名 → 实体类型
///
/// 由条件中的 `$any->EntityName||alias` 建立，动作模板中的 `$alias.property` 通过它解析。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConditionFamily {
    members: BTreeMap<String, ConditionFamilyMember>,
}

impl ConditionFamily {
    const ANY_KEY: &'static str = "$any";
    const FUNCTION_KEY: &'static str = "->";
    const ALIAS_KEY: &'static str = "||";

    pub fn new() -> Self {
        Self::default()
    }

    /// 是否为别名绑定写法
    pub fn is_member_token(token: &str) -> bool {
        token.starts_with(Self::ANY_KEY)
    }

    /// 解析 `$any->EntityName||alias` 并登记别名
    pub fn parse_add_member(
        &mut self,
        token: &str,
        registry: &EntityRegistry,
    ) -> Result<ConditionFamilyMember> {
        let malformed = || RuleError::ParseError(format!("无效的别名绑定: '{}'", token));

        let (key, definition) = token.split_once(Self::FUNCTION_KEY).ok_or_else(malformed)?;
        if key != Self::ANY_KEY {
            return Err(malformed());
        }
        let (class_name, alias) = definition.split_once(Self::ALIAS_KEY).ok_or_else(malformed)?;
        if class_name.is_empty() || alias.is_empty() {
            return Err(malformed());
        }
        if !registry.contains(class_name) {
            return Err(RuleError::UnknownEntityType(class_name.to_string()));
        }

        let member = ConditionFamilyMember {
            key: key.to_string(),
            class_name: class_name.to_string(),
            alias: alias.to_string(),
        };
        self.members.insert(alias.to_string(), member.clone());
        Ok(member)
    }

    pub fn get_member(&self, alias: &str) -> Option<&ConditionFamilyMember> {
        self.members.get(alias)
    }

    pub fn members(&self) -> &BTreeMap<String, ConditionFamilyMember> {
        &self.members
    }

    /// 查找与事实类型对应的成员
    pub fn match_fact(&self, fact: &Entity) -> Option<&ConditionFamilyMember> {
        self.members
            .values()
            .find(|m| m.class_name == fact.class_name())
    }
}

/// 编译后的条件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub expression: Expression,
    /// 原始条件 JSON
    pub payload: Value,
    pub is_aggregation: bool,
    pub family: ConditionFamily,
    /// 聚合条件对应的聚合实体
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationEntity>,
}
