//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则未找到: id={0}")]
    RuleNotFound(u32),

    #[error("规则 '{rule_name}' 解析失败: {source}")]
    RuleParsing {
        rule_name: String,
        #[source]
        source: Box<RuleError>,
    },

    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("不支持的动作类型: '{0}'")]
    ActionClassNotSupported(String),

    #[error("不支持的动作类别: '{0}'")]
    ActionCategoryNotSupported(String),

    #[error("无效的逻辑连接符: '{0}'")]
    UnknownConjunction(String),

    #[error("无效的操作符: '{0}'")]
    UnknownOperator(String),

    #[error("未注册的实体类型: '{0}'")]
    UnknownEntityType(String),

    #[error("无效的聚合函数: '{0}'")]
    UnknownFunction(String),

    #[error("规则成员未定义: '{0}'")]
    UndefinedMember(String),

    #[error("无效的正则表达式 '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("规则引擎尚未启动")]
    EngineNotStarted,

    #[error("事实不存在: {0}")]
    FactNotFound(String),

    #[error("动作执行失败: {0}")]
    ActionExecution(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 为编译期错误附加规则名称
    pub fn in_rule(self, rule_name: impl Into<String>) -> Self {
        match self {
            already @ RuleError::RuleParsing { .. } => already,
            other => RuleError::RuleParsing {
                rule_name: rule_name.into(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
