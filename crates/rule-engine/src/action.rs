//! 动作模型
//!
//! 规则匹配后执行的动作。动作由 `$class` 决定触发语义：
//!
//! - `default`: 每次新增激活都执行完整的 `$data`
//! - `single`: 在一次连续匹配期间只执行一次 `$enter`，匹配结束时执行 `$exit`
//!
//! 执行时先用 `TemplateResolver` 解析 `$alias.property` 占位符，
//! 再按 `$category` 交给 `ActionDispatcher` 中注册的处理器。

use crate::engine::RuleId;
use crate::entity::Entity;
use crate::error::{Result, RuleError};
use crate::models::Condition;
use crate::template::TemplateResolver;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CLASS_KEY: &str = "$class";
pub const CATEGORY_KEY: &str = "$category";
pub const DATA_KEY: &str = "$data";
pub const ENTER_KEY: &str = "$enter";
pub const EXIT_KEY: &str = "$exit";

/// 未匹配到处理器时使用的类别
pub const DEFAULT_CATEGORY: &str = "default";

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionClass {
    Default,
    Single,
}

impl ActionClass {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "default" => Ok(Self::Default),
            "single" => Ok(Self::Single),
            other => Err(RuleError::ActionClassNotSupported(other.to_string())),
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Single => write!(f, "single"),
        }
    }
}

/// 动作的只读描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionInfo {
    pub category: String,
    pub class: ActionClass,
    pub data: Value,
}

/// 交给处理器的一次动作调用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionInvocation {
    pub category: String,
    pub rule_id: RuleId,
    pub rule_name: String,
    /// 解析后的动作数据
    pub fields: Map<String, Value>,
}

/// 动作处理器
#[cfg_attr(test, mockall::automock)]
pub trait ActionHandler: Send + Sync {
    fn handle(&self, invocation: &ActionInvocation) -> anyhow::Result<()>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionInvocation) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, invocation: &ActionInvocation) -> anyhow::Result<()> {
        self(invocation)
    }
}

/// 类别 → 处理器
pub struct ActionDispatcher {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    resolver: TemplateResolver,
}

impl ActionDispatcher {
    pub fn new(resolver: TemplateResolver) -> Self {
        Self {
            handlers: HashMap::new(),
            resolver,
        }
    }

    /// 注册处理器，同名类别覆盖
    pub fn register(&mut self, category: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(category.into(), handler);
    }

    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        categories.sort_unstable();
        categories
    }

    pub fn resolver(&self) -> &TemplateResolver {
        &self.resolver
    }

    /// 按类别分发，未注册的类别回退到 `default`
    pub fn dispatch(&self, invocation: &ActionInvocation) -> Result<()> {
        let handler = self
            .handlers
            .get(&invocation.category)
            .or_else(|| self.handlers.get(DEFAULT_CATEGORY))
            .ok_or_else(|| RuleError::ActionCategoryNotSupported(invocation.category.clone()))?;

        debug!(
            rule_id = invocation.rule_id,
            rule_name = %invocation.rule_name,
            category = %invocation.category,
            "执行动作"
        );

        handler.handle(invocation).map_err(|e| {
            warn!(rule_id = invocation.rule_id, category = %invocation.category, error = %e, "动作执行失败");
            RuleError::ActionExecution(format!("{:#}", e))
        })
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new(TemplateResolver::new())
    }
}

/// 动作执行上下文：所属规则与分发器
#[derive(Clone, Copy)]
pub struct ActionScope<'a> {
    pub rule_id: RuleId,
    pub rule_name: &'a str,
    pub dispatcher: &'a ActionDispatcher,
}

/// 单次触发动作的状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleState {
    /// 本次匹配期间是否已执行 `$enter`
    pub executed: bool,
    /// 规则当前是否处于匹配状态
    pub can_execute: bool,
}

/// 动作
#[derive(Debug, Clone)]
pub enum Action {
    Default {
        condition: Arc<Condition>,
        category: String,
        data: Value,
    },
    Single {
        condition: Arc<Condition>,
        category: String,
        data: Value,
        state: SingleState,
    },
}

impl Action {
    /// 解析动作 JSON
    pub fn parse(condition: Arc<Condition>, payload: &Value) -> Result<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| RuleError::ParseError("动作必须是 JSON 对象".to_string()))?;

        let class = match object.get(CLASS_KEY) {
            Some(Value::String(name)) => ActionClass::from_name(name)?,
            Some(other) => return Err(RuleError::ActionClassNotSupported(other.to_string())),
            None => return Err(RuleError::ActionClassNotSupported(String::new())),
        };
        let category = object
            .get(CATEGORY_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::ParseError(format!("动作缺少 {}", CATEGORY_KEY)))?
            .to_string();
        let data = object
            .get(DATA_KEY)
            .cloned()
            .ok_or_else(|| RuleError::ParseError(format!("动作缺少 {}", DATA_KEY)))?;

        Ok(match class {
            ActionClass::Default => Self::Default {
                condition,
                category,
                data,
            },
            ActionClass::Single => Self::Single {
                condition,
                category,
                data,
                state: SingleState::default(),
            },
        })
    }

    pub fn class(&self) -> ActionClass {
        match self {
            Self::Default { .. } => ActionClass::Default,
            Self::Single { .. } => ActionClass::Single,
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Self::Default { category, .. } | Self::Single { category, .. } => category,
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            Self::Default { data, .. } | Self::Single { data, .. } => data,
        }
    }

    pub fn condition(&self) -> &Arc<Condition> {
        match self {
            Self::Default { condition, .. } | Self::Single { condition, .. } => condition,
        }
    }

    /// 单次触发动作的状态
    pub fn state(&self) -> Option<&SingleState> {
        match self {
            Self::Default { .. } => None,
            Self::Single { state, .. } => Some(state),
        }
    }

    pub fn info(&self) -> ActionInfo {
        ActionInfo {
            category: self.category().to_string(),
            class: self.class(),
            data: self.data().clone(),
        }
    }

    /// 规则新增激活
    pub fn on_added(&mut self, scope: ActionScope<'_>, facts: &[Entity]) -> Result<()> {
        match self {
            Self::Default {
                condition,
                category,
                data,
            } => run(condition, category, data, scope, facts),
            Self::Single {
                condition,
                category,
                data,
                state,
            } => {
                if !state.can_execute {
                    state.executed = false;
                }
                state.can_execute = true;
                if state.executed {
                    return Ok(());
                }
                let payload = enter_payload(data);
                run(condition, category, &payload, scope, facts)?;
                state.executed = true;
                Ok(())
            }
        }
    }

    /// 规则移除激活
    pub fn on_removed(&mut self, scope: ActionScope<'_>, facts: &[Entity]) -> Result<()> {
        match self {
            Self::Default { .. } => Ok(()),
            Self::Single {
                condition,
                category,
                data,
                state,
            } => {
                state.can_execute = false;
                if !state.executed {
                    return Ok(());
                }
                match data.get(EXIT_KEY) {
                    Some(payload) => run(condition, category, payload, scope, facts),
                    None => Ok(()),
                }
            }
        }
    }

    /// 解析模板并交给处理器
    pub fn execute(&self, payload: &Value, scope: ActionScope<'_>, facts: &[Entity]) -> Result<()> {
        run(self.condition(), self.category(), payload, scope, facts)
    }
}

/// 进入时执行的载荷：`$enter`，缺省时为去掉 `$exit` 的整个数据
fn enter_payload(data: &Value) -> Cow<'_, Value> {
    if let Some(enter) = data.get(ENTER_KEY) {
        return Cow::Borrowed(enter);
    }
    match data {
        Value::Object(map) if map.contains_key(EXIT_KEY) => {
            let mut map = map.clone();
            map.remove(EXIT_KEY);
            Cow::Owned(Value::Object(map))
        }
        other => Cow::Borrowed(other),
    }
}

fn run(
    condition: &Condition,
    category: &str,
    payload: &Value,
    scope: ActionScope<'_>,
    facts: &[Entity],
) -> Result<()> {
    let resolved = scope
        .dispatcher
        .resolver()
        .resolve(payload, &condition.family, facts)?;

    let fields = match resolved {
        Value::Object(fields) => fields,
        other => {
            return Err(RuleError::ActionExecution(format!(
                "动作数据必须是 JSON 对象，实际为 {}",
                other
            )));
        }
    };

    scope.dispatcher.dispatch(&ActionInvocation {
        category: category.to_string(),
        rule_id: scope.rule_id,
        rule_name: scope.rule_name.to_string(),
        fields,
    })
}
