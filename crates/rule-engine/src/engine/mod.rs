//! 产生式规则引擎接口
//!
//! 规则层只依赖这里定义的接口：事实的声明/修改、从表达式注册规则、
//! 运行到静止状态，以及每轮激活变化的回调。模式匹配算法由具体实现负责。
//!
//! - `ProductionEngine`: 工作内存与规则网络
//! - `ActivationListener`: 激活增减回调
//! - `NaiveEngine`: 每轮全量重新匹配的参考实现

pub mod naive;

pub use naive::NaiveEngine;

use crate::entity::Entity;
use crate::error::Result;
use crate::models::Expression;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// 规则 ID
pub type RuleId = u32;

/// 工作内存中事实的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FactHandle(pub u64);

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f-{}", self.0)
    }
}

/// 激活：某条规则的条件当前匹配了一组具体事实
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub rule_id: RuleId,
    pub facts: Vec<Entity>,
}

/// 激活变化回调
///
/// 每轮评估中，引擎把新增与移除的激活交给监听者。
pub trait ActivationListener {
    fn on_activations(&mut self, added: &[Activation], removed: &[Activation]) -> Result<()>;
}

/// 产生式规则引擎
pub trait ProductionEngine: Send {
    /// 注册规则，规则的动作由 `rule_id` 标识
    fn register_rule(&mut self, rule_id: RuleId, expression: &Expression) -> Result<()>;

    /// 清空工作内存（保留已注册规则）
    fn reset(&mut self);

    /// 声明新事实
    fn declare(&mut self, fact: Entity) -> FactHandle;

    /// 修改已有事实的属性，返回修改后的句柄
    fn modify(&mut self, handle: FactHandle, updates: &Map<String, Value>) -> Result<FactHandle>;

    /// 读取事实
    fn fact(&self, handle: FactHandle) -> Option<&Entity>;

    /// 运行到静止状态，并通知激活变化
    fn run(&mut self, listener: &mut dyn ActivationListener) -> Result<()>;
}

/// 引擎工厂，每次重建时创建全新的引擎实例
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn ProductionEngine> + Send + Sync>;

/// 默认工厂：`NaiveEngine`
pub fn naive_factory() -> EngineFactory {
    Arc::new(|| Box::new(NaiveEngine::new()) as Box<dyn ProductionEngine>)
}
