//! 基于实体的 ECA 规则引擎
//!
//! 外部状态变化以实体事件的形式进入引擎，与声明式的 JSON 条件匹配，
//! 匹配结果按类别触发动作。支持：
//! - JSON 条件编译（`$and` / `$or`、实体匹配、别名绑定、聚合）
//! - 实体标识与聚合语义
//! - 规则的新增、更新、删除与实体状态重放
//! - 动作模板解析与单次触发（enter/exit）语义
//!
//! 模式匹配由 `engine::ProductionEngine` 的实现负责，默认使用 `NaiveEngine`。

pub mod action;
pub mod aggregation;
pub mod compiler;
pub mod engine;
pub mod entity;
pub mod error;
pub mod evaluator;
pub mod facade;
pub mod lifecycle;
pub mod models;
pub mod operators;
pub mod store;
pub mod template;

pub use action::{Action, ActionClass, ActionDispatcher, ActionHandler, ActionInfo, ActionInvocation};
pub use aggregation::{AggregationEntity, AggregationFunction};
pub use compiler::ConditionCompiler;
pub use engine::{
    Activation, ActivationListener, EngineFactory, FactHandle, NaiveEngine, ProductionEngine, RuleId,
};
pub use entity::{Entity, EntityRegistry, EntitySchema};
pub use error::{Result, RuleError};
pub use facade::RuleEngine;
pub use lifecycle::LifecycleBridge;
pub use models::{Comparison, Condition, ConditionFamily, EntityPattern, Expression, LogicalGroup};
pub use operators::{LogicalOperator, Operator};
pub use store::{Rule, RuleInfo, RuleStore, RuleStoreStats};
pub use template::TemplateResolver;
