//! 规则引擎入口
//!
//! `RuleEngine` 组合实体类型注册表、动作分发器和规则存储，对外提供
//! 规则管理、实体事件触发和评估接口。
//!
//! 一次 `trigger` 的处理流程：
//! 1. 未注册的实体类型直接忽略
//! 2. 构造实体并声明或合并到工作内存
//! 3. 重新计算成员中包含该实体的聚合，并声明或合并聚合事实
//! 4. 运行引擎，激活变化经生命周期桥接执行动作

use crate::action::{ActionDispatcher, ActionHandler, ActionInvocation};
use crate::engine::{EngineFactory, RuleId};
use crate::entity::{Entity, EntitySchema, EntityRegistry, UTC_ENTITY};
use crate::error::{Result, RuleError};
use crate::store::{RuleInfo, RuleStore, RuleStoreStats};
use crate::template::TemplateResolver;
use chrono::{DateTime, Datelike, Timelike, Utc};
use eeca_shared::config::EngineConfig;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 规则引擎
pub struct RuleEngine {
    registry: EntityRegistry,
    dispatcher: ActionDispatcher,
    store: RuleStore,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            registry: EntityRegistry::new(),
            dispatcher: ActionDispatcher::default(),
            store: RuleStore::new(),
        }
    }

    /// 使用自定义产生式引擎
    pub fn with_engine_factory(factory: EngineFactory) -> Self {
        Self {
            registry: EntityRegistry::new(),
            dispatcher: ActionDispatcher::default(),
            store: RuleStore::with_engine_factory(factory),
        }
    }

    /// 按配置创建
    pub fn from_config(config: &EngineConfig) -> Self {
        let resolver = TemplateResolver::new()
            .with_numeric_string_coercion(config.engine.numeric_string_coercion);
        info!(
            service = %config.service_name,
            environment = %config.environment,
            numeric_string_coercion = config.engine.numeric_string_coercion,
            "规则引擎已配置"
        );
        Self {
            registry: EntityRegistry::new(),
            dispatcher: ActionDispatcher::new(resolver),
            store: RuleStore::new(),
        }
    }

    /// 注册实体类型，同名类型覆盖
    pub fn register_entity_type<I, S>(&mut self, name: &str, identity: I) -> Arc<EntitySchema>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        debug!(entity_type = name, "注册实体类型");
        self.registry.register(name, identity)
    }

    /// 注册动作处理器，类别 `default` 接收所有未注册类别的动作
    pub fn register_action_handler<F>(&mut self, category: &str, handler: F)
    where
        F: Fn(&ActionInvocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(category, Arc::new(handler));
    }

    pub fn register_handler(&mut self, category: &str, handler: Arc<dyn ActionHandler>) {
        debug!(category, "注册动作处理器");
        self.dispatcher.register(category, handler);
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn add_rule(&mut self, payload: &Value) -> Result<RuleId> {
        let ids = self.store.add(&self.registry, std::slice::from_ref(payload))?;
        Ok(ids[0])
    }

    pub fn add_rules(&mut self, payloads: &[Value]) -> Result<Vec<RuleId>> {
        self.store.add(&self.registry, payloads)
    }

    /// 从 JSON 文本加载规则，支持单个规则对象或规则数组
    pub fn add_rules_from_json(&mut self, json: &str) -> Result<Vec<RuleId>> {
        match serde_json::from_str::<Value>(json)? {
            Value::Array(payloads) => self.add_rules(&payloads),
            payload => self.add_rule(&payload).map(|id| vec![id]),
        }
    }

    pub fn remove_rule(&mut self, rule_id: RuleId) -> Result<RuleInfo> {
        self.store.remove(rule_id)
    }

    pub fn update_rule(&mut self, rule_id: RuleId, payload: &Value) -> Result<bool> {
        self.store.update(&self.registry, rule_id, payload)
    }

    pub fn read_rules(&self) -> BTreeMap<RuleId, RuleInfo> {
        self.store.snapshot()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.store.entities()
    }

    pub fn is_running(&self) -> bool {
        self.store.is_running()
    }

    pub fn stats(&self) -> RuleStoreStats {
        self.store.stats()
    }

    /// 冷启动
    pub fn start(&mut self) -> Result<()> {
        self.store.start()
    }

    /// 重建引擎并重放实体状态
    pub fn restart(&mut self) -> Result<()> {
        self.store.rebuild()
    }

    /// 触发实体事件
    #[instrument(skip(self, fields))]
    pub fn trigger(&mut self, type_name: &str, fields: Map<String, Value>) -> Result<()> {
        let Some(schema) = self.registry.get(type_name) else {
            debug!("忽略未注册的实体类型");
            return Ok(());
        };
        if !self.store.is_running() {
            return Err(RuleError::EngineNotStarted);
        }

        let entity = Entity::new(schema, fields);
        let key = entity.key().to_string();
        debug!(entity_key = %key, %entity, "收到实体事件");

        self.store.declare_or_merge(entity)?;
        self.refresh_aggregations(&key)?;
        self.store.evaluate(&self.dispatcher)
    }

    /// 以当前时间触发内置的 `utc` 实体
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("year".to_string(), json!(now.year()));
        fields.insert("month".to_string(), json!(now.month()));
        fields.insert("day".to_string(), json!(now.day()));
        fields.insert(
            "weekday".to_string(),
            json!(now.weekday().num_days_from_monday()),
        );
        fields.insert("hours".to_string(), json!(now.hour()));
        fields.insert("minutes".to_string(), json!(now.minute()));
        fields.insert("seconds".to_string(), json!(now.second()));
        self.trigger(UTC_ENTITY, fields)
    }

    /// 运行到静止状态
    pub fn evaluate(&mut self) -> Result<()> {
        self.store.evaluate(&self.dispatcher)
    }

    /// 重新计算包含该实体的聚合
    fn refresh_aggregations(&mut self, entity_key: &str) -> Result<()> {
        for aggregation in self.store.aggregations_for(entity_key) {
            let properties: Vec<Map<String, Value>> = aggregation
                .entity_keys()
                .iter()
                .filter_map(|key| self.store.entity(key))
                .map(Entity::properties)
                .collect();
            let result = aggregation.function().apply(&properties);
            debug!(
                aggregation_key = %aggregation.key(),
                function = %aggregation.function().name(),
                %result,
                "聚合已更新"
            );
            self.store.declare_or_merge(aggregation.generate_event(result))?;
        }
        Ok(())
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
