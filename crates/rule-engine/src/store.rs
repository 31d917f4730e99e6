//! 规则存储管理
//!
//! 保存已解析的规则并拥有产生式引擎实例。规则集合发生结构变化时
//! （新增、删除、更新）整体重建引擎：重新注册全部规则并重放已跟踪的实体，
//! 代价与规则总数成正比。
//!
//! 规则 ID 采用补位分配：取未被占用的最小正整数。

use crate::action::{Action, ActionDispatcher, ActionInfo, ActionScope};
use crate::aggregation::AggregationEntity;
use crate::compiler::ConditionCompiler;
use crate::engine::{EngineFactory, FactHandle, ProductionEngine, RuleId, naive_factory};
use crate::entity::{Entity, EntityRegistry};
use crate::error::{Result, RuleError};
use crate::lifecycle::{ActivationTarget, LifecycleBridge};
use crate::models::Condition;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const NAME_KEY: &str = "name";
const DESCRIPTION_KEY: &str = "description";
const META_KEY: &str = "meta";
const CONDITION_KEY: &str = "condition";
const ACTION_KEY: &str = "action";

/// 规则
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    pub meta: Value,
    pub condition: Arc<Condition>,
    pub action: Action,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn info(&self) -> RuleInfo {
        RuleInfo {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            meta: self.meta.clone(),
            condition: self.condition.payload.clone(),
            action: self.action.info(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// 规则的只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleInfo {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    pub meta: Value,
    pub condition: Value,
    pub action: ActionInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 已跟踪的实体及其在工作内存中的句柄
#[derive(Debug, Clone)]
struct TrackedEntity {
    handle: FactHandle,
    entity: Entity,
}

/// 规则存储
pub struct RuleStore {
    rules: BTreeMap<RuleId, Rule>,
    factory: EngineFactory,
    engine: Option<Box<dyn ProductionEngine>>,
    bridge: LifecycleBridge,
    /// 实体 key → 最新状态
    entities: BTreeMap<String, TrackedEntity>,
}

impl RuleStore {
    /// 创建使用默认引擎的规则存储
    pub fn new() -> Self {
        Self::with_engine_factory(naive_factory())
    }

    pub fn with_engine_factory(factory: EngineFactory) -> Self {
        Self {
            rules: BTreeMap::new(),
            factory,
            engine: None,
            bridge: LifecycleBridge::new(),
            entities: BTreeMap::new(),
        }
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, rule_id: RuleId) -> bool {
        self.rules.contains_key(&rule_id)
    }

    pub fn get(&self, rule_id: RuleId) -> Option<&Rule> {
        self.rules.get(&rule_id)
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_some()
    }

    /// 解析规则 JSON，失败时错误中带上规则名
    pub fn parse_rule(registry: &EntityRegistry, payload: &Value) -> Result<Rule> {
        let object = payload
            .as_object()
            .ok_or_else(|| RuleError::ParseError("规则必须是 JSON 对象".to_string()))?;
        let name = object
            .get(NAME_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::ParseError(format!("规则缺少字符串字段 '{}'", NAME_KEY)))?;

        Self::parse_named(registry, name, object).map_err(|e| e.in_rule(name))
    }

    fn parse_named(registry: &EntityRegistry, name: &str, object: &Map<String, Value>) -> Result<Rule> {
        let condition_payload = object
            .get(CONDITION_KEY)
            .ok_or_else(|| RuleError::ParseError(format!("规则缺少 '{}'", CONDITION_KEY)))?;
        let action_payload = object
            .get(ACTION_KEY)
            .ok_or_else(|| RuleError::ParseError(format!("规则缺少 '{}'", ACTION_KEY)))?;

        let condition = Arc::new(ConditionCompiler::new(registry).compile(condition_payload)?);
        let action = Action::parse(condition.clone(), action_payload)?;

        let now = Utc::now();
        Ok(Rule {
            id: 0,
            name: name.to_string(),
            description: object
                .get(DESCRIPTION_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            meta: object
                .get(META_KEY)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
            condition,
            action,
            created_at: now,
            updated_at: now,
        })
    }

    /// 未被占用的最小正整数
    pub fn next_id(&self) -> RuleId {
        let mut candidate = 1;
        for &id in self.rules.keys() {
            if id != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    /// 批量新增规则
    ///
    /// 全部解析成功后才写入；任一失败则不保存任何规则。
    #[instrument(skip(self, registry, payloads), fields(count = payloads.len()))]
    pub fn add(&mut self, registry: &EntityRegistry, payloads: &[Value]) -> Result<Vec<RuleId>> {
        let parsed = payloads
            .iter()
            .map(|payload| Self::parse_rule(registry, payload))
            .collect::<Result<Vec<_>>>()?;

        let mut ids = Vec::with_capacity(parsed.len());
        for mut rule in parsed {
            let id = self.next_id();
            rule.id = id;
            info!(rule_id = id, rule_name = %rule.name, "规则已添加");
            self.rules.insert(id, rule);
            ids.push(id);
        }

        if self.is_running() {
            self.rebuild()?;
        }
        Ok(ids)
    }

    /// 删除规则
    #[instrument(skip(self))]
    pub fn remove(&mut self, rule_id: RuleId) -> Result<RuleInfo> {
        let Some(rule) = self.rules.remove(&rule_id) else {
            warn!("删除不存在的规则: {}", rule_id);
            return Err(RuleError::RuleNotFound(rule_id));
        };
        info!(rule_name = %rule.name, "规则已删除");

        if self.is_running() {
            self.rebuild()?;
        }
        Ok(rule.info())
    }

    /// 更新规则，规则不存在时返回 `false`
    #[instrument(skip(self, registry, payload))]
    pub fn update(&mut self, registry: &EntityRegistry, rule_id: RuleId, payload: &Value) -> Result<bool> {
        let Some(created_at) = self.rules.get(&rule_id).map(|r| r.created_at) else {
            warn!("更新不存在的规则: {}", rule_id);
            return Ok(false);
        };

        let mut rule = Self::parse_rule(registry, payload)?;
        rule.id = rule_id;
        rule.created_at = created_at;
        info!(rule_name = %rule.name, "规则已更新");
        self.rules.insert(rule_id, rule);

        if self.is_running() {
            self.rebuild()?;
        }
        Ok(true)
    }

    /// 用当前规则创建新引擎
    fn build_engine(&self) -> Result<Box<dyn ProductionEngine>> {
        let mut engine = (self.factory)();
        for (&rule_id, rule) in &self.rules {
            engine.register_rule(rule_id, &rule.condition.expression)?;
        }
        engine.reset();
        Ok(engine)
    }

    /// 冷启动：空工作内存，不重放实体
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        let engine = self.build_engine()?;
        self.engine = Some(engine);
        self.bridge = LifecycleBridge::new();
        self.entities.clear();
        info!(rules = self.rules.len(), "规则引擎已启动");
        Ok(())
    }

    /// 重建引擎并重放已跟踪实体的最新状态（不执行评估）
    #[instrument(skip(self))]
    pub fn rebuild(&mut self) -> Result<()> {
        let snapshot: Vec<Entity> = self.entities.values().map(|t| t.entity.clone()).collect();

        let engine = self.build_engine()?;
        self.engine = Some(engine);
        self.bridge = LifecycleBridge::new();
        self.entities.clear();

        for entity in snapshot {
            self.declare_or_merge(entity)?;
        }

        info!(
            rules = self.rules.len(),
            entities = self.entities.len(),
            "规则引擎已重建"
        );
        Ok(())
    }

    /// 声明新实体，或把属性变化合并到已跟踪的同 key 实体
    ///
    /// 返回工作内存是否发生变化。
    pub fn declare_or_merge(&mut self, entity: Entity) -> Result<bool> {
        let engine = self.engine.as_mut().ok_or(RuleError::EngineNotStarted)?;

        if let Some(tracked) = self.entities.get_mut(entity.key()) {
            if !tracked.entity.diff_and_merge(&entity) {
                debug!(entity_key = %entity.key(), "实体无变化");
                return Ok(false);
            }
            tracked.handle = engine.modify(tracked.handle, &entity.properties())?;
            debug!(entity_key = %entity.key(), entity = %tracked.entity, "实体已修改");
            return Ok(true);
        }

        let key = entity.key().to_string();
        let handle = engine.declare(entity.clone());
        debug!(entity_key = %key, %entity, "实体已声明");
        self.entities.insert(key, TrackedEntity { handle, entity });
        Ok(true)
    }

    pub fn entity(&self, key: &str) -> Option<&Entity> {
        self.entities.get(key).map(|t| &t.entity)
    }

    /// 已跟踪实体的只读视图
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().map(|t| &t.entity)
    }

    /// 成员中包含该实体的聚合定义
    pub fn aggregations_for(&self, entity_key: &str) -> Vec<AggregationEntity> {
        let mut found: Vec<AggregationEntity> = Vec::new();
        for rule in self.rules.values() {
            if let Some(aggregation) = &rule.condition.aggregation
                && aggregation.contains(entity_key)
                && !found.iter().any(|a| a.key() == aggregation.key())
            {
                found.push(aggregation.clone());
            }
        }
        found
    }

    /// 运行引擎到静止状态，激活变化经生命周期桥接交给动作
    ///
    /// 无论成功与否，结束时都会清空本周期的移除记录。
    pub fn evaluate(&mut self, dispatcher: &ActionDispatcher) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(RuleError::EngineNotStarted)?;

        let mut target = RuleActions {
            rules: &mut self.rules,
            dispatcher,
        };
        let result = {
            let mut listener = self.bridge.listener(&mut target);
            engine.run(&mut listener)
        };
        self.bridge.reset();
        result
    }

    /// 规则快照
    pub fn snapshot(&self) -> BTreeMap<RuleId, RuleInfo> {
        self.rules.iter().map(|(&id, rule)| (id, rule.info())).collect()
    }

    /// 获取规则存储统计信息
    pub fn stats(&self) -> RuleStoreStats {
        RuleStoreStats {
            rules_count: self.rules.len(),
            aggregation_rules: self
                .rules
                .values()
                .filter(|r| r.condition.is_aggregation)
                .count(),
            tracked_entities: self.entities.len(),
            running: self.is_running(),
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStoreStats {
    /// 规则总数
    pub rules_count: usize,
    /// 聚合规则数
    pub aggregation_rules: usize,
    /// 已跟踪的实体数
    pub tracked_entities: usize,
    pub running: bool,
}

/// 激活回调落到具体规则的动作上
struct RuleActions<'a> {
    rules: &'a mut BTreeMap<RuleId, Rule>,
    dispatcher: &'a ActionDispatcher,
}

impl RuleActions<'_> {
    fn scoped(&mut self, rule_id: RuleId) -> Option<(&mut Action, ActionScope<'_>)> {
        let rule = self.rules.get_mut(&rule_id)?;
        let scope = ActionScope {
            rule_id,
            rule_name: &rule.name,
            dispatcher: self.dispatcher,
        };
        Some((&mut rule.action, scope))
    }
}

impl ActivationTarget for RuleActions<'_> {
    fn on_removed(&mut self, rule_id: RuleId, facts: &[Entity]) -> Result<()> {
        match self.scoped(rule_id) {
            Some((action, scope)) => action.on_removed(scope, facts),
            None => {
                warn!(rule_id, "激活对应的规则不存在");
                Ok(())
            }
        }
    }

    fn on_added(&mut self, rule_id: RuleId, facts: &[Entity]) -> Result<()> {
        match self.scoped(rule_id) {
            Some((action, scope)) => action.on_added(scope, facts),
            None => {
                warn!(rule_id, "激活对应的规则不存在");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionInvocation;
    use parking_lot::Mutex;
    use serde_json::json;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register("device", ["id"]);
        registry
    }

    fn sample_rule_json(name: &str) -> Value {
        json!({
            "name": name,
            "description": "人数大于零",
            "meta": {"owner": "ops"},
            "condition": {
                "$any->device||room": {"$properties": {"count": [{">": 0}]}}
            },
            "action": {
                "$class": "default",
                "$category": "service",
                "$data": {"target": "$room.id"}
            }
        })
    }

    fn device(registry: &EntityRegistry, id: i64, count: i64) -> Entity {
        registry
            .create("device", json!({"id": id, "count": count}).as_object().cloned().unwrap())
            .unwrap()
    }

    fn recording_dispatcher() -> (ActionDispatcher, Arc<Mutex<Vec<ActionInvocation>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let mut dispatcher = ActionDispatcher::default();
        dispatcher.register(
            "service",
            Arc::new(move |invocation: &ActionInvocation| -> anyhow::Result<()> {
                sink.lock().push(invocation.clone());
                Ok(())
            }),
        );
        (dispatcher, calls)
    }

    #[test]
    fn test_add_rule() {
        let registry = registry();
        let mut store = RuleStore::new();

        let ids = store.add(&registry, &[sample_rule_json("test")]).unwrap();

        assert_eq!(ids, vec![1]);
        assert_eq!(store.len(), 1);
        assert!(store.contains(1));
        let rule = store.get(1).unwrap();
        assert_eq!(rule.description, "人数大于零");
        assert_eq!(rule.meta, json!({"owner": "ops"}));
    }

    #[test]
    fn test_id_reuse() {
        let registry = registry();
        let mut store = RuleStore::new();
        store
            .add(
                &registry,
                &[sample_rule_json("a"), sample_rule_json("b"), sample_rule_json("c")],
            )
            .unwrap();

        store.remove(2).unwrap();
        assert_eq!(store.next_id(), 2);

        let ids = store.add(&registry, &[sample_rule_json("d"), sample_rule_json("e")]).unwrap();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_add_is_all_or_nothing() {
        let registry = registry();
        let mut store = RuleStore::new();
        let mut broken = sample_rule_json("broken");
        broken["condition"] = json!({"$any->lamp||l": {"$properties": {}}});

        let err = store
            .add(&registry, &[sample_rule_json("ok"), broken])
            .unwrap_err();

        assert!(matches!(
            err,
            RuleError::RuleParsing { ref rule_name, .. } if rule_name == "broken"
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_parse_requires_name() {
        let registry = registry();
        let mut payload = sample_rule_json("x");
        payload.as_object_mut().unwrap().remove("name");

        assert!(matches!(
            RuleStore::parse_rule(&registry, &payload),
            Err(RuleError::ParseError(_))
        ));
    }

    #[test]
    fn test_update_rule() {
        let registry = registry();
        let mut store = RuleStore::new();
        store.add(&registry, &[sample_rule_json("test")]).unwrap();
        let created_at = store.get(1).unwrap().created_at;

        let updated = store.update(&registry, 1, &sample_rule_json("renamed")).unwrap();

        assert!(updated);
        let rule = store.get(1).unwrap();
        assert_eq!(rule.name, "renamed");
        assert_eq!(rule.created_at, created_at);
        assert!(rule.updated_at >= created_at);
    }

    #[test]
    fn test_update_nonexistent_rule() {
        let registry = registry();
        let mut store = RuleStore::new();

        assert!(!store.update(&registry, 9, &sample_rule_json("x")).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_nonexistent_rule() {
        let mut store = RuleStore::new();
        assert!(matches!(store.remove(5), Err(RuleError::RuleNotFound(5))));
    }

    #[test]
    fn test_snapshot() {
        let registry = registry();
        let mut store = RuleStore::new();
        store.add(&registry, &[sample_rule_json("test")]).unwrap();

        let snapshot = store.snapshot();
        let info = &snapshot[&1];

        assert_eq!(info.name, "test");
        assert_eq!(info.action.category, "service");
        assert_eq!(
            info.condition,
            json!({"$any->device||room": {"$properties": {"count": [{">": 0}]}}})
        );
    }

    #[test]
    fn test_requires_start() {
        let registry = registry();
        let mut store = RuleStore::new();
        let dispatcher = ActionDispatcher::default();

        assert!(!store.is_running());
        assert!(matches!(
            store.declare_or_merge(device(&registry, 1, 1)),
            Err(RuleError::EngineNotStarted)
        ));
        assert!(matches!(store.evaluate(&dispatcher), Err(RuleError::EngineNotStarted)));
    }

    #[test]
    fn test_declare_or_merge() {
        let registry = registry();
        let mut store = RuleStore::new();
        store.start().unwrap();

        assert!(store.declare_or_merge(device(&registry, 1, 0)).unwrap());
        assert!(!store.declare_or_merge(device(&registry, 1, 0)).unwrap());
        assert!(store.declare_or_merge(device(&registry, 1, 4)).unwrap());

        assert_eq!(store.entities().count(), 1);
        let key = device(&registry, 1, 0).key().to_string();
        assert_eq!(store.entity(&key).unwrap().get("count"), Some(&json!(4)));
    }

    #[test]
    fn test_evaluate_dispatches() {
        let registry = registry();
        let (dispatcher, calls) = recording_dispatcher();
        let mut store = RuleStore::new();
        store.add(&registry, &[sample_rule_json("test")]).unwrap();
        store.start().unwrap();

        store.declare_or_merge(device(&registry, 7, 1)).unwrap();
        store.evaluate(&dispatcher).unwrap();

        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].rule_id, 1);
        assert_eq!(calls[0].fields["target"], json!(7));
    }

    #[test]
    fn test_rebuild_replays_entities() {
        let registry = registry();
        let (dispatcher, calls) = recording_dispatcher();
        let mut store = RuleStore::new();
        store.start().unwrap();
        store.declare_or_merge(device(&registry, 1, 3)).unwrap();
        store.declare_or_merge(device(&registry, 2, 0)).unwrap();
        let before: Vec<Entity> = store.entities().cloned().collect();

        // 运行中新增规则触发重建
        store.add(&registry, &[sample_rule_json("late")]).unwrap();

        let after: Vec<Entity> = store.entities().cloned().collect();
        assert_eq!(before, after);
        assert!(calls.lock().is_empty());

        store.evaluate(&dispatcher).unwrap();
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_start_is_cold() {
        let registry = registry();
        let mut store = RuleStore::new();
        store.start().unwrap();
        store.declare_or_merge(device(&registry, 1, 3)).unwrap();

        store.start().unwrap();

        assert_eq!(store.entities().count(), 0);
    }

    #[test]
    fn test_stats() {
        let registry = registry();
        let mut store = RuleStore::new();
        store.add(&registry, &[sample_rule_json("a"), sample_rule_json("b")]).unwrap();

        let stats = store.stats();

        assert_eq!(stats.rules_count, 2);
        assert_eq!(stats.aggregation_rules, 0);
        assert_eq!(stats.tracked_entities, 0);
        assert!(!stats.running);
    }
}
