//! 全量重新匹配的参考引擎
//!
//! 注册时把表达式展开为析取范式；每次运行时对每个分支枚举满足各模式的事实组合，
//! 与上一轮的激活集合比较得出新增与移除。修改事实保留原句柄，
//! 因此仍然匹配的激活不会产生变化。

use super::{Activation, ActivationListener, FactHandle, ProductionEngine, RuleId};
use crate::entity::Entity;
use crate::error::{Result, RuleError};
use crate::models::{EntityPattern, Expression};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::trace;

/// 激活标识：(规则, 分支序号, 事实句柄)
type ActivationId = (RuleId, usize, Vec<FactHandle>);

#[derive(Default)]
pub struct NaiveEngine {
    rules: BTreeMap<RuleId, Vec<Vec<EntityPattern>>>,
    facts: BTreeMap<FactHandle, Entity>,
    next_handle: u64,
    agenda: BTreeMap<ActivationId, Activation>,
}

impl NaiveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前工作内存中的事实数量
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// 计算当前全部激活
    fn match_all(&self) -> BTreeMap<ActivationId, Activation> {
        let mut current = BTreeMap::new();

        for (&rule_id, branches) in &self.rules {
            for (branch_index, patterns) in branches.iter().enumerate() {
                for handles in self.match_branch(patterns) {
                    let facts = handles
                        .iter()
                        .filter_map(|h| self.facts.get(h).cloned())
                        .collect();
                    current.insert(
                        (rule_id, branch_index, handles),
                        Activation { rule_id, facts },
                    );
                }
            }
        }

        current
    }

    /// 枚举满足一个分支的事实组合，同一事实不重复占用多个模式
    fn match_branch(&self, patterns: &[EntityPattern]) -> Vec<Vec<FactHandle>> {
        let candidates: Vec<Vec<FactHandle>> = patterns
            .iter()
            .map(|pattern| {
                self.facts
                    .iter()
                    .filter(|(_, fact)| pattern.matches(fact))
                    .map(|(handle, _)| *handle)
                    .collect()
            })
            .collect();

        let mut tuples: Vec<Vec<FactHandle>> = vec![Vec::new()];
        for slot in candidates {
            let mut next = Vec::new();
            for prefix in &tuples {
                for handle in &slot {
                    if prefix.contains(handle) {
                        continue;
                    }
                    let mut tuple = prefix.clone();
                    tuple.push(*handle);
                    next.push(tuple);
                }
            }
            tuples = next;
            if tuples.is_empty() {
                break;
            }
        }
        tuples
    }
}

impl ProductionEngine for NaiveEngine {
    fn register_rule(&mut self, rule_id: RuleId, expression: &Expression) -> Result<()> {
        self.rules.insert(rule_id, expression.branches());
        Ok(())
    }

    fn reset(&mut self) {
        self.facts.clear();
        self.agenda.clear();
        self.next_handle = 0;
    }

    fn declare(&mut self, fact: Entity) -> FactHandle {
        let handle = FactHandle(self.next_handle);
        self.next_handle += 1;
        trace!(%handle, entity = %fact, "声明事实");
        self.facts.insert(handle, fact);
        handle
    }

    fn modify(&mut self, handle: FactHandle, updates: &Map<String, Value>) -> Result<FactHandle> {
        let fact = self
            .facts
            .get_mut(&handle)
            .ok_or_else(|| RuleError::FactNotFound(handle.to_string()))?;
        fact.apply(updates);
        trace!(%handle, entity = %fact, "修改事实");
        Ok(handle)
    }

    fn fact(&self, handle: FactHandle) -> Option<&Entity> {
        self.facts.get(&handle)
    }

    fn run(&mut self, listener: &mut dyn ActivationListener) -> Result<()> {
        let current = self.match_all();

        let removed: Vec<Activation> = self
            .agenda
            .iter()
            .filter(|(id, _)| !current.contains_key(*id))
            .map(|(_, activation)| activation.clone())
            .collect();
        let added: Vec<Activation> = current
            .iter()
            .filter(|(id, _)| !self.agenda.contains_key(*id))
            .map(|(_, activation)| activation.clone())
            .collect();

        self.agenda = current;

        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }
        trace!(added = added.len(), removed = removed.len(), "激活变化");
        listener.on_activations(&added, &removed)
    }
}
