//! 激活生命周期桥接
//!
//! 把引擎报告的激活增减转换为动作的 `on_removed` / `on_added` 调用。
//! 一个评估周期内先处理移除再处理新增；某条规则在本周期已处理过移除后，
//! 同周期内的新增和重复移除都会被跳过，直到 `reset`。

use crate::engine::{Activation, ActivationListener, RuleId};
use crate::entity::Entity;
use crate::error::Result;
use std::collections::HashSet;
use tracing::debug;

/// 激活回调的接收方（通常是规则存储）
#[cfg_attr(test, mockall::automock)]
pub trait ActivationTarget {
    fn on_removed(&mut self, rule_id: RuleId, facts: &[Entity]) -> Result<()>;

    fn on_added(&mut self, rule_id: RuleId, facts: &[Entity]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct LifecycleBridge {
    removed_rules: HashSet<RuleId>,
}

impl LifecycleBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空本周期已处理移除的规则集合，每次评估结束后调用
    pub fn reset(&mut self) {
        self.removed_rules.clear();
    }

    /// 本周期是否已处理过该规则的移除
    pub fn is_removed(&self, rule_id: RuleId) -> bool {
        self.removed_rules.contains(&rule_id)
    }

    /// 处理一次激活变化
    pub fn update_agenda(
        &mut self,
        added: &[Activation],
        removed: &[Activation],
        target: &mut dyn ActivationTarget,
    ) -> Result<()> {
        for activation in removed {
            if !self.removed_rules.insert(activation.rule_id) {
                continue;
            }
            debug!(rule_id = activation.rule_id, "激活移除");
            target.on_removed(activation.rule_id, &activation.facts)?;
        }

        for activation in added {
            if self.removed_rules.contains(&activation.rule_id) {
                debug!(rule_id = activation.rule_id, "本周期已移除，跳过新增");
                continue;
            }
            debug!(rule_id = activation.rule_id, "激活新增");
            target.on_added(activation.rule_id, &activation.facts)?;
        }

        Ok(())
    }

    /// 绑定接收方，得到可交给引擎的监听者
    pub fn listener<'a>(&'a mut self, target: &'a mut dyn ActivationTarget) -> BridgeListener<'a> {
        BridgeListener {
            bridge: self,
            target,
        }
    }
}

/// 引擎回调适配器
pub struct BridgeListener<'a> {
    bridge: &'a mut LifecycleBridge,
    target: &'a mut dyn ActivationTarget,
}

impl ActivationListener for BridgeListener<'_> {
    fn on_activations(&mut self, added: &[Activation], removed: &[Activation]) -> Result<()> {
        self.bridge.update_agenda(added, removed, &mut *self.target)
    }
}
