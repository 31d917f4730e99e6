//! 动作模板模块
//!
//! 动作数据中可以通过 `"$alias.property"` 引用规则条件匹配到的事实字段，
//! 别名来自条件中的 `$any->Entity||alias` 绑定。
//!
//! # 主要功能
//!
//! - `TemplateResolver`: 在 JSON 树上递归替换占位符，保留字段原始类型

pub mod resolver;

pub use resolver::TemplateResolver;
