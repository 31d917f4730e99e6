//! 统一可观测性模块
//!
//! 规则引擎以库的形式嵌入应用，日志订阅者由宿主在启动时通过 `init` 安装一次。

pub mod tracing;

use crate::config::ObservabilityConfig;
use ::tracing::info;
use anyhow::Result;

/// 统一初始化可观测性
///
/// # Example
///
/// ```ignore
/// use eeca_shared::config::EngineConfig;
/// use eeca_shared::observability;
///
/// fn main() -> anyhow::Result<()> {
///     let config = EngineConfig::load("eeca-rule-engine")?;
///     observability::init(&config.observability)?;
///
///     // 应用逻辑...
///
///     Ok(())
/// }
/// ```
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    tracing::init(config)?;

    info!(
        log_level = %config.log_level,
        log_format = %config.log_format,
        "Observability initialized"
    );
    Ok(())
}
