//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 规则引擎行为配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// 模板解析时把纯数字字符串作为数值代入
    pub numeric_string_coercion: bool,
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineSettings,
    pub observability: ObservabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "eeca-rule-engine".to_string(),
            environment: "development".to_string(),
            engine: EngineSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置，环境由 EECA_ENV 指定）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（EECA_ 前缀，层级用双下划线，如
    ///    EECA_ENGINE__NUMERIC_STRING_COERCION -> engine.numeric_string_coercion）
    ///
    /// 配置目录默认为 `config`，可用 CONFIG_DIR 覆盖。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("EECA_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir))
    }

    fn load_from(service_name: &str, env: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix("EECA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("eeca-config-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.observability.log_format, "pretty");
        assert!(!config.engine.numeric_string_coercion);
        assert!(!config.is_production());
    }

    #[test]
    fn test_load_without_files() {
        let dir = temp_config_dir("empty");

        let config = EngineConfig::load_from("lights", "development", &dir).unwrap();

        assert_eq!(config.service_name, "lights");
        assert_eq!(config.environment, "development");
        assert_eq!(config.engine, EngineSettings::default());
    }

    #[test]
    fn test_layered_files() {
        let dir = temp_config_dir("layered");
        fs::write(
            dir.join("default.toml"),
            "[observability]\nlog_level = \"debug\"\nlog_format = \"json\"\n",
        )
        .unwrap();
        fs::write(dir.join("production.toml"), "[observability]\nlog_level = \"warn\"\n").unwrap();
        fs::write(dir.join("lights.toml"), "[engine]\nnumeric_string_coercion = true\n").unwrap();

        let config = EngineConfig::load_from("lights", "production", &dir).unwrap();

        assert!(config.is_production());
        assert_eq!(config.observability.log_level, "warn");
        assert_eq!(config.observability.log_format, "json");
        assert!(config.engine.numeric_string_coercion);
    }
}
