//! 配置加载集成测试
//!
//! 通过 CONFIG_DIR / EECA_ENV / EECA_* 环境变量走完整的分层加载流程。
//! 环境变量是进程级状态，所有断言放在同一个测试中串行执行。

use eeca_shared::config::EngineConfig;
use std::fs;

#[test]
fn test_load_with_environment_overrides() {
    let dir = std::env::temp_dir().join(format!("eeca-config-it-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("default.toml"),
        "[observability]\nlog_level = \"info\"\nlog_format = \"json\"\n",
    )
    .unwrap();
    fs::write(dir.join("staging.toml"), "[engine]\nnumeric_string_coercion = true\n").unwrap();

    // SAFETY: 该测试文件只有这一个测试，不会并发修改环境变量
    unsafe {
        std::env::set_var("CONFIG_DIR", &dir);
        std::env::set_var("EECA_ENV", "staging");
        std::env::set_var("EECA_OBSERVABILITY__LOG_LEVEL", "debug");
    }

    let config = EngineConfig::load("lights").unwrap();

    assert_eq!(config.service_name, "lights");
    assert_eq!(config.environment, "staging");
    assert!(config.engine.numeric_string_coercion);
    assert_eq!(config.observability.log_format, "json");
    assert_eq!(config.observability.log_level, "debug");

    unsafe {
        std::env::remove_var("CONFIG_DIR");
        std::env::remove_var("EECA_ENV");
        std::env::remove_var("EECA_OBSERVABILITY__LOG_LEVEL");
    }
    let _ = fs::remove_dir_all(&dir);
}
