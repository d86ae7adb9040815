//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RELAY__*` 覆盖（双下划线表示嵌套，如 `RELAY__REGISTRY__DEFAULT_TTL_SECS=60`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::execution::CorrelationConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub correlation: CorrelationSection,
    #[serde(default)]
    pub history: HistorySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [registry] 段：执行 TTL
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    600
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl RegistrySection {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs.max(1))
    }
}

/// [correlation] 段：相似度匹配参数
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationSection {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// 参与比较的最短词长（4 即「长度大于 3」）
    #[serde(default = "default_min_word_len")]
    pub min_word_len: usize,
    #[serde(default = "default_match_prefixes")]
    pub match_prefixes: bool,
}

fn default_similarity_threshold() -> f64 {
    0.4
}

fn default_min_word_len() -> usize {
    4
}

fn default_match_prefixes() -> bool {
    true
}

impl Default for CorrelationSection {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_word_len: default_min_word_len(),
            match_prefixes: default_match_prefixes(),
        }
    }
}

impl CorrelationSection {
    pub fn to_correlation_config(&self) -> CorrelationConfig {
        CorrelationConfig {
            similarity_threshold: self.similarity_threshold.clamp(0.0, 1.0),
            min_word_len: self.min_word_len.max(1),
            match_prefixes: self.match_prefixes,
        }
    }
}

/// [history] 段：保留条数与可选的 NDJSON 日志文件
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
    pub journal_path: Option<PathBuf>,
}

fn default_history_capacity() -> usize {
    100
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            journal_path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RELAY__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.registry.default_ttl(), Duration::from_secs(600));
        assert_eq!(cfg.history.capacity, 100);
        let corr = cfg.correlation.to_correlation_config();
        assert_eq!(corr, CorrelationConfig::default());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "[registry]\ndefault_ttl_secs = 30\n\n[correlation]\nsimilarity_threshold = 0.6\n\n[history]\ncapacity = 5\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.registry.default_ttl_secs, 30);
        assert_eq!(cfg.correlation.similarity_threshold, 0.6);
        assert_eq!(cfg.correlation.min_word_len, 4);
        assert_eq!(cfg.history.capacity, 5);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let section = CorrelationSection {
            similarity_threshold: 3.0,
            ..Default::default()
        };
        assert_eq!(section.to_correlation_config().similarity_threshold, 1.0);
    }
}
