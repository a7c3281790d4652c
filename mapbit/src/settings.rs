use crate::logger::Level;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Strong,
    Weak,
    Lru,
    None,
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strong" => Ok(CacheKind::Strong),
            "weak" => Ok(CacheKind::Weak),
            "lru" => Ok(CacheKind::Lru),
            "none" | "off" => Ok(CacheKind::None),
            _ => Err(format!("Invalid value for cache kind: {}", s)),
        }
    }
}

impl<'de> serde::Deserialize<'de> for CacheKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CacheKind::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineSettings {
    pub cache: CacheSettings,
    pub id_generation: IdGenerationSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub kind: CacheKind,
    pub weak_keys: bool,
    pub concurrent: bool,
    pub purge_interval: usize,
    pub lru_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { kind: CacheKind::Strong, weak_keys: false, concurrent: true, purge_interval: 500, lru_capacity: 10_000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IdGenerationSettings {
    pub retry_budget: usize,
}

impl Default for IdGenerationSettings {
    fn default() -> Self {
        Self { retry_budget: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Level,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: Level::Info }
    }
}

impl EngineSettings {
    /// Reads `path` (any format the config crate knows) with `MAPBIT__SECTION__KEY` overrides.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder =
            Config::builder()
                .add_source(File::with_name(path).required(true))
                .add_source(Self::environment());
        builder.build()?.try_deserialize()
    }

    /// Defaults with environment overrides only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder().add_source(Self::environment()).build()?.try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix("MAPBIT").try_parsing(true).separator("__")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn partial_file_keeps_defaults() {
        let toml = r#"
            [cache]
            kind = "weak"
            purge_interval = 50

            [logging]
            level = "debug"
        "#;
        let settings: EngineSettings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.cache.kind, CacheKind::Weak);
        assert_eq!(settings.cache.purge_interval, 50);
        assert_eq!(settings.cache.lru_capacity, 10_000);
        assert_eq!(settings.id_generation.retry_budget, 10);
        assert_eq!(settings.logging.level, Level::Debug);
    }

    #[test]
    fn rejects_unknown_cache_kind() {
        assert!("sticky".parse::<CacheKind>().is_err());
        assert_eq!("OFF".parse::<CacheKind>().unwrap(), CacheKind::None);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(EngineSettings::new("does/not/exist/mapbit").is_err());
    }
}
