use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Верхняя граница для любых задержек трекера
const MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub filters: FilterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Отключает show/hide-хуки и терпимость к маскировке host-wrapped окон
    #[serde(default)]
    pub strict_filtering: bool,
    /// Оставлять замаскированные (cloaked) окна на панели задач
    #[serde(default)]
    pub keep_cloaked: bool,
    pub redraw_debounce_ms: u64,
    pub monitor_settle_ms: u64,
    pub host_retry_ms: u64,
    #[serde(default = "default_host_wrapped_classes")]
    pub host_wrapped_classes: Vec<String>,
    #[serde(default = "default_host_wrapped_processes")]
    pub host_wrapped_processes: Vec<String>,
}

/// Пользовательские списки исключений для классификатора
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub excluded_classes: Vec<String>,
    #[serde(default)]
    pub ignored_processes: Vec<String>,
    #[serde(default)]
    pub ignored_titles: Vec<String>,
}

fn default_host_wrapped_classes() -> Vec<String> {
    vec![
        "ApplicationFrameWindow".to_string(),
        "Windows.UI.Core.CoreWindow".to_string(),
    ]
}

fn default_host_wrapped_processes() -> Vec<String> {
    vec!["ApplicationFrameHost.exe".to_string()]
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            strict_filtering: false,
            keep_cloaked: false,
            redraw_debounce_ms: 50,
            monitor_settle_ms: 50,
            host_retry_ms: 500,
            host_wrapped_classes: default_host_wrapped_classes(),
            host_wrapped_processes: default_host_wrapped_processes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            tracker: TrackerConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TRACKER_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        let delays = [
            ("redraw_debounce_ms", self.tracker.redraw_debounce_ms),
            ("monitor_settle_ms", self.tracker.monitor_settle_ms),
            ("host_retry_ms", self.tracker.host_retry_ms),
        ];
        for (name, value) in delays {
            if value > MAX_DELAY_MS {
                anyhow::bail!("{} должно быть не больше {}", name, MAX_DELAY_MS);
            }
        }

        if self.tracker.redraw_debounce_ms == 0 {
            anyhow::bail!("redraw_debounce_ms должно быть больше 0");
        }

        for (i, class) in self.tracker.host_wrapped_classes.iter().enumerate() {
            if class.trim().is_empty() {
                anyhow::bail!("Пустой класс в host_wrapped_classes #{}", i + 1);
            }
        }

        Ok(())
    }

    /// Настройки трекера в виде, готовом для библиотеки
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings::from(&self.tracker)
    }
}

/// Runtime policy and timing of the tracker, derived from [`TrackerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub strict_filtering: bool,
    pub keep_cloaked: bool,
    pub redraw_debounce: Duration,
    pub monitor_settle: Duration,
    pub host_retry: Duration,
    pub host_wrapped_classes: HashSet<String>,
    pub host_wrapped_processes: HashSet<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl From<&TrackerConfig> for TrackerSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            strict_filtering: config.strict_filtering,
            keep_cloaked: config.keep_cloaked,
            redraw_debounce: Duration::from_millis(config.redraw_debounce_ms),
            monitor_settle: Duration::from_millis(config.monitor_settle_ms),
            host_retry: Duration::from_millis(config.host_retry_ms),
            host_wrapped_classes: config
                .host_wrapped_classes
                .iter()
                .map(|c| c.trim().to_string())
                .collect(),
            host_wrapped_processes: config
                .host_wrapped_processes
                .iter()
                .map(|p| p.trim().to_string())
                .collect(),
        }
    }
}

impl TrackerSettings {
    pub fn with_strict_filtering(mut self, strict: bool) -> Self {
        self.strict_filtering = strict;
        self
    }

    pub fn with_keep_cloaked(mut self, keep: bool) -> Self {
        self.keep_cloaked = keep;
        self
    }
}
