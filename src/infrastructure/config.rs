// Service configuration loaded from file and environment
use crate::application::plot_controller::PlotConfig;
use crate::application::sampler::SamplerConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sampler: SamplerSettings,
    #[serde(default)]
    pub plot: PlotSettings,
    #[serde(default)]
    pub dashboard: DashboardSettings,
    #[serde(default)]
    pub archive: ArchiveSettings,
    #[serde(default)]
    pub influx: Option<InfluxSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplerSettings {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlotSettings {
    #[serde(default = "default_min_range_s")]
    pub min_range_s: f64,
    #[serde(default = "default_snap_to_now_s")]
    pub snap_to_now_s: f64,
    #[serde(default = "default_points_per_window")]
    pub points_per_window: f64,
    #[serde(default = "default_range_s")]
    pub default_range_s: f64,
    #[serde(default)]
    pub step_ms: Option<i64>,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            min_range_s: default_min_range_s(),
            snap_to_now_s: default_snap_to_now_s(),
            points_per_window: default_points_per_window(),
            default_range_s: default_range_s(),
            step_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Influx,
    #[default]
    None,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ArchiveSettings {
    #[serde(default)]
    pub kind: ArchiveKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_capacity() -> usize {
    1000
}

fn default_interval_ms() -> i64 {
    2000
}

fn default_min_range_s() -> f64 {
    300.0
}

fn default_snap_to_now_s() -> f64 {
    10.0
}

fn default_points_per_window() -> f64 {
    1000.0
}

fn default_range_s() -> f64 {
    300.0
}

fn default_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

fn default_retention_policy() -> String {
    "autogen".to_string()
}

impl AppConfig {
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            capacity: self.sampler.capacity,
            interval_ms: self.sampler.interval_ms,
        }
    }

    pub fn plot_config(&self) -> PlotConfig {
        PlotConfig {
            min_range_s: self.plot.min_range_s,
            snap_to_now_s: self.plot.snap_to_now_s,
            points_per_window: self.plot.points_per_window,
            default_range_s: self.plot.default_range_s,
            step_ms: self.plot.step_ms,
        }
    }

    /// Rejects settings that would give an empty ring, a non-positive
    /// sampling interval or a zero plot step.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sampler.capacity == 0 {
            anyhow::bail!("sampler.capacity must be at least 1");
        }
        if self.sampler.interval_ms <= 0 {
            anyhow::bail!("sampler.interval_ms must be positive, got {}", self.sampler.interval_ms);
        }
        if !(self.plot.points_per_window.is_finite() && self.plot.points_per_window >= 1.0) {
            anyhow::bail!(
                "plot.points_per_window must be at least 1, got {}",
                self.plot.points_per_window
            );
        }
        if !(self.plot.min_range_s.is_finite() && self.plot.min_range_s > 0.0) {
            anyhow::bail!("plot.min_range_s must be positive, got {}", self.plot.min_range_s);
        }
        if !(self.plot.default_range_s.is_finite() && self.plot.default_range_s > 0.0) {
            anyhow::bail!("plot.default_range_s must be positive, got {}", self.plot.default_range_s);
        }
        if let Some(step_ms) = self.plot.step_ms.filter(|step| *step <= 0) {
            anyhow::bail!("plot.step_ms must be positive, got {}", step_ms);
        }
        Ok(())
    }
}

/// Loads `config/telemetry.toml` if present, then `TELEMETRY__SECTION__KEY`
/// environment overrides.
pub fn load_config() -> anyhow::Result<AppConfig> {
    load_config_from("config/telemetry")
}

pub fn load_config_from(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("TELEMETRY")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("dashboard.hosts"),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.sampler_config(), SamplerConfig::default());
        assert_eq!(config.plot_config(), PlotConfig::default());
        assert_eq!(config.dashboard.hosts, vec!["localhost"]);
        assert_eq!(config.archive.kind, ArchiveKind::None);
        assert!(config.influx.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [plot]
            step_ms = 5000

            [dashboard]
            hosts = ["localhost", "web-1"]

            [archive]
            kind = "influx"

            [influx]
            host = "http://influx:8086"
            token = "secret"
            database = "metrics"
            "#,
        )
        .unwrap();

        assert_eq!(config.plot.step_ms, Some(5000));
        assert_eq!(config.plot.min_range_s, 300.0);
        assert_eq!(config.dashboard.hosts.len(), 2);
        assert_eq!(config.archive.kind, ArchiveKind::Influx);

        let influx = config.influx.unwrap();
        assert_eq!(influx.database, "metrics");
        assert_eq!(influx.retention_policy, "autogen");
    }

    #[test]
    fn test_validate_rejects_zero_steps() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());

        for section in [
            "[plot]\npoints_per_window = 0.0",
            "[plot]\npoints_per_window = -5.0",
            "[plot]\nstep_ms = 0",
            "[plot]\nstep_ms = -1000",
            "[plot]\nmin_range_s = 0.0",
            "[sampler]\ninterval_ms = 0",
            "[sampler]\ncapacity = 0",
        ] {
            let config: AppConfig = toml::from_str(section).unwrap();
            assert!(config.validate().is_err(), "accepted {:?}", section);
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config_from("config/does-not-exist").unwrap();
        assert_eq!(config.sampler.capacity, 1000);
        assert!(!config.dashboard.hosts.is_empty());
    }
}
