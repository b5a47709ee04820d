use anyhow::Result;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the analyzer simulator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HemogasConfig {
    /// Operator session settings
    pub session: SessionConfig,
    /// Calibration workflow settings
    pub calibration: CalibrationConfig,
    /// Analysis acquisition settings
    pub analysis: AnalysisConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Idle timeout for an authenticated session, in seconds
    pub duration_secs: u64,
    /// How long before timeout the expiry warning fires, in seconds
    pub warning_lead_secs: u64,
    /// Period of the time-remaining refresh ticker, in seconds
    pub ticker_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    /// Retries allowed per step before the run fails
    pub max_retry_count: u32,
    /// Days a successful calibration stays valid
    pub validity_days: i64,
    /// Nominal duration of each calibration step, in milliseconds
    pub step_duration_ms: u64,
    /// Simulated per-step success probability, in percent
    pub success_rate_percent: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Lower bound of the simulated acquisition latency, in milliseconds
    pub min_duration_ms: u64,
    /// Upper bound of the simulated acquisition latency, in milliseconds
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level filter (overridden by RUST_LOG)
    pub log_level: String,
}

impl SessionConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn warning_lead(&self) -> Duration {
        Duration::from_secs(self.warning_lead_secs)
    }

    pub fn ticker_period(&self) -> Duration {
        Duration::from_secs(self.ticker_secs)
    }
}

impl CalibrationConfig {
    pub fn step_duration(&self) -> Duration {
        Duration::from_millis(self.step_duration_ms)
    }
}

impl AnalysisConfig {
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl Default for HemogasConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                duration_secs: 30 * 60,
                warning_lead_secs: 2 * 60,
                ticker_secs: 60,
            },
            calibration: CalibrationConfig {
                max_retry_count: 3,
                validity_days: 30,
                step_duration_ms: 2000,
                success_rate_percent: 90,
            },
            analysis: AnalysisConfig {
                min_duration_ms: 3000,
                max_duration_ms: 5000,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl HemogasConfig {
    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. Configuration file (hemogas.toml)
    /// 3. Environment variables (prefixed with HEMOGAS__)
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&HemogasConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("hemogas.toml").exists() {
            builder = builder.add_source(File::with_name("hemogas"));
        }

        builder = builder.add_source(
            Environment::with_prefix("HEMOGAS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
