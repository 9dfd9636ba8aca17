use crate::error::{LifelineError, Result};
use crate::time_unit::TimeUnit;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

static TEST_MODE: AtomicBool = AtomicBool::new(false);
static TIMEOUT_SCALING: AtomicU32 = AtomicU32::new(1);
static TEST_TIMEOUT: RwLock<Option<Duration>> = RwLock::new(None);

/// Load config from a specific TOML file
pub fn load_toml_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
        .add_source(environment())
        .build()?;
    Ok(config)
}

/// Load config from a specific YAML file
pub fn load_yaml_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()).format(FileFormat::Yaml))
        .add_source(environment())
        .build()?;
    Ok(config)
}

/// `LIFELINE_TEST_MODE=true`, `LIFELINE_TIMEOUT_SCALING=10`, ...
fn environment() -> config::Environment {
    config::Environment::with_prefix("LIFELINE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Process-wide lifeline settings.
///
/// ```toml
/// test_mode = true
/// timeout_scaling = 10
/// test_timeout = "0ms"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run polls suspended and shorten timeouts.
    pub test_mode: bool,
    /// Divisor applied to requested timeouts in test mode.
    pub timeout_scaling: u32,
    /// Fixed timeout substituted for every request in test mode.
    pub test_timeout: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            test_mode: false,
            timeout_scaling: 1,
            test_timeout: None,
        }
    }
}

impl Settings {
    /// Deserialize settings from a loaded config.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(config.clone().try_deserialize()?)
    }

    /// Settings from `LIFELINE_*` environment variables alone.
    pub fn from_env() -> Result<Self> {
        let config = Config::builder().add_source(environment()).build()?;
        Self::from_config(&config)
    }

    /// Install these settings as the process-wide values.
    pub fn apply(&self) -> Result<()> {
        let test_timeout = match &self.test_timeout {
            Some(raw) => Some(TimeUnit::parse_duration(raw).ok_or_else(|| {
                LifelineError::Config(format!("invalid test_timeout `{}`", raw))
            })?),
            None => None,
        };

        set_test_mode(self.test_mode);
        TIMEOUT_SCALING.store(self.timeout_scaling.max(1), Ordering::Relaxed);
        *TEST_TIMEOUT.write().unwrap_or_else(|e| e.into_inner()) = test_timeout;

        info!(
            test_mode = self.test_mode,
            timeout_scaling = self.timeout_scaling,
            test_timeout = ?test_timeout,
            "Applied lifeline settings"
        );
        Ok(())
    }
}

/// Turn test mode on or off for the whole process.
pub fn set_test_mode(enabled: bool) {
    TEST_MODE.store(enabled, Ordering::Relaxed);
}

/// Whether lifeline is running under the test flag.
pub fn is_test_mode() -> bool {
    TEST_MODE.load(Ordering::Relaxed)
}

/// Per-call overrides for [`get_timeout_or_test_fallback`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutOptions {
    pub timeout: Option<Duration>,
    pub scaling: Option<u32>,
}

/// Returns `requested` outside test mode. In test mode, returns the override
/// timeout if one is set (per call first, then process-wide), otherwise
/// `requested` divided by the scaling factor.
pub fn get_timeout_or_test_fallback(requested: Duration, options: TimeoutOptions) -> Duration {
    if !is_test_mode() {
        return requested;
    }

    let fixed = options
        .timeout
        .or_else(|| *TEST_TIMEOUT.read().unwrap_or_else(|e| e.into_inner()));
    if let Some(timeout) = fixed {
        return timeout;
    }

    let scaling = options
        .scaling
        .unwrap_or_else(|| TIMEOUT_SCALING.load(Ordering::Relaxed))
        .max(1);
    requested / scaling
}
