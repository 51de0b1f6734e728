use crate::error::{Result, ShutterError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ConvergenceMode
// ---------------------------------------------------------------------------

/// Where a device's target position comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceMode {
    /// Oldest pending MoveRequest drives the device; completion is recorded
    /// on the request.
    #[default]
    Requests,
    /// `spec.position` of the DeviceRecord drives the device; completion is
    /// recorded as the record's own `AtPosition` condition.
    Direct,
}

impl ConvergenceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvergenceMode::Requests => "requests",
            ConvergenceMode::Direct => "direct",
        }
    }
}

impl std::fmt::Display for ConvergenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConvergenceMode {
    type Err = ShutterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "requests" => Ok(ConvergenceMode::Requests),
            "direct" => Ok(ConvergenceMode::Direct),
            _ => Err(ShutterError::InvalidConfig(format!(
                "unknown mode '{s}', must be one of: requests, direct"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Requeue interval while the device is at rest.
    #[serde(default = "default_requeue_secs")]
    pub default_requeue_secs: u64,
    /// Requeue interval while the device is opening or closing.
    #[serde(default = "default_moving_requeue_secs")]
    pub moving_requeue_secs: u64,
    /// Completed MoveRequests kept per device before garbage collection.
    #[serde(default = "default_request_history_limit")]
    pub request_history_limit: usize,
    /// Deadline for each store or device call within a pass.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    #[serde(default = "default_base_backoff_millis")]
    pub base_backoff_millis: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default)]
    pub mode: ConvergenceMode,
}

fn default_requeue_secs() -> u64 {
    30
}

fn default_moving_requeue_secs() -> u64 {
    2
}

fn default_request_history_limit() -> usize {
    5
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    2
}

fn default_resync_secs() -> u64 {
    300
}

fn default_gc_interval_secs() -> u64 {
    60
}

fn default_base_backoff_millis() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    300
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_requeue_secs: default_requeue_secs(),
            moving_requeue_secs: default_moving_requeue_secs(),
            request_history_limit: default_request_history_limit(),
            call_timeout_secs: default_call_timeout_secs(),
            workers: default_workers(),
            resync_secs: default_resync_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            base_backoff_millis: default_base_backoff_millis(),
            max_backoff_secs: default_max_backoff_secs(),
            mode: ConvergenceMode::default(),
        }
    }
}

impl ControllerConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: ControllerConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn default_requeue(&self) -> Duration {
        Duration::from_secs(self.default_requeue_secs)
    }

    pub fn moving_requeue(&self) -> Duration {
        Duration::from_secs(self.moving_requeue_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_millis)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.workers == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "workers must be at least 1".to_string(),
            });
        }

        if self.call_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "call_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.default_requeue_secs == 0 || self.moving_requeue_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "requeue intervals must be greater than 0".to_string(),
            });
        } else if self.moving_requeue_secs >= self.default_requeue_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "moving_requeue_secs ({}) is not shorter than default_requeue_secs ({}); \
                     moving shutters will be polled no faster than idle ones",
                    self.moving_requeue_secs, self.default_requeue_secs
                ),
            });
        }

        if self.resync_secs == 0 || self.gc_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "resync_secs and gc_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.request_history_limit == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "request_history_limit is 0: completed requests are never collected"
                    .to_string(),
            });
        }

        if self.base_backoff_millis > self.max_backoff_secs.saturating_mul(1000) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "base_backoff_millis exceeds max_backoff_secs".to_string(),
            });
        }

        warnings
    }

    /// `Err` if `validate()` reports any error-level finding.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutterError::InvalidConfig(errors.join("; ")))
        }
    }
}
