//! Run configuration
//!
//! `RunOptions` carries every run-wide policy knob: concurrency, CPU
//! admission control, retry and timeout defaults. Loadable from a TOML file
//! so hosts can ship a checked-in profile; every field has a default so a
//! partial file works.

use lattice_core::{Error, Result};
use lattice_scheduler::SchedulerOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default options file name
pub const OPTIONS_FILE_NAME: &str = "lattice.toml";

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

fn default_cpu_ceiling_percent() -> f32 {
    90.0
}

fn default_cpu_sample_interval_ms() -> u64 {
    250
}

fn default_retry_limit() -> u32 {
    0
}

fn default_timeout_ms() -> u64 {
    300_000
}

/// Run-wide policy options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Hard cap on simultaneously running tests
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// CPU-utilization ceiling for admission control, in percent; values of
    /// 100 or more disable the gate
    #[serde(default = "default_cpu_ceiling_percent")]
    pub cpu_ceiling_percent: f32,

    /// Sampling interval for the admission gate, in milliseconds
    #[serde(default = "default_cpu_sample_interval_ms")]
    pub cpu_sample_interval_ms: u64,

    /// Retry budget applied to definitions that declare none
    #[serde(default = "default_retry_limit")]
    pub default_retry_limit: u32,

    /// Per-attempt timeout in milliseconds; 0 disables the timeout
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Reconstruct the class instance before each retry attempt instead of
    /// reusing the one built during expansion
    #[serde(default)]
    pub retry_rebuilds_instance: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            cpu_ceiling_percent: default_cpu_ceiling_percent(),
            cpu_sample_interval_ms: default_cpu_sample_interval_ms(),
            default_retry_limit: default_retry_limit(),
            default_timeout_ms: default_timeout_ms(),
            retry_rebuilds_instance: false,
        }
    }
}

impl RunOptions {
    /// Load options from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("cannot read options file: {e}")))?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("cannot parse options: {e}")))
    }

    /// Save options to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize options: {e}")))?;
        std::fs::write(path.as_ref(), text)
            .map_err(|e| Error::Config(format!("cannot write options file: {e}")))
    }

    /// The scheduler-facing subset of these options
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_concurrency: self.max_concurrency,
            cpu_ceiling_percent: self.cpu_ceiling_percent,
            cpu_sample_interval_ms: self.cpu_sample_interval_ms,
            default_timeout_ms: self.default_timeout_ms,
            retry_rebuilds_instance: self.retry_rebuilds_instance,
        }
    }
}
