//! Runtime configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use llmops_core::logs::DEFAULT_LOG_CAPACITY;
use llmops_core::ports::DEFAULT_BASE_PORT;

/// An environment variable was set to something unparsable.
#[derive(Debug, thiserror::Error)]
#[error("Invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Parse `var` if it is set, else return `default`.
pub fn env_parse<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Boolean flag accepting `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn env_flag(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            var,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn env_secs(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    env_parse(var, default).map(Duration::from_secs)
}

/// Instance manager limits and timeouts.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// First port handed out by the allocator.
    pub base_port: u16,
    /// Maximum number of live (non-terminal) instances.
    pub max_instances: usize,
    /// Log entries retained per instance.
    pub log_capacity: usize,
    /// Wait after the graceful terminate signal before force-killing.
    pub stop_grace: Duration,
    /// Wait after force-kill for exit confirmation.
    pub kill_grace: Duration,
    /// A process instance still STARTING after this long moves to ERROR.
    pub readiness_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            max_instances: 5,
            log_capacity: DEFAULT_LOG_CAPACITY,
            stop_grace: Duration::from_secs(10),
            kill_grace: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(600),
        }
    }
}

impl ManagerConfig {
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `LLMOPS_BASE_PORT`               | `8000`  |
    /// | `LLMOPS_MAX_INSTANCES`           | `5`     |
    /// | `LLMOPS_LOG_CAPACITY`            | `500`   |
    /// | `LLMOPS_STOP_GRACE_SECS`         | `10`    |
    /// | `LLMOPS_KILL_GRACE_SECS`         | `5`     |
    /// | `LLMOPS_READINESS_TIMEOUT_SECS`  | `600`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            base_port: env_parse("LLMOPS_BASE_PORT", d.base_port)?,
            max_instances: env_parse("LLMOPS_MAX_INSTANCES", d.max_instances)?,
            log_capacity: env_parse("LLMOPS_LOG_CAPACITY", d.log_capacity)?,
            stop_grace: env_secs("LLMOPS_STOP_GRACE_SECS", d.stop_grace.as_secs())?,
            kill_grace: env_secs("LLMOPS_KILL_GRACE_SECS", d.kill_grace.as_secs())?,
            readiness_timeout: env_secs(
                "LLMOPS_READINESS_TIMEOUT_SECS",
                d.readiness_timeout.as_secs(),
            )?,
        })
    }
}

/// How vLLM OpenAI-compatible servers are launched.
#[derive(Debug, Clone)]
pub struct VllmConfig {
    /// Python interpreter with vLLM installed.
    pub python: String,
    /// Interface the spawned server binds to; also used by the HTTP client.
    pub host: String,
    pub force_cpu: bool,
    pub use_gpu: bool,
    /// Upper bound on `--max-model-len` in CPU mode.
    pub cpu_max_model_len: u32,
}

impl Default for VllmConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            host: "127.0.0.1".to_string(),
            force_cpu: true,
            use_gpu: false,
            cpu_max_model_len: 2048,
        }
    }
}

impl VllmConfig {
    /// | Env Var                  | Default     |
    /// |--------------------------|-------------|
    /// | `VLLM_PYTHON`            | `python`    |
    /// | `VLLM_HOST`              | `127.0.0.1` |
    /// | `FORCE_CPU_MODE`         | `true`      |
    /// | `USE_GPU`                | `false`     |
    /// | `VLLM_CPU_MAX_MODEL_LEN` | `2048`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            python: std::env::var("VLLM_PYTHON").unwrap_or(d.python),
            host: std::env::var("VLLM_HOST").unwrap_or(d.host),
            force_cpu: env_flag("FORCE_CPU_MODE", d.force_cpu)?,
            use_gpu: env_flag("USE_GPU", d.use_gpu)?,
            cpu_max_model_len: env_parse("VLLM_CPU_MAX_MODEL_LEN", d.cpu_max_model_len)?,
        })
    }

    /// GPU flags are only emitted when CPU mode is not forced.
    pub fn gpu_enabled(&self) -> bool {
        !self.force_cpu && self.use_gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_defaults_match_documented_values() {
        let c = ManagerConfig::default();
        assert_eq!(c.base_port, 8000);
        assert_eq!(c.max_instances, 5);
        assert_eq!(c.log_capacity, 500);
        assert_eq!(c.stop_grace, Duration::from_secs(10));
        assert_eq!(c.kill_grace, Duration::from_secs(5));
    }

    #[test]
    fn forced_cpu_overrides_gpu_flag() {
        let c = VllmConfig {
            use_gpu: true,
            ..Default::default()
        };
        assert!(!c.gpu_enabled());
        let c = VllmConfig {
            force_cpu: false,
            use_gpu: true,
            ..Default::default()
        };
        assert!(c.gpu_enabled());
    }

    #[test]
    fn unset_variable_uses_default() {
        let v: u16 = env_parse("LLMOPS_TEST_SURELY_UNSET_PORT", 1234).unwrap();
        assert_eq!(v, 1234);
        assert!(env_flag("LLMOPS_TEST_SURELY_UNSET_FLAG", true).unwrap());
    }
}
