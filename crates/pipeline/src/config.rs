use llmops_runtime::config::{env_parse, ConfigError};
use llmops_runtime::GenerationParams;

/// Sampling settings applied to every workflow node.
///
/// | Env Var                        | Default |
/// |--------------------------------|---------|
/// | `WORKFLOW_MAX_TOKENS`          | 256     |
/// | `WORKFLOW_TEMPERATURE`         | 0.7     |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_tokens: env_parse("WORKFLOW_MAX_TOKENS", defaults.max_tokens)?,
            temperature: env_parse("WORKFLOW_TEMPERATURE", defaults.temperature)?,
        })
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded_and_low_temperature() {
        let params = ExecutorConfig::default().params();
        assert_eq!(params.max_tokens, 256);
        assert!((params.temperature - 0.7).abs() < f32::EPSILON);
    }
}
