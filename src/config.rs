use crate::error::{PipelineError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Ticks per run when none is given
pub const DEFAULT_TICKS: u64 = 1000;

/// Generator, processor, filter/reduce
pub const DEFAULT_STAGE_COUNT: usize = 3;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Deadline of every queue push/pop
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

pub const DEFAULT_SEED: u64 = 42;

/// Generator pause of the command-line runner, pacing it like a real source.
/// Library runs default to no pause.
pub const DEFAULT_CLI_GENERATOR_PAUSE: Duration = Duration::from_millis(1);

/// Tunables of a pipeline coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub queue_timeout: Duration,
    /// Seed of the generator's value source
    pub seed: u64,
    /// Pause of the generator after each barrier cycle
    pub generator_pause: Duration,
    /// CSV record log; `None` discards records
    pub log_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            seed: DEFAULT_SEED,
            generator_pause: Duration::ZERO,
            log_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.queue_timeout.is_zero() {
            return Err(PipelineError::Config(
                "queue timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Check a stage count before a run
pub fn validate_stage_count(stage_count: usize) -> Result<()> {
    if stage_count < 2 {
        return Err(PipelineError::Config(format!(
            "stage count must be at least 2, got {stage_count}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.queue_timeout, Duration::from_secs(1));
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = PipelineConfig {
            queue_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = PipelineConfig {
            queue_timeout: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_stage_count() {
        assert!(validate_stage_count(1).is_err());
        assert!(validate_stage_count(2).is_ok());
        assert!(validate_stage_count(DEFAULT_STAGE_COUNT).is_ok());
    }
}
